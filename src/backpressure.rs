// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queue occupancy classification.
//!
//! The buffer samples `len / capacity` periodically. Raw ratios go to
//! metrics; the [`OccupancyLevel`] derived from them drives log warnings so
//! capacity can be tuned before a dropping buffer starts discarding items or
//! a blocking buffer starts stalling its producers.
//!
//! # Example
//!
//! ```
//! use ingest_engine::OccupancyLevel;
//!
//! let level = OccupancyLevel::from_ratio(0.5);
//! assert_eq!(level, OccupancyLevel::Normal);
//! assert!(!level.should_warn());
//!
//! let level = OccupancyLevel::from_ratio(0.95);
//! assert_eq!(level, OccupancyLevel::High);
//! assert!(level.should_warn());
//!
//! let level = OccupancyLevel::from_ratio(1.0);
//! assert_eq!(level, OccupancyLevel::Saturated);
//! ```

/// Occupancy level of a bounded queue.
///
/// - **Normal** (< 70%): plenty of headroom
/// - **Elevated** (70-90%): consumers are falling behind
/// - **High** (90-100%): drops or producer stalls are imminent
/// - **Saturated** (100%): drops (or stalls) are happening now
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OccupancyLevel {
    Normal = 0,
    Elevated = 1,
    High = 2,
    Saturated = 3,
}

impl OccupancyLevel {
    /// Calculate level from an occupancy ratio (0.0 → 1.0)
    #[must_use]
    pub fn from_ratio(ratio: f64) -> Self {
        match ratio {
            r if r < 0.70 => Self::Normal,
            r if r < 0.90 => Self::Elevated,
            r if r < 1.0 => Self::High,
            _ => Self::Saturated,
        }
    }

    /// Whether the sampler should log a warning at this level
    #[must_use]
    pub fn should_warn(&self) -> bool {
        *self >= Self::High
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Normal => "Normal operation",
            Self::Elevated => "Elevated - consumers falling behind",
            Self::High => "High - queue nearly full",
            Self::Saturated => "Saturated - queue full",
        }
    }
}

impl std::fmt::Display for OccupancyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
