// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

pub mod memory;
pub mod resilient;
pub mod traits;

pub use memory::MemorySink;
pub use resilient::{DeliveryError, ResilientSink};
pub use traits::{Sink, SinkError};
