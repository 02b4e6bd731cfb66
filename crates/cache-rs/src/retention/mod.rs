//! Retention layer: devices, spans, stripes and logical volumes.

pub mod device;
pub mod span;
pub mod stripe;
pub mod volume;
