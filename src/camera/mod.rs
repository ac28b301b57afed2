// Camera domain: device abstraction, pixel conversion, simulated hardware.

pub mod backend;
pub mod convert;
pub mod dummy;
pub mod error;
pub mod types;
