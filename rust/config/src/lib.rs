//! Job descriptors shared between the JODIE launcher crates.

mod device;
mod job;
mod train;

pub use device::*;
pub use job::*;
pub use train::*;
