//! Repository implementations for database operations

pub mod positions;
pub mod scan_results;

pub use positions::*;
pub use scan_results::*;
