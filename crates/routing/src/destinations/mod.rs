//! Built-in destination implementations
//!
//! Contains LogDestination and FileDestination.

mod file;
mod log;

pub use self::file::{FileDestination, FileDestinationConfig};
pub use self::log::LogDestination;
