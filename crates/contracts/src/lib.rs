//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the change router.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - All timestamps are UTC wall-clock (`chrono::DateTime<Utc>`)
//! - `position` on a change record is an opaque log offset token, never interpreted here

mod change;
mod config;
mod delivery;
mod destination;
mod error;

pub use change::*;
pub use config::*;
pub use delivery::*;
pub use destination::*;
pub use error::*;
