//! Command implementations.

mod info;
mod route;
mod validate;

pub use info::run_info;
pub use route::run_route;
pub use validate::run_validate;
