//! Database module for PostgreSQL persistence.

mod local;
mod pool;
mod rows;

pub use local::*;
pub use pool::*;
pub use rows::*;
