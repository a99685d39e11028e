//! Database module for PostgreSQL persistence.

mod clock;
mod pool;
mod records;

pub use clock::*;
pub use pool::*;
pub use records::*;
