//! Persistence: the `JobStore` seam plus in-memory and libSQL backends.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlJobStore;
pub use memory::MemoryJobStore;
pub use traits::{JobStore, PlaceDirectory};
