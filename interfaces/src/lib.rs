pub mod database;
pub mod defs;
pub mod hash;
pub mod memory;
pub mod state;
pub mod text;

pub use database::PgContentStore;
pub use defs::*;
pub use memory::MemoryStore;
pub use state::{ContentStore, StoreError, StoreResult};
