pub mod memory;
pub mod models;
pub mod postgres;
pub mod repository;

pub use memory::MemoryRepository;
pub use models::*;
pub use postgres::PgRepository;
pub use repository::{LedgerRepository, OrderRepository};
