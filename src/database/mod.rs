pub mod memory;
pub mod pool;
pub mod postgres;
pub mod store;

pub use memory::MemorySessionStore;
pub use postgres::PgSessionStore;
pub use store::SessionStore;
