pub mod memory;
pub mod persistence;
pub mod vault;

pub use memory::MemoryPersister;
pub use persistence::JsonFilePersister;
pub use vault::Vault;
