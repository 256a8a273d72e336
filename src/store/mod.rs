pub mod database;
pub mod memory;
pub mod object_store;
pub mod s3;

pub use database::{FlashStore, FlashViewRow, StoreStats};
pub use memory::InMemoryObjectStore;
pub use object_store::{list_all, ListPage, ObjectStore};
pub use s3::S3ObjectStore;
