pub mod store;

pub use store::{
    CacheError, CacheState, CacheStore, FileCacheStore, MemoryCacheStore, SCHEMA_VERSION,
};
