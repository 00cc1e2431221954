// Storage backends behind the service layer.
pub mod blob;
pub mod kv;

pub use blob::{Blob, BlobMetadata, BlobStore, FsBlobStore};
pub use kv::{KvNamespace, KvStore, MemoryKv, RedisKv};

#[cfg(test)]
pub use blob::MemoryBlobStore;
