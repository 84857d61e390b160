pub mod cache;

pub use cache::{fingerprint, KeyCache, KeyCacheConfig};
