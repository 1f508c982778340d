//! Atlas Sleep Cache Library
//!
//! Reference-counted sprite atlas cache: atlases load when the first consumer
//! needs them and unload when the last one lets go.

pub mod backend;
pub mod config;
pub mod error;
pub mod manager;
pub mod observer;
pub mod pool;
pub mod shared;

pub use backend::{AtlasBackend, MemoryAtlas, MemoryBackend, MemorySprite, TextureId};
pub use config::{CacheConfig, ConfigError, DEFAULT_POOL_CAPACITY};
pub use error::{AtlasError, AtlasResult};
pub use manager::{AtlasCache, AtlasInfo, CacheStats, LoadedAtlasInfo};
pub use observer::{AtlasEvent, ObserverList, SubscriptionId};
pub use pool::{Pool, PoolError, PoolStats, PoolToken, Pooled};
pub use shared::SharedAtlasCache;
