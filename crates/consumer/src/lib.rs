//! Atlas Sleep Consumer Library
//!
//! Consumer side of the atlas cache: images discover the atlas they display
//! from, then hold a reference only while visible.
//!
//! # Example
//!
//! ```
//! use atlas_sleep_cache::{AtlasCache, CacheConfig, MemoryBackend};
//! use atlas_sleep_consumer::{ConsumerConfig, SleepGroup, SleeperImage};
//! use atlas_sleep_storage::{AtlasDescriptor, DescriptorTable};
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! let table = DescriptorTable::new(vec![
//!     AtlasDescriptor::new(1, "ui_icons", "atlases/icons", ["gear"]),
//! ])
//! .unwrap();
//! let backend = MemoryBackend::new().with_atlas("atlases/icons", ["gear"]);
//! let mut cache = AtlasCache::new(Arc::new(table), backend, &CacheConfig::default());
//!
//! // The host displays a sprite from the atlas
//! cache.load("ui_icons").unwrap();
//! let sprite = cache.sprite("ui_icons", "gear");
//!
//! let now = Instant::now();
//! let mut group = SleepGroup::new();
//! let image = SleeperImage::new("gear", sprite, &ConsumerConfig::default(), now);
//! group.push(&mut cache, image, now).unwrap();
//! assert_eq!(cache.ref_count("ui_icons"), 1);
//!
//! // Hiding the group unloads the atlas
//! group.set_visible(&mut cache, false).unwrap();
//! assert!(!cache.is_loaded("ui_icons"));
//! ```

pub mod config;
pub mod group;
pub mod image;

pub use config::{AcquirePolicy, ConsumerConfig, DEFAULT_RESOLVE_DEADLINE};
pub use group::{LoadSignal, SleepGroup};
pub use image::{ResolveState, SleeperImage};
