//! Reference-counted atlas cache
//!
//! Resolves atlas tags to loaded atlases and keeps each atlas loaded exactly
//! as long as some consumer references it. An atlas is fetched the first time
//! its tag is acquired and released through the backend the moment its
//! reference count returns to zero.
//!
//! Three maps are kept in lockstep:
//!
//! - tag → [`LoadedAtlasInfo`] (the reference count lives here)
//! - tag → sprite lookup table
//! - representative texture → tag, so a consumer holding only a displayed
//!   texture can discover which atlas it belongs to
//!
//! All three gain an entry on load and lose it on unload. The per-atlas
//! records and sprite tables are recycled through [`Pool`]s.

use crate::backend::AtlasBackend;
use crate::config::CacheConfig;
use crate::error::{AtlasError, AtlasResult};
use crate::observer::{AtlasEvent, ObserverList, SubscriptionId};
use crate::pool::{Pool, PoolStats, Pooled};
use atlas_sleep_storage::{AtlasDescriptor, DescriptorTable};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Bookkeeping for one loaded atlas
pub struct LoadedAtlasInfo<A, T> {
    atlas: Option<A>,
    tag: String,
    ref_count: u32,
    first_sprite_name: Option<String>,
    texture: Option<T>,
}

impl<A, T> LoadedAtlasInfo<A, T> {
    /// The loaded atlas handle
    pub fn atlas(&self) -> Option<&A> {
        self.atlas.as_ref()
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// Name of the sprite whose texture is the reverse-lookup key
    pub fn first_sprite_name(&self) -> Option<&str> {
        self.first_sprite_name.as_deref()
    }

    /// Representative texture of the atlas
    pub fn texture(&self) -> Option<&T> {
        self.texture.as_ref()
    }

    fn reset(&mut self) {
        self.atlas = None;
        self.tag.clear();
        self.ref_count = 0;
        self.first_sprite_name = None;
        self.texture = None;
    }
}

impl<A, T> Default for LoadedAtlasInfo<A, T> {
    fn default() -> Self {
        Self {
            atlas: None,
            tag: String::new(),
            ref_count: 0,
            first_sprite_name: None,
            texture: None,
        }
    }
}

impl<A, T> fmt::Debug for LoadedAtlasInfo<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedAtlasInfo")
            .field("tag", &self.tag)
            .field("ref_count", &self.ref_count)
            .field("first_sprite_name", &self.first_sprite_name)
            .field("loaded", &self.atlas.is_some())
            .finish()
    }
}

/// Loaded-atlas record for a backend
pub type AtlasInfo<B> = LoadedAtlasInfo<<B as AtlasBackend>::Atlas, <B as AtlasBackend>::Texture>;

type SpriteTable<B> = HashMap<String, <B as AtlasBackend>::Sprite>;

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of atlases currently loaded
    pub loaded_atlases: usize,

    /// Sum of reference counts over all loaded atlases
    pub total_refs: u64,

    /// Number of completed loads
    pub loads: u64,

    /// Number of completed unloads
    pub unloads: u64,

    /// Number of loads that failed (unknown tag or fetch failure)
    pub load_failures: u64,

    /// Loaded-atlas record pool
    pub info_pool: PoolStats,

    /// Sprite lookup table pool
    pub sprite_table_pool: PoolStats,
}

/// Reference-counted atlas cache
///
/// Owned by the host's composition root and driven from a single scheduling
/// context. Wrap it in a [`SharedAtlasCache`](crate::SharedAtlasCache) when
/// consumers live on several threads.
///
/// # Example
///
/// ```
/// use atlas_sleep_cache::{AtlasCache, CacheConfig, MemoryBackend};
/// use atlas_sleep_storage::{AtlasDescriptor, DescriptorTable};
/// use std::sync::Arc;
///
/// let table = DescriptorTable::new(vec![
///     AtlasDescriptor::new(1, "ui_icons", "atlases/icons", ["gear", "star"]),
/// ])
/// .unwrap();
/// let backend = MemoryBackend::new().with_atlas("atlases/icons", ["gear", "star"]);
/// let mut cache = AtlasCache::new(Arc::new(table), backend, &CacheConfig::default());
///
/// // Visible: load on first acquire
/// cache.acquire("ui_icons").unwrap();
/// assert!(cache.sprite("ui_icons", "gear").is_some());
///
/// // Invisible: the last release unloads
/// cache.release("ui_icons");
/// assert!(cache.sprite("ui_icons", "gear").is_none());
/// ```
pub struct AtlasCache<B: AtlasBackend> {
    backend: B,
    descriptors: Arc<DescriptorTable>,
    tag_to_info: HashMap<String, Pooled<AtlasInfo<B>>>,
    tag_to_sprites: HashMap<String, Pooled<SpriteTable<B>>>,
    texture_to_tag: HashMap<B::Texture, String>,
    info_pool: Pool<AtlasInfo<B>>,
    sprite_table_pool: Pool<SpriteTable<B>>,
    on_loaded: ObserverList,
    on_unloaded: ObserverList,
    loads: u64,
    unloads: u64,
    load_failures: u64,
}

impl<B: AtlasBackend> AtlasCache<B> {
    /// Create a cache serving the atlases in `descriptors`
    pub fn new(descriptors: Arc<DescriptorTable>, backend: B, config: &CacheConfig) -> Self {
        let strict = config.pools_are_strict();

        Self {
            backend,
            descriptors,
            tag_to_info: HashMap::new(),
            tag_to_sprites: HashMap::new(),
            texture_to_tag: HashMap::new(),
            info_pool: Pool::with_reset(
                config.info_pool_capacity,
                AtlasInfo::<B>::default,
                AtlasInfo::<B>::reset,
            )
            .with_tracking(strict),
            sprite_table_pool: Pool::with_reset(
                config.sprite_table_pool_capacity,
                SpriteTable::<B>::new,
                SpriteTable::<B>::clear,
            )
            .with_tracking(strict),
            on_loaded: ObserverList::new(),
            on_unloaded: ObserverList::new(),
            loads: 0,
            unloads: 0,
            load_failures: 0,
        }
    }

    /// Read the descriptor file named by `config` and create the cache
    ///
    /// # Errors
    /// `AtlasError::Config` if the file is missing or malformed.
    pub fn init(config: &CacheConfig, backend: B) -> AtlasResult<Self> {
        let table = DescriptorTable::load(&config.descriptor_path)?;
        info!(
            "atlas cache loaded {} descriptors from {}",
            table.len(),
            config.descriptor_path.display()
        );
        Ok(Self::new(Arc::new(table), backend, config))
    }

    /// Unload every atlas, shut the pools down and hand the backend back
    pub fn shutdown(mut self) -> B {
        let tags: Vec<String> = self.tag_to_info.keys().cloned().collect();
        info!("atlas cache shutting down with {} loaded atlases", tags.len());

        for tag in &tags {
            if let Some(info) = self.tag_to_info.get_mut(tag.as_str()) {
                info.ref_count = 0;
            }
            self.unload_entry(tag);
        }

        let Self {
            backend,
            info_pool,
            sprite_table_pool,
            ..
        } = self;
        info_pool.shutdown();
        sprite_table_pool.shutdown();
        backend
    }

    /// Find the tag of the loaded atlas backed by `texture`
    ///
    /// `None` means the texture does not belong to a currently loaded atlas;
    /// callers treat it as "not resolvable yet".
    pub fn resolve_tag(&self, texture: &B::Texture) -> Option<&str> {
        self.texture_to_tag.get(texture).map(String::as_str)
    }

    /// Look up a sprite in a loaded atlas; never triggers a load
    pub fn sprite(&self, tag: &str, sprite_name: &str) -> Option<B::Sprite> {
        if tag.is_empty() || sprite_name.is_empty() {
            return None;
        }
        self.tag_to_sprites.get(tag)?.get(sprite_name).cloned()
    }

    /// Add a reference to `tag`, loading the atlas first if needed
    ///
    /// Returns the new reference count.
    ///
    /// # Errors
    /// `UnknownTag` or `AssetLoadFailure` if the atlas had to be loaded and
    /// could not be. The cache is left unchanged.
    pub fn acquire(&mut self, tag: &str) -> AtlasResult<u32> {
        if !self.tag_to_info.contains_key(tag) {
            self.load_from_backend(tag)?;
        }

        let info = self
            .tag_to_info
            .get_mut(tag)
            .ok_or_else(|| AtlasError::UnknownTag(tag.to_string()))?;
        info.ref_count = info.ref_count.saturating_add(1);
        debug!("acquire '{}' -> {} refs", tag, info.ref_count);
        Ok(info.ref_count)
    }

    /// Drop a reference to `tag`, unloading the atlas when none remain
    ///
    /// The count is floored at zero. Releasing a tag that is not loaded does
    /// nothing. Returns the new reference count.
    pub fn release(&mut self, tag: &str) -> u32 {
        let Some(info) = self.tag_to_info.get_mut(tag) else {
            debug!("release '{}' ignored, atlas not loaded", tag);
            return 0;
        };

        info.ref_count = info.ref_count.saturating_sub(1);
        let ref_count = info.ref_count;
        debug!("release '{}' -> {} refs", tag, ref_count);

        if ref_count == 0 {
            self.unload_entry(tag);
        }
        ref_count
    }

    /// Load `tag` without adding a reference
    ///
    /// Returns the existing record when the atlas is already loaded.
    pub fn load(&mut self, tag: &str) -> AtlasResult<&AtlasInfo<B>> {
        if !self.tag_to_info.contains_key(tag) {
            self.load_from_backend(tag)?;
        }
        self.info(tag)
            .ok_or_else(|| AtlasError::UnknownTag(tag.to_string()))
    }

    /// Complete a fetch the host performed outside the cache
    ///
    /// `None` reports that the fetch failed. If the atlas was loaded in the
    /// meantime, the duplicate is released and the existing record returned.
    /// An atlas handed in for an unknown tag is released as well.
    pub fn insert_fetched(
        &mut self,
        tag: &str,
        fetched: Option<B::Atlas>,
    ) -> AtlasResult<&AtlasInfo<B>> {
        if self.tag_to_info.contains_key(tag) {
            if let Some(duplicate) = fetched {
                debug!("releasing duplicate fetch of '{}'", tag);
                self.backend.release_atlas(duplicate);
            }
        } else {
            let descriptors = Arc::clone(&self.descriptors);
            let descriptor = match self.descriptor_for(&descriptors, tag) {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    if let Some(stray) = fetched {
                        self.backend.release_atlas(stray);
                    }
                    return Err(err);
                }
            };
            let Some(atlas) = fetched else {
                return Err(self.fetch_failed(descriptor));
            };
            self.install(descriptor, atlas);
        }

        self.info(tag)
            .ok_or_else(|| AtlasError::UnknownTag(tag.to_string()))
    }

    /// Serve a host-driven request for the atlas behind `tag`
    ///
    /// The atlas is loaded if necessary (without adding a reference) and
    /// handed to `continuation`.
    pub fn request_atlas(
        &mut self,
        tag: &str,
        continuation: impl FnOnce(&B::Atlas),
    ) -> AtlasResult<()> {
        if let Some(atlas) = self.load(tag)?.atlas() {
            continuation(atlas);
        }
        Ok(())
    }

    /// Unload an unreferenced atlas
    ///
    /// Returns `false` if the atlas is not loaded or still referenced.
    pub fn unload(&mut self, tag: &str) -> bool {
        let Some(ref_count) = self.tag_to_info.get(tag).map(|info| info.ref_count) else {
            return false;
        };
        if ref_count > 0 {
            warn!("refusing to unload '{}' while it holds {} refs", tag, ref_count);
            return false;
        }

        self.unload_entry(tag);
        true
    }

    /// Register a listener for atlas loads
    pub fn on_loaded(
        &mut self,
        callback: impl FnMut(&AtlasEvent<'_>) + Send + 'static,
    ) -> SubscriptionId {
        self.on_loaded.subscribe(callback)
    }

    /// Register a listener for atlas unloads
    pub fn on_unloaded(
        &mut self,
        callback: impl FnMut(&AtlasEvent<'_>) + Send + 'static,
    ) -> SubscriptionId {
        self.on_unloaded.subscribe(callback)
    }

    pub fn unsubscribe_loaded(&mut self, id: SubscriptionId) -> bool {
        self.on_loaded.unsubscribe(id)
    }

    pub fn unsubscribe_unloaded(&mut self, id: SubscriptionId) -> bool {
        self.on_unloaded.unsubscribe(id)
    }

    pub fn info(&self, tag: &str) -> Option<&AtlasInfo<B>> {
        self.tag_to_info.get(tag).map(|info| &**info)
    }

    pub fn is_loaded(&self, tag: &str) -> bool {
        self.tag_to_info.contains_key(tag)
    }

    /// Reference count of `tag`; 0 when not loaded
    pub fn ref_count(&self, tag: &str) -> u32 {
        self.tag_to_info.get(tag).map_or(0, |info| info.ref_count)
    }

    pub fn loaded_tags(&self) -> impl Iterator<Item = &str> {
        self.tag_to_info.keys().map(String::as_str)
    }

    /// Number of sprites in the lookup table of a loaded atlas
    pub fn sprite_count(&self, tag: &str) -> Option<usize> {
        self.tag_to_sprites.get(tag).map(|sprites| sprites.len())
    }

    pub fn descriptors(&self) -> &Arc<DescriptorTable> {
        &self.descriptors
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            loaded_atlases: self.tag_to_info.len(),
            total_refs: self
                .tag_to_info
                .values()
                .map(|info| u64::from(info.ref_count))
                .sum(),
            loads: self.loads,
            unloads: self.unloads,
            load_failures: self.load_failures,
            info_pool: self.info_pool.stats(),
            sprite_table_pool: self.sprite_table_pool.stats(),
        }
    }

    fn descriptor_for<'d>(
        &mut self,
        descriptors: &'d DescriptorTable,
        tag: &str,
    ) -> AtlasResult<&'d AtlasDescriptor> {
        descriptors.get(tag).ok_or_else(|| {
            self.load_failures += 1;
            debug!("no descriptor for atlas tag '{}'", tag);
            AtlasError::UnknownTag(tag.to_string())
        })
    }

    fn fetch_failed(&mut self, descriptor: &AtlasDescriptor) -> AtlasError {
        self.load_failures += 1;
        AtlasError::AssetLoadFailure {
            tag: descriptor.tag.clone(),
            storage_location: descriptor.storage_location.clone(),
        }
    }

    fn load_from_backend(&mut self, tag: &str) -> AtlasResult<()> {
        let descriptors = Arc::clone(&self.descriptors);
        let descriptor = self.descriptor_for(&descriptors, tag)?;

        let Some(atlas) = self.backend.fetch(&descriptor.storage_location) else {
            return Err(self.fetch_failed(descriptor));
        };
        self.install(descriptor, atlas);
        Ok(())
    }

    /// Build the sprite table and insert a freshly fetched atlas into all maps
    fn install(&mut self, descriptor: &AtlasDescriptor, atlas: B::Atlas) {
        let mut info = self.info_pool.acquire();
        let mut sprites = self.sprite_table_pool.acquire();

        for name in descriptor.sprite_names.iter().filter(|name| !name.is_empty()) {
            let Some(sprite) = self.backend.sprite(&atlas, name) else {
                debug!("atlas '{}' has no sprite '{}'", descriptor.tag, name);
                continue;
            };
            if info.texture.is_none() {
                if let Some(texture) = self.backend.sprite_texture(&sprite) {
                    info.texture = Some(texture);
                    info.first_sprite_name = Some(name.clone());
                }
            }
            sprites.insert(name.clone(), sprite);
        }

        info.tag.push_str(&descriptor.tag);
        info.atlas = Some(atlas);
        info.ref_count = 0;

        match &info.texture {
            Some(texture) => {
                self.texture_to_tag
                    .insert(texture.clone(), descriptor.tag.clone());
            }
            None => warn!(
                "atlas '{}' has no resolvable sprite and cannot be found by texture",
                descriptor.tag
            ),
        }

        let sprite_count = sprites.len();
        self.tag_to_sprites.insert(descriptor.tag.clone(), sprites);
        self.tag_to_info.insert(descriptor.tag.clone(), info);
        self.loads += 1;
        debug!(
            "loaded atlas '{}' from '{}' ({} sprites)",
            descriptor.tag, descriptor.storage_location, sprite_count
        );

        self.on_loaded.notify(&AtlasEvent {
            tag: &descriptor.tag,
            ref_count: 0,
            sprite_count,
        });
    }

    /// Remove an atlas from all maps, release it and recycle its bookkeeping
    fn unload_entry(&mut self, tag: &str) {
        let Some(mut info) = self.tag_to_info.remove(tag) else {
            return;
        };
        let sprites = self.tag_to_sprites.remove(tag);

        if let Some(texture) = info.texture.take() {
            if self
                .texture_to_tag
                .get(&texture)
                .is_some_and(|owner| owner == tag)
            {
                self.texture_to_tag.remove(&texture);
            }
            self.backend.release_texture(texture);
        }
        if let Some(atlas) = info.atlas.take() {
            self.backend.release_atlas(atlas);
        }
        self.unloads += 1;

        let sprite_count = sprites.as_ref().map_or(0, |sprites| sprites.len());
        debug!("unloaded atlas '{}'", tag);
        self.on_unloaded.notify(&AtlasEvent {
            tag: &info.tag,
            ref_count: info.ref_count,
            sprite_count,
        });

        if let Some(sprites) = sprites {
            recycle(&mut self.sprite_table_pool, sprites);
        }
        recycle(&mut self.info_pool, info);
    }
}

/// Return an item to its pool; misuse asserts in debug builds and is logged otherwise
fn recycle<T>(pool: &mut Pool<T>, item: Pooled<T>) {
    if let Err(err) = pool.release(item) {
        error!("{err}");
        debug_assert!(false, "{err}");
    }
}

impl<B: AtlasBackend> fmt::Debug for AtlasCache<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtlasCache")
            .field("descriptors", &self.descriptors.len())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, TextureId};
    use std::sync::Mutex;

    fn table() -> Arc<DescriptorTable> {
        Arc::new(
            DescriptorTable::new(vec![
                AtlasDescriptor::new(1, "ui_icons", "atlases/icons", ["gear", "star"]),
                AtlasDescriptor::new(2, "hud", "atlases/hud", ["", "health", "ghost", "ammo"]),
                AtlasDescriptor::new(3, "broken", "atlases/broken", ["x"]),
                AtlasDescriptor::new(4, "blank", "atlases/blank", ["nothing"]),
            ])
            .unwrap(),
        )
    }

    fn backend() -> MemoryBackend {
        MemoryBackend::new()
            .with_atlas("atlases/icons", ["gear", "star"])
            .with_atlas("atlases/hud", ["health", "ammo"])
            .with_atlas("atlases/blank", Vec::<String>::new())
    }

    fn cache() -> AtlasCache<MemoryBackend> {
        AtlasCache::new(table(), backend(), &CacheConfig::default().with_strict_pools(true))
    }

    fn texture_of(cache: &AtlasCache<MemoryBackend>, tag: &str) -> TextureId {
        *cache.info(tag).unwrap().texture().unwrap()
    }

    #[test]
    fn test_load_is_idempotent() {
        let mut cache = cache();
        let loads = Arc::new(Mutex::new(0));
        let counter = loads.clone();
        cache.on_loaded(move |_| *counter.lock().unwrap() += 1);

        let first = cache.load("ui_icons").unwrap() as *const AtlasInfo<MemoryBackend>;
        let first_atlas = cache.info("ui_icons").unwrap().atlas().unwrap().id;
        let second = cache.load("ui_icons").unwrap() as *const AtlasInfo<MemoryBackend>;

        assert!(std::ptr::eq(first, second));
        assert_eq!(cache.info("ui_icons").unwrap().atlas().unwrap().id, first_atlas);
        assert_eq!(cache.backend().fetch_count("atlases/icons"), 1);
        assert_eq!(*loads.lock().unwrap(), 1);
        assert_eq!(cache.ref_count("ui_icons"), 0);
    }

    #[test]
    fn test_sprite_table_skips_empty_and_missing_names() {
        let mut cache = cache();
        cache.acquire("hud").unwrap();

        assert_eq!(cache.sprite_count("hud"), Some(2));
        assert!(cache.sprite("hud", "health").is_some());
        assert!(cache.sprite("hud", "ammo").is_some());
        assert!(cache.sprite("hud", "ghost").is_none());
        assert!(cache.sprite("hud", "").is_none());
        assert!(cache.sprite("", "health").is_none());

        let info = cache.info("hud").unwrap();
        assert_eq!(info.first_sprite_name(), Some("health"));
        assert_eq!(info.tag(), "hud");
    }

    #[test]
    fn test_representative_texture_resolves_to_tag() {
        let mut cache = cache();
        cache.acquire("ui_icons").unwrap();

        let texture = texture_of(&cache, "ui_icons");
        assert_eq!(cache.resolve_tag(&texture), Some("ui_icons"));
        assert_eq!(cache.resolve_tag(&TextureId(9_999)), None);
    }

    #[test]
    fn test_fetch_failure_leaves_no_partial_state() {
        let mut cache = cache();

        let err = cache.acquire("broken").unwrap_err();
        assert!(matches!(
            err,
            AtlasError::AssetLoadFailure { ref tag, ref storage_location }
                if tag == "broken" && storage_location == "atlases/broken"
        ));
        assert!(!cache.is_loaded("broken"));
        assert_eq!(cache.sprite_count("broken"), None);

        let stats = cache.stats();
        assert_eq!(stats.loaded_atlases, 0);
        assert_eq!(stats.load_failures, 1);
        assert_eq!(stats.info_pool.outstanding, 0);
        assert_eq!(stats.sprite_table_pool.outstanding, 0);
    }

    #[test]
    fn test_atlas_without_sprites_loads_but_is_not_discoverable() {
        let mut cache = cache();
        assert_eq!(cache.acquire("blank").unwrap(), 1);

        let info = cache.info("blank").unwrap();
        assert!(info.texture().is_none());
        assert!(info.first_sprite_name().is_none());
        assert_eq!(cache.sprite_count("blank"), Some(0));

        assert_eq!(cache.release("blank"), 0);
        assert!(!cache.is_loaded("blank"));
        assert_eq!(cache.backend().live_atlas_count(), 0);
    }

    #[test]
    fn test_unload_recycles_bookkeeping() {
        let mut cache = AtlasCache::new(
            table(),
            backend(),
            &CacheConfig::default().with_pool_capacity(2).with_strict_pools(true),
        );

        cache.acquire("ui_icons").unwrap();
        cache.acquire("hud").unwrap();
        let during = cache.stats();
        assert_eq!(during.info_pool.idle, 0);
        assert_eq!(during.info_pool.outstanding, 2);
        assert_eq!(during.sprite_table_pool.outstanding, 2);

        cache.release("ui_icons");
        cache.release("hud");
        let after = cache.stats();
        assert_eq!(after.info_pool.idle, 2);
        assert_eq!(after.sprite_table_pool.idle, 2);
        assert_eq!(after.info_pool.created, 2);

        // Reloading reuses the recycled records instead of creating new ones
        cache.acquire("ui_icons").unwrap();
        assert_eq!(cache.stats().info_pool.created, 2);
        assert_eq!(cache.info("ui_icons").unwrap().ref_count(), 1);
        assert_eq!(cache.sprite_count("ui_icons"), Some(2));
    }

    #[test]
    fn test_unload_releases_backend_resources() {
        let mut cache = cache();
        cache.acquire("ui_icons").unwrap();
        let texture = texture_of(&cache, "ui_icons");
        assert!(cache.backend().is_texture_live(texture));

        cache.release("ui_icons");

        assert!(!cache.backend().is_texture_live(texture));
        assert_eq!(cache.backend().live_atlas_count(), 0);
        assert_eq!(cache.resolve_tag(&texture), None);
    }

    #[test]
    fn test_unloaded_observer_sees_final_state() {
        let mut cache = cache();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        cache.on_unloaded(move |event| {
            sink.lock()
                .unwrap()
                .push((event.tag.to_string(), event.ref_count, event.sprite_count));
        });

        cache.acquire("ui_icons").unwrap();
        cache.acquire("ui_icons").unwrap();
        cache.release("ui_icons");
        assert!(seen.lock().unwrap().is_empty());

        cache.release("ui_icons");
        assert_eq!(*seen.lock().unwrap(), vec![("ui_icons".to_string(), 0, 2)]);
    }

    #[test]
    fn test_explicit_unload_refused_while_referenced() {
        let mut cache = cache();
        cache.acquire("ui_icons").unwrap();

        assert!(!cache.unload("ui_icons"));
        assert!(cache.is_loaded("ui_icons"));
        assert!(!cache.unload("hud"));

        cache.load("hud").unwrap();
        assert!(cache.unload("hud"));
        assert!(!cache.is_loaded("hud"));
    }

    #[test]
    fn test_release_of_unloaded_tag_is_noop() {
        let mut cache = cache();
        assert_eq!(cache.release("ui_icons"), 0);
        assert_eq!(cache.release("does_not_exist"), 0);
        assert!(cache.backend().fetches().is_empty());
        assert_eq!(cache.stats().unloads, 0);
    }

    #[test]
    fn test_request_atlas_loads_without_reference() {
        let mut cache = cache();
        let mut handed = None;

        cache
            .request_atlas("ui_icons", |atlas| handed = Some(atlas.id))
            .unwrap();

        let info = cache.info("ui_icons").unwrap();
        assert_eq!(handed, Some(info.atlas().unwrap().id));
        assert_eq!(info.ref_count(), 0);

        // A later acquire reuses the requested atlas
        assert_eq!(cache.acquire("ui_icons").unwrap(), 1);
        assert_eq!(cache.backend().fetch_count("atlases/icons"), 1);

        assert!(matches!(
            cache.request_atlas("does_not_exist", |_| panic!("no atlas expected")),
            Err(AtlasError::UnknownTag(_))
        ));
    }

    #[test]
    fn test_insert_fetched_completes_async_load() {
        let mut cache = cache();
        let fetched = cache.backend_mut().fetch("atlases/icons");

        let info = cache.insert_fetched("ui_icons", fetched).unwrap();
        assert_eq!(info.ref_count(), 0);
        assert!(cache.sprite("ui_icons", "star").is_some());

        // A second completion for the same tag is released, not installed
        let duplicate = cache.backend_mut().fetch("atlases/icons");
        cache.insert_fetched("ui_icons", duplicate).unwrap();
        assert_eq!(cache.backend().live_atlas_count(), 1);
        assert_eq!(cache.stats().loads, 1);
    }

    #[test]
    fn test_insert_fetched_failure() {
        let mut cache = cache();
        assert!(matches!(
            cache.insert_fetched("hud", None),
            Err(AtlasError::AssetLoadFailure { .. })
        ));
        assert!(matches!(
            cache.insert_fetched("does_not_exist", None),
            Err(AtlasError::UnknownTag(_))
        ));
        assert!(!cache.is_loaded("hud"));
        assert_eq!(cache.stats().load_failures, 2);
    }

    #[test]
    fn test_insert_fetched_unknown_tag_releases_atlas() {
        let mut cache = cache();
        let fetched = cache.backend_mut().fetch("atlases/icons");
        assert_eq!(cache.backend().live_atlas_count(), 1);

        assert!(matches!(
            cache.insert_fetched("does_not_exist", fetched),
            Err(AtlasError::UnknownTag(_))
        ));
        assert_eq!(cache.backend().live_atlas_count(), 0);
        assert_eq!(cache.loaded_tags().count(), 0);
    }

    #[test]
    fn test_shutdown_unloads_everything() {
        let mut cache = cache();
        let unloads = Arc::new(Mutex::new(Vec::new()));
        let sink = unloads.clone();
        cache.on_unloaded(move |event| sink.lock().unwrap().push(event.ref_count));

        cache.acquire("ui_icons").unwrap();
        cache.acquire("ui_icons").unwrap();
        cache.load("hud").unwrap();

        let backend = cache.shutdown();
        assert_eq!(backend.live_atlas_count(), 0);
        assert_eq!(*unloads.lock().unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_stats_track_refs() {
        let mut cache = cache();
        cache.acquire("ui_icons").unwrap();
        cache.acquire("ui_icons").unwrap();
        cache.acquire("hud").unwrap();

        let stats = cache.stats();
        assert_eq!(stats.loaded_atlases, 2);
        assert_eq!(stats.total_refs, 3);
        assert_eq!(stats.loads, 2);

        let mut tags: Vec<_> = cache.loaded_tags().collect();
        tags.sort_unstable();
        assert_eq!(tags, vec!["hud", "ui_icons"]);
    }
}
