//! Asset-fetch boundary
//!
//! The cache never touches storage or GPU objects itself. Everything it needs
//! from the host engine goes through [`AtlasBackend`]: materializing an atlas
//! from its storage location, looking sprites up inside it, and releasing the
//! atlas and its backing texture again on unload.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Host capabilities the atlas cache is built on
///
/// Handles are opaque to the cache. `Texture` is used as a map key for the
/// reverse lookup from a displayed image to its atlas tag.
pub trait AtlasBackend {
    /// A loaded atlas
    type Atlas: 'static;

    /// A sprite inside a loaded atlas
    type Sprite: Clone + 'static;

    /// The physical texture backing one or more sprites
    type Texture: Clone + Eq + Hash + 'static;

    /// Materialize the atlas stored at `storage_location`
    fn fetch(&mut self, storage_location: &str) -> Option<Self::Atlas>;

    /// Look up a sprite by name inside a loaded atlas
    fn sprite(&self, atlas: &Self::Atlas, name: &str) -> Option<Self::Sprite>;

    /// The texture backing a sprite
    fn sprite_texture(&self, sprite: &Self::Sprite) -> Option<Self::Texture>;

    /// Release a texture obtained from a sprite of an atlas being unloaded
    fn release_texture(&mut self, texture: Self::Texture);

    /// Release an atlas obtained from [`AtlasBackend::fetch`]
    fn release_atlas(&mut self, atlas: Self::Atlas);
}

/// Texture handle issued by [`MemoryBackend`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// Atlas handle issued by [`MemoryBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryAtlas {
    pub id: u64,
    pub storage_location: String,
    pub texture: TextureId,
    sprite_names: Vec<String>,
}

impl MemoryAtlas {
    pub fn sprite_names(&self) -> &[String] {
        &self.sprite_names
    }
}

/// Sprite handle issued by [`MemoryBackend`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemorySprite {
    pub name: String,
    pub texture: TextureId,
}

/// In-process backend for headless hosts and tests
///
/// Atlases are registered up front by storage location. Every fetch produces a
/// fresh atlas and texture id, the same way a real engine hands out a new
/// object when an unloaded asset is loaded again. The backend records fetches
/// and releases so callers can verify the cache never double-loads or leaks.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    stored: HashMap<String, Vec<String>>,
    failing: HashSet<String>,
    next_id: u64,
    fetches: Vec<String>,
    live_atlases: HashSet<u64>,
    live_textures: HashSet<TextureId>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an atlas containing `sprite_names` at `storage_location`
    pub fn insert(
        &mut self,
        storage_location: impl Into<String>,
        sprite_names: impl IntoIterator<Item = impl Into<String>>,
    ) {
        self.stored.insert(
            storage_location.into(),
            sprite_names.into_iter().map(Into::into).collect(),
        );
    }

    /// Builder form of [`MemoryBackend::insert`]
    pub fn with_atlas(
        mut self,
        storage_location: impl Into<String>,
        sprite_names: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.insert(storage_location, sprite_names);
        self
    }

    /// Make fetches of `storage_location` fail (or succeed again)
    pub fn set_failing(&mut self, storage_location: impl Into<String>, failing: bool) {
        let location = storage_location.into();
        if failing {
            self.failing.insert(location);
        } else {
            self.failing.remove(&location);
        }
    }

    /// Every storage location fetched so far, in order
    pub fn fetches(&self) -> &[String] {
        &self.fetches
    }

    /// Number of fetches of one storage location
    pub fn fetch_count(&self, storage_location: &str) -> usize {
        self.fetches
            .iter()
            .filter(|location| location.as_str() == storage_location)
            .count()
    }

    /// Atlases fetched and not yet released
    pub fn live_atlas_count(&self) -> usize {
        self.live_atlases.len()
    }

    /// Whether a texture is still held by a fetched atlas
    pub fn is_texture_live(&self, texture: TextureId) -> bool {
        self.live_textures.contains(&texture)
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl AtlasBackend for MemoryBackend {
    type Atlas = MemoryAtlas;
    type Sprite = MemorySprite;
    type Texture = TextureId;

    fn fetch(&mut self, storage_location: &str) -> Option<MemoryAtlas> {
        self.fetches.push(storage_location.to_string());

        if self.failing.contains(storage_location) {
            return None;
        }
        let sprite_names = self.stored.get(storage_location)?.clone();

        let id = self.next_id();
        let texture = TextureId(self.next_id());
        self.live_atlases.insert(id);
        self.live_textures.insert(texture);

        Some(MemoryAtlas {
            id,
            storage_location: storage_location.to_string(),
            texture,
            sprite_names,
        })
    }

    fn sprite(&self, atlas: &MemoryAtlas, name: &str) -> Option<MemorySprite> {
        atlas
            .sprite_names
            .iter()
            .any(|sprite| sprite == name)
            .then(|| MemorySprite {
                name: name.to_string(),
                texture: atlas.texture,
            })
    }

    fn sprite_texture(&self, sprite: &MemorySprite) -> Option<TextureId> {
        Some(sprite.texture)
    }

    fn release_texture(&mut self, texture: TextureId) {
        self.live_textures.remove(&texture);
    }

    fn release_atlas(&mut self, atlas: MemoryAtlas) {
        self.live_atlases.remove(&atlas.id);
    }
}
