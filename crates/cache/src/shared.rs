//! Thread-safe handle to an [`AtlasCache`]

use crate::backend::AtlasBackend;
use crate::error::AtlasResult;
use crate::manager::AtlasCache;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

/// Cloneable, lock-protected atlas cache
///
/// Every clone refers to the same cache. Each method takes the lock for the
/// duration of one operation, so acquire/release pairs from different threads
/// are serialized.
pub struct SharedAtlasCache<B: AtlasBackend> {
    inner: Arc<Mutex<AtlasCache<B>>>,
}

impl<B: AtlasBackend> Clone for SharedAtlasCache<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: AtlasBackend> SharedAtlasCache<B> {
    pub fn new(cache: AtlasCache<B>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(cache)),
        }
    }

    /// Lock the cache, recovering a poisoned lock
    pub fn lock(&self) -> MutexGuard<'_, AtlasCache<B>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the cache if no other thread holds it
    pub fn try_lock(&self) -> Option<MutexGuard<'_, AtlasCache<B>>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Run `f` with the cache locked
    pub fn with<R>(&self, f: impl FnOnce(&mut AtlasCache<B>) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn acquire(&self, tag: &str) -> AtlasResult<u32> {
        self.lock().acquire(tag)
    }

    pub fn release(&self, tag: &str) -> u32 {
        self.lock().release(tag)
    }

    pub fn resolve_tag(&self, texture: &B::Texture) -> Option<String> {
        self.lock().resolve_tag(texture).map(str::to_string)
    }

    pub fn sprite(&self, tag: &str, sprite_name: &str) -> Option<B::Sprite> {
        self.lock().sprite(tag, sprite_name)
    }

    pub fn ref_count(&self, tag: &str) -> u32 {
        self.lock().ref_count(tag)
    }

    /// Take the cache back if this is the last handle
    pub fn into_inner(self) -> Result<AtlasCache<B>, Self> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => Ok(mutex.into_inner().unwrap_or_else(PoisonError::into_inner)),
            Err(inner) => Err(Self { inner }),
        }
    }
}

impl<B: AtlasBackend> fmt::Debug for SharedAtlasCache<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_lock() {
            Ok(cache) => f.debug_tuple("SharedAtlasCache").field(&*cache).finish(),
            Err(_) => f.write_str("SharedAtlasCache(<locked>)"),
        }
    }
}

impl<B: AtlasBackend> From<AtlasCache<B>> for SharedAtlasCache<B> {
    fn from(cache: AtlasCache<B>) -> Self {
        Self::new(cache)
    }
}
