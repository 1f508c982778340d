//! Groups of consumers that sleep and wake together
//!
//! A [`SleepGroup`] owns the images drawn by one surface (a canvas, a panel,
//! a window). When the surface is hidden every image in it sleeps; when it is
//! shown again they all wake. The group is driven once per frame through
//! [`SleepGroup::tick`], which retries tag resolution only after an atlas has
//! loaded and stops listening for loads once every image is settled.

use crate::image::{ResolveState, SleeperImage};
use atlas_sleep_cache::{AtlasBackend, AtlasCache, AtlasError, AtlasResult, SubscriptionId};
use log::debug;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Instant;

/// Flag raised whenever the cache loads an atlas
///
/// Clones share the same state. The group takes (clears) the flag when it
/// retries resolution, so several loads between two frames cost one retry.
#[derive(Debug, Clone, Default)]
pub struct LoadSignal {
    raised: Arc<AtomicBool>,
}

impl LoadSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Clear the signal, returning whether it was raised
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::AcqRel)
    }

    /// Subscribe this signal to the cache's load notifications
    pub fn listen<B: AtlasBackend>(&self, cache: &mut AtlasCache<B>) -> SubscriptionId {
        let signal = self.clone();
        cache.on_loaded(move |_| signal.raise())
    }
}

/// Images that share one visibility state
pub struct SleepGroup<B: AtlasBackend> {
    images: Vec<SleeperImage<B>>,
    visible: bool,
    signal: LoadSignal,
    subscription: Option<SubscriptionId>,
}

impl<B: AtlasBackend> SleepGroup<B> {
    /// Create an empty, visible group
    pub fn new() -> Self {
        Self {
            images: Vec::new(),
            visible: true,
            signal: LoadSignal::new(),
            subscription: None,
        }
    }

    /// Add an image and try to resolve it right away
    ///
    /// The image takes on the group's visibility. Unresolved images keep the
    /// group listening for atlas loads.
    pub fn push(
        &mut self,
        cache: &mut AtlasCache<B>,
        mut image: SleeperImage<B>,
        now: Instant,
    ) -> AtlasResult<()> {
        if !self.visible {
            image.sleep(cache);
        }
        let resolved = image.try_resolve(cache, now);
        if image.state().is_unresolved() && self.subscription.is_none() {
            self.subscription = Some(self.signal.listen(cache));
        }
        self.images.push(image);
        resolved.map(|_| ())
    }

    /// Show or hide the whole group
    ///
    /// Every image is visited even if one fails to wake; the first failure is
    /// returned. Showing a group that is already visible retries the images
    /// whose last acquire failed.
    pub fn set_visible(&mut self, cache: &mut AtlasCache<B>, visible: bool) -> AtlasResult<()> {
        let changed = visible != self.visible;
        if !changed && !visible {
            return Ok(());
        }
        if changed {
            self.visible = visible;
            debug!(
                "sleep group {} ({} images)",
                if visible { "waking" } else { "sleeping" },
                self.images.len()
            );
        }

        let mut first_error: Option<AtlasError> = None;
        for image in &mut self.images {
            if !visible {
                image.sleep(cache);
            } else if changed || image.acquire_pending() {
                if let Err(err) = image.wake(cache) {
                    first_error.get_or_insert(err);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Per-frame update
    ///
    /// Retries resolution of unresolved images after an atlas load, and gives
    /// up on those whose deadline has passed. Returns the number of images
    /// resolved by this call.
    pub fn tick(&mut self, cache: &mut AtlasCache<B>, now: Instant) -> AtlasResult<usize> {
        if self.subscription.is_none() {
            return Ok(0);
        }

        let loaded = self.signal.take();
        let mut resolved = 0;
        let mut first_error: Option<AtlasError> = None;

        for image in self.images.iter_mut().filter(|image| image.state().is_unresolved()) {
            // Without a new load only the deadline can change the outcome
            let expired = match image.state() {
                ResolveState::Unresolved { deadline } => now >= *deadline,
                _ => false,
            };
            if !loaded && !expired {
                continue;
            }
            match image.try_resolve(cache, now) {
                Ok(true) => resolved += 1,
                Ok(false) => {}
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        if self.unresolved_count() == 0 {
            self.stop_listening(cache);
        }

        first_error.map_or(Ok(resolved), Err)
    }

    /// Release every reference the group's images hold and stop listening
    pub fn teardown(mut self, cache: &mut AtlasCache<B>) {
        self.stop_listening(cache);
        for image in self.images.drain(..) {
            image.teardown(cache);
        }
    }

    fn stop_listening(&mut self, cache: &mut AtlasCache<B>) {
        if let Some(id) = self.subscription.take() {
            cache.unsubscribe_loaded(id);
            self.signal.take();
            debug!("sleep group stopped listening for atlas loads");
        }
    }

    pub fn images(&self) -> &[SleeperImage<B>] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Whether the group is subscribed to atlas loads
    pub fn is_listening(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn unresolved_count(&self) -> usize {
        self.images
            .iter()
            .filter(|image| image.state().is_unresolved())
            .count()
    }
}

impl<B: AtlasBackend> Default for SleepGroup<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: AtlasBackend> std::fmt::Debug for SleepGroup<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SleepGroup")
            .field("images", &self.images)
            .field("visible", &self.visible)
            .field("listening", &self.subscription.is_some())
            .finish()
    }
}
