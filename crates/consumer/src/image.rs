//! A single sleeping consumer
//!
//! A [`SleeperImage`] displays one sprite. It does not know which atlas that
//! sprite came from until the atlas is loaded and the cache can map the
//! sprite's texture back to a tag. Once the tag is known the image holds one
//! reference while visible and none while asleep, dropping its sprite on sleep
//! and looking it up again on wake.

use crate::config::{AcquirePolicy, ConsumerConfig};
use atlas_sleep_cache::{AtlasBackend, AtlasCache, AtlasResult};
use log::{debug, warn};
use std::time::Instant;

/// Tag discovery state of a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveState {
    /// Still retrying until `deadline`
    Unresolved { deadline: Instant },
    /// The tag of the atlas the displayed sprite belongs to
    Resolved(String),
    /// The deadline passed; the consumer never participates in sleep/wake
    GaveUp,
}

impl ResolveState {
    pub fn tag(&self) -> Option<&str> {
        match self {
            Self::Resolved(tag) => Some(tag),
            _ => None,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::Unresolved { .. })
    }
}

/// One consumer of the atlas cache
pub struct SleeperImage<B: AtlasBackend> {
    sprite_name: String,
    sprite: Option<B::Sprite>,
    state: ResolveState,
    policy: AcquirePolicy,
    visible: bool,
    holds_ref: bool,
    acquire_failed: bool,
}

impl<B: AtlasBackend> SleeperImage<B> {
    /// Create a visible image currently displaying `sprite`
    pub fn new(
        sprite_name: impl Into<String>,
        sprite: Option<B::Sprite>,
        config: &ConsumerConfig,
        now: Instant,
    ) -> Self {
        Self {
            sprite_name: sprite_name.into(),
            sprite,
            state: ResolveState::Unresolved {
                deadline: now + config.resolve_deadline,
            },
            policy: config.policy,
            visible: true,
            holds_ref: false,
            acquire_failed: false,
        }
    }

    /// Try to discover the tag of the displayed sprite
    ///
    /// Returns `Ok(true)` if the tag was resolved by this call. Past the
    /// deadline the image gives up for good.
    ///
    /// # Errors
    /// Propagates the failure of an eager acquire. The tag stays resolved and
    /// the next [`wake`](Self::wake) retries the acquire.
    pub fn try_resolve(&mut self, cache: &mut AtlasCache<B>, now: Instant) -> AtlasResult<bool> {
        let ResolveState::Unresolved { deadline } = self.state else {
            return Ok(false);
        };

        let tag = self
            .sprite
            .as_ref()
            .and_then(|sprite| cache.backend().sprite_texture(sprite))
            .and_then(|texture| cache.resolve_tag(&texture).map(str::to_string));

        let Some(tag) = tag else {
            if now >= deadline {
                warn!("giving up resolving the atlas of sprite '{}'", self.sprite_name);
                self.state = ResolveState::GaveUp;
            }
            return Ok(false);
        };

        debug!("sprite '{}' resolved to atlas '{}'", self.sprite_name, tag);
        self.state = ResolveState::Resolved(tag);

        if !self.visible {
            self.sprite = None;
        } else if self.policy == AcquirePolicy::Eager {
            self.take_ref(cache)?;
        }
        Ok(true)
    }

    /// The image became invisible
    ///
    /// A resolved image releases its reference and drops its sprite. Calling
    /// this on an image that is already asleep does nothing.
    pub fn sleep(&mut self, cache: &mut AtlasCache<B>) {
        if !self.visible {
            return;
        }
        self.visible = false;
        self.acquire_failed = false;

        let ResolveState::Resolved(tag) = &self.state else {
            return;
        };
        if self.holds_ref {
            cache.release(tag);
            self.holds_ref = false;
        }
        self.sprite = None;
    }

    /// The image became visible
    ///
    /// A resolved image acquires its tag and looks its sprite up again.
    /// Calling this on an image that is already awake does nothing, unless
    /// its last acquire failed, in which case the acquire is retried.
    pub fn wake(&mut self, cache: &mut AtlasCache<B>) -> AtlasResult<()> {
        if self.visible && !self.acquire_failed {
            return Ok(());
        }
        self.visible = true;

        if !self.holds_ref && self.state.tag().is_some() {
            self.take_ref(cache)?;
        }
        if let Some(tag) = self.state.tag() {
            self.sprite = cache.sprite(tag, &self.sprite_name);
        }
        Ok(())
    }

    /// Release the reference this image holds, if any
    ///
    /// An asleep image has already released its reference, so releasing again
    /// here would take one away from another consumer of the same atlas.
    pub fn teardown(self, cache: &mut AtlasCache<B>) {
        if let (true, Some(tag)) = (self.holds_ref, self.state.tag()) {
            cache.release(tag);
        }
    }

    fn take_ref(&mut self, cache: &mut AtlasCache<B>) -> AtlasResult<()> {
        let Some(tag) = self.state.tag() else {
            return Ok(());
        };
        match cache.acquire(tag) {
            Ok(_) => {
                self.holds_ref = true;
                self.acquire_failed = false;
                Ok(())
            }
            Err(err) => {
                self.acquire_failed = true;
                Err(err)
            }
        }
    }

    pub fn sprite_name(&self) -> &str {
        &self.sprite_name
    }

    /// The sprite currently displayed; `None` while asleep
    pub fn sprite(&self) -> Option<&B::Sprite> {
        self.sprite.as_ref()
    }

    pub fn state(&self) -> &ResolveState {
        &self.state
    }

    pub fn tag(&self) -> Option<&str> {
        self.state.tag()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Whether this image currently counts toward its atlas's references
    pub fn holds_ref(&self) -> bool {
        self.holds_ref
    }

    /// Whether the last acquire failed and the next wake will retry it
    pub fn acquire_pending(&self) -> bool {
        self.acquire_failed
    }
}

impl<B: AtlasBackend> std::fmt::Debug for SleeperImage<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SleeperImage")
            .field("sprite_name", &self.sprite_name)
            .field("state", &self.state)
            .field("visible", &self.visible)
            .field("holds_ref", &self.holds_ref)
            .field("acquire_failed", &self.acquire_failed)
            .finish()
    }
}
