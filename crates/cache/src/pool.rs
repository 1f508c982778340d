//! Reusable object pool
//!
//! Recycles short-lived bookkeeping objects (sprite tables, loaded atlas
//! records) across load/unload cycles so that UI elements toggling visibility
//! every frame do not churn the allocator.
//!
//! A pool can track which items are checked out. With tracking enabled, every
//! item handed out carries a token naming the pool that issued it, and
//! releasing an item into any other pool is rejected.

use std::collections::HashSet;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque token identifying one checkout from one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolToken {
    pool: u64,
    serial: u64,
}

/// Errors reported by [`Pool::release`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The item was not checked out of the pool it is being released to
    #[error("pool misuse: item from pool {item_pool} (checkout {serial}) released into pool {pool}")]
    ForeignItem {
        pool: u64,
        item_pool: u64,
        serial: u64,
    },
}

/// An item checked out of a [`Pool`]
///
/// Dereferences to the pooled value. Hand it back with [`Pool::release`];
/// dropping it instead simply frees the value.
pub struct Pooled<T> {
    value: T,
    token: PoolToken,
}

impl<T> Pooled<T> {
    /// The checkout token issued by the pool
    pub fn token(&self) -> PoolToken {
        self.token
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("value", &self.value)
            .field("token", &self.token)
            .finish()
    }
}

/// Pool usage counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Items waiting to be reused
    pub idle: usize,

    /// Items currently checked out
    pub outstanding: usize,

    /// Items ever produced by the create function
    pub created: u64,
}

type CreateFn<T> = Box<dyn Fn() -> T + Send>;
type ResetFn<T> = Box<dyn Fn(&mut T) + Send>;

/// Generic object pool parameterized over a create and an optional reset function
///
/// # Example
///
/// ```
/// use atlas_sleep_cache::pool::Pool;
///
/// let mut pool = Pool::with_reset(2, Vec::<u32>::new, |v: &mut Vec<u32>| v.clear());
///
/// let mut list = pool.acquire();
/// list.push(7);
/// pool.release(list).unwrap();
///
/// // Recycled items come back reset
/// assert!(pool.acquire().is_empty());
/// ```
pub struct Pool<T> {
    id: u64,
    idle: Vec<T>,
    create: CreateFn<T>,
    reset: Option<ResetFn<T>>,
    tracking: bool,
    checked_out: HashSet<u64>,
    next_serial: u64,
    outstanding: usize,
    created: u64,
}

impl<T> Pool<T> {
    /// Create a pool pre-populated with `initial_capacity` items
    pub fn new(initial_capacity: usize, create: impl Fn() -> T + Send + 'static) -> Self {
        Self::build(initial_capacity, Box::new(create), None)
    }

    /// Create a pool whose items are reset every time they return to the idle set
    ///
    /// The pre-populated items are reset as well.
    pub fn with_reset(
        initial_capacity: usize,
        create: impl Fn() -> T + Send + 'static,
        reset: impl Fn(&mut T) + Send + 'static,
    ) -> Self {
        Self::build(initial_capacity, Box::new(create), Some(Box::new(reset)))
    }

    fn build(initial_capacity: usize, create: CreateFn<T>, reset: Option<ResetFn<T>>) -> Self {
        let mut pool = Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            idle: Vec::with_capacity(initial_capacity),
            create,
            reset,
            tracking: cfg!(debug_assertions),
            checked_out: HashSet::new(),
            next_serial: 0,
            outstanding: 0,
            created: 0,
        };

        for _ in 0..initial_capacity {
            let mut value = (pool.create)();
            pool.created += 1;
            if let Some(reset) = &pool.reset {
                reset(&mut value);
            }
            pool.idle.push(value);
        }

        pool
    }

    /// Enable or disable checkout tracking
    ///
    /// Tracking is on by default in debug builds and off in release builds.
    pub fn with_tracking(mut self, enabled: bool) -> Self {
        self.tracking = enabled;
        self
    }

    /// Whether releases are checked against outstanding checkouts
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Take an item, reusing an idle one when available
    pub fn acquire(&mut self) -> Pooled<T> {
        let value = match self.idle.pop() {
            Some(value) => value,
            None => {
                self.created += 1;
                (self.create)()
            }
        };

        let serial = self.next_serial;
        self.next_serial += 1;
        if self.tracking {
            self.checked_out.insert(serial);
        }
        self.outstanding += 1;

        Pooled {
            value,
            token: PoolToken { pool: self.id, serial },
        }
    }

    /// Reset an item and return it to the idle set
    ///
    /// With tracking enabled, an item that was not checked out of this pool
    /// is rejected and dropped.
    pub fn release(&mut self, item: Pooled<T>) -> Result<(), PoolError> {
        let Pooled { mut value, token } = item;

        if self.tracking && (token.pool != self.id || !self.checked_out.remove(&token.serial)) {
            return Err(PoolError::ForeignItem {
                pool: self.id,
                item_pool: token.pool,
                serial: token.serial,
            });
        }

        if let Some(reset) = &self.reset {
            reset(&mut value);
        }
        self.idle.push(value);
        self.outstanding = self.outstanding.saturating_sub(1);
        Ok(())
    }

    /// Current usage counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.idle.len(),
            outstanding: self.outstanding,
            created: self.created,
        }
    }

    /// Drop every idle item; the pool cannot be used afterwards
    pub fn shutdown(mut self) {
        self.idle.clear();
        self.checked_out.clear();
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.id)
            .field("tracking", &self.tracking)
            .field("stats", &self.stats())
            .finish()
    }
}
