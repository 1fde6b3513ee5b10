//! Pooled connection bookkeeping
//!
//! A pool item wraps one authenticated session together with the usage
//! accounting the pool's reuse and eviction policies are driven by: creation
//! time, last-use time, in-use state, use count, and the sticky
//! failed-pretest flag.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::config::PoolLimits;
use crate::session::HostSession;

/// Why a pooled connection was expired or evicted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationReason {
    /// Idle longer than the configured inactivity limit
    InactivityTimeout,
    /// Older than the configured maximum lifetime
    MaxLifetime,
    /// Handed out more times than the configured maximum
    MaxUseCount,
    /// Held in use longer than the configured maximum
    MaxUseTime,
    /// A liveness pretest failed; the connection is unusable
    FailedPretest,
    /// Evicted to make room under the pool's capacity ceiling
    CapacityPressure,
}

impl ExpirationReason {
    pub fn name(self) -> &'static str {
        match self {
            ExpirationReason::InactivityTimeout => "inactivity timeout",
            ExpirationReason::MaxLifetime => "maximum lifetime",
            ExpirationReason::MaxUseCount => "maximum use count",
            ExpirationReason::MaxUseTime => "maximum use time",
            ExpirationReason::FailedPretest => "failed pretest",
            ExpirationReason::CapacityPressure => "capacity pressure",
        }
    }
}

impl fmt::Display for ExpirationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

struct ItemState {
    in_use: bool,
    last_used: Instant,
    last_acquired: Instant,
    use_count: u64,
    failed_pretest: bool,
}

/// One pooled, authenticated session plus its usage bookkeeping
///
/// An item is exclusively owned by one caller while in use and owned by the
/// pool while idle; the pool is the only mutator of the in-use flag.
pub struct PoolItem {
    id: Uuid,
    session: Arc<dyn HostSession>,
    created: Instant,
    locale: Option<String>,
    state: Mutex<ItemState>,
}

impl PoolItem {
    /// Wrap a freshly created session, already claimed by its creator
    pub fn new(session: Arc<dyn HostSession>, locale: Option<String>) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            session,
            created: now,
            locale,
            state: Mutex::new(ItemState {
                in_use: true,
                last_used: now,
                last_acquired: now,
                use_count: 1,
                failed_pretest: false,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ItemState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn session(&self) -> &Arc<dyn HostSession> {
        &self.session
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    pub fn is_secure(&self) -> bool {
        self.session.is_secure()
    }

    pub fn is_in_use(&self) -> bool {
        self.state().in_use
    }

    pub fn use_count(&self) -> u64 {
        self.state().use_count
    }

    pub fn has_failed_pretest(&self) -> bool {
        self.state().failed_pretest
    }

    /// Time since the item was returned to the pool; zero while in use
    pub fn idle_time(&self) -> Duration {
        let state = self.state();
        if state.in_use {
            Duration::ZERO
        } else {
            state.last_used.elapsed()
        }
    }

    /// Time since the item was last handed out; zero while idle
    pub fn time_in_use(&self) -> Duration {
        let state = self.state();
        if state.in_use {
            state.last_acquired.elapsed()
        } else {
            Duration::ZERO
        }
    }

    /// Time since the item was created
    pub fn lifetime(&self) -> Duration {
        self.created.elapsed()
    }

    /// Atomically claim an idle, healthy item for exclusive use
    ///
    /// Returns false if the item is already claimed or has failed a
    /// pretest; a failed item is never handed out again.
    pub fn try_claim(&self) -> bool {
        let mut state = self.state();
        if state.in_use || state.failed_pretest {
            return false;
        }
        state.in_use = true;
        state.last_acquired = Instant::now();
        state.use_count += 1;
        true
    }

    /// Return the item to the pool's idle set
    pub fn release(&self) {
        let mut state = self.state();
        state.in_use = false;
        state.last_used = Instant::now();
    }

    /// Record a failed pretest and release the claim taken for probing
    pub fn mark_failed_pretest(&self) {
        let mut state = self.state();
        state.failed_pretest = true;
        state.in_use = false;
        state.last_used = Instant::now();
    }

    /// Liveness check with memoized failure
    ///
    /// A previously failed item answers false without touching the network,
    /// so a flaky connection is not probed over and over. A fresh probe
    /// failure permanently marks the item.
    pub fn is_alive(&self) -> bool {
        if self.state().failed_pretest {
            return false;
        }
        if self.session.probe_alive() {
            true
        } else {
            self.state().failed_pretest = true;
            false
        }
    }

    /// Evaluate the expiration rules for this single item
    ///
    /// Checked in fixed order: inactivity timeout, maximum lifetime,
    /// maximum use count, maximum use time. First match wins. The pool's
    /// bulk sweep applies its own precedence and does not use this path.
    pub fn check_expiration(&self, limits: &PoolLimits) -> Option<ExpirationReason> {
        let state = self.state();

        if !state.in_use
            && limits.max_idle_ms > 0
            && state.last_used.elapsed() > Duration::from_millis(limits.max_idle_ms)
        {
            return Some(ExpirationReason::InactivityTimeout);
        }
        if limits.max_lifetime_ms > 0
            && self.created.elapsed() > Duration::from_millis(limits.max_lifetime_ms)
        {
            return Some(ExpirationReason::MaxLifetime);
        }
        if limits.max_use_count > 0 && state.use_count > limits.max_use_count {
            return Some(ExpirationReason::MaxUseCount);
        }
        if state.in_use
            && limits.max_use_time_ms > 0
            && state.last_acquired.elapsed() > Duration::from_millis(limits.max_use_time_ms)
        {
            return Some(ExpirationReason::MaxUseTime);
        }
        None
    }
}

impl fmt::Debug for PoolItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("PoolItem")
            .field("id", &self.id)
            .field("system", &self.session.system())
            .field("principal", &self.session.principal())
            .field("in_use", &state.in_use)
            .field("use_count", &state.use_count)
            .field("failed_pretest", &state.failed_pretest)
            .field("locale", &self.locale)
            .finish()
    }
}
