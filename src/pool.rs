//! Connection pool for one host and principal
//!
//! The pool owns every pooled session for one (system, principal) pair and
//! implements acquisition, expiration sweeps, and forced eviction under a
//! capacity ceiling. The pool lock covers only in-memory bookkeeping; all
//! network IO (liveness probes, handshakes, teardown) happens with the lock
//! released, so unrelated connections stay available to other callers.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::warn;
use uuid::Uuid;

use crate::config::PoolLimits;
use crate::error::{HostlinkResult, PoolError};
use crate::pool_item::{ExpirationReason, PoolItem};
use crate::service::HostService;
use crate::session::{HostSession, SessionFactory};

/// Notification emitted when the pool creates or expires a connection
#[derive(Debug, Clone)]
pub struct PoolEvent {
    pub timestamp: DateTime<Utc>,
    pub item_id: Uuid,
    pub system: String,
    pub principal: String,
    pub kind: PoolEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEventKind {
    /// A new connection was created and handed to its first caller
    ConnectionCreated,
    /// A connection was expired or evicted for the given reason
    ConnectionExpired(ExpirationReason),
}

/// Receives pool lifecycle notifications
pub trait PoolListener: Send + Sync {
    fn on_pool_event(&self, event: &PoolEvent);
}

/// Point-in-time pool occupancy counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub active: usize,
    pub idle: usize,
}

impl PoolStats {
    pub fn total(&self) -> usize {
        self.active + self.idle
    }
}

/// Pool of authenticated connections to one host under one principal
pub struct ConnectionPool {
    system: String,
    principal: String,
    limits: Mutex<PoolLimits>,
    items: Mutex<Vec<Arc<PoolItem>>>,
    factory: Box<dyn SessionFactory>,
    listeners: Mutex<Vec<Arc<dyn PoolListener>>>,
}

impl ConnectionPool {
    pub fn new(
        system: &str,
        principal: &str,
        factory: Box<dyn SessionFactory>,
        limits: PoolLimits,
    ) -> Self {
        Self {
            system: system.to_string(),
            principal: principal.to_string(),
            limits: Mutex::new(limits),
            items: Mutex::new(Vec::new()),
            factory,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Snapshot of the configured limits
    pub fn limits(&self) -> PoolLimits {
        self.guard(&self.limits).clone()
    }

    pub fn set_limits(&self, limits: PoolLimits) {
        *self.guard(&self.limits) = limits;
    }

    pub fn add_listener(&self, listener: Arc<dyn PoolListener>) {
        self.guard(&self.listeners).push(listener);
    }

    /// Active and idle connection counts
    pub fn stats(&self) -> PoolStats {
        let items = self.guard(&self.items);
        let active = items.iter().filter(|item| item.is_in_use()).count();
        PoolStats {
            active,
            idle: items.len() - active,
        }
    }

    fn guard<'a, T>(&self, lock: &'a Mutex<T>) -> MutexGuard<'a, T> {
        match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Acquire a connection using the configured pretest setting
    pub fn acquire(
        &self,
        service: Option<HostService>,
        secure: bool,
        locale: Option<&str>,
    ) -> HostlinkResult<Arc<PoolItem>> {
        let pretest = self.limits().pretest_connections;
        self.acquire_with_pretest(service, secure, locale, pretest)
    }

    /// Acquire a connection, reusing an idle one when possible
    ///
    /// The idle scan matches on security mode and locale, preferring an
    /// item already connected to the requested service, then falling back
    /// to any matching idle item which is connected to the service on the
    /// spot. When nothing can be reused the pool reclaims expired items,
    /// evicts the least recently used idle items, and finally creates a
    /// fresh connection, failing with a capacity error if the ceiling still
    /// cannot accommodate one.
    pub fn acquire_with_pretest(
        &self,
        service: Option<HostService>,
        secure: bool,
        locale: Option<&str>,
        pretest: bool,
    ) -> HostlinkResult<Arc<PoolItem>> {
        let limits = self.limits();

        // Pass 1: idle items already connected to the requested service
        if let Some(item) = self.claim_matching(secure, locale, service, pretest, &limits) {
            return Ok(item);
        }

        // Pass 2: any matching idle item, connected to the service on demand
        if let Some(target) = service {
            loop {
                let Some(item) = self.claim_matching(secure, locale, None, pretest, &limits)
                else {
                    break;
                };
                match item.session().connect_service(target) {
                    Ok(()) => return Ok(item),
                    Err(e) => {
                        warn!(
                            "pooled connection {} cannot reach {}: {e}; discarding it",
                            item.id(),
                            target
                        );
                        self.remove_item(&item);
                        self.teardown(&item, ExpirationReason::FailedPretest);
                    }
                }
            }
        }

        // Pass 3: reclaim, evict, then create
        if limits.max_connections > 0 && self.len() >= limits.max_connections {
            self.remove_expired_connections();
            if self.len() >= limits.max_connections {
                self.shut_down_oldest();
            }
            if self.len() >= limits.max_connections {
                return Err(PoolError::CapacityExceeded {
                    max: limits.max_connections,
                }
                .into());
            }
        }

        // Handshake IO runs without the pool lock; the new item is not yet
        // registered, so no other caller can observe it half built.
        let session = self.factory.create(secure, locale, service)?;
        let item = Arc::new(PoolItem::new(session, locale.map(String::from)));
        self.guard(&self.items).push(item.clone());
        self.notify(PoolEventKind::ConnectionCreated, &item);
        Ok(item)
    }

    /// Return a connection to the idle set; never disconnects
    pub fn release(&self, item: &Arc<PoolItem>) -> HostlinkResult<()> {
        let registered = self
            .guard(&self.items)
            .iter()
            .any(|candidate| candidate.id() == item.id());
        if !registered {
            return Err(PoolError::UnknownConnection {
                id: item.id().to_string(),
            }
            .into());
        }
        item.release();
        Ok(())
    }

    /// Scan-and-mark under the pool lock, pretest IO outside it
    fn claim_matching(
        &self,
        secure: bool,
        locale: Option<&str>,
        connected_to: Option<HostService>,
        pretest: bool,
        limits: &PoolLimits,
    ) -> Option<Arc<PoolItem>> {
        loop {
            let candidate = {
                let items = self.guard(&self.items);
                items
                    .iter()
                    .find(|item| {
                        item.is_secure() == secure
                            && item.locale() == locale
                            && Self::sweep_reason(item, limits).is_none()
                            && connected_to
                                .map_or(true, |svc| item.session().is_connected(svc))
                            && item.try_claim()
                    })
                    .cloned()
            };
            let item = candidate?;
            if pretest && !item.is_alive() {
                // The probe marked the item failed; put the claim back so
                // the next sweep can prune it, and keep scanning.
                item.mark_failed_pretest();
                continue;
            }
            return Some(item);
        }
    }

    /// Remove every connection violating a configured limit
    ///
    /// Rules apply in fixed precedence: an in-use connection held past the
    /// maximum use time is forcibly disconnected even while marked in use;
    /// idle connections go next for failed pretest, then idle time, then
    /// use count, then lifetime. In-use connections not overdue are never
    /// touched.
    pub fn remove_expired_connections(&self) {
        let limits = self.limits();
        let mut victims: Vec<(Arc<PoolItem>, ExpirationReason)> = Vec::new();
        {
            let mut items = self.guard(&self.items);
            items.retain(|item| match Self::sweep_reason(item, &limits) {
                Some(reason) => {
                    victims.push((item.clone(), reason));
                    false
                }
                None => true,
            });
        }
        // Teardown IO happens with the pool lock released
        for (item, reason) in victims {
            self.teardown(&item, reason);
        }
    }

    fn sweep_reason(item: &PoolItem, limits: &PoolLimits) -> Option<ExpirationReason> {
        if item.is_in_use() {
            if limits.max_use_time_ms > 0
                && item.time_in_use() > Duration::from_millis(limits.max_use_time_ms)
            {
                return Some(ExpirationReason::MaxUseTime);
            }
            return None;
        }
        if item.has_failed_pretest() {
            return Some(ExpirationReason::FailedPretest);
        }
        if limits.max_idle_ms > 0 && item.idle_time() > Duration::from_millis(limits.max_idle_ms) {
            return Some(ExpirationReason::InactivityTimeout);
        }
        if limits.max_use_count > 0 && item.use_count() > limits.max_use_count {
            return Some(ExpirationReason::MaxUseCount);
        }
        if limits.max_lifetime_ms > 0
            && item.lifetime() > Duration::from_millis(limits.max_lifetime_ms)
        {
            return Some(ExpirationReason::MaxLifetime);
        }
        None
    }

    /// Evict least-recently-used idle connections to get under capacity
    ///
    /// Removes up to `count - max + 1` connections so one more can be
    /// admitted, choosing the idle item with the greatest idle time each
    /// round (ties broken by lowest index) and stopping early if no idle
    /// item remains.
    pub fn shut_down_oldest(&self) {
        let max = self.limits().max_connections;
        if max == 0 {
            return;
        }
        let needed = (self.len() + 1).saturating_sub(max);
        for _ in 0..needed {
            let victim = {
                let mut items = self.guard(&self.items);
                let mut oldest: Option<(usize, Duration)> = None;
                for (index, item) in items.iter().enumerate() {
                    if item.is_in_use() {
                        continue;
                    }
                    let idle = item.idle_time();
                    match oldest {
                        Some((_, best)) if idle <= best => {}
                        _ => oldest = Some((index, idle)),
                    }
                }
                oldest.map(|(index, _)| items.remove(index))
            };
            match victim {
                Some(item) => self.teardown(&item, ExpirationReason::CapacityPressure),
                None => break,
            }
        }
    }

    /// Remove one connection if it violates a configured limit
    ///
    /// Evaluates the single-item expiration rules (inactivity, lifetime,
    /// use count, use time, in that order) and tears the connection down
    /// when one matches.
    pub fn remove_if_expired(&self, item: &Arc<PoolItem>) -> Option<ExpirationReason> {
        let limits = self.limits();
        let reason = item.check_expiration(&limits)?;
        self.remove_item(item);
        self.teardown(item, reason);
        Some(reason)
    }

    /// Tear down every pooled connection and empty the pool
    pub fn close(&self) {
        let drained: Vec<Arc<PoolItem>> = self.guard(&self.items).drain(..).collect();
        for item in drained {
            item.session().disconnect();
        }
    }

    fn len(&self) -> usize {
        self.guard(&self.items).len()
    }

    fn remove_item(&self, item: &Arc<PoolItem>) {
        let mut items = self.guard(&self.items);
        items.retain(|candidate| candidate.id() != item.id());
    }

    /// Disconnect the session and notify listeners
    ///
    /// Teardown failures are logged inside the transport layer; eviction
    /// always makes progress.
    fn teardown(&self, item: &Arc<PoolItem>, reason: ExpirationReason) {
        item.session().disconnect();
        self.notify(PoolEventKind::ConnectionExpired(reason), item);
    }

    fn notify(&self, kind: PoolEventKind, item: &Arc<PoolItem>) {
        let event = PoolEvent {
            timestamp: Utc::now(),
            item_id: item.id(),
            system: self.system.clone(),
            principal: self.principal.clone(),
            kind,
        };
        let listeners = self.guard(&self.listeners);
        for listener in listeners.iter() {
            listener.on_pool_event(&event);
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("ConnectionPool")
            .field("system", &self.system)
            .field("principal", &self.principal)
            .field("active", &stats.active)
            .field("idle", &stats.idle)
            .finish()
    }
}
