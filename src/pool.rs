//! The pool engine: bounded lifecycle management of pooled connections
//!
//! All bookkeeping (idle set, borrowed set, in-flight create count, waiter
//! queue) lives behind a single mutex, and no lock is ever held across an
//! await point. Handing a released resource to the next waiter is therefore
//! atomic with respect to every other pool operation: nothing can observe or
//! steal a resource between release and waiter assignment.

use crate::circuit_breaker::CircuitBreaker;
use crate::config::PoolOptions;
use crate::errors::{PoolError, PoolResult};
use crate::factory::ResourceFactory;
use crate::health::HealthStatus;
use crate::logger::{Logger, default_logger};
use crate::metrics::{MetricsTracker, PoolMetrics};

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::Weak;
use tokio::time::Instant;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

/// A snapshot of the pool's bookkeeping counters.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Resources sitting in the idle set
    pub idle: usize,
    /// Resources currently checked out
    pub borrowed: usize,
    /// Factory creates in flight, counted against `max`
    pub pending_creates: usize,
    /// Callers queued for a resource
    pub waiters: usize,
    /// Configured minimum
    pub min: usize,
    /// Configured maximum
    pub max: usize,
}

impl PoolStatus {
    /// Total resources the pool is accountable for, including in-flight
    /// creations. Never exceeds `max`.
    pub fn size(&self) -> usize {
        self.idle + self.borrowed + self.pending_creates
    }
}

/// A borrowed resource that returns to its pool when dropped.
///
/// Prefer [`Pool::release`] or [`Pool::destroy`] for explicit control;
/// dropping the guard is equivalent to releasing it.
#[must_use]
pub struct Pooled<F: ResourceFactory> {
    pool: Weak<PoolInner<F>>,
    id: u64,
    created_at: Instant,
    resource: Option<F::Resource>,
}

impl<F: ResourceFactory> std::fmt::Debug for Pooled<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl<F: ResourceFactory> Deref for Pooled<F> {
    type Target = F::Resource;

    fn deref(&self) -> &Self::Target {
        self.resource.as_ref().expect("resource already taken")
    }
}

impl<F: ResourceFactory> DerefMut for Pooled<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource.as_mut().expect("resource already taken")
    }
}

impl<F: ResourceFactory> Drop for Pooled<F> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take()
            && let Some(inner) = self.pool.upgrade()
            && inner.give_back(self.id, resource, self.created_at).is_err()
        {
            inner.logger.debug("dropped a guard the pool no longer tracks");
        }
    }
}

enum CreateDemand {
    /// Triggered by a queued caller; a failure rejects that caller.
    Waiter,
    /// Triggered by the min-fill policy; a failure is only logged.
    TopUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Draining,
    Closed,
}

struct IdleEntry<T> {
    id: u64,
    resource: T,
    created_at: Instant,
    idle_since: Instant,
}

/// One queued acquire call. Ordered by priority (higher first), then by
/// arrival (earlier first). A waiter re-queued after a failed validation
/// keeps its original sequence number and therefore its place in line.
struct Waiter<F: ResourceFactory> {
    priority: i32,
    seq: u64,
    attempts: u32,
    tx: oneshot::Sender<PoolResult<Pooled<F>, F::Error>>,
}

impl<F: ResourceFactory> PartialEq for Waiter<F> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<F: ResourceFactory> Eq for Waiter<F> {}

impl<F: ResourceFactory> PartialOrd for Waiter<F> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<F: ResourceFactory> Ord for Waiter<F> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct PoolState<F: ResourceFactory> {
    idle: VecDeque<IdleEntry<F::Resource>>,
    borrowed: HashMap<u64, Instant>,
    pending_creates: usize,
    waiters: BinaryHeap<Waiter<F>>,
    next_id: u64,
    next_seq: u64,
    phase: Phase,
    drain_txs: Vec<oneshot::Sender<()>>,
}

impl<F: ResourceFactory> PoolState<F> {
    fn new() -> Self {
        Self {
            idle: VecDeque::new(),
            borrowed: HashMap::new(),
            pending_creates: 0,
            waiters: BinaryHeap::new(),
            next_id: 0,
            next_seq: 0,
            phase: Phase::Running,
            drain_txs: Vec::new(),
        }
    }

    /// Everything counted against `max`.
    fn total(&self) -> usize {
        self.idle.len() + self.borrowed.len() + self.pending_creates
    }
}

struct PoolInner<F: ResourceFactory> {
    factory: F,
    options: PoolOptions,
    logger: Arc<dyn Logger>,
    metrics: MetricsTracker,
    breaker: Option<CircuitBreaker>,
    state: Mutex<PoolState<F>>,
}

/// Generic bounded connection pool.
///
/// Cheap to clone; all clones share the same state. Resources are produced
/// and torn down by a [`ResourceFactory`] and handed out as [`Pooled`]
/// guards.
///
/// # Examples
///
/// ```no_run
/// use kvpool::{Pool, PoolOptions, ResourceFactory};
/// # use async_trait::async_trait;
/// # struct Conn;
/// # #[derive(Debug, thiserror::Error)]
/// # #[error("connect error")]
/// # struct ConnError;
/// # struct Factory;
/// # #[async_trait]
/// # impl ResourceFactory for Factory {
/// #     type Resource = Conn;
/// #     type Error = ConnError;
/// #     async fn create(&self) -> Result<Conn, ConnError> { Ok(Conn) }
/// #     async fn destroy(&self, _resource: Conn) {}
/// # }
/// # async fn demo() -> Result<(), kvpool::PoolError<ConnError>> {
/// let pool = Pool::new(Factory, PoolOptions::new().with_bounds(2, 10));
/// let conn = pool.acquire().await?;
/// // use the connection, then hand it back
/// pool.release(conn)?;
/// # Ok(())
/// # }
/// ```
pub struct Pool<F: ResourceFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ResourceFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ResourceFactory> Pool<F> {
    /// Create a pool with the default (`tracing`-backed) logger.
    ///
    /// Must be called from within a Tokio runtime: top-up creates and the
    /// maintenance sweep are spawned immediately.
    ///
    /// # Panics
    ///
    /// Panics if `options.min > options.max`.
    pub fn new(factory: F, options: PoolOptions) -> Self {
        Self::with_logger(factory, options, default_logger())
    }

    /// Create a pool with a caller-supplied logger.
    pub fn with_logger(factory: F, options: PoolOptions, logger: Arc<dyn Logger>) -> Self {
        assert!(
            options.min <= options.max,
            "pool min must not exceed max ({} > {})",
            options.min,
            options.max
        );
        let breaker = options.enable_circuit_breaker.then(|| {
            CircuitBreaker::new(
                options.circuit_breaker_threshold,
                options.circuit_breaker_cooldown,
            )
        });
        let inner = Arc::new(PoolInner {
            factory,
            options,
            logger,
            metrics: MetricsTracker::new(),
            breaker,
            state: Mutex::new(PoolState::new()),
        });

        {
            // initial top-up to min
            let mut state = inner.state.lock();
            inner.pump(&mut state);
        }
        PoolInner::spawn_maintenance(&inner);

        Self { inner }
    }

    /// Acquire a resource with default (zero) priority.
    pub async fn acquire(&self) -> PoolResult<Pooled<F>, F::Error> {
        self.acquire_priority(0).await
    }

    /// Acquire a resource, jumping ahead of any waiter with a lower priority.
    ///
    /// Within equal priority, callers are served in arrival order. Resolution
    /// is always asynchronous, even when an idle resource is available, so an
    /// earlier waiter can never be overtaken.
    pub async fn acquire_priority(&self, priority: i32) -> PoolResult<Pooled<F>, F::Error> {
        let rx = {
            let mut state = self.inner.state.lock();
            match state.phase {
                Phase::Running => {}
                Phase::Draining => return Err(PoolError::Draining),
                Phase::Closed => return Err(PoolError::Shutdown),
            }
            if let Some(breaker) = &self.inner.breaker
                && !breaker.allow_request()
            {
                return Err(PoolError::CircuitOpen);
            }

            let (tx, rx) = oneshot::channel();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.waiters.push(Waiter {
                priority,
                seq,
                attempts: 0,
                tx,
            });
            self.inner.pump(&mut state);
            rx
        };

        match self.inner.options.acquire_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(PoolError::Shutdown),
                Err(_) => {
                    // rx is dropped here; the scheduler skips dead waiters, so
                    // the resource that eventually frees up goes to the next
                    // caller instead of being lost
                    self.inner.metrics.inc_acquire_timeouts();
                    Err(PoolError::AcquireTimeout(limit))
                }
            },
            None => match rx.await {
                Ok(result) => result,
                Err(_) => Err(PoolError::Shutdown),
            },
        }
    }

    /// Return a borrowed resource to the idle set.
    ///
    /// If a waiter is queued the resource is handed to it directly instead of
    /// going idle. Fails with [`PoolError::InvalidResource`] if the guard was
    /// issued by a different pool; in that case the guard is dropped and the
    /// resource finds its way home through the guard's `Drop`.
    pub fn release(&self, mut pooled: Pooled<F>) -> PoolResult<(), F::Error> {
        if !pooled.pool.ptr_eq(&Arc::downgrade(&self.inner)) {
            return Err(PoolError::InvalidResource);
        }
        let Some(resource) = pooled.resource.take() else {
            return Err(PoolError::InvalidResource);
        };
        self.inner.give_back(pooled.id, resource, pooled.created_at)
    }

    /// Surrender a borrowed resource for destruction.
    ///
    /// Frees capacity immediately (serving the next waiter or topping up to
    /// `min`), then awaits the factory teardown.
    pub async fn destroy(&self, mut pooled: Pooled<F>) -> PoolResult<(), F::Error> {
        if !pooled.pool.ptr_eq(&Arc::downgrade(&self.inner)) {
            return Err(PoolError::InvalidResource);
        }
        let Some(resource) = pooled.resource.take() else {
            return Err(PoolError::InvalidResource);
        };
        {
            let mut state = self.inner.state.lock();
            if state.borrowed.remove(&pooled.id).is_none() {
                drop(state);
                self.inner.spawn_destroy(resource);
                return Err(PoolError::InvalidResource);
            }
            if state.phase == Phase::Draining && state.borrowed.is_empty() {
                for tx in state.drain_txs.drain(..) {
                    let _ = tx.send(());
                }
            }
            self.inner.pump(&mut state);
        }
        self.inner.factory.destroy(resource).await;
        self.inner.metrics.inc_destroyed();
        Ok(())
    }

    /// Stop handing out resources and wait until nothing is borrowed.
    ///
    /// Queued waiters are failed with [`PoolError::Draining`]; serving them
    /// would re-borrow released resources and keep the drain from settling.
    pub async fn drain(&self) -> PoolResult<(), F::Error> {
        let rx = {
            let mut state = self.inner.state.lock();
            if state.phase == Phase::Closed {
                return Err(PoolError::Shutdown);
            }
            state.phase = Phase::Draining;
            while let Some(waiter) = state.waiters.pop() {
                let _ = waiter.tx.send(Err(PoolError::Draining));
            }
            if state.borrowed.is_empty() {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.drain_txs.push(tx);
                Some(rx)
            }
        };
        if let Some(rx) = rx {
            let _ = rx.await;
        }
        self.inner.logger.info("pool drained; all connections idle");
        Ok(())
    }

    /// Destroy every idle resource and shut the pool down.
    ///
    /// Call [`drain`](Self::drain) first for an orderly shutdown. A resource
    /// still borrowed when `clear` runs is destroyed when its guard comes
    /// back, not re-idled.
    pub async fn clear(&self) -> PoolResult<(), F::Error> {
        let victims: Vec<F::Resource> = {
            let mut state = self.inner.state.lock();
            state.phase = Phase::Closed;
            while let Some(waiter) = state.waiters.pop() {
                let _ = waiter.tx.send(Err(PoolError::Shutdown));
            }
            for tx in state.drain_txs.drain(..) {
                let _ = tx.send(());
            }
            state.idle.drain(..).map(|entry| entry.resource).collect()
        };
        for resource in victims {
            self.inner.factory.destroy(resource).await;
            self.inner.metrics.inc_destroyed();
        }
        Ok(())
    }

    /// Drain, then clear.
    pub async fn end(&self) -> PoolResult<(), F::Error> {
        self.drain().await?;
        self.clear().await?;
        self.inner.logger.info("disconnected all pooled connections");
        Ok(())
    }

    /// Current bookkeeping counters.
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            idle: state.idle.len(),
            borrowed: state.borrowed.len(),
            pending_creates: state.pending_creates,
            waiters: PoolInner::<F>::live_waiters(&state),
            min: self.inner.options.min,
            max: self.inner.options.max,
        }
    }

    /// Lifetime counters plus current gauges.
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics.snapshot(self.status())
    }

    /// Health assessment derived from the current status.
    pub fn health(&self) -> HealthStatus {
        HealthStatus::from_status(self.status())
    }
}

impl<F: ResourceFactory> PoolInner<F> {
    /// The scheduling pass, run after every state change while the lock is
    /// held: match idle resources to waiters, then start creates for queued
    /// demand, then top up to `min`.
    fn pump(self: &Arc<Self>, state: &mut PoolState<F>) {
        loop {
            if state.idle.is_empty() {
                break;
            }
            let Some(waiter) = Self::pop_live_waiter(state) else {
                break;
            };
            let Some(entry) = state.idle.pop_front() else {
                state.waiters.push(waiter);
                break;
            };
            state.borrowed.insert(entry.id, entry.created_at);
            if self.options.test_on_borrow {
                self.spawn_validate(entry, waiter);
            } else if let Some(entry) = self.hand_over(state, entry, waiter) {
                state.idle.push_front(entry);
            }
        }

        if state.phase != Phase::Running || self.breaker_open() {
            return;
        }

        let demand = Self::live_waiters(state);
        while demand > state.pending_creates && state.total() < self.options.max {
            state.pending_creates += 1;
            self.spawn_create(CreateDemand::Waiter);
        }

        while state.total() < self.options.min {
            state.pending_creates += 1;
            self.spawn_create(CreateDemand::TopUp);
        }
    }

    /// Send a resource to a waiter. Returns the entry if the waiter vanished
    /// between the liveness check and the send; the borrowed mark is undone
    /// in that case.
    fn hand_over(
        self: &Arc<Self>,
        state: &mut PoolState<F>,
        entry: IdleEntry<F::Resource>,
        waiter: Waiter<F>,
    ) -> Option<IdleEntry<F::Resource>> {
        let id = entry.id;
        let created_at = entry.created_at;
        let pooled = Pooled {
            pool: Arc::downgrade(self),
            id,
            created_at,
            resource: Some(entry.resource),
        };
        match waiter.tx.send(Ok(pooled)) {
            Ok(()) => {
                self.metrics.inc_acquired();
                None
            }
            Err(rejected) => {
                state.borrowed.remove(&id);
                if let Ok(mut pooled) = rejected {
                    // disarm the guard so its Drop does not re-enter the lock
                    pooled.resource.take().map(|resource| IdleEntry {
                        id,
                        resource,
                        created_at,
                        idle_since: Instant::now(),
                    })
                } else {
                    None
                }
            }
        }
    }

    fn pop_live_waiter(state: &mut PoolState<F>) -> Option<Waiter<F>> {
        while let Some(waiter) = state.waiters.pop() {
            if !waiter.tx.is_closed() {
                return Some(waiter);
            }
        }
        None
    }

    fn live_waiters(state: &PoolState<F>) -> usize {
        state
            .waiters
            .iter()
            .filter(|waiter| !waiter.tx.is_closed())
            .count()
    }

    fn breaker_open(&self) -> bool {
        self.breaker
            .as_ref()
            .is_some_and(|breaker| !breaker.allow_request())
    }

    fn spawn_create(self: &Arc<Self>, demand: CreateDemand) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let result = inner.factory.create().await;
            inner.on_create_complete(demand, result);
        });
    }

    fn on_create_complete(
        self: &Arc<Self>,
        demand: CreateDemand,
        result: Result<F::Resource, F::Error>,
    ) {
        let mut to_destroy = None;
        {
            let mut state = self.state.lock();
            // restored on every outcome, or capacity silently shrinks forever
            state.pending_creates -= 1;
            match result {
                Ok(resource) => {
                    if let Some(breaker) = &self.breaker {
                        breaker.record_success();
                    }
                    self.metrics.inc_created();
                    if state.phase == Phase::Closed {
                        to_destroy = Some(resource);
                    } else {
                        let id = state.next_id;
                        state.next_id += 1;
                        let now = Instant::now();
                        let mut entry = IdleEntry {
                            id,
                            resource,
                            created_at: now,
                            idle_since: now,
                        };
                        // a fresh resource goes straight to a waiter without a
                        // validation round
                        loop {
                            match Self::pop_live_waiter(&mut state) {
                                Some(waiter) => {
                                    state.borrowed.insert(entry.id, entry.created_at);
                                    match self.hand_over(&mut state, entry, waiter) {
                                        None => break,
                                        Some(back) => entry = back,
                                    }
                                }
                                None => {
                                    state.idle.push_back(entry);
                                    break;
                                }
                            }
                        }
                        self.pump(&mut state);
                    }
                }
                Err(err) => {
                    if let Some(breaker) = &self.breaker {
                        breaker.record_failure();
                    }
                    self.metrics.inc_create_failures();
                    match demand {
                        CreateDemand::Waiter => match Self::pop_live_waiter(&mut state) {
                            Some(waiter) => {
                                let _ = waiter.tx.send(Err(PoolError::FactoryCreate(err)));
                            }
                            None => {
                                self.logger
                                    .warn(&format!("connection create failed, no caller waiting: {err}"));
                            }
                        },
                        CreateDemand::TopUp => {
                            self.logger
                                .warn(&format!("background connection create failed: {err}"));
                        }
                    }
                    // no automatic retry here: the next acquire, release or
                    // maintenance tick drives new creates
                }
            }
        }
        if let Some(resource) = to_destroy {
            self.spawn_destroy(resource);
        }
    }

    fn spawn_validate(self: &Arc<Self>, entry: IdleEntry<F::Resource>, mut waiter: Waiter<F>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let valid = inner.factory.validate(&entry.resource).await;
            let to_destroy;
            {
                let mut state = inner.state.lock();
                if valid {
                    if let Some(back) = inner.hand_over(&mut state, entry, waiter) {
                        state.idle.push_front(back);
                    }
                    return;
                }
                inner.metrics.inc_validation_failures();
                let id = entry.id;
                state.borrowed.remove(&id);
                to_destroy = entry.resource;
                waiter.attempts += 1;
                if waiter.attempts >= inner.options.max_validation_attempts {
                    let attempts = waiter.attempts;
                    let _ = waiter.tx.send(Err(PoolError::ValidationFailed { attempts }));
                } else {
                    // keeps its original sequence number, and with it its
                    // place in the queue
                    state.waiters.push(waiter);
                }
                inner.pump(&mut state);
            }
            inner
                .logger
                .debug("destroying connection that failed validation on borrow");
            inner.factory.destroy(to_destroy).await;
            inner.metrics.inc_destroyed();
        });
    }

    fn give_back(
        self: &Arc<Self>,
        id: u64,
        resource: F::Resource,
        created_at: Instant,
    ) -> PoolResult<(), F::Error> {
        let to_destroy;
        {
            let mut state = self.state.lock();
            if state.borrowed.remove(&id).is_none() {
                return Err(PoolError::InvalidResource);
            }
            self.metrics.inc_released();
            if state.phase == Phase::Closed {
                to_destroy = Some(resource);
            } else {
                to_destroy = None;
                state.idle.push_back(IdleEntry {
                    id,
                    resource,
                    created_at,
                    idle_since: Instant::now(),
                });
                if state.phase == Phase::Draining && state.borrowed.is_empty() {
                    for tx in state.drain_txs.drain(..) {
                        let _ = tx.send(());
                    }
                }
                self.pump(&mut state);
            }
        }
        if let Some(resource) = to_destroy {
            self.spawn_destroy(resource);
        }
        Ok(())
    }

    /// Fire-and-forget teardown, usable from sync contexts (guard drops).
    fn spawn_destroy(self: &Arc<Self>, resource: F::Resource) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(self);
                handle.spawn(async move {
                    inner.factory.destroy(resource).await;
                    inner.metrics.inc_destroyed();
                });
            }
            // runtime already gone; the resource can only be dropped
            Err(_) => drop(resource),
        }
    }

    /// Periodic sweep: evict stale idle resources, then re-run the scheduler
    /// so failed top-ups get retried on a later tick.
    fn spawn_maintenance(inner: &Arc<Self>) {
        let weak = Arc::downgrade(inner);
        let period = inner.options.eviction_interval;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick.tick().await;
            loop {
                tick.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if !inner.maintain().await {
                    break;
                }
            }
        });
    }

    async fn maintain(self: &Arc<Self>) -> bool {
        let victims: Vec<F::Resource> = {
            let mut state = self.state.lock();
            if state.phase == Phase::Closed {
                return false;
            }
            let mut victims = Vec::new();
            if let Some(idle_timeout) = self.options.idle_timeout {
                // oldest idle entries sit at the front; never shrink the live
                // set below min
                while state.idle.len() + state.borrowed.len() > self.options.min {
                    let expired = state
                        .idle
                        .front()
                        .is_some_and(|entry| entry.idle_since.elapsed() >= idle_timeout);
                    if !expired {
                        break;
                    }
                    if let Some(entry) = state.idle.pop_front() {
                        victims.push(entry.resource);
                    }
                }
            }
            if state.phase == Phase::Running {
                self.pump(&mut state);
            }
            victims
        };
        let evicted = victims.len();
        for resource in victims {
            self.factory.destroy(resource).await;
            self.metrics.inc_destroyed();
        }
        if evicted > 0 {
            self.logger
                .debug(&format!("evicted {evicted} idle connections past idle timeout"));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering as AtomicOrdering};
    use std::time::Duration;

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct TestError(&'static str);

    #[derive(Debug)]
    struct TestConn {
        serial: u32,
    }

    struct TestFactory {
        created: AtomicU32,
        destroyed: AtomicU32,
        fail_next: AtomicU32,
        valid: AtomicBool,
        gate: tokio::sync::Semaphore,
        gated: bool,
    }

    impl TestFactory {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                created: AtomicU32::new(0),
                destroyed: AtomicU32::new(0),
                fail_next: AtomicU32::new(0),
                valid: AtomicBool::new(true),
                gate: tokio::sync::Semaphore::new(0),
                gated: false,
            })
        }

        /// Creates block until a permit is added to `gate`.
        fn gated() -> Arc<Self> {
            Arc::new(Self {
                created: AtomicU32::new(0),
                destroyed: AtomicU32::new(0),
                fail_next: AtomicU32::new(0),
                valid: AtomicBool::new(true),
                gate: tokio::sync::Semaphore::new(0),
                gated: true,
            })
        }

        fn created(&self) -> u32 {
            self.created.load(AtomicOrdering::SeqCst)
        }

        fn destroyed(&self) -> u32 {
            self.destroyed.load(AtomicOrdering::SeqCst)
        }
    }

    #[async_trait]
    impl ResourceFactory for Arc<TestFactory> {
        type Resource = TestConn;
        type Error = TestError;

        async fn create(&self) -> Result<TestConn, TestError> {
            if self.gated {
                let permit = self
                    .gate
                    .acquire()
                    .await
                    .map_err(|_| TestError("gate closed"))?;
                permit.forget();
            }
            let failures = self.fail_next.load(AtomicOrdering::SeqCst);
            if failures > 0 {
                self.fail_next.store(failures - 1, AtomicOrdering::SeqCst);
                return Err(TestError("backend unreachable"));
            }
            let serial = self.created.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(TestConn { serial })
        }

        async fn destroy(&self, _resource: TestConn) {
            self.destroyed.fetch_add(1, AtomicOrdering::SeqCst);
        }

        async fn validate(&self, _resource: &TestConn) -> bool {
            self.valid.load(AtomicOrdering::SeqCst)
        }
    }

    /// Let spawned factory tasks and handoffs run.
    async fn settle() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    fn assert_capacity(pool: &Pool<Arc<TestFactory>>) {
        let status = pool.status();
        assert!(
            status.size() <= status.max,
            "capacity invariant violated: {status:?}"
        );
    }

    #[tokio::test]
    async fn tops_up_to_min_on_construction() {
        let factory = TestFactory::gated();
        let pool = Pool::new(Arc::clone(&factory), PoolOptions::new().with_bounds(2, 4));
        settle().await;

        let status = pool.status();
        assert_eq!(status.pending_creates, 2);
        assert_eq!(status.idle, 0);
        assert_eq!(status.borrowed, 0);

        factory.gate.add_permits(2);
        settle().await;

        let status = pool.status();
        assert_eq!(status.pending_creates, 0);
        assert_eq!(status.idle, 2);
        assert_capacity(&pool);
    }

    #[tokio::test]
    async fn end_to_end_capacity_scenario() {
        let factory = TestFactory::gated();
        let pool = Pool::new(Arc::clone(&factory), PoolOptions::new().with_bounds(2, 4));
        settle().await;
        factory.gate.add_permits(2);
        settle().await;
        assert_eq!(pool.status().idle, 2);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.acquire().await })
            })
            .collect();
        settle().await;

        // two served from idle, two new creates in flight
        let status = pool.status();
        assert_eq!(status.borrowed, 2);
        assert_eq!(status.pending_creates, 2);
        assert_eq!(status.idle, 0);
        assert_capacity(&pool);

        // a fifth concurrent acquire queues: max is reached
        let fifth = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        settle().await;
        // two waiters are pending on the in-flight creates, one on capacity
        assert_eq!(pool.status().waiters, 3);

        factory.gate.add_permits(2);
        settle().await;
        let mut guards = Vec::new();
        for handle in handles {
            guards.push(handle.await.unwrap().unwrap());
        }
        assert_eq!(pool.status().borrowed, 4);
        assert_eq!(pool.status().waiters, 1);
        assert_capacity(&pool);

        // releasing one serves the queued caller
        drop(guards.pop());
        settle().await;
        let fifth_guard = fifth.await.unwrap().unwrap();
        assert_eq!(pool.status().borrowed, 4);
        assert_eq!(pool.status().waiters, 0);
        drop(fifth_guard);
        drop(guards);
    }

    #[tokio::test]
    async fn waiters_served_by_priority_then_arrival() {
        let factory = TestFactory::new();
        let pool = Pool::new(Arc::clone(&factory), PoolOptions::new().with_bounds(0, 1));
        let guard = pool.acquire().await.unwrap();

        let w1 = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire_priority(5).await })
        };
        settle().await;
        let w2 = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire_priority(5).await })
        };
        settle().await;
        let w3 = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire_priority(10).await })
        };
        settle().await;
        assert_eq!(pool.status().waiters, 3);

        // highest priority first, despite arriving last
        drop(guard);
        settle().await;
        assert!(w3.is_finished());
        assert!(!w1.is_finished());
        assert!(!w2.is_finished());
        let g3 = w3.await.unwrap().unwrap();

        // then FIFO within equal priority
        drop(g3);
        settle().await;
        assert!(w1.is_finished());
        assert!(!w2.is_finished());
        let g1 = w1.await.unwrap().unwrap();

        drop(g1);
        settle().await;
        let _g2 = w2.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn acquire_returns_distinct_resources() {
        let factory = TestFactory::new();
        let pool = Pool::new(Arc::clone(&factory), PoolOptions::new().with_bounds(0, 4));

        let mut guards = Vec::new();
        for _ in 0..4 {
            guards.push(pool.acquire().await.unwrap());
        }
        let mut serials: Vec<u32> = guards.iter().map(|g| g.serial).collect();
        serials.sort_unstable();
        serials.dedup();
        assert_eq!(serials.len(), 4);
        assert_eq!(pool.status().borrowed, 4);
        assert_capacity(&pool);
    }

    #[tokio::test]
    async fn release_round_trip_restores_idle_membership() {
        let factory = TestFactory::new();
        let pool = Pool::new(Arc::clone(&factory), PoolOptions::new().with_bounds(1, 2));
        settle().await;
        assert_eq!(pool.status().idle, 1);

        let guard = pool.acquire().await.unwrap();
        let serial = guard.serial;
        pool.release(guard).unwrap();
        settle().await;
        assert_eq!(pool.status().idle, 1);

        let guard = pool.acquire().await.unwrap();
        assert_eq!(guard.serial, serial);
        drop(guard);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_timeout_rejects_without_consuming() {
        let factory = TestFactory::new();
        let options = PoolOptions::new()
            .with_bounds(0, 1)
            .with_acquire_timeout(Duration::from_millis(50));
        let pool = Pool::new(Arc::clone(&factory), options);
        let guard = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, PoolError::AcquireTimeout(_)));

        // the timed-out waiter must not swallow the resource that frees up
        drop(guard);
        settle().await;
        let status = pool.status();
        assert_eq!(status.idle, 1);
        assert_eq!(status.waiters, 0);

        let guard = pool.acquire().await.unwrap();
        assert_eq!(guard.serial, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_timeout_does_not_cancel_inflight_create() {
        let factory = TestFactory::gated();
        let options = PoolOptions::new()
            .with_bounds(0, 1)
            .with_acquire_timeout(Duration::from_millis(50));
        let pool = Pool::new(Arc::clone(&factory), options);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::AcquireTimeout(_)));
        assert_eq!(pool.status().pending_creates, 1);

        // the create still completes and the resource lands in the idle set
        factory.gate.add_permits(1);
        settle().await;
        let status = pool.status();
        assert_eq!(status.pending_creates, 0);
        assert_eq!(status.idle, 1);
    }

    #[tokio::test]
    async fn create_failure_rejects_caller_and_restores_capacity() {
        let factory = TestFactory::new();
        factory.fail_next.store(1, AtomicOrdering::SeqCst);
        let pool = Pool::new(Arc::clone(&factory), PoolOptions::new().with_bounds(0, 2));

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::FactoryCreate(_)));

        let status = pool.status();
        assert_eq!(status.pending_creates, 0);
        assert_eq!(status.idle, 0);
        assert_eq!(status.borrowed, 0);

        // the pool recovers on the next acquire
        let guard = pool.acquire().await.unwrap();
        drop(guard);
    }

    #[tokio::test]
    async fn top_up_failure_is_swallowed_and_retried_later() {
        let factory = TestFactory::new();
        factory.fail_next.store(1, AtomicOrdering::SeqCst);
        let options = PoolOptions::new()
            .with_bounds(1, 2)
            .with_eviction_interval(Duration::from_millis(10));
        let pool = Pool::with_logger(
            Arc::clone(&factory),
            options,
            Arc::new(crate::logger::QuietLogger),
        );
        settle().await;
        assert_eq!(pool.status().idle, 0);

        // the maintenance tick retries the top-up
        tokio::time::sleep(Duration::from_millis(50)).await;
        settle().await;
        assert_eq!(pool.status().idle, 1);
        assert_eq!(pool.metrics().create_failures, 1);
    }

    #[tokio::test]
    async fn foreign_guard_is_rejected_without_state_change() {
        let factory_a = TestFactory::new();
        let factory_b = TestFactory::new();
        let pool_a = Pool::new(Arc::clone(&factory_a), PoolOptions::new().with_bounds(0, 1));
        let pool_b = Pool::new(Arc::clone(&factory_b), PoolOptions::new().with_bounds(0, 1));

        let guard = pool_a.acquire().await.unwrap();
        let err = pool_b.release(guard).unwrap_err();
        assert!(matches!(err, PoolError::InvalidResource));

        let status_b = pool_b.status();
        assert_eq!(status_b.idle, 0);
        assert_eq!(status_b.borrowed, 0);
        // the rejected guard went home to its own pool through Drop
        settle().await;
        assert_eq!(pool_a.status().idle, 1);

        let guard = pool_b.acquire().await.unwrap();
        let err = pool_a.destroy(guard).await.unwrap_err();
        assert!(matches!(err, PoolError::InvalidResource));
        settle().await;
        assert_eq!(pool_b.status().idle, 1);
    }

    #[tokio::test]
    async fn destroy_frees_capacity_for_waiters() {
        let factory = TestFactory::new();
        let pool = Pool::new(Arc::clone(&factory), PoolOptions::new().with_bounds(0, 1));
        let guard = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        settle().await;
        assert_eq!(pool.status().waiters, 1);

        pool.destroy(guard).await.unwrap();
        settle().await;
        let replacement = waiter.await.unwrap().unwrap();
        assert_eq!(factory.destroyed(), 1);
        assert_eq!(replacement.serial, 1);
    }

    #[tokio::test]
    async fn drain_waits_for_borrowed_and_rejects_acquires() {
        let factory = TestFactory::new();
        let pool = Pool::new(Arc::clone(&factory), PoolOptions::new().with_bounds(0, 5));
        let mut guards = Vec::new();
        for _ in 0..5 {
            guards.push(pool.acquire().await.unwrap());
        }
        // 3 borrowed, 2 idle
        pool.release(guards.pop().unwrap()).unwrap();
        pool.release(guards.pop().unwrap()).unwrap();
        settle().await;
        assert_eq!(pool.status().idle, 2);
        assert_eq!(pool.status().borrowed, 3);

        let drain = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.drain().await })
        };
        settle().await;
        assert!(!drain.is_finished());

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Draining));

        for guard in guards {
            drop(guard);
            settle().await;
        }
        drain.await.unwrap().unwrap();
        assert_eq!(pool.status().idle, 5);
        assert_eq!(pool.status().borrowed, 0);
    }

    #[tokio::test]
    async fn drain_rejects_queued_waiters() {
        let factory = TestFactory::new();
        let pool = Pool::new(Arc::clone(&factory), PoolOptions::new().with_bounds(0, 1));
        let guard = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        settle().await;
        assert_eq!(pool.status().waiters, 1);

        let drain = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.drain().await })
        };
        settle().await;

        // the queued waiter is failed up front rather than served mid-drain
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, PoolError::Draining));
        assert!(!drain.is_finished());

        drop(guard);
        settle().await;
        drain.await.unwrap().unwrap();
        assert_eq!(pool.status().idle, 1);
    }

    #[tokio::test]
    async fn end_destroys_everything_and_shuts_down() {
        let factory = TestFactory::new();
        let pool = Pool::new(Arc::clone(&factory), PoolOptions::new().with_bounds(2, 4));
        settle().await;
        assert_eq!(pool.status().idle, 2);

        pool.end().await.unwrap();
        assert_eq!(factory.destroyed(), 2);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Shutdown));
        let err = pool.drain().await.unwrap_err();
        assert!(matches!(err, PoolError::Shutdown));
    }

    #[tokio::test]
    async fn clear_while_borrowed_destroys_on_release() {
        let factory = TestFactory::new();
        let pool = Pool::new(Arc::clone(&factory), PoolOptions::new().with_bounds(0, 2));
        let guard = pool.acquire().await.unwrap();

        pool.clear().await.unwrap();
        assert_eq!(factory.destroyed(), 0);

        // the borrowed resource is destroyed when it comes back, not re-idled
        drop(guard);
        settle().await;
        assert_eq!(factory.destroyed(), 1);
        assert_eq!(pool.status().idle, 0);
    }

    #[tokio::test]
    async fn invalid_idle_resource_is_replaced_transparently() {
        let factory = TestFactory::new();
        let options = PoolOptions::new().with_bounds(0, 2).with_test_on_borrow(3);
        let pool = Pool::new(Arc::clone(&factory), options);

        let guard = pool.acquire().await.unwrap();
        assert_eq!(guard.serial, 0);
        drop(guard);
        settle().await;
        assert_eq!(pool.status().idle, 1);

        // the idle resource now fails validation; the caller gets a fresh one
        factory.valid.store(false, AtomicOrdering::SeqCst);
        let guard = pool.acquire().await.unwrap();
        assert_eq!(guard.serial, 1);
        settle().await;
        assert_eq!(factory.destroyed(), 1);
        assert_eq!(pool.metrics().validation_failures, 1);
    }

    #[tokio::test]
    async fn validation_retries_are_bounded() {
        let factory = TestFactory::new();
        let options = PoolOptions::new().with_bounds(0, 2).with_test_on_borrow(2);
        let pool = Pool::new(Arc::clone(&factory), options);

        let g1 = pool.acquire().await.unwrap();
        let g2 = pool.acquire().await.unwrap();
        drop(g1);
        drop(g2);
        settle().await;
        assert_eq!(pool.status().idle, 2);

        // both idle resources fail validation and replacement creates hang,
        // so the waiter burns through its whole retry budget
        factory.valid.store(false, AtomicOrdering::SeqCst);
        factory.fail_next.store(10, AtomicOrdering::SeqCst);
        let err = pool.acquire().await.unwrap_err();
        match err {
            PoolError::ValidationFailed { attempts } => assert_eq!(attempts, 2),
            PoolError::FactoryCreate(_) => {} // replacement create raced the second validation
            other => panic!("unexpected error: {other:?}"),
        }
        settle().await;
        assert!(factory.destroyed() >= 1);
    }

    #[tokio::test]
    async fn circuit_breaker_fails_fast_after_repeated_create_failures() {
        let factory = TestFactory::new();
        factory.fail_next.store(100, AtomicOrdering::SeqCst);
        let options = PoolOptions::new()
            .with_bounds(0, 2)
            .with_circuit_breaker(2, Duration::from_secs(60));
        let pool = Pool::with_logger(
            Arc::clone(&factory),
            options,
            Arc::new(crate::logger::QuietLogger),
        );

        for _ in 0..2 {
            let err = pool.acquire().await.unwrap_err();
            assert!(matches!(err, PoolError::FactoryCreate(_)));
        }
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::CircuitOpen));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_eviction_respects_min() {
        let factory = TestFactory::new();
        let options = PoolOptions::new()
            .with_bounds(1, 3)
            .with_idle_timeout(Duration::from_millis(100))
            .with_eviction_interval(Duration::from_millis(50));
        let pool = Pool::new(Arc::clone(&factory), options);

        let mut guards = Vec::new();
        for _ in 0..3 {
            guards.push(pool.acquire().await.unwrap());
        }
        drop(guards);
        settle().await;
        assert_eq!(pool.status().idle, 3);

        tokio::time::sleep(Duration::from_millis(300)).await;
        settle().await;
        let status = pool.status();
        assert_eq!(status.idle, 1);
        assert_eq!(factory.destroyed(), 2);
    }

    #[tokio::test]
    async fn metrics_track_lifecycle_counters() {
        let factory = TestFactory::new();
        let pool = Pool::new(Arc::clone(&factory), PoolOptions::new().with_bounds(0, 2));

        let guard = pool.acquire().await.unwrap();
        pool.release(guard).unwrap();
        settle().await;

        let metrics = pool.metrics();
        assert_eq!(metrics.created, 1);
        assert_eq!(metrics.acquired, 1);
        assert_eq!(metrics.released, 1);
        assert_eq!(metrics.idle, 1);
    }
}
