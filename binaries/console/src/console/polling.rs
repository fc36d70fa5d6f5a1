//! Generic polling store.
//!
//! A [`PollingStore`] caches one remote resource, refreshes it on a fixed
//! interval while its guard holds, and discards any response that arrives
//! after the store stopped, was reset, or was overtaken by a newer response.

use std::{
    future::Future,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use futures::{FutureExt, future::BoxFuture};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use operate_interface::InterfaceError;

use super::reactive::{Edge, EdgeWatcher, Observable, Reaction, lock, react};

/// Default refresh interval of detail stores.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Asynchronous remote read used by stores.
pub type Fetcher<Q, R> =
    Arc<dyn Fn(Q) -> BoxFuture<'static, Result<R, InterfaceError>> + Send + Sync>;

/// Wraps an async closure into a [`Fetcher`].
pub fn fetcher<Q, R, F, Fut>(fetch: F) -> Fetcher<Q, R>
where
    F: Fn(Q) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, InterfaceError>> + Send + 'static,
{
    Arc::new(move |query| fetch(query).boxed())
}

/// Cached value of a polled resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceState<R> {
    pub response: Option<R>,
    pub is_loaded: bool,
}

impl<R> Default for ResourceState<R> {
    fn default() -> Self {
        Self {
            response: None,
            is_loaded: false,
        }
    }
}

/// What happened to a completed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied,
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingStatus {
    Idle,
    Polling,
}

/// What a store does with its cached value when its guard turns false.
pub enum IdlePolicy<T> {
    /// Keep the last response while `scope` still names the entity it was
    /// fetched for. Once the upstream moves to another entity (or to none)
    /// the value is dropped.
    KeepLastValue { scope: fn(&T) -> Option<String> },
    Clear,
}

/// Ticket handed to an in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    session: u64,
    sequence: u64,
}

/// Admission control for responses. A ticket is admitted only if its session
/// is still current and no newer ticket has been applied.
#[derive(Debug, Default)]
pub struct ResponseGate {
    session: u64,
    next_sequence: u64,
    applied_sequence: u64,
}

impl ResponseGate {
    pub fn issue(&mut self) -> Ticket {
        self.next_sequence += 1;
        Ticket {
            session: self.session,
            sequence: self.next_sequence,
        }
    }

    /// Issues a ticket only while `session` is still the current one.
    pub fn issue_in(&mut self, session: u64) -> Option<Ticket> {
        (session == self.session).then(|| self.issue())
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn admit(&mut self, ticket: Ticket) -> bool {
        if ticket.session != self.session || ticket.sequence <= self.applied_sequence {
            return false;
        }
        self.applied_sequence = ticket.sequence;
        true
    }

    /// Invalidates every ticket issued so far.
    pub fn invalidate(&mut self) {
        self.session += 1;
        self.applied_sequence = self.next_sequence;
    }
}

struct Control {
    timer: Option<JoinHandle<()>>,
    subject: Option<String>,
    /// Id the cached response was fetched for.
    owner: Option<String>,
    gate: ResponseGate,
}

struct Shared<R> {
    name: &'static str,
    interval: Duration,
    fetcher: Fetcher<String, R>,
    state: Observable<ResourceState<R>>,
    control: Mutex<Control>,
    guard: Mutex<Option<Reaction>>,
}

impl<R> Drop for Shared<R> {
    fn drop(&mut self) {
        let control = self
            .control
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(timer) = control.timer.take() {
            timer.abort();
        }
    }
}

/// Caches one remote resource keyed by an entity id and polls it while active.
pub struct PollingStore<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for PollingStore<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R> PollingStore<R>
where
    R: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, interval: Duration, fetcher: Fetcher<String, R>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                interval,
                fetcher,
                state: Observable::new(ResourceState::default()),
                control: Mutex::new(Control {
                    timer: None,
                    subject: None,
                    owner: None,
                    gate: ResponseGate::default(),
                }),
                guard: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    pub fn state(&self) -> &Observable<ResourceState<R>> {
        &self.shared.state
    }

    pub fn snapshot(&self) -> ResourceState<R> {
        self.shared.state.get()
    }

    pub fn status(&self) -> PollingStatus {
        if lock(&self.shared.control).timer.is_some() {
            PollingStatus::Polling
        } else {
            PollingStatus::Idle
        }
    }

    pub fn is_polling(&self) -> bool {
        self.status() == PollingStatus::Polling
    }

    /// Id the active timer polls, if any.
    pub fn subject(&self) -> Option<String> {
        lock(&self.shared.control).subject.clone()
    }

    /// Reads the resource once and replaces the cached response.
    ///
    /// Errors are returned untouched and leave the cached state as it was.
    pub async fn fetch_once(&self, id: &str) -> Result<FetchOutcome, InterfaceError> {
        let ticket = self.issue();
        self.run_fetch(id.to_string(), ticket, false).await
    }

    /// One polling round. The response is dropped if polling stopped while
    /// the request was in flight.
    pub async fn tick(&self, id: &str) -> Result<FetchOutcome, InterfaceError> {
        let ticket = self.issue();
        self.run_fetch(id.to_string(), ticket, true).await
    }

    /// Starts the interval timer for `id`. Returns `false` without doing
    /// anything when a timer is already active.
    pub fn start(&self, id: &str) -> bool {
        let mut control = lock(&self.shared.control);
        if control.timer.is_some() {
            return false;
        }

        let weak = Arc::downgrade(&self.shared);
        let interval = self.shared.interval;
        let session = control.gate.session();
        let subject = id.to_string();
        control.timer = Some(tokio::spawn(poll_loop(weak, interval, session, subject)));
        control.subject = Some(id.to_string());
        info!(store = self.shared.name, id, ?interval, "polling started");
        true
    }

    /// Clears the timer. Requests already in flight complete but their
    /// responses are discarded.
    pub fn stop(&self) {
        let mut control = lock(&self.shared.control);
        if let Some(timer) = control.timer.take() {
            timer.abort();
            control.gate.invalidate();
            let subject = control.subject.take();
            info!(store = self.shared.name, id = ?subject, "polling stopped");
        }
    }

    /// Stops polling and drops the cached value, keeping the guard bound.
    pub fn clear(&self) {
        self.stop();
        let mut control = lock(&self.shared.control);
        control.gate.invalidate();
        control.owner = None;
        self.shared.state.set(ResourceState::default());
    }

    /// Disposes the guard, stops polling and restores the default state.
    pub fn reset(&self) {
        if let Some(guard) = lock(&self.shared.guard).take() {
            guard.dispose();
        }
        self.clear();
        debug!(store = self.shared.name, "store reset");
    }

    /// Starts and stops polling from a guard evaluated on every write of
    /// `source`. `guard` returns the id to poll while the guard holds.
    ///
    /// A cached response never outlives its subject: switching to another id
    /// always drops it, and `idle` decides what happens when the guard falls.
    pub fn bind_guard<T, G>(&self, source: &Observable<T>, guard: G, idle: IdlePolicy<T>)
    where
        T: Clone + Send + Sync + 'static,
        G: Fn(&T) -> Option<String> + Send + 'static,
    {
        let weak = Arc::downgrade(&self.shared);
        let mut edges = EdgeWatcher::new();
        let reaction = react(source, move |value| {
            let edge = edges.observe(guard(value));
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let store = PollingStore { shared };
            if let IdlePolicy::KeepLastValue { scope } = &idle {
                store.drop_foreign_value(scope(value));
            }
            match edge {
                Some(Edge::Rising(id)) => store.activate(id),
                Some(Edge::Falling(_)) => match &idle {
                    IdlePolicy::KeepLastValue { .. } => store.stop(),
                    IdlePolicy::Clear => store.clear(),
                },
                Some(Edge::Switched { to, .. }) => {
                    store.clear();
                    store.activate(to);
                }
                None => {}
            }
        });
        *lock(&self.shared.guard) = Some(reaction);
    }

    pub fn has_guard(&self) -> bool {
        lock(&self.shared.guard).is_some()
    }

    fn activate(&self, id: String) {
        if !self.start(&id) {
            return;
        }
        let ticket = self.issue();
        let store = self.clone();
        tokio::spawn(async move {
            if let Err(err) = store.run_fetch(id.clone(), ticket, false).await {
                warn!(store = store.shared.name, %id, "initial fetch failed: {err}");
            }
        });
    }

    /// Clears the cached value when it belongs to an id other than `subject`.
    fn drop_foreign_value(&self, subject: Option<String>) {
        let foreign = lock(&self.shared.control)
            .owner
            .as_ref()
            .is_some_and(|owner| subject.as_ref() != Some(owner));
        if foreign {
            debug!(store = self.shared.name, ?subject, "dropping value of previous subject");
            self.clear();
        }
    }

    fn issue(&self) -> Ticket {
        lock(&self.shared.control).gate.issue()
    }

    async fn run_fetch(
        &self,
        id: String,
        ticket: Ticket,
        require_timer: bool,
    ) -> Result<FetchOutcome, InterfaceError> {
        let response = (self.shared.fetcher)(id.clone()).await?;

        let mut control = lock(&self.shared.control);
        if require_timer && control.timer.is_none() {
            debug!(store = self.shared.name, %id, "discarding response after stop");
            return Ok(FetchOutcome::Discarded);
        }
        if !control.gate.admit(ticket) {
            debug!(store = self.shared.name, %id, "discarding stale response");
            return Ok(FetchOutcome::Discarded);
        }
        control.owner = Some(id);
        self.shared.state.set(ResourceState {
            response: Some(response),
            is_loaded: true,
        });
        Ok(FetchOutcome::Applied)
    }

    /// Issues the ticket of one timer round and runs its request detached,
    /// so stopping the timer never cancels a request already on the wire.
    /// Returns `None` once `session` has ended.
    fn spawn_round(
        &self,
        session: u64,
        id: String,
    ) -> Option<JoinHandle<Result<FetchOutcome, InterfaceError>>> {
        let ticket = lock(&self.shared.control).gate.issue_in(session)?;
        let store = self.clone();
        Some(tokio::spawn(async move {
            let result = store.run_fetch(id.clone(), ticket, true).await;
            if let Err(err) = &result {
                warn!(store = store.shared.name, %id, "poll failed: {err}");
            }
            result
        }))
    }
}

async fn poll_loop<R>(shared: Weak<Shared<R>>, interval: Duration, session: u64, id: String)
where
    R: Clone + Send + Sync + 'static,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        if (PollingStore { shared }).spawn_round(session, id.clone()).is_none() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn counting_store(calls: Arc<AtomicUsize>) -> PollingStore<usize> {
        PollingStore::new(
            "counter",
            DEFAULT_POLL_INTERVAL,
            fetcher(move |_id: String| {
                let calls = Arc::clone(&calls);
                async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) }
            }),
        )
    }

    #[test]
    fn gate_rejects_old_sessions_and_out_of_order_tickets() {
        let mut gate = ResponseGate::default();
        let slow = gate.issue();
        let fast = gate.issue();
        assert!(gate.admit(fast));
        assert!(!gate.admit(slow));

        let before_stop = gate.issue();
        gate.invalidate();
        assert!(!gate.admit(before_stop));
        let fresh = gate.issue();
        assert!(gate.admit(fresh));
    }

    #[test]
    fn gate_issues_nothing_for_an_ended_session() {
        let mut gate = ResponseGate::default();
        let session = gate.session();
        assert!(gate.issue_in(session).is_some());

        gate.invalidate();
        assert!(gate.issue_in(session).is_none());
        assert!(gate.issue_in(gate.session()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_once_marks_loaded() {
        let store = counting_store(Arc::new(AtomicUsize::new(0)));
        assert!(!store.snapshot().is_loaded);

        let outcome = store.fetch_once("1").await.expect("fetch");
        assert_eq!(outcome, FetchOutcome::Applied);
        assert_eq!(store.snapshot().response, Some(1));
        assert!(store.snapshot().is_loaded);
        assert!(!store.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_keeps_last_good_value() {
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&fail);
        let store = PollingStore::new(
            "flaky",
            DEFAULT_POLL_INTERVAL,
            fetcher(move |_id: String| {
                let fail = flag.load(Ordering::SeqCst);
                async move {
                    if fail {
                        Err(InterfaceError::Unavailable("down".into()))
                    } else {
                        Ok("good".to_string())
                    }
                }
            }),
        );

        store.fetch_once("1").await.expect("first fetch");
        fail.store(true, Ordering::SeqCst);
        let err = store.fetch_once("1").await.expect_err("second fetch fails");
        assert_eq!(err, InterfaceError::Unavailable("down".into()));
        assert_eq!(store.snapshot().response.as_deref(), Some("good"));
        assert!(store.snapshot().is_loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_not_reentrant() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = counting_store(Arc::clone(&calls));

        assert!(store.start("1"));
        assert!(!store.start("1"));
        assert_eq!(store.subject().as_deref(), Some("1"));

        tokio::time::sleep(DEFAULT_POLL_INTERVAL + Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.snapshot().response, Some(2));

        store.stop();
        store.stop();
        assert!(!store.is_polling());
        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 3).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn response_arriving_after_stop_is_discarded() {
        let (release, gate) = oneshot::channel::<u32>();
        let gate = Arc::new(Mutex::new(Some(gate)));
        let store = PollingStore::new(
            "gated",
            DEFAULT_POLL_INTERVAL,
            fetcher(move |_id: String| {
                let gate = lock(&gate).take();
                async move {
                    match gate {
                        Some(gate) => gate.await.map_err(|_| InterfaceError::Unimplemented),
                        None => Err(InterfaceError::Unimplemented),
                    }
                }
            }),
        );

        assert!(store.start("1"));
        let in_flight = tokio::spawn({
            let store = store.clone();
            async move { store.tick("1").await }
        });
        settle().await;

        store.stop();
        release.send(42).expect("release response");
        let outcome = in_flight.await.expect("join").expect("fetch");

        assert_eq!(outcome, FetchOutcome::Discarded);
        assert_eq!(store.snapshot(), ResourceState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_restores_default_state() {
        let store = counting_store(Arc::new(AtomicUsize::new(0)));
        store.fetch_once("1").await.expect("fetch");
        assert!(store.start("1"));

        store.reset();
        assert!(!store.is_polling());
        assert_eq!(store.snapshot(), ResourceState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn guard_false_never_schedules_a_timer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = counting_store(Arc::clone(&calls));
        let source = Observable::new(None::<String>);
        store.bind_guard(&source, |id| id.clone(), IdlePolicy::Clear);

        settle().await;
        source.set(None);
        settle().await;
        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 2).await;

        assert!(!store.is_polling());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    /// Upstream entity id and whether the guard holds for it.
    type Watched = (String, bool);

    fn active_id(value: &Watched) -> Option<String> {
        value.1.then(|| value.0.clone())
    }

    fn watched_id(value: &Watched) -> Option<String> {
        Some(value.0.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn guard_true_starts_exactly_one_timer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = counting_store(Arc::clone(&calls));
        let source = Observable::new(("9".to_string(), false));
        store.bind_guard(
            &source,
            active_id,
            IdlePolicy::KeepLastValue { scope: watched_id },
        );

        source.set(("9".into(), true));
        settle().await;
        source.set(("9".into(), true));
        settle().await;
        source.set(("9".into(), true));
        settle().await;

        assert!(store.is_polling());
        // Only the initial fetch so far.
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        source.set(("9".into(), false));
        settle().await;
        assert!(!store.is_polling());
        assert_eq!(store.snapshot().response, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn last_value_is_dropped_when_the_upstream_moves_on() {
        let store = counting_store(Arc::new(AtomicUsize::new(0)));
        let source = Observable::new(("A".to_string(), true));
        store.bind_guard(
            &source,
            active_id,
            IdlePolicy::KeepLastValue { scope: watched_id },
        );
        settle().await;
        assert_eq!(store.snapshot().response, Some(1));

        // The guard was already false, so only the subject changes.
        source.set(("A".into(), false));
        settle().await;
        assert_eq!(store.snapshot().response, Some(1));
        source.set(("B".into(), false));
        settle().await;
        assert_eq!(store.snapshot(), ResourceState::default());
        assert!(!store.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn switching_subjects_drops_the_previous_value() {
        let (release, pending) = oneshot::channel::<String>();
        let pending = Arc::new(Mutex::new(Some(pending)));
        let store = PollingStore::new(
            "echo",
            DEFAULT_POLL_INTERVAL,
            fetcher(move |id: String| {
                let pending = if id == "B" { lock(&pending).take() } else { None };
                async move {
                    match pending {
                        Some(pending) => pending.await.map_err(|_| InterfaceError::Unimplemented),
                        None => Ok(id),
                    }
                }
            }),
        );
        let source = Observable::new(("A".to_string(), true));
        store.bind_guard(
            &source,
            active_id,
            IdlePolicy::KeepLastValue { scope: watched_id },
        );
        settle().await;
        assert_eq!(store.snapshot().response.as_deref(), Some("A"));

        source.set(("B".into(), true));
        settle().await;
        assert_eq!(store.subject().as_deref(), Some("B"));
        assert_eq!(store.snapshot(), ResourceState::default());

        release.send("B".into()).expect("release response");
        settle().await;
        assert_eq!(store.snapshot().response.as_deref(), Some("B"));
    }

    #[tokio::test(start_paused = true)]
    async fn round_issued_before_a_subject_switch_is_discarded() {
        let store = PollingStore::new(
            "echo",
            DEFAULT_POLL_INTERVAL,
            fetcher(|id: String| async move { Ok(id) }),
        );
        assert!(store.start("A"));
        let session = lock(&store.shared.control).gate.session();
        let round = store
            .spawn_round(session, "A".into())
            .expect("round of the live session");

        // The round task has not run yet when the subject changes.
        store.stop();
        assert!(store.start("B"));
        assert!(store.spawn_round(session, "A".into()).is_none());

        let outcome = round.await.expect("join").expect("fetch");
        assert_eq!(outcome, FetchOutcome::Discarded);
        assert_eq!(store.snapshot(), ResourceState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_policy_drops_value_when_guard_falls() {
        let store = counting_store(Arc::new(AtomicUsize::new(0)));
        let source = Observable::new(Some("3".to_string()));
        store.bind_guard(&source, |id| id.clone(), IdlePolicy::Clear);
        settle().await;
        assert!(store.snapshot().is_loaded);

        source.set(None);
        settle().await;
        assert_eq!(store.snapshot(), ResourceState::default());
        assert!(store.has_guard());

        store.reset();
        assert!(!store.has_guard());
    }
}
