//! Observable values, memoized derivations and edge-triggered reactions.
//!
//! Stores keep their state in an [`Observable`]; every mutation bumps a
//! revision and wakes subscribers. Derived views are cached in a
//! [`Computed`] keyed on the revisions they read. Guard reactions feed an
//! [`EdgeWatcher`] so start/stop side effects only run on transitions.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use tokio::{sync::watch, task::JoinHandle};
use tokio_stream::{StreamExt, wrappers::WatchStream};

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A shared value that notifies subscribers whenever it is written.
pub struct Observable<T> {
    inner: Arc<ObservableInner<T>>,
}

struct ObservableInner<T> {
    sender: watch::Sender<T>,
    revision: AtomicU64,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Observable<T> {
    pub fn new(value: T) -> Self {
        let (sender, _) = watch::channel(value);
        Self {
            inner: Arc::new(ObservableInner {
                sender,
                revision: AtomicU64::new(0),
            }),
        }
    }

    /// Runs `f` against the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.sender.borrow())
    }

    /// Replaces the value and notifies subscribers, even when it is equal.
    pub fn set(&self, value: T) {
        self.inner.sender.send_replace(value);
        self.bump();
    }

    /// Mutates the value in place and notifies subscribers.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.inner.sender.send_modify(f);
        self.bump();
    }

    /// Number of notifying writes so far.
    pub fn revision(&self) -> u64 {
        self.inner.revision.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.inner.sender.subscribe()
    }

    fn bump(&self) {
        self.inner.revision.fetch_add(1, Ordering::AcqRel);
    }
}

impl<T: Clone> Observable<T> {
    pub fn get(&self) -> T {
        self.inner.sender.borrow().clone()
    }
}

impl<T: PartialEq> Observable<T> {
    /// Writes `value` only if it differs from the current one. Returns
    /// whether subscribers were notified.
    pub fn set_if_changed(&self, value: T) -> bool {
        let changed = self.inner.sender.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
        if changed {
            self.bump();
        }
        changed
    }
}

/// Memoized derived getter. The cached value is reused while the key (the
/// revisions of the sources it reads) stays the same.
pub struct Computed<K, R> {
    cache: Mutex<Option<(K, R)>>,
}

impl<K, R> Default for Computed<K, R> {
    fn default() -> Self {
        Self {
            cache: Mutex::new(None),
        }
    }
}

impl<K: PartialEq, R: Clone> Computed<K, R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: K, derive: impl FnOnce() -> R) -> R {
        let mut cache = lock(&self.cache);
        if let Some((cached_key, value)) = cache.as_ref() {
            if *cached_key == key {
                return value.clone();
            }
        }
        let value = derive();
        *cache = Some((key, value.clone()));
        value
    }
}

/// A transition of a guard between "false" (`None`) and "true" (`Some(key)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edge<K> {
    Rising(K),
    Falling(K),
    /// The guard stayed true but its subject changed.
    Switched { from: K, to: K },
}

/// Compares each guard evaluation with the previous one and reports edges.
#[derive(Debug)]
pub struct EdgeWatcher<K> {
    previous: Option<K>,
}

impl<K> Default for EdgeWatcher<K> {
    fn default() -> Self {
        Self { previous: None }
    }
}

impl<K: PartialEq + Clone> EdgeWatcher<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, current: Option<K>) -> Option<Edge<K>> {
        let previous = std::mem::replace(&mut self.previous, current.clone());
        match (previous, current) {
            (None, Some(key)) => Some(Edge::Rising(key)),
            (Some(key), None) => Some(Edge::Falling(key)),
            (Some(from), Some(to)) if from != to => Some(Edge::Switched { from, to }),
            _ => None,
        }
    }
}

/// Handle to a running reaction. Dropping it disposes the reaction.
#[derive(Debug)]
pub struct Reaction {
    handle: JoinHandle<()>,
}

impl Reaction {
    pub fn dispose(self) {}
}

impl Drop for Reaction {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Runs `on_change` with the current value of `source` and again after every
/// write. Writes made while the reaction is pending are coalesced.
pub fn react<T, H>(source: &Observable<T>, mut on_change: H) -> Reaction
where
    T: Clone + Send + Sync + 'static,
    H: FnMut(&T) + Send + 'static,
{
    let mut changes = WatchStream::new(source.subscribe());
    let handle = tokio::spawn(async move {
        while let Some(value) = changes.next().await {
            on_change(&value);
        }
    });
    Reaction { handle }
}

/// Evaluates `guard` on every write of `source` and calls `on_edge` only when
/// the guard's value transitions.
pub fn react_to_edges<T, K, G, H>(source: &Observable<T>, guard: G, mut on_edge: H) -> Reaction
where
    T: Clone + Send + Sync + 'static,
    K: PartialEq + Clone + Send + 'static,
    G: Fn(&T) -> Option<K> + Send + 'static,
    H: FnMut(Edge<K>) + Send + 'static,
{
    let mut watcher = EdgeWatcher::new();
    react(source, move |value| {
        if let Some(edge) = watcher.observe(guard(value)) {
            on_edge(edge);
        }
    })
}
