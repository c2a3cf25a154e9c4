//! Observable Value
//!
//! A `Value` holds the current reading of a single property. Updates are
//! serialized per value and every successful update is pushed synchronously
//! to the subscribed observers, in subscription order.
//!
//! An observer may write back into the value it observes. The nested update
//! is queued and applied once the current round of notifications finishes,
//! so every observer still sees updates in the order they were made.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{ReentrantMutex, RwLock};

/// Nested updates one top-level update may trigger before the rest are dropped
const MAX_NESTED_UPDATES: usize = 64;

/// Updates made by observers while a notification round is running
struct Pending<T> {
    queue: VecDeque<T>,
    accepted: usize,
}

/// Callback invoked with the new value after every update
pub type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Write validator; only writable values carry one
pub type Validator<T> = Arc<dyn Fn(&T) -> Result<(), String> + Send + Sync>;

/// Identifies a subscribed observer so it can be removed again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Reasons a `Value::attempt_set` can fail
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    #[error("value is read-only")]
    ReadOnly,

    #[error("{0}")]
    Rejected(String),
}

pub struct Value<T> {
    current: RwLock<T>,
    validator: Option<Validator<T>>,
    observers: RwLock<Vec<(ObserverId, Observer<T>)>>,
    /// Held across store + notify so updates never interleave. `Some` while
    /// observers run.
    update_lock: ReentrantMutex<RefCell<Option<Pending<T>>>>,
    next_observer: AtomicU64,
}

impl<T> Value<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a read-only value
    pub fn new(initial: T) -> Self {
        Self {
            current: RwLock::new(initial),
            validator: None,
            observers: RwLock::new(Vec::new()),
            update_lock: ReentrantMutex::new(RefCell::new(None)),
            next_observer: AtomicU64::new(0),
        }
    }

    /// Create a value that accepts external writes passing `validator`
    pub fn writable(initial: T, validator: impl Fn(&T) -> Result<(), String> + Send + Sync + 'static) -> Self {
        Self {
            validator: Some(Arc::new(validator)),
            ..Self::new(initial)
        }
    }

    /// Create a read-only value already wrapped in an `Arc`
    pub fn shared(initial: T) -> Arc<Self> {
        Arc::new(Self::new(initial))
    }

    /// Current value
    pub fn get(&self) -> T {
        self.current.read().clone()
    }

    pub fn is_read_only(&self) -> bool {
        self.validator.is_none()
    }

    /// Apply an external write through the validator.
    ///
    /// Read-only values always fail with `WriteError::ReadOnly` and are left
    /// untouched.
    pub fn attempt_set(&self, value: T) -> Result<(), WriteError> {
        let Some(validator) = &self.validator else {
            return Err(WriteError::ReadOnly);
        };
        validator(&value).map_err(WriteError::Rejected)?;
        self.notify_of_external_update(value);
        Ok(())
    }

    /// Replace the stored value unconditionally and notify every observer.
    ///
    /// This is the path used by sensor polling; it bypasses the validator.
    /// Called from one of this value's own observers, the update is queued
    /// behind the one being delivered instead of blocking.
    pub fn notify_of_external_update(&self, value: T) {
        let guard = self.update_lock.lock();
        if let Some(pending) = guard.borrow_mut().as_mut() {
            if pending.accepted >= MAX_NESTED_UPDATES {
                tracing::error!(
                    limit = MAX_NESTED_UPDATES,
                    "Value observers keep writing back, dropping nested update"
                );
            } else {
                pending.accepted += 1;
                pending.queue.push_back(value);
            }
            return;
        }

        *guard.borrow_mut() = Some(Pending {
            queue: VecDeque::new(),
            accepted: 0,
        });
        let mut next = Some(value);
        while let Some(value) = next {
            self.publish(value);
            next = guard
                .borrow_mut()
                .as_mut()
                .and_then(|pending| pending.queue.pop_front());
        }
        *guard.borrow_mut() = None;
    }

    fn publish(&self, value: T) {
        *self.current.write() = value.clone();

        // Snapshot so an observer may subscribe/unsubscribe without deadlocking
        let observers: Vec<_> = self.observers.read().clone();
        for (id, observer) in &observers {
            if catch_unwind(AssertUnwindSafe(|| observer(&value))).is_err() {
                tracing::error!(observer = id.0, "Value observer panicked");
            }
        }
    }

    /// Subscribe an observer; it is called after every successful update
    pub fn subscribe(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> ObserverId {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, Arc::new(observer)));
        id
    }

    /// Remove an observer. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Value<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Value")
            .field("current", &*self.current.read())
            .field("read_only", &self.validator.is_none())
            .field("observers", &self.observers.read().len())
            .finish()
    }
}
