//! Observable value holder
//!
//! A current value plus a list of listeners. Listeners are called with the
//! current value when they subscribe and again on every published change.
//! Listeners run outside the internal lock, so a listener may read the value
//! it is observing.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by [`Observable::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

struct Inner<T> {
    value: T,
    listeners: Vec<(u64, Listener<T>)>,
    next_id: u64,
    closed: bool,
}

/// Shared value with change notification
///
/// Clones share the same value and listener list.
pub struct Observable<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Observable")
            .field("value", &inner.value)
            .field("listeners", &inner.listeners.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

impl<T: Clone + Send + 'static> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                value,
                listeners: Vec::new(),
                next_id: 0,
                closed: false,
            })),
        }
    }

    /// Current value
    pub fn get(&self) -> T {
        self.inner.lock().value.clone()
    }

    /// Store `value` and notify every listener, even if it equals the old value
    pub fn replace(&self, value: T) {
        let listeners = {
            let mut inner = self.inner.lock();
            inner.value = value.clone();
            snapshot_listeners(&inner)
        };
        for listener in listeners {
            listener(&value);
        }
    }

    /// Store `value` and notify listeners only if it differs from the current one
    ///
    /// Returns `true` if the value changed.
    pub fn set(&self, value: T) -> bool
    where
        T: PartialEq,
    {
        let listeners = {
            let mut inner = self.inner.lock();
            if inner.value == value {
                return false;
            }
            inner.value = value.clone();
            snapshot_listeners(&inner)
        };
        for listener in listeners {
            listener(&value);
        }
        true
    }

    /// Register a listener; it is called immediately with the current value
    ///
    /// After [`close`](Self::close) the listener is still called once with the
    /// current value but is not retained.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let listener: Listener<T> = Arc::new(listener);
        let (id, current) = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            if !inner.closed {
                inner.listeners.push((id, Arc::clone(&listener)));
            }
            (id, inner.value.clone())
        };
        listener(&current);
        Subscription(id)
    }

    /// Remove a listener; returns `false` if it was not registered
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(id, _)| *id != subscription.0);
        inner.listeners.len() != before
    }

    /// Drop every listener and refuse new registrations
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.listeners.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Wait until the value satisfies `predicate`
    ///
    /// Resolves immediately if the current value already matches. Returns
    /// `None` if the observable is closed first.
    ///
    /// ```
    /// use rtc_call::Observable;
    ///
    /// # tokio_test::block_on(async {
    /// let level = Observable::new(0);
    /// level.set(3);
    /// assert_eq!(level.wait_for(|v| *v >= 3).await, Some(3));
    /// # });
    /// ```
    pub async fn wait_for<P>(&self, predicate: P) -> Option<T>
    where
        P: Fn(&T) -> bool,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |value: &T| {
            let _ = tx.send(value.clone());
        });

        while let Some(value) = rx.recv().await {
            if predicate(&value) {
                self.unsubscribe(subscription);
                return Some(value);
            }
        }
        None
    }
}

fn snapshot_listeners<T>(inner: &Inner<T>) -> Vec<Listener<T>> {
    inner
        .listeners
        .iter()
        .map(|(_, listener)| Arc::clone(listener))
        .collect()
}
