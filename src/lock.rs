//! Ordered multi-key locking.
//!
//! [`KeyedMultiLock`] locks arbitrary sets of keys. Keys are always acquired
//! in ascending order, whatever order the caller supplies, so two callers
//! locking overlapping sets meet the shared keys in the same relative order
//! and cannot form a cycle of waiters.
//!
//! Holders are tracked per thread. The lock is not re-entrant: locking a key
//! the calling thread already holds fails with [`LockError::AlreadyHeld`].
//! Unlocking a key the caller does not hold is a no-op.
//!
//! One instance is built at startup and shared by handle (`Arc`) with every
//! store that needs it.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::error::LockError;

/// How often a blocked waiter re-checks its cancellation token.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Cooperative cancellation signal for blocking lock waits.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels every wait observing this token.
    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

/// Options for a blocking lock call.
#[derive(Debug, Clone, Default)]
pub struct LockOptions {
    /// Upper bound on the total wait across all keys.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl LockOptions {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

#[derive(Debug, Default)]
struct SlotState {
    holder: Option<ThreadId>,
}

#[derive(Debug, Default)]
struct Slot {
    state: Mutex<SlotState>,
    released: Condvar,
    /// Threads that fetched this slot from the table and have not finished
    /// acquiring or abandoning it. Guarded by the table mutex.
    users: Mutex<usize>,
}

impl Slot {
    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn users(&self) -> MutexGuard<'_, usize> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type Comparator<K> = Arc<dyn Fn(&K, &K) -> Ordering + Send + Sync>;

/// Lock over a dynamic set of keys, acquired in a fixed total order.
pub struct KeyedMultiLock<K> {
    slots: Mutex<HashMap<K, Arc<Slot>>>,
    ordering: Comparator<K>,
}

impl<K> fmt::Debug for KeyedMultiLock<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracked = self
            .slots
            .lock()
            .map(|slots| slots.len())
            .unwrap_or_default();
        f.debug_struct("KeyedMultiLock")
            .field("tracked_keys", &tracked)
            .finish()
    }
}

impl<K: Ord + Hash + Clone + fmt::Debug + 'static> KeyedMultiLock<K> {
    /// Creates a lock ordering keys by their natural order.
    #[must_use]
    pub fn natural() -> Self {
        Self::from_comparator(K::cmp)
    }
}

impl<K: Ord + Hash + Clone + fmt::Debug + 'static> Default for KeyedMultiLock<K> {
    fn default() -> Self {
        Self::natural()
    }
}

impl<K: Eq + Hash + Clone + fmt::Debug> KeyedMultiLock<K> {
    /// Creates a lock ordering keys with `comparator`.
    ///
    /// The comparator must be a total order consistent with `Eq`.
    pub fn from_comparator<F>(comparator: F) -> Self
    where
        F: Fn(&K, &K) -> Ordering + Send + Sync + 'static,
    {
        Self {
            slots: Mutex::new(HashMap::new()),
            ordering: Arc::new(comparator),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<K, Arc<Slot>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sorted<'a, I>(&self, keys: I) -> Vec<K>
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        let mut sorted: Vec<K> = keys.into_iter().cloned().collect();
        sorted.sort_by(|a, b| (self.ordering)(a, b));
        sorted.dedup_by(|a, b| (self.ordering)(a, b) == Ordering::Equal);
        sorted
    }

    /// Fetches (creating if absent) the slot for `key`, registered as in use.
    fn checkout(&self, key: &K) -> Arc<Slot> {
        let mut table = self.table();
        let slot = Arc::clone(table.entry(key.clone()).or_default());
        *slot.users() += 1;
        slot
    }

    /// Marks a checked-out slot as no longer in use and prunes it if idle.
    fn checkin(&self, key: &K, slot: &Arc<Slot>) {
        let mut table = self.table();
        let mut users = slot.users();
        *users = users.saturating_sub(1);
        let idle = *users == 0 && slot.state().holder.is_none();
        drop(users);
        if idle {
            if let Some(current) = table.get(key) {
                if Arc::ptr_eq(current, slot) {
                    table.remove(key);
                }
            }
        }
    }

    /// Blocks until `key` is held by the calling thread.
    pub fn lock_key(&self, key: &K, options: &LockOptions) -> Result<(), LockError> {
        let deadline = options.timeout.map(|t| (Instant::now() + t, t));
        self.lock_key_until(key, options, deadline)
    }

    fn lock_key_until(
        &self,
        key: &K,
        options: &LockOptions,
        deadline: Option<(Instant, Duration)>,
    ) -> Result<(), LockError> {
        let me = thread::current().id();
        tracing::trace!(?key, thread = ?me, "waiting on key lock");

        let slot = self.checkout(key);
        let outcome = (|| {
            let mut state = slot.state();
            loop {
                match state.holder {
                    None => {
                        state.holder = Some(me);
                        return Ok(());
                    }
                    Some(holder) if holder == me => {
                        return Err(LockError::AlreadyHeld {
                            key: format!("{key:?}"),
                        });
                    }
                    Some(_) => {}
                }

                if options.is_cancelled() {
                    return Err(LockError::Cancelled);
                }

                let wait = match deadline {
                    Some((at, total)) => {
                        let now = Instant::now();
                        if now >= at {
                            return Err(LockError::TimedOut { waited: total });
                        }
                        (at - now).min(CANCEL_POLL_INTERVAL)
                    }
                    None => CANCEL_POLL_INTERVAL,
                };
                state = slot
                    .released
                    .wait_timeout(state, wait)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        })();
        self.checkin(key, &slot);

        if outcome.is_ok() {
            tracing::trace!(?key, thread = ?me, "key locked");
        }
        outcome
    }

    /// Locks `key` if it is free. Never blocks.
    pub fn try_lock_key(&self, key: &K) -> bool {
        let me = thread::current().id();
        let slot = self.checkout(key);
        let acquired = {
            let mut state = slot.state();
            if state.holder.is_none() {
                state.holder = Some(me);
                true
            } else {
                false
            }
        };
        self.checkin(key, &slot);
        tracing::trace!(?key, acquired, "try lock key");
        acquired
    }

    /// Releases `key` if the calling thread holds it; otherwise does nothing.
    pub fn unlock_key(&self, key: &K) {
        let me = thread::current().id();
        let slot = match self.table().get(key) {
            Some(slot) => Arc::clone(slot),
            None => return,
        };
        {
            let mut state = slot.state();
            if state.holder != Some(me) {
                return;
            }
            state.holder = None;
        }
        slot.released.notify_all();
        tracing::trace!(?key, "key unlocked");

        let mut table = self.table();
        let idle = *slot.users() == 0 && slot.state().holder.is_none();
        if idle {
            if let Some(current) = table.get(key) {
                if Arc::ptr_eq(current, &slot) {
                    table.remove(key);
                }
            }
        }
    }

    /// Blocks until every key in `keys` is held, acquiring in ascending order.
    ///
    /// On cancellation, timeout or a re-entrant key, every key acquired by
    /// this call is released before the error is returned.
    pub fn lock<'a, I>(&self, keys: I, options: &LockOptions) -> Result<(), LockError>
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        let ordered = self.sorted(keys);
        let deadline = options.timeout.map(|t| (Instant::now() + t, t));
        for (idx, key) in ordered.iter().enumerate() {
            if let Err(e) = self.lock_key_until(key, options, deadline) {
                self.release_prefix(&ordered[..idx]);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Locks all of `keys` or none of them. Never blocks.
    pub fn try_lock<'a, I>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        let ordered = self.sorted(keys);
        for (idx, key) in ordered.iter().enumerate() {
            if !self.try_lock_key(key) {
                self.release_prefix(&ordered[..idx]);
                return false;
            }
        }
        true
    }

    /// Releases every key in `keys` held by the caller, in ascending order.
    pub fn unlock<'a, I>(&self, keys: I)
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        for key in self.sorted(keys) {
            self.unlock_key(&key);
        }
    }

    fn release_prefix(&self, acquired: &[K]) {
        for key in acquired {
            self.unlock_key(key);
        }
    }

    /// Locks `keys` and returns a guard releasing them on drop.
    pub fn lock_guard<'a, I>(
        &self,
        keys: I,
        options: &LockOptions,
    ) -> Result<MultiLockGuard<'_, K>, LockError>
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        let ordered = self.sorted(keys);
        self.lock(ordered.iter(), options)?;
        Ok(MultiLockGuard {
            lock: self,
            keys: ordered,
            _not_send: PhantomData,
        })
    }

    /// Returns true if any thread currently holds `key`.
    #[must_use]
    pub fn is_locked(&self, key: &K) -> bool {
        self.table()
            .get(key)
            .is_some_and(|slot| slot.state().holder.is_some())
    }

    /// Returns true if the calling thread holds `key`.
    #[must_use]
    pub fn is_held_by_current_thread(&self, key: &K) -> bool {
        let me = thread::current().id();
        self.table()
            .get(key)
            .is_some_and(|slot| slot.state().holder == Some(me))
    }

    /// Number of keys with live lock state (held, or being waited on).
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.table().len()
    }
}

/// Holds a set of keys until dropped.
///
/// Holders are tracked per thread, so the guard cannot leave its thread.
#[must_use = "keys are released as soon as the guard is dropped"]
pub struct MultiLockGuard<'a, K: Eq + Hash + Clone + fmt::Debug> {
    lock: &'a KeyedMultiLock<K>,
    keys: Vec<K>,
    _not_send: PhantomData<*const ()>,
}

impl<K: Eq + Hash + Clone + fmt::Debug> MultiLockGuard<'_, K> {
    /// Keys held by this guard, in acquisition order.
    #[must_use]
    pub fn keys(&self) -> &[K] {
        &self.keys
    }
}

impl<K: Eq + Hash + Clone + fmt::Debug> Drop for MultiLockGuard<'_, K> {
    fn drop(&mut self) {
        self.lock.unlock(self.keys.iter());
    }
}
