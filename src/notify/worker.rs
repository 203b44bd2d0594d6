use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};

use crate::config::NotifierConfig;
use crate::error::{EquivError, EquivResult};

use super::{Message, MessageSender};

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time notifier counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NotifierStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
    /// Messages rejected at enqueue because the queue was full or closed.
    pub dropped: u64,
}

/// Bounded outbound queue drained by a dedicated worker thread.
///
/// `enqueue` uses a non-blocking `try_send`, so a slow destination can
/// never stall a writer; overflow is counted and logged instead.
pub struct Notifier<M: Message> {
    tx: Sender<M>,
    shutdown_tx: Sender<()>,
    counters: Arc<Counters>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl<M: Message> std::fmt::Debug for Notifier<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").field("stats", &self.stats()).finish()
    }
}

impl<M: Message> Notifier<M> {
    /// Spawns the worker thread.
    pub fn start(config: NotifierConfig, sender: Arc<dyn MessageSender<M>>) -> EquivResult<Self> {
        let config = config.validate()?;
        let (tx, rx) = bounded::<M>(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let counters = Arc::new(Counters::default());

        let thread_counters = Arc::clone(&counters);
        let join = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || worker_loop(&rx, &shutdown_rx, sender.as_ref(), &thread_counters))
            .map_err(|e| EquivError::internal(format!("failed to spawn notifier worker: {e}")))?;

        Ok(Self {
            tx,
            shutdown_tx,
            counters,
            join: Mutex::new(Some(join)),
        })
    }

    /// Non-blocking enqueue.
    pub fn enqueue(&self, message: M) {
        match self.tx.try_send(message) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(m)) | Err(TrySendError::Disconnected(m)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    message_id = %m.message_id(),
                    message_type = m.message_type(),
                    resource = %m.resource_key(),
                    "notification queue unavailable, message dropped"
                );
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> NotifierStats {
        NotifierStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Delivers everything already queued, then stops the worker.
    ///
    /// Idempotent. Messages enqueued afterwards are counted as dropped.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.try_send(());
        let handle = self.join.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("notifier worker panicked");
            }
        }
    }
}

impl<M: Message> Drop for Notifier<M> {
    fn drop(&mut self) {
        // The worker drains the backlog and exits on its own. Never join here.
        let _ = self.shutdown_tx.try_send(());
    }
}

fn worker_loop<M: Message>(
    rx: &Receiver<M>,
    shutdown_rx: &Receiver<()>,
    sender: &dyn MessageSender<M>,
    counters: &Counters,
) {
    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(m) => deliver(sender, counters, &m),
                Err(_) => break,
            },
            recv(shutdown_rx) -> _ => {
                while let Ok(m) = rx.try_recv() {
                    deliver(sender, counters, &m);
                }
                break;
            }
        }
    }
    tracing::debug!("notifier worker stopped");
}

fn deliver<M: Message>(sender: &dyn MessageSender<M>, counters: &Counters, message: &M) {
    match sender.send(message) {
        Ok(()) => {
            counters.delivered.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                message_id = %message.message_id(),
                message_type = message.message_type(),
                resource = %message.resource_key(),
                error = %e,
                "failed to deliver notification"
            );
        }
    }
}
