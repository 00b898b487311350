//! In-memory queue channel drained by a dedicated consumer thread.
//!
//! - FIFO delivery from a `VecDeque` guarded by `parking_lot::Mutex`
//! - Optional capacity with `Block` or `Reject` backpressure
//! - `close()` stops intake, lets the consumer drain what is already queued,
//!   then joins it (unless called from the consumer itself)
//! - Handler panics are caught and reported to error handlers; the consumer
//!   keeps running

use crate::channel::{ErrorHandler, MessageChannel, MessageHandler, SharedChannel};
use crate::config::BackpressurePolicy;
use crate::error::{ChannelError, ChannelResult};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, trace, warn};
use tradepipe_core::{Message, Observers, SubscriptionId};
use tradepipe_telemetry::Metrics;

struct QueueState {
    items: VecDeque<Message>,
    opened: bool,
    /// Bumped on every open so a consumer from a previous open exits.
    generation: u64,
    consumer: Option<ThreadId>,
    max_message_count: Option<usize>,
}

struct Inner {
    name: String,
    policy: BackpressurePolicy,
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    handlers: Observers<Message>,
    errors: Observers<Arc<ChannelError>>,
}

impl Inner {
    fn consume(&self, generation: u64) {
        self.state.lock().consumer = Some(thread::current().id());
        debug!(channel = %self.name, generation, "Channel consumer started");

        loop {
            let (message, depth) = {
                let mut state = self.state.lock();
                loop {
                    if state.generation != generation {
                        debug!(channel = %self.name, "Channel consumer superseded");
                        return;
                    }
                    if let Some(message) = state.items.pop_front() {
                        self.not_full.notify_one();
                        break (message, state.items.len());
                    }
                    if !state.opened {
                        state.consumer = None;
                        debug!(channel = %self.name, "Channel consumer drained and stopped");
                        return;
                    }
                    self.not_empty.wait(&mut state);
                }
            };

            Metrics::channel_depth(&self.name, depth);
            self.deliver(message);
        }
    }

    fn deliver(&self, message: Message) {
        trace!(channel = %self.name, kind = %message.message_type(), "Delivering message");
        for failure in self.handlers.try_notify(message) {
            warn!(channel = %self.name, error = %failure, "Channel handler panicked");
            self.errors.try_notify(Arc::new(ChannelError::HandlerPanic {
                name: self.name.clone(),
                message: failure,
            }));
        }
    }

    fn on_consumer_thread(&self, state: &QueueState) -> bool {
        state.consumer == Some(thread::current().id())
    }
}

/// Queue channel with a dedicated consumer thread.
pub struct InMemoryMessageChannel {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl InMemoryMessageChannel {
    pub fn new(
        name: impl Into<String>,
        max_message_count: Option<usize>,
        policy: BackpressurePolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                policy,
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    opened: false,
                    generation: 0,
                    consumer: None,
                    max_message_count,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                handlers: Observers::new(),
                errors: Observers::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn unbounded(name: impl Into<String>) -> Self {
        Self::new(name, None, BackpressurePolicy::Block)
    }

    pub fn bounded(name: impl Into<String>, max_message_count: usize) -> Self {
        Self::new(name, Some(max_message_count), BackpressurePolicy::Block)
    }

    #[must_use]
    pub fn max_message_count(&self) -> Option<usize> {
        self.inner.state.lock().max_message_count
    }

    /// Change the capacity. Blocked senders re-check against the new limit.
    pub fn set_max_message_count(&self, max_message_count: Option<usize>) {
        self.inner.state.lock().max_message_count = max_message_count;
        self.inner.not_full.notify_all();
        debug!(channel = %self.inner.name, ?max_message_count, "Channel capacity changed");
    }

    #[must_use]
    pub fn policy(&self) -> BackpressurePolicy {
        self.inner.policy
    }
}

impl MessageChannel for InMemoryMessageChannel {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn is_opened(&self) -> bool {
        self.inner.state.lock().opened
    }

    fn open(&self) -> ChannelResult<()> {
        let generation = {
            let mut state = self.inner.state.lock();
            if state.opened {
                return Ok(());
            }
            state.opened = true;
            state.generation += 1;
            state.generation
        };

        let inner = self.inner.clone();
        let spawned = thread::Builder::new()
            .name(format!("channel-{}", self.inner.name))
            .spawn(move || inner.consume(generation));

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                debug!(channel = %self.inner.name, "Channel opened");
                Ok(())
            }
            Err(source) => {
                self.inner.state.lock().opened = false;
                Err(ChannelError::Spawn {
                    name: self.inner.name.clone(),
                    source,
                })
            }
        }
    }

    fn close(&self) {
        let on_consumer = {
            let mut state = self.inner.state.lock();
            if !state.opened {
                return;
            }
            state.opened = false;
            self.inner.on_consumer_thread(&state)
        };
        self.inner.not_empty.notify_all();
        self.inner.not_full.notify_all();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if on_consumer {
                // Joining ourselves would deadlock; the consumer exits after draining.
                debug!(channel = %self.inner.name, "Channel closed from its consumer");
            } else if handle.join().is_err() {
                warn!(channel = %self.inner.name, "Channel consumer terminated abnormally");
            }
        }
        debug!(channel = %self.inner.name, "Channel closed");
    }

    fn send_in_message(&self, message: Message) -> ChannelResult<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if !state.opened {
            Metrics::channel_rejected(&inner.name, "closed");
            return Err(ChannelError::Closed {
                name: inner.name.clone(),
            });
        }

        while let Some(capacity) = state.max_message_count {
            if state.items.len() < capacity {
                break;
            }
            match inner.policy {
                BackpressurePolicy::Reject => {
                    Metrics::channel_rejected(&inner.name, "full");
                    return Err(ChannelError::Full {
                        name: inner.name.clone(),
                        capacity,
                    });
                }
                BackpressurePolicy::Block if inner.on_consumer_thread(&state) => {
                    // A handler feeding its own channel cannot wait for itself.
                    warn!(channel = %inner.name, capacity, "Re-entrant send exceeds capacity");
                    break;
                }
                BackpressurePolicy::Block => {
                    inner.not_full.wait(&mut state);
                    if !state.opened {
                        return Err(ChannelError::Closed {
                            name: inner.name.clone(),
                        });
                    }
                }
            }
        }

        state.items.push_back(message);
        let depth = state.items.len();
        drop(state);

        inner.not_empty.notify_one();
        Metrics::channel_depth(&inner.name, depth);
        Ok(())
    }

    fn subscribe(&self, handler: MessageHandler) -> SubscriptionId {
        self.inner.handlers.subscribe_handler(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.handlers.unsubscribe(id)
    }

    fn subscribe_errors(&self, handler: ErrorHandler) -> SubscriptionId {
        self.inner.errors.subscribe_handler(handler)
    }

    fn queue_len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    fn fork(&self) -> SharedChannel {
        Arc::new(Self::new(
            self.inner.name.clone(),
            self.max_message_count(),
            self.inner.policy,
        ))
    }

    fn dispose(&self) {
        self.close();
        self.inner.handlers.clear();
        self.inner.errors.clear();
    }
}

impl Drop for InMemoryMessageChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for InMemoryMessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMessageChannel")
            .field("name", &self.inner.name)
            .field("max_message_count", &self.max_message_count())
            .field("policy", &self.inner.policy)
            .finish()
    }
}
