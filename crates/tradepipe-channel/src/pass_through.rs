//! Synchronous channel: delivers on the sender's thread.

use crate::channel::{ErrorHandler, MessageChannel, MessageHandler, SharedChannel};
use crate::error::{ChannelError, ChannelResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;
use tradepipe_core::{Message, Observers, SubscriptionId};

/// Channel without a queue.
///
/// Ordering follows the senders: concurrent senders interleave freely.
#[derive(Debug)]
pub struct PassThroughMessageChannel {
    name: String,
    opened: AtomicBool,
    handlers: Observers<Message>,
    errors: Observers<Arc<ChannelError>>,
}

impl PassThroughMessageChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            opened: AtomicBool::new(false),
            handlers: Observers::new(),
            errors: Observers::new(),
        }
    }
}

impl MessageChannel for PassThroughMessageChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_opened(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    fn open(&self) -> ChannelResult<()> {
        self.opened.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&self) {
        self.opened.store(false, Ordering::Release);
    }

    fn send_in_message(&self, message: Message) -> ChannelResult<()> {
        if !self.is_opened() {
            return Err(ChannelError::Closed {
                name: self.name.clone(),
            });
        }
        for failure in self.handlers.try_notify(message) {
            warn!(channel = %self.name, error = %failure, "Channel handler panicked");
            self.errors.try_notify(Arc::new(ChannelError::HandlerPanic {
                name: self.name.clone(),
                message: failure,
            }));
        }
        Ok(())
    }

    fn subscribe(&self, handler: MessageHandler) -> SubscriptionId {
        self.handlers.subscribe_handler(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.handlers.unsubscribe(id)
    }

    fn subscribe_errors(&self, handler: ErrorHandler) -> SubscriptionId {
        self.errors.subscribe_handler(handler)
    }

    fn queue_len(&self) -> usize {
        0
    }

    fn fork(&self) -> SharedChannel {
        Arc::new(Self::new(self.name.clone()))
    }

    fn dispose(&self) {
        self.close();
        self.handlers.clear();
        self.errors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_delivers_synchronously() {
        let channel = PassThroughMessageChannel::new("direct");
        let seen = Arc::new(Mutex::new(0));
        let s = seen.clone();
        channel.subscribe(Arc::new(move |_| *s.lock() += 1));

        assert!(channel.send_in_message(Message::connect()).is_err());
        channel.open().unwrap();
        channel.send_in_message(Message::connect()).unwrap();
        assert_eq!(*seen.lock(), 1);
    }
}
