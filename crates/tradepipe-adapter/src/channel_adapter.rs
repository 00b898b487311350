//! Adapter decoupling both directions through message channels.
//!
//! Inbound: `send_in_message` opens the input channel on first use and
//! enqueues; the input consumer forwards into the inner adapter. Outbound:
//! inner output is enqueued into the output channel, whose consumer publishes
//! to subscribers. Each channel is a separate backpressure point.

use crate::adapter::{AdapterRoles, MessageAdapter, OutHandler, SharedAdapter};
use crate::error::{AdapterError, AdapterResult};
use crate::wrapper::{InnerOutput, WrapperCore};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};
use tradepipe_channel::{ChannelError, MessageChannel, SharedChannel};
use tradepipe_core::{AdapterId, Message, SubscriptionId};
use tradepipe_telemetry::Metrics;

pub struct ChannelMessageAdapter {
    core: WrapperCore,
    input: SharedChannel,
    output: SharedChannel,
    own_input: bool,
    own_output: bool,
    channel_subscriptions: Mutex<Vec<(SharedChannel, SubscriptionId)>>,
}

impl ChannelMessageAdapter {
    /// Wrap `inner`; the adapter owns and eventually disposes both channels.
    pub fn new(inner: SharedAdapter, input: SharedChannel, output: SharedChannel) -> Arc<Self> {
        Self::with_ownership(inner, input, output, true, true)
    }

    /// Wrap `inner` with explicit channel ownership. Channels not owned are
    /// left open on dispose; only this adapter's handlers are removed.
    pub fn with_ownership(
        inner: SharedAdapter,
        input: SharedChannel,
        output: SharedChannel,
        own_input: bool,
        own_output: bool,
    ) -> Arc<Self> {
        let name = format!("channel({})", inner.name());
        let adapter = Arc::new(Self {
            core: WrapperCore::new(name, inner),
            input,
            output,
            own_input,
            own_output,
            channel_subscriptions: Mutex::new(Vec::new()),
        });
        adapter.wire();
        adapter
    }

    fn wire(self: &Arc<Self>) {
        let mut subscriptions = Vec::with_capacity(4);

        let weak = Arc::downgrade(self);
        let id = self.input.subscribe(Arc::new(move |message: Message| {
            if let Some(adapter) = weak.upgrade() {
                adapter.forward_inbound(message);
            }
        }));
        subscriptions.push((self.input.clone(), id));

        let weak = Arc::downgrade(self);
        let id = self.output.subscribe(Arc::new(move |message: Message| {
            if let Some(adapter) = weak.upgrade() {
                adapter.core.emit(message);
            }
        }));
        subscriptions.push((self.output.clone(), id));

        for channel in [self.input.clone(), self.output.clone()] {
            let weak = Arc::downgrade(self);
            let id = channel.subscribe_errors(Arc::new(move |error: Arc<ChannelError>| {
                if let Some(adapter) = weak.upgrade() {
                    adapter.report(&error.to_string());
                }
            }));
            subscriptions.push((channel, id));
        }

        *self.channel_subscriptions.lock() = subscriptions;
        self.core.attach(self);
    }

    pub fn input_channel(&self) -> &SharedChannel {
        &self.input
    }

    pub fn output_channel(&self) -> &SharedChannel {
        &self.output
    }

    /// Runs on the input consumer.
    fn forward_inbound(&self, message: Message) {
        if let Err(e) = self.core.inner().send_in_message(message) {
            self.report(&e.to_string());
        }
    }

    /// Surface an error as an outbound `Error` message.
    fn report(&self, error: &str) {
        warn!(adapter = %self.core.name(), error, "Channel adapter error");
        Metrics::adapter_error(self.core.name(), "channel");
        self.push_out(Message::error(error));
    }

    fn push_out(&self, message: Message) {
        let result = self
            .output
            .open()
            .and_then(|()| self.output.send_in_message(message));
        if let Err(e) = result {
            warn!(adapter = %self.core.name(), error = %e, "Dropped outbound message");
            Metrics::adapter_error(self.core.name(), "output_dropped");
        }
    }
}

impl InnerOutput for ChannelMessageAdapter {
    fn on_inner_message(&self, message: Message) {
        self.push_out(message);
    }
}

impl MessageAdapter for ChannelMessageAdapter {
    fn id(&self) -> AdapterId {
        self.core.id()
    }

    fn name(&self) -> &str {
        self.core.name()
    }

    fn roles(&self) -> AdapterRoles {
        self.core.inner().roles()
    }

    fn send_in_message(&self, message: Message) -> AdapterResult<()> {
        if self.core.is_disposed() {
            return Err(AdapterError::Disposed(self.core.name().to_string()));
        }
        self.input.open()?;
        self.input.send_in_message(message)?;
        Ok(())
    }

    fn subscribe(&self, handler: OutHandler) -> SubscriptionId {
        self.core.subscribe(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.core.unsubscribe(id)
    }

    fn current_time(&self) -> DateTime<Utc> {
        self.core.inner().current_time()
    }

    /// Fork the inner adapter and build fresh channels with the same
    /// settings; channels are never shared between forks.
    fn fork(&self) -> AdapterResult<SharedAdapter> {
        let inner = self.core.inner().fork()?;
        Ok(Self::new(inner, self.input.fork(), self.output.fork()))
    }

    fn dispose(&self) {
        if self.core.is_disposed() {
            return;
        }
        // Drain inbound into the inner adapter, then drain its output.
        if self.own_input {
            self.input.close();
        }
        if self.own_output {
            self.output.close();
        }
        for (channel, id) in self.channel_subscriptions.lock().drain(..) {
            channel.unsubscribe(id);
        }
        self.core.dispose();
        if self.own_input {
            self.input.dispose();
        }
        if self.own_output {
            self.output.dispose();
        }
        debug!(adapter = %self.core.name(), "Channel adapter disposed");
    }
}
