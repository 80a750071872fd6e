use crate::domain::events::PaymentEvent;
use crate::domain::ports::EventSink;
use crate::error::{PaymentError, Result};
use tokio::sync::mpsc;

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl EventSink for LogNotifier {
    fn emit(&self, event: PaymentEvent) -> Result<()> {
        tracing::info!(payment = %event.payment_id, state = %event.new_state, at = %event.at, "payment event");
        Ok(())
    }
}

/// Forwards events to an in-process consumer without ever blocking.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<PaymentEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PaymentEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelNotifier {
    fn emit(&self, event: PaymentEvent) -> Result<()> {
        self.sender
            .send(event)
            .map_err(|_| PaymentError::internal("event consumer is gone"))
    }
}
