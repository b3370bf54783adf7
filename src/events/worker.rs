use std::sync::Arc;

use tokio::sync::mpsc::Receiver;
use tracing::{debug, error, info, warn};

use crate::events::{
    handlers::{HandleOutcome, PaymentHandler},
    types::PaymentEvent,
};

/// Drains the shared payment channel into the [`PaymentHandler`].
pub struct EventWorker {
    handler: Arc<PaymentHandler>,
    rx: Receiver<PaymentEvent>,
}

impl EventWorker {
    pub fn new(handler: Arc<PaymentHandler>, rx: Receiver<PaymentEvent>) -> Self {
        Self { handler, rx }
    }

    pub async fn run(mut self) {
        info!("Event worker started");
        while let Some(event) = self.rx.recv().await {
            self.handle_event(&event).await;
        }
        info!("Event worker stopped");
    }

    async fn handle_event(&self, event: &PaymentEvent) {
        match self.handler.handle(event).await {
            Ok(HandleOutcome::Completed { fulfilled }) => {
                debug!(order = %event.order, fulfilled, "Payment event handled");
            }
            Ok(HandleOutcome::Rejected { reason }) => {
                warn!(order = %event.order, %reason, "Payment event rejected");
            }
            Ok(outcome) => {
                debug!(order = %event.order, ?outcome, "Payment event handled");
            }
            Err(e) if e.is_transient() => {
                warn!(
                    order = %event.order,
                    source = event.source.as_str(),
                    "Transient failure, left for the next delivery: {}",
                    e
                );
            }
            Err(e) => {
                error!(order = %event.order, "Failed to handle payment event: {}", e);
            }
        }
    }
}
