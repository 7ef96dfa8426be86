use async_trait::async_trait;
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends without surfacing failures; notification loss never fails a request.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            error!("{}", e);
        }
    }
}

/// Domain events consumed by customer notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        email: Option<String>,
        status: OrderStatus,
        total: Decimal,
    },
    OrderCancelled {
        order_id: Uuid,
        user_id: Uuid,
        email: Option<String>,
        was_paid: bool,
        reason: Option<String>,
    },
    PaymentApproved {
        order_id: Uuid,
        user_id: Uuid,
        email: Option<String>,
        amount: Decimal,
    },
}

impl Event {
    pub fn order_id(&self) -> Uuid {
        match self {
            Event::OrderCreated { order_id, .. }
            | Event::OrderCancelled { order_id, .. }
            | Event::PaymentApproved { order_id, .. } => *order_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order_created",
            Event::OrderCancelled { .. } => "order_cancelled",
            Event::PaymentApproved { .. } => "payment_approved",
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Writes one structured log line per customer notification.
pub struct LogNotifier;

#[async_trait]
impl EventHandler for LogNotifier {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        match event {
            Event::OrderCreated {
                order_id,
                email,
                status,
                total,
                ..
            } => info!(%order_id, ?email, %status, %total, "notify: order received"),
            Event::OrderCancelled {
                order_id,
                email,
                was_paid,
                reason,
                ..
            } => info!(%order_id, ?email, was_paid, ?reason, "notify: order cancelled"),
            Event::PaymentApproved {
                order_id,
                email,
                amount,
                ..
            } => info!(%order_id, ?email, %amount, "notify: payment approved"),
        }
        Ok(())
    }
}

/// Drains the event channel and fans each event out to `handlers`.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        counter!("storefront_events_total", 1, "event" => event.name());
        for handler in &handlers {
            if let Err(e) = handler.handle_event(&event).await {
                error!(
                    "Failed to handle {} event: order_id={}, error={}",
                    event.name(),
                    event.order_id(),
                    e
                );
            }
        }
    }

    info!("Event channel closed, stopping event processing");
}
