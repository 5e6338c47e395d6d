//! Sharenet notification fabric
//!
//! Fans events out to connected WebSocket observers. Every observer owns a
//! bounded queue; a broadcast never waits on a slow consumer. An observer whose
//! queue is full or whose socket has gone away is evicted on the next
//! broadcast, and delivery to everyone else carries on.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use sharenet_types::{Event, EventKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Queue depth per observer when none is configured.
pub const DEFAULT_OBSERVER_BUFFER: usize = 64;

/// Serialized event frame shared by every observer queue.
pub type Frame = Arc<str>;

/// Outcome of a single broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub evicted: usize,
}

/// Receiving end handed to a newly registered observer.
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub receiver: mpsc::Receiver<Frame>,
}

#[derive(Debug)]
pub struct NotificationHub {
    observers: RwLock<HashMap<u64, mpsc::Sender<Frame>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(DEFAULT_OBSERVER_BUFFER)
    }
}

impl NotificationHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            observers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Register an observer. `initial`, when given, is the first frame queued.
    pub fn subscribe(&self, initial: Option<Event>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.buffer);

        if let Some(event) = initial {
            if let Some(frame) = encode(&event) {
                // fresh queue with capacity >= 1, cannot be full
                let _ = sender.try_send(frame);
            }
        }

        self.observers.write().insert(id, sender);
        debug!("Observer {} subscribed", id);
        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: u64) {
        if self.observers.write().remove(&id).is_some() {
            debug!("Observer {} unsubscribed", id);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Wrap `data` in an event envelope and deliver it to every observer.
    pub fn broadcast<T: Serialize>(&self, kind: EventKind, data: &T) -> Delivery {
        match Event::new(kind, data) {
            Ok(event) => self.publish(&event),
            Err(err) => {
                warn!("Failed to encode {:?} event: {}", kind, err);
                Delivery::default()
            }
        }
    }

    /// Deliver a prebuilt event to every observer.
    pub fn publish(&self, event: &Event) -> Delivery {
        let Some(frame) = encode(event) else {
            return Delivery::default();
        };

        let mut report = Delivery::default();
        let mut observers = self.observers.write();
        observers.retain(|id, sender| match sender.try_send(frame.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!("Observer {} stalled, evicting", id);
                report.evicted += 1;
                false
            }
            Err(TrySendError::Closed(_)) => {
                info!("Observer {} disconnected", id);
                report.evicted += 1;
                false
            }
        });
        report
    }
}

fn encode(event: &Event) -> Option<Frame> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Frame::from(text)),
        Err(err) => {
            warn!("Failed to serialize {:?} event: {}", event.kind, err);
            None
        }
    }
}

/// Drive one upgraded WebSocket as a hub observer until either side hangs up.
///
/// Inbound messages are read and discarded.
pub async fn serve_socket(socket: WebSocket, hub: Arc<NotificationHub>, initial: Option<Event>) {
    let Subscription { id, mut receiver } = hub.subscribe(initial);
    let (mut sink, mut stream) = socket.split();

    let mut forward = tokio::spawn(async move {
        while let Some(frame) = receiver.recv().await {
            if sink.send(Message::Text(frame.to_string())).await.is_err() {
                break;
            }
        }
        // dropping the receiver here lets the next broadcast evict us
    });

    let mut read = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut forward => read.abort(),
        _ = &mut read => forward.abort(),
    }

    hub.unsubscribe(id);
}
