use crate::models::domain::Event;
use crate::models::dto::EventDTO;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};

pub type Message = Arc<str>;

/// Receiving half handed to one subscriber connection.
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::Receiver<Message>,
}

/// Fan-out of serialized events to every open subscriber.
///
/// Each subscriber gets a bounded queue. A subscriber whose queue is full is
/// disconnected rather than allowed to hold up producers, and closed
/// subscribers are pruned as they are discovered. Delivery is best effort.
pub struct Broadcaster {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<Message>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Broadcaster {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, mpsc::Sender<Message>>> {
        self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, tx);
        debug!(subscriber = id, "subscriber connected");
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        if self.lock().remove(&id).is_some() {
            debug!(subscriber = id, "subscriber disconnected");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Serialize once and queue for every subscriber. Returns how many
    /// subscribers accepted the message.
    pub fn send(&self, event: &Event) -> usize {
        match serde_json::to_string(&EventDTO::from(event)) {
            Ok(payload) => self.send_raw(Arc::from(payload)),
            Err(e) => {
                error!(error = %e, "failed to serialize event");
                0
            }
        }
    }

    pub fn send_raw(&self, message: Message) -> usize {
        let mut subscribers = self.lock();
        let mut delivered = 0;

        subscribers.retain(|id, tx| match tx.try_send(Arc::clone(&message)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(subscriber = *id, "subscriber queue full, disconnecting");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });

        delivered
    }
}
