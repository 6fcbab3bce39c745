use crate::models::domain::Event;
use std::collections::VecDeque;
use std::sync::Mutex;

pub const RECENT_LIMIT: usize = 100;

#[derive(Debug, Default)]
struct Buffers {
    attacks: VecDeque<Event>,
    traffic: VecDeque<Event>,
}

/// Bounded in-memory record of the most recent attacks and the most recent
/// ordinary traffic. Nothing survives a restart.
#[derive(Debug)]
pub struct EventHistory {
    buffers: Mutex<Buffers>,
    capacity: usize,
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::new(RECENT_LIMIT)
    }
}

fn push_bounded(buffer: &mut VecDeque<Event>, event: Event, capacity: usize) {
    if buffer.len() == capacity {
        buffer.pop_front();
    }
    buffer.push_back(event);
}

impl EventHistory {
    pub fn new(capacity: usize) -> Self {
        EventHistory {
            buffers: Mutex::new(Buffers::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn store_event(&self, event: &Event) {
        let mut buffers = self.buffers.lock().unwrap_or_else(|p| p.into_inner());
        if event.is_attack() {
            push_bounded(&mut buffers.attacks, event.clone(), self.capacity);
        } else {
            push_bounded(&mut buffers.traffic, event.clone(), self.capacity);
        }
    }

    /// Attacks and traffic merged, newest first by event timestamp.
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        let buffers = self.buffers.lock().unwrap_or_else(|p| p.into_inner());
        let mut events: Vec<Event> = buffers
            .attacks
            .iter()
            .chain(buffers.traffic.iter())
            .cloned()
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(limit);
        events
    }

    pub fn suspicious_events(&self) -> Vec<Event> {
        let buffers = self.buffers.lock().unwrap_or_else(|p| p.into_inner());
        buffers.attacks.iter().rev().cloned().collect()
    }

    pub fn clear(&self) {
        *self.buffers.lock().unwrap_or_else(|p| p.into_inner()) = Buffers::default();
    }
}
