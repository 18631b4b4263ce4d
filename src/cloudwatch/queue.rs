use std::mem;

use tracing::debug;

use super::{LogEvent, MAX_BATCH_EVENTS, MAX_BATCH_SIZE, MAX_BATCH_TIME_SPAN_MS};

/// Bounded FIFO of events awaiting upload. Insertion order is kept until a
/// batch is extracted; extraction sorts by timestamp and splits off the
/// largest prefix the service accepts in one request.
#[derive(Debug)]
pub struct EventQueue {
    events: Vec<LogEvent>,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        EventQueue {
            events: Vec::new(),
            capacity,
        }
    }

    /// Append events up to capacity. The excess tail is dropped.
    pub fn add<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = LogEvent>,
    {
        let mut dropped = 0usize;
        for event in events {
            if self.events.len() < self.capacity {
                self.events.push(event);
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!("event queue full, dropped {} events", dropped);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Remove and return the next batch: sorted ascending by timestamp and
    /// capped by event count, total size and time span.
    pub fn extract_batch(&mut self) -> Vec<LogEvent> {
        self.events.sort_unstable_by_key(|event| event.timestamp);

        let mut total_size = 0usize;
        let mut split = 0usize;
        for event in &self.events {
            if split == MAX_BATCH_EVENTS {
                break;
            }
            if total_size + event.size() > MAX_BATCH_SIZE {
                break;
            }
            if event.timestamp - self.events[0].timestamp > MAX_BATCH_TIME_SPAN_MS {
                break;
            }
            total_size += event.size();
            split += 1;
        }

        let rest = self.events.split_off(split);
        mem::replace(&mut self.events, rest)
    }
}
