//! Bounded ring of recent events
//!
//! Append-only except for size eviction; order is preserved and every
//! client receives a snapshot of the whole ring at connect.

use std::collections::VecDeque;

use drover_spec::Event;

#[derive(Debug)]
pub struct EventRing {
    events: VecDeque<Event>,
    capacity: usize,
}

impl EventRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Append an event, evicting the oldest at capacity.
    pub fn push(&mut self, event: Event) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Snapshot in arrival order.
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(n: usize) -> Event {
        Event::TextDelta {
            text: format!("chunk-{n}"),
        }
    }

    #[test]
    fn keeps_order() {
        let mut ring = EventRing::new(50);
        for n in 0..10 {
            ring.push(delta(n));
        }
        let snap = ring.snapshot();
        assert_eq!(snap.len(), 10);
        assert_eq!(
            snap[0],
            Event::TextDelta {
                text: "chunk-0".to_string()
            }
        );
    }

    #[test]
    fn evicts_oldest_at_cap() {
        let mut ring = EventRing::new(50);
        for n in 0..75 {
            ring.push(delta(n));
        }
        let snap = ring.snapshot();
        assert_eq!(snap.len(), 50);
        // a client connecting now sees exactly the last 50, in order
        assert_eq!(
            snap.first().unwrap(),
            &Event::TextDelta {
                text: "chunk-25".to_string()
            }
        );
        assert_eq!(
            snap.last().unwrap(),
            &Event::TextDelta {
                text: "chunk-74".to_string()
            }
        );
    }

    #[test]
    fn zero_capacity_clamps_to_one() {
        let mut ring = EventRing::new(0);
        ring.push(delta(1));
        ring.push(delta(2));
        assert_eq!(ring.len(), 1);
    }
}
