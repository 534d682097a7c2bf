//! Outgoing packet queues.
//!
//! A [`PacketQueue`] is a FIFO of packets with a `sent` flag per packet.
//! The session sends from the front, so the sent packets always form a
//! contiguous prefix of the queue:
//!
//! ```text
//!  [sent][sent][sent][unsent][unsent]
//!   ^ acknowledged and deleted from here
//! ```
//!
//! Several operations rely on that prefix invariant and stop early:
//! [`has_unsent_packets`](PacketQueue::has_unsent_packets) looks only at the
//! last packet, [`reset_sent`](PacketQueue::reset_sent) and
//! [`delete_to_sequence`](PacketQueue::delete_to_sequence) stop at the first
//! unsent packet.  [`take_unsent`](PacketQueue::take_unsent) is the only way
//! packets become sent, and it always marks the front of the unsent tail.
//!
//! Every queue carries its own lock so the event producer can append while
//! the session worker reads and deletes.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::trace;

use crate::protocol::messages::{Priority, SEQUENCE_ALL};
use crate::protocol::packet::Packet;

/// A thread-safe FIFO of outgoing packets.
#[derive(Debug)]
pub struct PacketQueue {
    name: &'static str,
    inner: Mutex<VecDeque<Packet>>,
}

impl PacketQueue {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Appends a packet, clearing its `sent` flag.
    pub fn add_packet(&self, mut packet: Packet) {
        packet.sent = false;
        trace!(queue = self.name, packet = %packet, "queued");
        self.inner.lock().push_back(packet);
    }

    /// Appends an event packet.  Identical to [`add_packet`](Self::add_packet);
    /// kept separate so call sites read as what they enqueue.
    pub fn add_event(&self, packet: Packet) {
        self.add_packet(packet);
    }

    /// A copy of the packet at `index`.
    pub fn packet_at(&self, index: usize) -> Option<Packet> {
        self.inner.lock().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// `true` if any packet is still unsent.  Checks only the last packet.
    pub fn has_unsent_packets(&self) -> bool {
        self.inner.lock().back().map(|p| !p.sent).unwrap_or(false)
    }

    /// Number of unsent packets.
    pub fn unsent_count(&self) -> usize {
        self.inner.lock().iter().rev().take_while(|p| !p.sent).count()
    }

    /// `true` if a packet of `packet_type` is queued.
    pub fn contains_type(&self, packet_type: u8) -> bool {
        self.inner.lock().iter().any(|p| p.packet_type() == packet_type)
    }

    /// Copies up to `max` packets from the front of the unsent tail and marks
    /// them sent.
    pub fn take_unsent(&self, max: usize) -> Vec<Packet> {
        let mut q = self.inner.lock();
        let mut out = Vec::new();
        for p in q.iter_mut().filter(|p| !p.sent).take(max) {
            p.sent = true;
            out.push(p.clone());
        }
        out
    }

    /// Clears `sent` flags from the front until the first unsent packet.
    pub fn reset_sent(&self) {
        let mut q = self.inner.lock();
        for p in q.iter_mut() {
            if !p.sent {
                break;
            }
            p.sent = false;
        }
    }

    /// Deletes sent packets from the front up to and including the one whose
    /// sequence is `sequence`.  With [`SEQUENCE_ALL`], or when no sent packet
    /// matches, every sent packet is deleted.  Returns the number deleted.
    pub fn delete_to_sequence(&self, sequence: i64) -> usize {
        let mut q = self.inner.lock();
        let mut deleted = 0;
        while q.front().map(|p| p.sent).unwrap_or(false) {
            let Some(p) = q.pop_front() else { break };
            deleted += 1;
            if sequence != SEQUENCE_ALL && p.sequence == sequence {
                break;
            }
        }
        trace!(queue = self.name, sequence, deleted, "acknowledged");
        deleted
    }

    /// Deletes the first packet if it has been sent.
    pub fn delete_first_sent(&self) -> bool {
        let mut q = self.inner.lock();
        if q.front().map(|p| p.sent).unwrap_or(false) {
            q.pop_front();
            true
        } else {
            false
        }
    }

    /// The highest priority of any queued packet ([`Priority::None`] if empty).
    pub fn highest_priority(&self) -> Priority {
        let q = self.inner.lock();
        let mut best = Priority::None;
        for p in q.iter() {
            if p.priority > best {
                best = p.priority;
                if best == Priority::High {
                    break;
                }
            }
        }
        best
    }

    /// Removes every packet.  Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut q = self.inner.lock();
        let n = q.len();
        q.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::client_types;

    fn event(seq: i64) -> Packet {
        Packet::from_parts(true, 0xE0, client_types::FIXED_FMT_STD, &[seq as u8]).with_sequence(seq)
    }

    #[test]
    fn test_delete_all_after_sending_everything() {
        // Arrange
        let q = PacketQueue::new("event");
        for i in 0..5 {
            q.add_event(event(i));
        }
        q.take_unsent(usize::MAX);

        // Act
        let n = q.delete_to_sequence(SEQUENCE_ALL);

        // Assert
        assert_eq!(n, 5);
        assert!(q.is_empty());
    }

    #[test]
    fn test_delete_to_sequence_stops_at_match() {
        let q = PacketQueue::new("event");
        for i in 1..=4 {
            q.add_event(event(i));
        }
        q.take_unsent(usize::MAX);

        assert_eq!(q.delete_to_sequence(2), 2);
        assert_eq!(q.len(), 2);
        assert_eq!(q.packet_at(0).unwrap().sequence, 3);
    }

    #[test]
    fn test_delete_to_sequence_stops_at_first_unsent() {
        let q = PacketQueue::new("event");
        for i in 1..=4 {
            q.add_event(event(i));
        }
        q.take_unsent(2);

        assert_eq!(q.delete_to_sequence(4), 2, "only sent packets are deleted");
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_reset_sent_makes_queue_unsent() {
        // Arrange
        let q = PacketQueue::new("event");
        q.add_event(event(1));
        q.add_event(event(2));
        q.take_unsent(usize::MAX);
        assert!(!q.has_unsent_packets());

        // Act
        q.reset_sent();

        // Assert
        assert!(q.has_unsent_packets());
        assert_eq!(q.unsent_count(), 2);
    }

    #[test]
    fn test_take_unsent_respects_limit_and_order() {
        let q = PacketQueue::new("event");
        for i in 1..=3 {
            q.add_event(event(i));
        }

        let first = q.take_unsent(2);
        let second = q.take_unsent(2);

        assert_eq!(first.iter().map(|p| p.sequence).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(second.iter().map(|p| p.sequence).collect::<Vec<_>>(), vec![3]);
        assert!(q.take_unsent(2).is_empty());
    }

    #[test]
    fn test_delete_first_sent() {
        let q = PacketQueue::new("event");
        q.add_event(event(1));
        assert!(!q.delete_first_sent());

        q.take_unsent(1);
        assert!(q.delete_first_sent());
        assert!(q.is_empty());
    }

    #[test]
    fn test_highest_priority() {
        let q = PacketQueue::new("pending");
        assert_eq!(q.highest_priority(), Priority::None);

        q.add_packet(event(1).with_priority(Priority::Low));
        q.add_packet(event(2).with_priority(Priority::Normal));
        assert_eq!(q.highest_priority(), Priority::Normal);

        q.add_packet(event(3).with_priority(Priority::High));
        assert_eq!(q.highest_priority(), Priority::High);
    }

    #[test]
    fn test_concurrent_producers() {
        use std::sync::Arc;
        use std::thread;

        let q = Arc::new(PacketQueue::new("event"));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..100 {
                        q.add_event(event(t * 100 + i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("producer panicked");
        }

        assert_eq!(q.len(), 400);
    }
}
