use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tokio::time::Instant;

use crate::endpoint::EndpointId;

/// Sequence number of one push; orders ties and identifies stale entries
pub(crate) type Ticket = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    due: Instant,
    ticket: Ticket,
    endpoint_id: EndpointId,
}

/// Min-heap of due times.
///
/// Entries are never removed in place: an entry is live only while the slot
/// for its endpoint still holds the same ticket, and dead entries are skipped
/// the next time they reach the top.
#[derive(Debug, Default)]
pub(crate) struct DueQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    next_ticket: Ticket,
}

impl DueQueue {
    pub fn push(&mut self, endpoint_id: EndpointId, due: Instant) -> Ticket {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.heap.push(Reverse(Entry { due, ticket, endpoint_id }));
        ticket
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Earliest live due time, dropping dead entries found on the way.
    pub fn next_due(&mut self, is_live: impl Fn(EndpointId, Ticket) -> bool) -> Option<Instant> {
        while let Some(Reverse(top)) = self.heap.peek() {
            if is_live(top.endpoint_id, top.ticket) {
                return Some(top.due);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop every live entry due at or before `now`, earliest (then oldest ticket) first.
    pub fn drain_due(
        &mut self,
        now: Instant,
        is_live: impl Fn(EndpointId, Ticket) -> bool,
    ) -> Vec<EndpointId> {
        let mut due = Vec::new();
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.due > now {
                break;
            }
            let entry = *top;
            self.heap.pop();
            if is_live(entry.endpoint_id, entry.ticket) {
                due.push(entry.endpoint_id);
            }
        }
        due
    }

    /// Rebuild the heap without dead entries
    pub fn compact(&mut self, is_live: impl Fn(EndpointId, Ticket) -> bool) {
        self.heap.retain(|Reverse(entry)| is_live(entry.endpoint_id, entry.ticket));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn test_drain_orders_by_due_then_ticket() {
        let now = Instant::now();
        let mut queue = DueQueue::default();
        queue.push(1, now + Duration::from_secs(2));
        queue.push(2, now + Duration::from_secs(1));
        queue.push(3, now + Duration::from_secs(1));
        queue.push(4, now + Duration::from_secs(5));

        let due = queue.drain_due(now + Duration::from_secs(2), |_, _| true);
        assert_eq!(due, vec![2, 3, 1]);
        assert_eq!(queue.next_due(|_, _| true), Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn test_dead_entries_are_skipped() {
        let now = Instant::now();
        let mut queue = DueQueue::default();
        let mut live: HashMap<EndpointId, Ticket> = HashMap::new();

        live.insert(1, queue.push(1, now + Duration::from_secs(1)));
        // Rescheduled later: the first ticket is dead
        live.insert(1, queue.push(1, now + Duration::from_secs(10)));
        queue.push(2, now + Duration::from_secs(3));

        let is_live = |id: EndpointId, ticket: Ticket| live.get(&id) == Some(&ticket);
        assert_eq!(queue.next_due(is_live), Some(now + Duration::from_secs(10)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_compact_drops_dead_entries() {
        let now = Instant::now();
        let mut queue = DueQueue::default();
        let keep = queue.push(1, now);
        for id in 2..10 {
            queue.push(id, now);
        }
        queue.compact(|id, ticket| id == 1 && ticket == keep);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain_due(now, |_, _| true), vec![1]);
    }
}
