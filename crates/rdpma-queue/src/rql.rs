//! Request Queue Layer (spec §2, §4.8, §5): one (read, write) pair of
//! lock-free MPMC queues per target NUMA node. The protocol engine's
//! single receive poller is the producer for every node's queues; one
//! worker thread per node is the sole consumer of that node's pair.

use crate::descriptor::{Direction, RequestDescriptor};
use crate::error::{QueueError, Result};
use crossbeam::queue::ArrayQueue;

/// Default bound on a single queue; large enough that a worker briefly
/// falling behind the receive poller does not immediately reject new
/// requests, small enough to bound memory for a stalled worker (spec §5:
/// "bounded busy poll").
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

struct NodeQueues {
    write: ArrayQueue<RequestDescriptor>,
    read: ArrayQueue<RequestDescriptor>,
}

/// The full set of per-node queue pairs, indexed by NUMA node id.
pub struct RequestQueueLayer {
    nodes: Vec<NodeQueues>,
    capacity: usize,
}

impl RequestQueueLayer {
    pub fn new(num_nodes: usize) -> Self {
        Self::with_capacity(num_nodes, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(num_nodes: usize, capacity: usize) -> Self {
        let nodes = (0..num_nodes)
            .map(|_| NodeQueues {
                write: ArrayQueue::new(capacity),
                read: ArrayQueue::new(capacity),
            })
            .collect();
        Self { nodes, capacity }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue `desc` onto the queue `direction` picks within
    /// `desc.node_id`'s pair. Called by the dispatch thread (spec §4.8).
    pub fn enqueue(&self, direction: Direction, desc: RequestDescriptor) -> Result<()> {
        let queues = self.nodes.get(desc.node_id).ok_or(QueueError::InvalidNode(desc.node_id))?;
        let queue = match direction {
            Direction::Write => &queues.write,
            Direction::Read => &queues.read,
        };
        queue.push(desc).map_err(|_| QueueError::Full)
    }

    /// Non-blocking drain attempt for a worker pinned to `node`'s pair;
    /// write requests are drained ahead of read requests when both are
    /// pending, since WRITE_REQUEST/WRITE handling is typically on the
    /// hotter page-eviction path.
    pub fn try_dequeue(&self, node: usize) -> Option<RequestDescriptor> {
        let queues = self.nodes.get(node)?;
        queues.write.pop().or_else(|| queues.read.pop())
    }

    pub fn len(&self, node: usize, direction: Direction) -> usize {
        let queues = &self.nodes[node];
        match direction {
            Direction::Write => queues.write.len(),
            Direction::Read => queues.read.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdpma_proto::MessageKind;

    fn desc(node_id: usize, msg_num: u16) -> RequestDescriptor {
        RequestDescriptor {
            node_id,
            msg_num,
            kind: MessageKind::Write,
            count: 1,
            origin_qid: 0,
            key: 42,
        }
    }

    #[test]
    fn enqueue_then_dequeue_fifo_within_direction() {
        let rql = RequestQueueLayer::new(2);
        rql.enqueue(Direction::Write, desc(0, 1)).unwrap();
        rql.enqueue(Direction::Write, desc(0, 2)).unwrap();
        assert_eq!(rql.try_dequeue(0).unwrap().msg_num, 1);
        assert_eq!(rql.try_dequeue(0).unwrap().msg_num, 2);
        assert!(rql.try_dequeue(0).is_none());
    }

    #[test]
    fn write_queue_drains_ahead_of_read_queue() {
        let rql = RequestQueueLayer::new(1);
        let mut read_desc = desc(0, 5);
        read_desc.kind = MessageKind::ReadRequest;
        rql.enqueue(Direction::Read, read_desc).unwrap();
        rql.enqueue(Direction::Write, desc(0, 9)).unwrap();
        assert_eq!(rql.try_dequeue(0).unwrap().msg_num, 9);
        assert_eq!(rql.try_dequeue(0).unwrap().msg_num, 5);
    }

    #[test]
    fn full_queue_rejects_with_backpressure() {
        let rql = RequestQueueLayer::with_capacity(1, 2);
        rql.enqueue(Direction::Write, desc(0, 0)).unwrap();
        rql.enqueue(Direction::Write, desc(0, 1)).unwrap();
        assert!(matches!(rql.enqueue(Direction::Write, desc(0, 2)), Err(QueueError::Full)));
    }

    #[test]
    fn queues_are_isolated_per_node() {
        let rql = RequestQueueLayer::new(3);
        rql.enqueue(Direction::Write, desc(2, 7)).unwrap();
        assert!(rql.try_dequeue(0).is_none());
        assert!(rql.try_dequeue(1).is_none());
        assert_eq!(rql.try_dequeue(2).unwrap().msg_num, 7);
    }
}
