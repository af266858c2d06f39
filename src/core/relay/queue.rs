//! Bounded FIFO for client frames received before the upstream is ready.

use std::collections::VecDeque;

use thiserror::Error;

use super::frame::Frame;

/// Default number of frames buffered per session before reads pause.
pub const DEFAULT_INBOUND_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Inbound queue is full ({capacity} frames)")]
    Full { capacity: usize },

    /// The queue was already drained; the session is past the buffering phase
    #[error("Inbound queue already drained")]
    Drained,
}

/// Ordered buffer of client frames with a single, sealing drain.
#[derive(Debug)]
pub struct InboundQueue {
    frames: VecDeque<Frame>,
    capacity: usize,
    sealed: bool,
}

impl InboundQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            sealed: false,
        }
    }

    /// Append a frame at the tail.
    pub fn enqueue(&mut self, frame: Frame) -> Result<(), QueueError> {
        if self.sealed {
            return Err(QueueError::Drained);
        }
        if self.frames.len() >= self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }
        self.frames.push_back(frame);
        Ok(())
    }

    /// Take every buffered frame in arrival order and seal the queue.
    ///
    /// Succeeds exactly once; afterwards both `drain` and `enqueue` fail.
    pub fn drain(&mut self) -> Result<Vec<Frame>, QueueError> {
        if self.sealed {
            return Err(QueueError::Drained);
        }
        self.sealed = true;
        Ok(Vec::from(std::mem::take(&mut self.frames)))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// True when another `enqueue` would be refused for lack of room.
    pub fn is_full(&self) -> bool {
        !self.sealed && self.frames.len() >= self.capacity
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InboundQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_INBOUND_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn text(s: &str) -> Frame {
        Frame::Text(s.to_string())
    }

    #[test]
    fn test_drain_preserves_arrival_order() {
        let mut queue = InboundQueue::with_capacity(8);
        queue.enqueue(text("frame1")).unwrap();
        queue
            .enqueue(Frame::Binary(Bytes::from_static(&[1, 2, 3])))
            .unwrap();
        queue.enqueue(text("frame3")).unwrap();

        let drained = queue.drain().unwrap();
        assert_eq!(
            drained,
            vec![
                text("frame1"),
                Frame::Binary(Bytes::from_static(&[1, 2, 3])),
                text("frame3"),
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_happens_once() {
        let mut queue = InboundQueue::with_capacity(4);
        queue.enqueue(text("a")).unwrap();
        assert_eq!(queue.drain().unwrap().len(), 1);
        assert_eq!(queue.drain(), Err(QueueError::Drained));
    }

    #[test]
    fn test_enqueue_after_drain_is_rejected() {
        let mut queue = InboundQueue::with_capacity(4);
        assert!(queue.drain().unwrap().is_empty());
        assert!(queue.is_sealed());
        assert_eq!(queue.enqueue(text("late")), Err(QueueError::Drained));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut queue = InboundQueue::with_capacity(2);
        queue.enqueue(text("a")).unwrap();
        assert!(!queue.is_full());
        queue.enqueue(text("b")).unwrap();
        assert!(queue.is_full());
        assert_eq!(
            queue.enqueue(text("c")),
            Err(QueueError::Full { capacity: 2 })
        );
        // Nothing already accepted is lost.
        assert_eq!(queue.drain().unwrap(), vec![text("a"), text("b")]);
        assert!(!queue.is_full());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let queue = InboundQueue::with_capacity(0);
        assert_eq!(queue.capacity(), 1);
        assert_eq!(
            InboundQueue::default().capacity(),
            DEFAULT_INBOUND_QUEUE_CAPACITY
        );
    }
}
