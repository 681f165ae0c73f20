// Mailbox: the bounded FIFO feeding exactly one stage
//
// Producers never block. When the queue is full the overflow policy decides
// which job is lost; the caller only gets an informational `Admission`.

use crate::pipeline::types::{OverflowPolicy, WaitPolicy};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of a `put`. Nothing here needs handling by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// Accepted after the oldest queued job was thrown away.
    EvictedOldest,
    /// The mailbox was full and the new job was thrown away.
    Rejected,
}

pub struct Mailbox<J> {
    tx: Sender<J>,
    rx: Receiver<J>,
    capacity: usize,
    overflow: OverflowPolicy,
    dropped: AtomicU64,
}

impl<J> Mailbox<J> {
    /// Creates a mailbox holding at most `capacity` jobs; 0 means unbounded.
    pub fn new(capacity: usize, overflow: OverflowPolicy) -> Self {
        let (tx, rx) = if capacity == 0 {
            channel::unbounded()
        } else {
            channel::bounded(capacity)
        };

        Self {
            tx,
            rx,
            capacity,
            overflow,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0, OverflowPolicy::default())
    }

    /// Enqueues without ever blocking the caller.
    pub fn put(&self, job: J) -> Admission {
        match self.overflow {
            OverflowPolicy::DropIncoming => match self.tx.try_send(job) {
                Ok(()) => Admission::Accepted,
                Err(_) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    Admission::Rejected
                }
            },
            OverflowPolicy::DropOldest => {
                let mut job = job;
                let mut evicted = false;
                loop {
                    match self.tx.try_send(job) {
                        Ok(()) => {
                            return if evicted {
                                Admission::EvictedOldest
                            } else {
                                Admission::Accepted
                            };
                        }
                        Err(TrySendError::Full(back)) => {
                            // The consumer may have freed a slot in between; retry either way.
                            if self.rx.try_recv().is_ok() {
                                self.dropped.fetch_add(1, Ordering::Relaxed);
                                evicted = true;
                            }
                            job = back;
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            // We hold the receiver, so this is unreachable in practice.
                            self.dropped.fetch_add(1, Ordering::Relaxed);
                            return Admission::Rejected;
                        }
                    }
                }
            }
        }
    }

    /// Removes the oldest job, or returns `None` once the policy's bound is hit.
    pub fn get(&self, wait: WaitPolicy) -> Option<J> {
        match wait {
            WaitPolicy::Block(timeout) => self.rx.recv_timeout(timeout).ok(),
            WaitPolicy::Poll => self.rx.try_recv().ok(),
        }
    }

    /// Drops every queued job and returns how many there were.
    pub fn clear(&self) -> usize {
        let mut cleared = 0;
        while self.rx.try_recv().is_ok() {
            cleared += 1;
        }
        cleared
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Configured capacity, 0 when unbounded.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn overflow(&self) -> OverflowPolicy {
        self.overflow
    }

    /// Jobs lost to overflow since construction.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<J> std::fmt::Debug for Mailbox<J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("overflow", &self.overflow)
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn drain(mailbox: &Mailbox<i32>) -> Vec<i32> {
        std::iter::from_fn(|| mailbox.get(WaitPolicy::Poll)).collect()
    }

    #[test]
    fn test_overflow_keeps_exactly_capacity() {
        for capacity in 1..=8 {
            for overflow in [OverflowPolicy::DropOldest, OverflowPolicy::DropIncoming] {
                let mailbox = Mailbox::new(capacity, overflow);
                for job in 0..=capacity as i32 {
                    mailbox.put(job);
                }
                assert_eq!(mailbox.len(), capacity);
                assert_eq!(mailbox.dropped(), 1);
            }
        }
    }

    #[test]
    fn test_drop_oldest_keeps_most_recent_jobs() {
        let mailbox = Mailbox::new(2, OverflowPolicy::DropOldest);
        let admissions: Vec<Admission> = (1..=5).map(|job| mailbox.put(job)).collect();

        assert_eq!(admissions[0], Admission::Accepted);
        assert_eq!(admissions[1], Admission::Accepted);
        assert_eq!(admissions[4], Admission::EvictedOldest);
        assert_eq!(drain(&mailbox), vec![4, 5]);
        assert_eq!(mailbox.dropped(), 3);
    }

    #[test]
    fn test_drop_incoming_keeps_earliest_jobs() {
        let mailbox = Mailbox::new(2, OverflowPolicy::DropIncoming);
        for job in 1..=5 {
            mailbox.put(job);
        }
        assert_eq!(mailbox.put(6), Admission::Rejected);
        assert_eq!(drain(&mailbox), vec![1, 2]);
    }

    #[test]
    fn test_single_producer_fifo() {
        let mailbox = Mailbox::unbounded();
        for job in 0..1000 {
            assert_eq!(mailbox.put(job), Admission::Accepted);
        }
        assert_eq!(drain(&mailbox), (0..1000).collect::<Vec<_>>());
        assert_eq!(mailbox.capacity(), 0);
    }

    #[test]
    fn test_poll_on_empty_returns_immediately() {
        let mailbox: Mailbox<i32> = Mailbox::new(4, OverflowPolicy::DropOldest);
        let start = Instant::now();
        assert_eq!(mailbox.get(WaitPolicy::Poll), None);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_block_waits_for_timeout() {
        let mailbox: Mailbox<i32> = Mailbox::new(4, OverflowPolicy::DropOldest);
        let start = Instant::now();
        assert_eq!(mailbox.get(WaitPolicy::Block(Duration::from_millis(30))), None);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_block_wakes_on_put_from_other_thread() {
        let mailbox = std::sync::Arc::new(Mailbox::new(4, OverflowPolicy::DropOldest));
        let producer = mailbox.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            producer.put(7);
        });
        assert_eq!(mailbox.get(WaitPolicy::Block(Duration::from_secs(5))), Some(7));
        handle.join().unwrap();
    }

    #[test]
    fn test_clear_reports_discarded_jobs() {
        let mailbox = Mailbox::new(0, OverflowPolicy::DropOldest);
        for job in 0..3 {
            mailbox.put(job);
        }
        assert_eq!(mailbox.clear(), 3);
        assert!(mailbox.is_empty());
        assert_eq!(mailbox.clear(), 0);
    }
}
