//! Delayed stage messages. One pending message per (task, stage); the worker
//! pool pulls whichever is due first.

use orchard_core::model::{Guid, Stage};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StageMessage {
    pub guid: Guid,
    pub stage: Stage,
}

impl StageMessage {
    pub fn new(guid: Guid, stage: Stage) -> Self {
        Self { guid, stage }
    }
}

/// Whether a worker may run a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Started,
    /// The same stage is already running for this task.
    Duplicate,
    /// Another stage of this task is running.
    Busy(Stage),
}

type Slot = (Instant, u64);

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<Reverse<(Instant, u64, Guid, Stage)>>,
    pending: HashMap<(Guid, Stage), Slot>,
    in_flight: HashMap<Guid, Stage>,
    seq: u64,
}

impl Inner {
    fn is_current(&self, at: Instant, seq: u64, guid: &Guid, stage: Stage) -> bool {
        self.pending.get(&(guid.clone(), stage)) == Some(&(at, seq))
    }

    /// Drops superseded heap entries and returns the earliest live due time.
    fn peek(&mut self) -> Option<Instant> {
        while let Some(Reverse((at, seq, guid, stage))) = self.heap.peek() {
            if self.is_current(*at, *seq, guid, *stage) {
                return Some(*at);
            }
            self.heap.pop();
        }
        None
    }

    fn pop_due(&mut self, now: Instant) -> Option<StageMessage> {
        match self.peek() {
            Some(at) if at <= now => {
                let Reverse((_, _, guid, stage)) = self.heap.pop()?;
                self.pending.remove(&(guid.clone(), stage));
                Some(StageMessage::new(guid, stage))
            }
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct StageQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl StageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `stage` for `guid` after `delay`. A message already pending
    /// for the same stage keeps whichever due time is earlier.
    pub fn enqueue(&self, guid: Guid, stage: Stage, delay: Duration) {
        let at = Instant::now() + delay;
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let key = (guid.clone(), stage);
            if let Some((existing, _)) = inner.pending.get(&key) {
                if *existing <= at {
                    tracing::trace!("{} for {} already queued earlier", stage, guid);
                    return;
                }
            }
            inner.seq += 1;
            let seq = inner.seq;
            inner.pending.insert(key, (at, seq));
            inner.heap.push(Reverse((at, seq, guid, stage)));
        }
        self.notify.notify_one();
    }

    /// Waits for the next due message. Returns `None` once `shutdown` fires.
    pub async fn next(&self, shutdown: &CancellationToken) -> Option<StageMessage> {
        loop {
            let wake_at = {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(message) = inner.pop_due(Instant::now()) {
                    if inner.peek().is_some() {
                        self.notify.notify_one();
                    }
                    return Some(message);
                }
                inner.peek()
            };

            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => return None,
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = shutdown.cancelled() => return None,
                        _ = self.notify.notified() => {}
                    }
                }
            }
        }
    }

    /// Claims `guid` for one stage run. At most one stage per task runs at a time.
    pub fn try_begin(&self, message: &StageMessage) -> Admission {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.in_flight.get(&message.guid) {
            Some(running) if *running == message.stage => Admission::Duplicate,
            Some(running) => Admission::Busy(*running),
            None => {
                inner.in_flight.insert(message.guid.clone(), message.stage);
                Admission::Started
            }
        }
    }

    pub fn finish(&self, guid: &Guid) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.in_flight.remove(guid);
    }

    pub fn is_pending(&self, guid: &Guid, stage: Stage) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.pending.contains_key(&(guid.clone(), stage))
    }

    pub fn pending_len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.pending.len()
    }

    #[cfg(test)]
    fn retained(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.heap.len() + inner.pending.len() + inner.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_delivers_in_due_order() {
        let queue = StageQueue::new();
        let token = CancellationToken::new();
        queue.enqueue(Guid::from("b"), Stage::TidyUp, Duration::from_secs(60));
        queue.enqueue(Guid::from("a"), Stage::PollJobs, Duration::from_secs(5));

        let first = queue.next(&token).await.unwrap();
        assert_eq!(first, StageMessage::new(Guid::from("a"), Stage::PollJobs));
        let second = queue.next(&token).await.unwrap();
        assert_eq!(second.stage, Stage::TidyUp);
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drained_queue_retains_nothing() {
        let queue = StageQueue::new();
        let token = CancellationToken::new();
        let guid = Guid::from("a");
        for _ in 0..10_000 {
            queue.enqueue(guid.clone(), Stage::PollJobs, Duration::from_secs(60));
            queue.enqueue(guid.clone(), Stage::PollJobs, Duration::from_secs(1));
            let message = queue.next(&token).await.unwrap();
            assert_eq!(queue.try_begin(&message), Admission::Started);
            queue.finish(&message.guid);
        }
        assert_eq!(queue.retained(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_keeps_earliest() {
        let queue = StageQueue::new();
        let guid = Guid::from("a");
        queue.enqueue(guid.clone(), Stage::PollJobs, Duration::from_secs(60));
        queue.enqueue(guid.clone(), Stage::PollJobs, Duration::from_secs(1));
        queue.enqueue(guid.clone(), Stage::PollJobs, Duration::from_secs(30));
        assert_eq!(queue.pending_len(), 1);

        let start = Instant::now();
        let token = CancellationToken::new();
        queue.next(&token).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert!(!queue.is_pending(&guid, Stage::PollJobs));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_unblocks_waiters() {
        let queue = StageQueue::new();
        let token = CancellationToken::new();
        token.cancel();
        assert!(queue.next(&token).await.is_none());
    }

    #[test]
    fn test_in_flight_exclusion() {
        let queue = StageQueue::new();
        let guid = Guid::from("a");
        let poll = StageMessage::new(guid.clone(), Stage::PollJobs);
        let tidy = StageMessage::new(guid.clone(), Stage::TidyUp);
        assert_eq!(queue.try_begin(&poll), Admission::Started);
        assert_eq!(queue.try_begin(&poll), Admission::Duplicate);
        assert_eq!(queue.try_begin(&tidy), Admission::Busy(Stage::PollJobs));
        queue.finish(&guid);
        assert_eq!(queue.try_begin(&tidy), Admission::Started);
    }
}
