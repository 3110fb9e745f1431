//! Bounded queue with an unbounded spill list.
//!
//! # Responsibilities
//! - Accept submissions from any producer without ever blocking it
//! - Hand queued items to workers one at a time
//! - Hold overflow in arrival order until a drain cycle moves it back
//! - Keep a bounded record of undeliverable submissions
//!
//! # Design Decisions
//! - The queue is a bounded `mpsc` channel; workers share its receiver behind an async mutex
//! - Spill is a `VecDeque` under a std mutex; it is never held across an await
//! - A drain cycle stops at the first item the queue rejects, so spill order never changes

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;

use crate::observability::metrics;
use crate::payments::types::PaymentSubmission;

/// A submission waiting for a dispatch cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub submission: PaymentSubmission,
    /// Dispatch cycles already failed on both processors.
    pub attempts: u32,
    /// Earliest instant a worker may dispatch this item.
    pub not_before: Option<Instant>,
}

impl QueueItem {
    pub fn new(submission: PaymentSubmission) -> Self {
        Self {
            submission,
            attempts: 0,
            not_before: None,
        }
    }

    /// The same submission scheduled for another cycle after `delay`.
    pub fn retry(self, attempts: u32, delay: Duration) -> Self {
        Self {
            submission: self.submission,
            attempts,
            not_before: Some(Instant::now() + delay),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.submission.correlation_id
    }
}

/// A submission that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Undeliverable {
    #[serde(flatten)]
    pub submission: PaymentSubmission,
    pub attempts: u32,
    pub given_up_at: DateTime<Utc>,
}

/// Bounded queue plus spill list, shared by producers, workers and the scheduler.
pub struct RetryQueue {
    sender: mpsc::Sender<QueueItem>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<QueueItem>>,
    capacity: usize,
    spill: Mutex<VecDeque<QueueItem>>,
    dead_letters: Mutex<VecDeque<Undeliverable>>,
    dead_letter_capacity: usize,
}

impl RetryQueue {
    /// `capacity` must be non-zero.
    pub fn new(capacity: usize, dead_letter_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            capacity,
            spill: Mutex::new(VecDeque::new()),
            dead_letters: Mutex::new(VecDeque::new()),
            dead_letter_capacity,
        }
    }

    /// Enqueue without blocking. A full queue diverts the item to spill.
    pub fn send(&self, item: QueueItem) {
        match self.sender.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(item)) | Err(TrySendError::Closed(item)) => {
                let mut spill = lock(&self.spill);
                tracing::debug!(
                    correlation_id = %item.correlation_id(),
                    spill_size = spill.len() + 1,
                    "Queue full, item spilled"
                );
                spill.push_back(item);
                metrics::record_spilled(spill.len());
            }
        }
    }

    /// Move spill items back into the queue in order. Returns how many moved.
    ///
    /// Stops at the first item the queue rejects; it and everything behind it
    /// stay in spill in their original order.
    pub fn retry_spill(&self) -> usize {
        let mut spill = lock(&self.spill);
        let mut moved = 0;
        while let Some(item) = spill.pop_front() {
            match self.sender.try_send(item) {
                Ok(()) => moved += 1,
                Err(TrySendError::Full(item)) | Err(TrySendError::Closed(item)) => {
                    spill.push_front(item);
                    break;
                }
            }
        }
        metrics::set_spill_size(spill.len());
        moved
    }

    /// Wait for the next queued item. Only `None` once the queue is closed,
    /// which cannot happen while `self` is alive.
    pub async fn recv(&self) -> Option<QueueItem> {
        self.receiver.lock().await.recv().await
    }

    /// Next item from the queue, or failing that from spill, without waiting.
    pub async fn try_next(&self) -> Option<QueueItem> {
        if let Ok(item) = self.receiver.lock().await.try_recv() {
            return Some(item);
        }
        lock(&self.spill).pop_front()
    }

    /// Empty both the queue and spill, queue items first.
    pub async fn drain_all(&self) -> Vec<QueueItem> {
        let mut items = Vec::new();
        {
            let mut receiver = self.receiver.lock().await;
            while let Ok(item) = receiver.try_recv() {
                items.push(item);
            }
        }
        items.extend(lock(&self.spill).drain(..));
        metrics::set_spill_size(0);
        items
    }

    pub fn queue_len(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn spill_len(&self) -> usize {
        lock(&self.spill).len()
    }

    /// Record a submission as undeliverable, evicting the oldest entry when full.
    pub fn push_dead_letter(&self, entry: Undeliverable) {
        if self.dead_letter_capacity == 0 {
            return;
        }
        let mut dead = lock(&self.dead_letters);
        if dead.len() == self.dead_letter_capacity {
            dead.pop_front();
        }
        dead.push_back(entry);
    }

    pub fn dead_letters(&self) -> Vec<Undeliverable> {
        lock(&self.dead_letters).iter().cloned().collect()
    }

    pub fn dead_letter_len(&self) -> usize {
        lock(&self.dead_letters).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
