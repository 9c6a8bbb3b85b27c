use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

/// Identity of a scheduled job: the method `method` on the target `target`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobKey {
    pub target: String,
    pub method: String,
}

impl JobKey {
    pub fn new(target: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
        }
    }
}

impl fmt::Debug for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobKey({}.{})", self.target, self.method)
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.method)
    }
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    due: Instant,
    seq: u64,
}

/// Debounced job queue with `(target, method)` coalescing.
///
/// A job is *pending* from `schedule_once` until it is handed out by
/// `take_due`/`take_all`, then *in flight* until `complete`. A request for a
/// key that is pending or in flight is dropped, so at most one job per key
/// exists at any time.
#[derive(Default)]
pub struct Scheduler {
    pending: HashMap<JobKey, Slot>,
    in_flight: HashSet<JobKey>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `method` on `target` to run once `delay` has elapsed.
    ///
    /// Returns `true` if a new job was queued, `false` if the request was
    /// coalesced into an existing pending or in-flight job.
    pub fn schedule_once(&mut self, target: &str, method: &str, delay: Duration) -> bool {
        self.schedule_once_at(target, method, delay, Instant::now())
    }

    /// Like [`schedule_once`](Self::schedule_once) with an explicit clock.
    pub fn schedule_once_at(
        &mut self,
        target: &str,
        method: &str,
        delay: Duration,
        now: Instant,
    ) -> bool {
        let key = JobKey::new(target, method);
        if self.pending.contains_key(&key) || self.in_flight.contains(&key) {
            debug!(job = %key, "schedule coalesced");
            return false;
        }
        let slot = Slot {
            due: now + delay,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        debug!(job = %key, delay_ms = delay.as_millis() as u64, "job scheduled");
        self.pending.insert(key, slot);
        true
    }

    /// Returns `true` if the job is pending or in flight.
    pub fn is_scheduled(&self, target: &str, method: &str) -> bool {
        let key = JobKey::new(target, method);
        self.pending.contains_key(&key) || self.in_flight.contains(&key)
    }

    /// Returns `true` if the job is currently running.
    pub fn is_in_flight(&self, target: &str, method: &str) -> bool {
        self.in_flight.contains(&JobKey::new(target, method))
    }

    /// Hand out every pending job due at `now`, earliest first (ties in
    /// scheduling order). Handed-out jobs are in flight until `complete`.
    pub fn take_due(&mut self, now: Instant) -> Vec<JobKey> {
        self.take_where(|slot| slot.due <= now)
    }

    /// Hand out every pending job regardless of its debounce delay.
    pub fn take_all(&mut self) -> Vec<JobKey> {
        self.take_where(|_| true)
    }

    fn take_where(&mut self, mut ready: impl FnMut(&Slot) -> bool) -> Vec<JobKey> {
        let mut due: Vec<(JobKey, Slot)> = self
            .pending
            .iter()
            .filter(|(_, slot)| ready(slot))
            .map(|(key, slot)| (key.clone(), *slot))
            .collect();
        due.sort_by_key(|(_, slot)| (slot.due, slot.seq));

        let mut keys = Vec::with_capacity(due.len());
        for (key, _) in due {
            self.pending.remove(&key);
            self.in_flight.insert(key.clone());
            keys.push(key);
        }
        keys
    }

    /// Mark a handed-out job as finished so the key can be scheduled again.
    pub fn complete(&mut self, key: &JobKey) {
        self.in_flight.remove(key);
    }

    /// Drop every pending job of `target`. Returns how many were dropped.
    pub fn cancel_target(&mut self, target: &str) -> usize {
        let before = self.pending.len();
        self.pending.retain(|key, _| key.target != target);
        let dropped = before - self.pending.len();
        if dropped > 0 {
            debug!(target_name = target, dropped, "pending jobs cancelled");
        }
        dropped
    }

    /// Earliest due time among pending jobs.
    pub fn next_due(&self) -> Option<Instant> {
        self.pending.values().map(|slot| slot.due).min()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending.len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}
