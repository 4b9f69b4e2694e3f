//! Job queue (C2): the set of archives still to process and the set already
//! finished, shared across worker tasks behind a readers-writer lock.

use std::collections::HashMap;
use std::sync::RwLock;

use metrics::gauge;

/// Why a job finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Finished,
    FailedForEach,
    FailedBatch,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Finished => "finished",
            Outcome::FailedForEach => "failed (repo foreach)",
            Outcome::FailedBatch => "failed (batch)",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FinishedJob {
    pub outcome: Outcome,
}

/// A job's state while it's still in the `enqueued` map. `Dequeued` is the
/// transient state spec.md §3 invariant 1 says is only ever observed under
/// the job-queue lock: a dequeued job stays in `enqueued` (so it keeps
/// counting as in-flight) until `finish` moves it into `finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Enqueued,
    Dequeued,
}

struct Inner {
    enqueued: HashMap<String, JobState>,
    finished: HashMap<String, FinishedJob>,
}

/// Shared queue of repository archives, identified by DID. Mirrors the
/// original `EnqueuedRepos`/`FinishedRepos` maps guarded by one
/// readers-writer lock: `dequeue`/`finish` take the write lock, the
/// drain-watcher's emptiness check takes the read lock.
///
/// A DID lives in exactly one of `enqueued` or `finished` at any instant
/// observable from outside the lock: `dequeue` only flips its state within
/// `enqueued` (to `Dequeued`), and only `finish` removes it from `enqueued`
/// and inserts it into `finished`. This keeps `is_drained()` — "every job
/// has finished" — distinct from "every job has been handed to a worker".
pub struct JobQueue {
    inner: RwLock<Inner>,
}

impl JobQueue {
    /// Builds a queue pre-populated with every DID under `--out-dir`.
    pub fn from_dids(dids: impl IntoIterator<Item = String>) -> Self {
        let enqueued: HashMap<String, JobState> =
            dids.into_iter().map(|did| (did, JobState::Enqueued)).collect();
        gauge!("netsync_enqueued_jobs").set(enqueued.len() as f64);
        gauge!("netsync_finished_jobs").set(0.0);
        Self {
            inner: RwLock::new(Inner { enqueued, finished: HashMap::new() }),
        }
    }

    /// Returns one DID still in the `Enqueued` state and marks it
    /// `Dequeued`, or `None` if none remain. Each DID is handed to exactly
    /// one worker. The DID stays in the `enqueued` map — only `finish`
    /// removes it — so it's still counted as in-flight, not done.
    pub fn dequeue(&self) -> Option<String> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let did = inner
            .enqueued
            .iter()
            .find(|(_, state)| **state == JobState::Enqueued)
            .map(|(did, _)| did.clone())?;
        inner.enqueued.insert(did.clone(), JobState::Dequeued);
        Some(did)
    }

    /// Records the outcome of a finished job: removes it from `enqueued` and
    /// inserts it into `finished`, then updates both gauges.
    pub fn finish(&self, did: String, outcome: Outcome) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.enqueued.remove(&did);
        inner.finished.insert(did, FinishedJob { outcome });
        gauge!("netsync_enqueued_jobs").set(inner.enqueued.len() as f64);
        gauge!("netsync_finished_jobs").set(inner.finished.len() as f64);
    }

    /// `true` once every archive has finished. Used by the drain-watcher to
    /// decide when to signal shutdown — checking `enqueued` rather than
    /// `finished` matters only in that `enqueued` also holds in-flight
    /// (`Dequeued`) jobs, so this is false while any worker is still
    /// processing an archive.
    pub fn is_drained(&self) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.enqueued.is_empty()
    }

    pub fn finished_count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.finished.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dequeue_hands_out_each_did_once() {
        let queue = JobQueue::from_dids(["a".to_string(), "b".to_string()]);
        let mut seen = vec![queue.dequeue().unwrap(), queue.dequeue().unwrap()];
        seen.sort();
        assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn not_drained_while_a_dequeued_job_is_still_in_flight() {
        let queue = JobQueue::from_dids(["a".to_string()]);
        assert!(!queue.is_drained());
        let did = queue.dequeue().unwrap();
        assert!(!queue.is_drained(), "a dequeued-but-unfinished job must still count as in-flight");
        queue.finish(did, Outcome::Finished);
        assert!(queue.is_drained());
    }

    #[test]
    fn finish_is_recorded_and_counted() {
        let queue = JobQueue::from_dids(["a".to_string()]);
        let did = queue.dequeue().unwrap();
        queue.finish(did, Outcome::Finished);
        assert_eq!(queue.finished_count(), 1);
    }

    #[test]
    fn finish_removes_the_job_from_the_enqueued_set() {
        let queue = JobQueue::from_dids(["a".to_string(), "b".to_string()]);
        let did = queue.dequeue().unwrap();
        queue.finish(did, Outcome::Finished);
        assert!(!queue.is_drained(), "the other job is neither dequeued nor finished yet");
        let other = queue.dequeue().unwrap();
        queue.finish(other, Outcome::Finished);
        assert!(queue.is_drained());
        assert_eq!(queue.finished_count(), 2);
    }
}
