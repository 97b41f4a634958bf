//! In-memory single-flight lock keyed by job fingerprint (§4.5).
//!
//! Generalizes the cross-process file lock idiom ("acquire, or report who
//! holds it") into an in-process map: at most one in-flight job per
//! fingerprint. A second submission with the same fingerprint either
//! deduplicates (identical content hash) or queues behind the first.

use std::collections::HashMap;
use std::sync::Mutex;

/// Who currently holds the fingerprint, and with what content hash —
/// enough for the scheduler to decide "dedup" vs "queue".
#[derive(Debug, Clone)]
pub struct Holder {
    pub job_id: String,
    pub content_hash: String,
}

#[derive(Default)]
pub struct SingleFlightLock {
    held: Mutex<HashMap<String, Holder>>,
}

/// Outcome of attempting to acquire a fingerprint.
#[derive(Clone)]
pub enum Acquisition {
    /// No job held this fingerprint; the caller now owns it.
    Acquired,
    /// Already held by a job with identical content hash: dedup, return the
    /// existing job id instead of running a new one.
    Deduplicate { existing_job_id: String },
    /// Already held by a job with a different content hash: queue behind it.
    Queued { ahead_of: String },
}

impl SingleFlightLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to acquire `fingerprint` for `job_id`/`content_hash`.
    pub fn acquire(&self, fingerprint: &str, job_id: &str, content_hash: &str) -> Acquisition {
        let mut held = self.held.lock().unwrap();
        match held.get(fingerprint) {
            None => {
                held.insert(
                    fingerprint.to_string(),
                    Holder {
                        job_id: job_id.to_string(),
                        content_hash: content_hash.to_string(),
                    },
                );
                Acquisition::Acquired
            }
            Some(holder) if holder.content_hash == content_hash => Acquisition::Deduplicate {
                existing_job_id: holder.job_id.clone(),
            },
            Some(holder) => Acquisition::Queued {
                ahead_of: holder.job_id.clone(),
            },
        }
    }

    /// Releases `fingerprint`, only if it's currently held by `job_id`.
    /// Releasing a fingerprint this job doesn't hold is a no-op, matching
    /// the non-owning-release behavior of the file-lock predecessor.
    pub fn release(&self, fingerprint: &str, job_id: &str) {
        let mut held = self.held.lock().unwrap();
        if held.get(fingerprint).map(|h| h.job_id.as_str()) == Some(job_id) {
            held.remove(fingerprint);
        }
    }

    pub fn holder(&self, fingerprint: &str) -> Option<Holder> {
        self.held.lock().unwrap().get(fingerprint).cloned()
    }

    pub fn is_locked(&self, fingerprint: &str) -> bool {
        self.held.lock().unwrap().contains_key(fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_acquisition_succeeds() {
        let lock = SingleFlightLock::new();
        assert!(matches!(lock.acquire("fp1", "job-1", "hash-1"), Acquisition::Acquired));
    }

    #[test]
    fn identical_content_hash_deduplicates() {
        let lock = SingleFlightLock::new();
        lock.acquire("fp1", "job-1", "hash-1");
        match lock.acquire("fp1", "job-2", "hash-1") {
            Acquisition::Deduplicate { existing_job_id } => assert_eq!(existing_job_id, "job-1"),
            other => panic!("expected dedup, got {other:?}"),
        }
    }

    #[test]
    fn divergent_content_hash_queues() {
        let lock = SingleFlightLock::new();
        lock.acquire("fp1", "job-1", "hash-1");
        match lock.acquire("fp1", "job-2", "hash-2") {
            Acquisition::Queued { ahead_of } => assert_eq!(ahead_of, "job-1"),
            other => panic!("expected queued, got {other:?}"),
        }
    }

    #[test]
    fn release_frees_the_fingerprint_for_reacquisition() {
        let lock = SingleFlightLock::new();
        lock.acquire("fp1", "job-1", "hash-1");
        lock.release("fp1", "job-1");
        assert!(!lock.is_locked("fp1"));
        assert!(matches!(lock.acquire("fp1", "job-2", "hash-2"), Acquisition::Acquired));
    }

    #[test]
    fn release_by_non_holder_is_a_no_op() {
        let lock = SingleFlightLock::new();
        lock.acquire("fp1", "job-1", "hash-1");
        lock.release("fp1", "job-2");
        assert!(lock.is_locked("fp1"));
    }
}

impl std::fmt::Debug for Acquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Acquisition::Acquired => write!(f, "Acquired"),
            Acquisition::Deduplicate { existing_job_id } => {
                write!(f, "Deduplicate({existing_job_id})")
            }
            Acquisition::Queued { ahead_of } => write!(f, "Queued(behind {ahead_of})"),
        }
    }
}
