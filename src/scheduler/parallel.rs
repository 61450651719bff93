//! Bounded-parallel policy: a worker pool behind the global parallel slot.

use super::{JobRun, RunOutcome, SchedulingPolicy};
use crate::scheduler::slot::ParallelSlot;
use crate::job::ChunkResult;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Processes a job's windows on `workers` threads, appending each result as
/// soon as it finishes. Only one parallel job runs at a time.
///
/// A chunk is classified with its predecessor as context only when that
/// predecessor already finished; windows in flight side by side get none.
pub struct ParallelPolicy {
    slot: Arc<ParallelSlot>,
    workers: usize,
    poll: Duration,
}

impl ParallelPolicy {
    pub fn new(slot: Arc<ParallelSlot>, workers: usize, poll: Duration) -> Self {
        Self {
            slot,
            workers: workers.max(1),
            poll,
        }
    }
}

impl SchedulingPolicy for ParallelPolicy {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn run(&self, run: &JobRun) -> RunOutcome {
        tracing::debug!(job_id = %run.job_id, "Waiting for parallel slot");
        let Some(_slot) = self.slot.acquire(run.cancel_flag(), self.poll) else {
            return RunOutcome::Cancelled;
        };

        if let Err(e) = run.begin() {
            return RunOutcome::Failed(e.to_string());
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        for window in &run.windows {
            if tx.send(*window).is_err() {
                break;
            }
        }
        drop(tx);

        let appended = AtomicUsize::new(0);
        let finished: Mutex<HashMap<usize, ChunkResult>> = Mutex::new(HashMap::new());
        let stop = AtomicBool::new(false);
        let failure: Mutex<Option<String>> = Mutex::new(None);
        let fail = |message: String| {
            stop.store(true, Ordering::SeqCst);
            let mut first = failure.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if first.is_none() {
                *first = Some(message);
            }
        };

        let pool_size = self.workers.min(run.windows.len()).max(1);
        tracing::debug!(job_id = %run.job_id, workers = pool_size, "Worker pool started");

        thread::scope(|scope| {
            for _ in 0..pool_size {
                let rx = rx.clone();
                let appended = &appended;
                let finished = &finished;
                let stop = &stop;
                let fail = &fail;
                scope.spawn(move || {
                    while let Ok(window) = rx.recv() {
                        if run.is_cancelled() || stop.load(Ordering::SeqCst) {
                            break;
                        }
                        let previous = window
                            .index
                            .checked_sub(1)
                            .and_then(|i| lock_finished(finished).get(&i).cloned());
                        let chunk = match run.process(&window, previous.as_ref()) {
                            Ok(chunk) => chunk,
                            Err(e) => {
                                fail(e.to_string());
                                break;
                            }
                        };
                        // Finished after cancel or failure: discard.
                        if run.is_cancelled() || stop.load(Ordering::SeqCst) {
                            break;
                        }
                        let kept = chunk.clone();
                        match run.record(chunk) {
                            Ok(_) => {
                                appended.fetch_add(1, Ordering::SeqCst);
                                lock_finished(finished).insert(kept.chunk_index, kept);
                            }
                            Err(e) => {
                                fail(e.to_string());
                                break;
                            }
                        }
                    }
                });
            }
        });

        let failure = failure
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(message) = failure {
            return RunOutcome::Failed(message);
        }
        if appended.load(Ordering::SeqCst) == run.windows.len() {
            RunOutcome::Completed
        } else {
            RunOutcome::Cancelled
        }
    }
}

fn lock_finished(
    finished: &Mutex<HashMap<usize, ChunkResult>>,
) -> std::sync::MutexGuard<'_, HashMap<usize, ChunkResult>> {
    finished.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
