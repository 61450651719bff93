//! Background policy: one chunk at a time, only while the CPU is idle.

use super::{JobRun, RunOutcome, SchedulingPolicy};
use crate::admission::AdmissionController;
use crate::job::ChunkResult;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Sequential policy gated on [`AdmissionController`] before every chunk.
///
/// Idles without holding the parallel slot or any store lock, and checks the
/// cancel flag on every poll.
pub struct BackgroundPolicy {
    admission: Arc<AdmissionController>,
    poll: Duration,
}

impl BackgroundPolicy {
    pub fn new(admission: Arc<AdmissionController>, poll: Duration) -> Self {
        Self { admission, poll }
    }

    /// Wait for admission. False if cancelled while waiting.
    fn wait_for_admission(&self, run: &JobRun, chunk_index: usize) -> bool {
        let mut refusals = 0u32;
        loop {
            if run.is_cancelled() {
                return false;
            }
            if self.admission.can_proceed() {
                if refusals > 0 {
                    tracing::debug!(job_id = %run.job_id, chunk_index, refusals, "Admitted after idling");
                }
                return true;
            }
            if refusals == 0 {
                tracing::debug!(job_id = %run.job_id, chunk_index, "CPU busy, idling");
            }
            refusals += 1;
            thread::sleep(self.poll);
        }
    }
}

impl SchedulingPolicy for BackgroundPolicy {
    fn name(&self) -> &'static str {
        "background"
    }

    fn run(&self, run: &JobRun) -> RunOutcome {
        let mut previous: Option<ChunkResult> = None;

        for window in &run.windows {
            if !self.wait_for_admission(run, window.index) {
                return RunOutcome::Cancelled;
            }
            if let Err(e) = run.begin() {
                return RunOutcome::Failed(e.to_string());
            }

            let chunk = match run.process(window, previous.as_ref()) {
                Ok(chunk) => chunk,
                Err(e) => return RunOutcome::Failed(e.to_string()),
            };
            if run.is_cancelled() {
                return RunOutcome::Cancelled;
            }
            if let Err(e) = run.record(chunk.clone()) {
                return RunOutcome::Failed(e.to_string());
            }
            previous = Some(chunk);
        }

        RunOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::MockCpuSampler;
    use crate::config::AdmissionConfig;
    use crate::job::{JobStatus, SchedulingMode, SpeakerLabel};
    use crate::scheduler::execute;
    use crate::scheduler::test_support::{job_run, processor, processor_with};
    use crate::speaker::{MockClassifier, SpeakerClassifier};
    use crate::store::ResultStore;
    use crate::stt::MockTranscriber;
    use std::sync::atomic::Ordering;

    fn admission(sampler: MockCpuSampler) -> Arc<AdmissionController> {
        Arc::new(
            AdmissionController::new(&AdmissionConfig::default(), Box::new(sampler))
                .with_min_sample_interval(Duration::ZERO),
        )
    }

    fn policy(sampler: MockCpuSampler) -> BackgroundPolicy {
        BackgroundPolicy::new(admission(sampler), Duration::from_millis(5))
    }

    #[test]
    fn test_idle_system_processes_in_order() {
        let (store, run) = job_run(5, SchedulingMode::Background, processor(MockTranscriber::new("m")));

        assert_eq!(policy(MockCpuSampler::new(0.9)).run(&run), RunOutcome::Completed);

        let snap = store.get_job(run.job_id).unwrap();
        let order: Vec<usize> = snap.chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        let times: Vec<_> = snap.chunks.iter().map(|c| c.completed_at).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_busy_system_defers_processing() {
        let transcriber = MockTranscriber::new("m");
        let (store, run) = job_run(2, SchedulingMode::Background, processor(transcriber.clone()));
        let sampler = MockCpuSampler::new(0.05);
        let run = Arc::new(run);

        let handle = {
            let run = Arc::clone(&run);
            let policy = policy(sampler.clone());
            thread::spawn(move || policy.run(&run))
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(transcriber.call_count(), 0);
        assert_eq!(
            store.get_job(run.job_id).unwrap().job.status,
            JobStatus::Pending
        );

        // Busy samples stay in the 10s window, so cancel instead of waiting.
        run.cancel_flag().store(true, Ordering::SeqCst);
        assert_eq!(handle.join().unwrap(), RunOutcome::Cancelled);
        assert!(sampler.sample_count() > 1);
    }

    #[test]
    fn test_cancel_between_chunks() {
        let transcriber = MockTranscriber::new("m").with_delay(Duration::from_millis(20));
        let (store, run) = job_run(50, SchedulingMode::Background, processor(transcriber));
        let run = Arc::new(run);

        let handle = {
            let run = Arc::clone(&run);
            let policy = policy(MockCpuSampler::new(1.0));
            thread::spawn(move || execute(&policy, &run).unwrap())
        };
        thread::sleep(Duration::from_millis(60));
        run.cancel_flag().store(true, Ordering::SeqCst);

        assert_eq!(handle.join().unwrap(), JobStatus::Cancelled);
        let snap = store.get_job(run.job_id).unwrap();
        assert!(snap.job.processed_chunks < 50);
        let order: Vec<usize> = snap.chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(order, (0..snap.chunks.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_failure_keeps_earlier_chunks() {
        // Chunk 0 succeeds, then every attempt at chunk 1 fails.
        let transcriber = MockTranscriber::new("m").with_failure_after(1);
        let (store, run) = job_run(3, SchedulingMode::Background, processor(transcriber.clone()));

        let status = execute(&policy(MockCpuSampler::new(1.0)), &run).unwrap();

        assert_eq!(status, JobStatus::Failed);
        let snap = store.get_job(run.job_id).unwrap();
        assert_eq!(snap.chunks.len(), 1);
        assert_eq!(snap.job.processed_chunks, 1);
        assert!(snap.job.last_error.unwrap().starts_with("Chunk 1 failed"));
        // Chunk 2 was never attempted.
        assert_eq!(transcriber.call_count(), 3);
    }

    #[test]
    fn test_speaker_labels_recorded_per_chunk() {
        let classifier: Arc<dyn SpeakerClassifier> = Arc::new(MockClassifier::alternating());
        let (store, run) = job_run(
            4,
            SchedulingMode::Background,
            processor_with(MockTranscriber::new("m"), Some(classifier)),
        );

        assert_eq!(policy(MockCpuSampler::new(1.0)).run(&run), RunOutcome::Completed);
        let speakers: Vec<SpeakerLabel> = store
            .get_job(run.job_id)
            .unwrap()
            .chunks
            .iter()
            .map(|c| c.speaker)
            .collect();
        assert_eq!(
            speakers,
            vec![
                SpeakerLabel::PartyA,
                SpeakerLabel::PartyB,
                SpeakerLabel::PartyA,
                SpeakerLabel::PartyB
            ]
        );
    }
}
