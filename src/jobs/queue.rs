//! Single-worker job queue.
//!
//! Jobs run one at a time, in request order, on a dedicated thread. A
//! request equal to a job still waiting in the queue is dropped. The worker
//! moves between three states:
//!
//! ```text
//! Enabled  --cancel_current--> Waiting  --resume--> Enabled
//!    |                            |
//!    +--------- shutdown ---------+------> Disabled
//! ```
//!
//! While `Waiting`, jobs are accepted but not run.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{Job, JobExecutor, ProgressMonitor};
use crate::config::IndexingConfig;
use crate::error::{IndexError, IndexResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Enabled,
    Waiting,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Extra attempts for a job whose `execute` returned `false`.
    pub max_job_retries: u32,
    pub retry_delay: Duration,
    /// Interval of the idle callback while nothing runs.
    pub idle_poll: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig::from(&IndexingConfig::default())
    }
}

impl From<&IndexingConfig> for QueueConfig {
    fn from(config: &IndexingConfig) -> Self {
        Self {
            max_job_retries: config.max_job_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            idle_poll: Duration::from_millis(config.idle_poll_ms.max(1)),
        }
    }
}

#[derive(Debug)]
struct Pending {
    job: Job,
    attempts: u32,
}

#[derive(Debug)]
struct Running {
    job: Job,
    progress: ProgressMonitor,
}

#[derive(Debug)]
struct QueueState {
    pending: VecDeque<Pending>,
    running: Option<Running>,
    state: WorkerState,
    idle_since: Instant,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.state == WorkerState::Disabled || (self.pending.is_empty() && self.running.is_none())
    }

    fn has_runnable(&self) -> bool {
        self.state == WorkerState::Enabled && !self.pending.is_empty()
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    work_cv: Condvar,
    idle_cv: Condvar,
    config: QueueConfig,
    worker: Mutex<Option<JoinHandle<()>>>,
}

enum Next {
    Run(Pending, ProgressMonitor),
    Idle(Duration),
}

/// Handle to the queue; clones share the same queue and worker.
#[derive(Debug, Clone)]
pub struct JobQueue {
    shared: Arc<Shared>,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    running: None,
                    state: WorkerState::Enabled,
                    idle_since: Instant::now(),
                }),
                work_cv: Condvar::new(),
                idle_cv: Condvar::new(),
                config,
                worker: Mutex::new(None),
            }),
        }
    }

    /// Spawn the worker. Jobs requested before this wait in the queue.
    pub fn start(&self, executor: Arc<dyn JobExecutor>) -> IndexResult<()> {
        if self.state() == WorkerState::Disabled {
            return Err(IndexError::ShutDown);
        }
        let mut worker = self.shared.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        let queue = self.clone();
        let handle = thread::Builder::new()
            .name("ccindex-jobs".to_string())
            .spawn(move || queue.run(executor.as_ref()))?;
        *worker = Some(handle);
        Ok(())
    }

    /// Queue `job` unless an equal job is already waiting. Returns whether
    /// it was added.
    pub fn request(&self, job: Job) -> bool {
        let mut st = self.shared.state.lock();
        if st.state == WorkerState::Disabled {
            tracing::debug!(target: "jobs", "rejecting {job}: queue is shut down");
            return false;
        }
        if st.pending.iter().any(|p| p.job == job) {
            tracing::trace!(target: "jobs", "dropping duplicate {job}");
            return false;
        }
        tracing::trace!(target: "jobs", "queued {job}");
        st.pending.push_back(Pending { job, attempts: 0 });
        self.shared.work_cv.notify_one();
        true
    }

    pub fn is_pending(&self, job: &Job) -> bool {
        self.shared.state.lock().pending.iter().any(|p| p.job == *job)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn current_job(&self) -> Option<Job> {
        self.shared.state.lock().running.as_ref().map(|r| r.job.clone())
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state.lock().state
    }

    /// `Waiting -> Enabled`. Returns whether the state changed.
    pub fn resume(&self) -> bool {
        let mut st = self.shared.state.lock();
        if st.state != WorkerState::Waiting {
            return false;
        }
        st.state = WorkerState::Enabled;
        self.shared.work_cv.notify_one();
        crate::debug_event!("jobs", "resumed", "{} pending", st.pending.len());
        true
    }

    /// `Enabled -> Waiting` without touching the running job.
    pub fn pause(&self) {
        let mut st = self.shared.state.lock();
        if st.state == WorkerState::Enabled {
            st.state = WorkerState::Waiting;
        }
    }

    /// Cancel the running job on behalf of the user. The worker then waits
    /// until resumed.
    pub fn cancel_current(&self) -> bool {
        let mut st = self.shared.state.lock();
        let Some(running) = &st.running else {
            return false;
        };
        running.progress.cancel();
        tracing::info!(target: "jobs", "canceled {}", running.job);
        if st.state == WorkerState::Enabled {
            st.state = WorkerState::Waiting;
        }
        true
    }

    /// Drop every waiting job for `project` (or nested under it) and cancel
    /// the running one if it belongs there. Returns how many were dropped.
    pub fn discard_jobs(&self, project: &Path) -> usize {
        let mut st = self.shared.state.lock();
        let before = st.pending.len();
        st.pending.retain(|p| !p.job.belongs_to(project));
        let discarded = before - st.pending.len();

        if let Some(running) = &st.running {
            if running.job.belongs_to(project) {
                running.progress.cancel();
            }
        }
        if st.is_idle() {
            self.shared.idle_cv.notify_all();
        }
        if discarded > 0 {
            crate::debug_event!("jobs", "discarded", "{discarded} jobs for {}", project.display());
        }
        discarded
    }

    /// Drop the waiting job equal to `job`, if any.
    pub fn discard_matching(&self, job: &Job) -> bool {
        let mut st = self.shared.state.lock();
        let before = st.pending.len();
        st.pending.retain(|p| p.job != *job);
        st.pending.len() != before
    }

    /// Block until nothing is queued or running. Returns `false` on timeout.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.shared.state.lock();
        while !st.is_idle() {
            if self.shared.idle_cv.wait_until(&mut st, deadline).timed_out() {
                return st.is_idle();
            }
        }
        true
    }

    /// Stop the worker after its current job and drop everything queued.
    pub fn shutdown(&self) {
        {
            let mut st = self.shared.state.lock();
            st.state = WorkerState::Disabled;
            st.pending.clear();
            if let Some(running) = &st.running {
                running.progress.cancel();
            }
            self.shared.work_cv.notify_all();
            self.shared.idle_cv.notify_all();
        }

        let handle = self.shared.worker.lock().take();
        if let Some(handle) = handle {
            // An executor may shut the queue down from inside a job.
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!(target: "jobs", "job worker terminated abnormally");
            }
        }
    }

    fn run(&self, executor: &dyn JobExecutor) {
        tracing::debug!(target: "jobs", "worker started");
        while let Some(next) = self.next() {
            match next {
                Next::Run(pending, progress) => self.run_job(executor, pending, progress),
                Next::Idle(idle_for) => {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| executor.idle(idle_for, self)));
                    if outcome.is_err() {
                        tracing::error!(target: "jobs", "idle handler panicked");
                    }
                }
            }
        }
        tracing::debug!(target: "jobs", "worker stopped");
    }

    fn next(&self) -> Option<Next> {
        let mut st = self.shared.state.lock();
        loop {
            if st.state == WorkerState::Disabled {
                return None;
            }
            if st.has_runnable() {
                if let Some(pending) = st.pending.pop_front() {
                    let progress = ProgressMonitor::new();
                    st.running = Some(Running {
                        job: pending.job.clone(),
                        progress: progress.clone(),
                    });
                    return Some(Next::Run(pending, progress));
                }
            }
            if st.is_idle() {
                self.shared.idle_cv.notify_all();
            }

            let timed_out = self
                .shared
                .work_cv
                .wait_for(&mut st, self.shared.config.idle_poll)
                .timed_out();
            if timed_out && !st.has_runnable() && st.state != WorkerState::Disabled {
                return Some(Next::Idle(st.idle_since.elapsed()));
            }
        }
    }

    fn run_job(&self, executor: &dyn JobExecutor, pending: Pending, progress: ProgressMonitor) {
        let Pending { job, attempts } = pending;
        let started = Instant::now();

        let succeeded = match panic::catch_unwind(AssertUnwindSafe(|| {
            executor.execute(&job, self, &progress)
        })) {
            Ok(succeeded) => succeeded,
            Err(_) => {
                tracing::error!(target: "jobs", "{job} panicked, dropping it");
                true
            }
        };

        let config = &self.shared.config;
        let retry = !succeeded && !progress.is_canceled() && attempts < config.max_job_retries;
        if retry {
            tracing::debug!(
                target: "jobs",
                "{job} failed, retry {}/{}",
                attempts + 1,
                config.max_job_retries
            );
            thread::sleep(config.retry_delay);
        } else {
            if succeeded {
                tracing::debug!(target: "jobs", "{job} done in {:?}", started.elapsed());
            } else {
                tracing::warn!(target: "jobs", "{job} failed after {attempts} retries, giving up");
            }
            if panic::catch_unwind(AssertUnwindSafe(|| executor.job_finished(&job, self))).is_err() {
                tracing::error!(target: "jobs", "completion handler panicked for {job}");
            }
        }

        let mut st = self.shared.state.lock();
        st.running = None;
        st.idle_since = Instant::now();
        if retry && st.state != WorkerState::Disabled && !st.pending.iter().any(|p| p.job == job) {
            st.pending.push_back(Pending {
                job,
                attempts: attempts + 1,
            });
        }
        if st.is_idle() {
            self.shared.idle_cv.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        executed: Mutex<Vec<Job>>,
        finished: Mutex<Vec<Job>>,
        failures_left: AtomicU32,
        block_until_canceled: AtomicBool,
        panic_next: AtomicBool,
        idles: AtomicUsize,
    }

    impl JobExecutor for Recorder {
        fn execute(&self, job: &Job, _queue: &JobQueue, progress: &ProgressMonitor) -> bool {
            self.executed.lock().push(job.clone());
            if self.panic_next.swap(false, Ordering::SeqCst) {
                panic!("boom");
            }
            if self.block_until_canceled.load(Ordering::SeqCst) {
                while !progress.is_canceled() {
                    thread::sleep(Duration::from_millis(2));
                }
                return true;
            }
            self.failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
        }

        fn job_finished(&self, job: &Job, _queue: &JobQueue) {
            self.finished.lock().push(job.clone());
        }

        fn idle(&self, _idle_for: Duration, _queue: &JobQueue) {
            self.idles.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_config() -> QueueConfig {
        QueueConfig {
            max_job_retries: 2,
            retry_delay: Duration::from_millis(1),
            idle_poll: Duration::from_millis(5),
        }
    }

    fn file_job(name: &str) -> Job {
        Job::add_file("/ws/app", PathBuf::from("/ws/app").join(name))
    }

    fn wait_for(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_runs_in_request_order() {
        let queue = JobQueue::new(fast_config());
        let recorder = Arc::new(Recorder::default());
        queue.request(file_job("a.cpp"));
        queue.request(file_job("b.cpp"));
        queue.request(Job::index_all("/ws/app"));
        queue.start(recorder.clone()).unwrap();

        assert!(queue.wait_until_idle(Duration::from_secs(5)));
        let executed = recorder.executed.lock().clone();
        assert_eq!(
            executed,
            vec![file_job("a.cpp"), file_job("b.cpp"), Job::index_all("/ws/app")]
        );
        assert_eq!(recorder.finished.lock().len(), 3);
        queue.shutdown();
    }

    #[test]
    fn test_equal_pending_jobs_run_once() {
        let queue = JobQueue::new(fast_config());
        let recorder = Arc::new(Recorder::default());
        assert!(queue.request(Job::index_all("/ws/app")));
        assert!(!queue.request(Job::index_all("/ws/app")));
        assert!(queue.is_pending(&Job::index_all("/ws/app")));
        assert_eq!(queue.pending_count(), 1);

        queue.start(recorder.clone()).unwrap();
        assert!(queue.wait_until_idle(Duration::from_secs(5)));
        assert_eq!(recorder.executed.lock().len(), 1);
        queue.shutdown();
    }

    #[test]
    fn test_failed_job_is_retried_then_dropped() {
        let queue = JobQueue::new(fast_config());
        let recorder = Arc::new(Recorder::default());
        recorder.failures_left.store(10, Ordering::SeqCst);
        queue.request(file_job("a.cpp"));
        queue.start(recorder.clone()).unwrap();

        assert!(queue.wait_until_idle(Duration::from_secs(5)));
        // one attempt plus two retries
        assert_eq!(recorder.executed.lock().len(), 3);
        assert_eq!(recorder.finished.lock().len(), 1);
        queue.shutdown();
    }

    #[test]
    fn test_retry_succeeds() {
        let queue = JobQueue::new(fast_config());
        let recorder = Arc::new(Recorder::default());
        recorder.failures_left.store(1, Ordering::SeqCst);
        queue.request(file_job("a.cpp"));
        queue.start(recorder.clone()).unwrap();

        assert!(queue.wait_until_idle(Duration::from_secs(5)));
        assert_eq!(recorder.executed.lock().len(), 2);
        assert_eq!(recorder.finished.lock().len(), 1);
        queue.shutdown();
    }

    #[test]
    fn test_cancel_current_pauses_worker() {
        let queue = JobQueue::new(fast_config());
        let recorder = Arc::new(Recorder::default());
        recorder.block_until_canceled.store(true, Ordering::SeqCst);
        queue.start(recorder.clone()).unwrap();

        queue.request(Job::index_all("/ws/app"));
        wait_for(|| queue.current_job().is_some());
        recorder.block_until_canceled.store(false, Ordering::SeqCst);
        assert!(queue.cancel_current());
        assert_eq!(queue.state(), WorkerState::Waiting);

        // accepted but not run while waiting
        queue.request(file_job("b.cpp"));
        wait_for(|| queue.current_job().is_none());
        thread::sleep(Duration::from_millis(20));
        assert_eq!(recorder.executed.lock().len(), 1);
        assert_eq!(queue.pending_count(), 1);

        assert!(queue.resume());
        assert!(queue.wait_until_idle(Duration::from_secs(5)));
        assert_eq!(recorder.executed.lock().len(), 2);
        // a canceled job is finished, not retried
        assert_eq!(recorder.finished.lock().len(), 2);
        queue.shutdown();
    }

    #[test]
    fn test_discard_jobs_for_project() {
        let queue = JobQueue::new(fast_config());
        queue.request(file_job("a.cpp"));
        queue.request(Job::index_all("/ws/app"));
        queue.request(Job::index_all("/ws/lib"));
        queue.request(Job::Save { project: None });

        assert_eq!(queue.discard_jobs(Path::new("/ws/app")), 2);
        assert_eq!(queue.pending_count(), 2);
        assert!(queue.is_pending(&Job::index_all("/ws/lib")));
    }

    #[test]
    fn test_panicking_job_does_not_stop_worker() {
        let queue = JobQueue::new(fast_config());
        let recorder = Arc::new(Recorder::default());
        recorder.panic_next.store(true, Ordering::SeqCst);
        queue.request(file_job("a.cpp"));
        queue.request(file_job("b.cpp"));
        queue.start(recorder.clone()).unwrap();

        assert!(queue.wait_until_idle(Duration::from_secs(5)));
        assert_eq!(recorder.executed.lock().len(), 2);
        assert_eq!(recorder.finished.lock().len(), 2);
        queue.shutdown();
    }

    #[test]
    fn test_idle_callback_fires() {
        let queue = JobQueue::new(fast_config());
        let recorder = Arc::new(Recorder::default());
        queue.start(recorder.clone()).unwrap();
        wait_for(|| recorder.idles.load(Ordering::SeqCst) >= 2);
        queue.shutdown();
    }

    #[test]
    fn test_shutdown_rejects_requests() {
        let queue = JobQueue::new(fast_config());
        let recorder = Arc::new(Recorder::default());
        queue.start(recorder.clone()).unwrap();
        queue.shutdown();
        assert_eq!(queue.state(), WorkerState::Disabled);
        assert!(!queue.request(file_job("a.cpp")));
        assert!(queue.wait_until_idle(Duration::from_millis(10)));
        assert!(matches!(queue.start(recorder), Err(IndexError::ShutDown)));
    }
}
