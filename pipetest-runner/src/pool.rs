// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A bounded-concurrency job pool with heartbeats and cooperative cancellation.
//!
//! The pool runs [`PoolJob`]s on a fixed set of worker threads and hands outcomes back as an
//! unordered stream through [`ExecutionPool::next_event`]. Jobs may be added while outcomes are
//! still being consumed. At most `workers * BUFFER_FACTOR` jobs are handed to workers at once; the
//! rest wait in the pool until a slot frees up.
//!
//! Reading the stream never blocks for longer than the heartbeat timeout: if no job finishes in
//! that time, a [`PoolEvent::Heartbeat`] is returned instead, so the caller can check deadlines and
//! cancellation state.

use crate::{
    errors::{JobError, PoolError},
    test_command::{ChildProcess, TerminateSignal},
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{debug, error, info};

/// The number of jobs per worker that may be handed out before their outcomes are read.
pub const BUFFER_FACTOR: usize = 4;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A unit of work that runs on a pool worker.
pub trait PoolJob: Send + 'static {
    /// The value produced by a successful run.
    type Output: Send + 'static;

    /// Runs the job. Panics are caught and reported as [`JobError::Panicked`].
    fn run(self, cx: &WorkerContext) -> Result<Self::Output, JobError>;
}

/// Identifies a job submitted to an [`ExecutionPool`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct JobId(u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// An element of the pool's outcome stream.
#[derive(Debug)]
pub enum PoolEvent<T> {
    /// No job finished within the heartbeat timeout.
    Heartbeat,

    /// A job finished.
    Completed {
        /// The job that finished.
        job_id: JobId,

        /// The job's output, or the error it failed with.
        outcome: Result<T, JobError>,
    },
}

#[derive(Debug, Default)]
struct PoolShared {
    aborted: AtomicBool,
    next_child: AtomicU64,
    children: Mutex<HashMap<u64, ChildProcess>>,
}

impl PoolShared {
    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn children(&self) -> Vec<ChildProcess> {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn signal_children(&self, signal: TerminateSignal) -> usize {
        let children = self.children();
        for child in &children {
            child.signal(signal);
        }
        children.len()
    }
}

/// Per-worker state passed to [`PoolJob::run`].
#[derive(Debug)]
pub struct WorkerContext {
    worker_id: usize,
    shared: Arc<PoolShared>,
}

impl WorkerContext {
    /// Returns the index of the worker running the job.
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Returns true if the pool has been aborted.
    pub fn is_aborted(&self) -> bool {
        self.shared.is_aborted()
    }

    /// Registers a running child process so that aborting the pool terminates it.
    ///
    /// The child stays registered until the returned guard is dropped.
    pub(crate) fn register_child(&self, child: ChildProcess) -> ChildRegistration<'_> {
        let key = self.shared.next_child.fetch_add(1, Ordering::Relaxed);
        self.shared
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, child.clone());
        if self.shared.is_aborted() {
            // Spawned after the abort swept the registry.
            child.signal(TerminateSignal::Kill);
        }
        ChildRegistration {
            shared: &self.shared,
            key,
        }
    }
}

pub(crate) struct ChildRegistration<'a> {
    shared: &'a PoolShared,
    key: u64,
}

impl Drop for ChildRegistration<'_> {
    fn drop(&mut self) {
        self.shared
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Aborts an [`ExecutionPool`] from anywhere, including other threads.
#[derive(Clone, Debug)]
pub struct PoolHandle {
    shared: Arc<PoolShared>,
}

impl PoolHandle {
    /// Requests an abort. The pool terminates on the next read of its outcome stream.
    pub fn abort(&self) {
        self.shared.aborted.store(true, Ordering::Release);
    }

    /// Returns true if an abort was requested.
    pub fn is_aborted(&self) -> bool {
        self.shared.is_aborted()
    }
}

enum WorkItem<J> {
    Run { job_id: JobId, job: J },
    Stop,
}

struct WorkerOutcome<T> {
    job_id: JobId,
    outcome: Result<T, JobError>,
}

/// Runs jobs on a fixed number of worker threads.
pub struct ExecutionPool<J: PoolJob> {
    worker_count: usize,
    heartbeat_timeout: Duration,
    grace_period: Duration,
    shared: Arc<PoolShared>,
    work_sender: Option<Sender<WorkItem<J>>>,
    outcome_receiver: Receiver<WorkerOutcome<J::Output>>,
    workers: Vec<JoinHandle<()>>,
    pending: VecDeque<(JobId, J)>,
    processing: usize,
    next_job_id: u64,
    terminated: bool,
}

impl<J: PoolJob> ExecutionPool<J> {
    /// Starts a pool with `worker_count` workers (at least one).
    pub fn new(worker_count: usize, heartbeat_timeout: Duration) -> Result<Self, PoolError> {
        let worker_count = worker_count.max(1);
        let (work_sender, work_receiver) = crossbeam_channel::unbounded();
        let (outcome_sender, outcome_receiver) =
            crossbeam_channel::bounded(worker_count * BUFFER_FACTOR);
        let shared = Arc::new(PoolShared::default());

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let cx = WorkerContext {
                worker_id,
                shared: Arc::clone(&shared),
            };
            let work_receiver = work_receiver.clone();
            let outcome_sender = outcome_sender.clone();
            let spawned = thread::Builder::new()
                .name(format!("pipetest-worker-{worker_id}"))
                .spawn(move || worker_loop(cx, work_receiver, outcome_sender));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(error) => {
                    error!("failed to spawn pool worker {worker_id}: {error}");
                    // Dropping the sender makes the workers spawned so far exit.
                    drop(work_sender);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(PoolError::WorkerSpawn { worker_id, error });
                }
            }
        }
        debug!("started execution pool with {worker_count} workers");

        Ok(Self {
            worker_count,
            heartbeat_timeout,
            grace_period: crate::test_command::TestCommand::DEFAULT_GRACE_PERIOD,
            shared,
            work_sender: Some(work_sender),
            outcome_receiver,
            workers,
            pending: VecDeque::new(),
            processing: 0,
            next_job_id: 0,
            terminated: false,
        })
    }

    /// Sets how long running processes get to exit after `SIGTERM` when the pool is aborted.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Returns the number of workers.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Returns the maximum number of jobs handed to workers at once.
    pub fn capacity(&self) -> usize {
        self.worker_count * BUFFER_FACTOR
    }

    /// Returns the number of jobs handed to workers whose outcomes haven't been read yet.
    pub fn in_flight(&self) -> usize {
        self.processing
    }

    /// Returns the number of jobs waiting to be handed to a worker.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Returns a handle that can abort this pool.
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Adds a job.
    pub fn submit(&mut self, job: J) -> JobId {
        let job_id = JobId(self.next_job_id);
        self.next_job_id += 1;
        self.pending.push_back((job_id, job));
        self.fill();
        job_id
    }

    /// Adds several jobs, returning their ids in order.
    pub fn add(&mut self, jobs: impl IntoIterator<Item = J>) -> Vec<JobId> {
        jobs.into_iter().map(|job| self.submit(job)).collect()
    }

    /// Requests an abort: checked on the next call to [`next_event`](Self::next_event).
    pub fn abort(&self) {
        self.shared.aborted.store(true, Ordering::Release);
    }

    /// Returns the next element of the outcome stream.
    ///
    /// Returns `Ok(None)` once nothing is outstanding, or once the pool has been aborted. Outcomes
    /// are returned in completion order.
    pub fn next_event(&mut self) -> Result<Option<PoolEvent<J::Output>>, PoolError> {
        if self.shared.is_aborted() {
            self.terminate();
            return Ok(None);
        }
        if self.terminated {
            return Ok(None);
        }

        self.fill();
        if self.processing == 0 {
            if self.pending.is_empty() {
                return Ok(None);
            }
            // Jobs are waiting but no worker accepted them.
            return Err(self.internal_error());
        }

        match self.outcome_receiver.recv_timeout(self.heartbeat_timeout) {
            Ok(WorkerOutcome { job_id, outcome }) => {
                self.processing -= 1;
                self.fill();
                Ok(Some(PoolEvent::Completed { job_id, outcome }))
            }
            Err(RecvTimeoutError::Timeout) => Ok(Some(PoolEvent::Heartbeat)),
            Err(RecvTimeoutError::Disconnected) => Err(self.internal_error()),
        }
    }

    /// Shuts the pool down gracefully: workers finish the jobs they were handed and exit.
    pub fn close(mut self) -> Result<(), PoolError> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        if !self.pending.is_empty() {
            debug!(
                "closing pool with {} jobs that never started",
                self.pending.len()
            );
            self.pending.clear();
        }
        if let Some(sender) = self.work_sender.take() {
            for _ in 0..self.worker_count {
                let _ = sender.send(WorkItem::Stop);
            }
        }
        self.join_workers()
    }

    fn fill(&mut self) {
        if self.terminated || self.shared.is_aborted() {
            return;
        }
        let Some(sender) = &self.work_sender else {
            return;
        };
        while self.processing < self.capacity() {
            let Some((job_id, job)) = self.pending.pop_front() else {
                break;
            };
            match sender.send(WorkItem::Run { job_id, job }) {
                Ok(()) => self.processing += 1,
                Err(err) => {
                    // Every worker has exited: put the job back so it is counted as outstanding.
                    if let WorkItem::Run { job_id, job } = err.into_inner() {
                        self.pending.push_front((job_id, job));
                    }
                    break;
                }
            }
        }
    }

    fn internal_error(&mut self) -> PoolError {
        let outstanding = self.processing + self.pending.len();
        error!("pool workers exited with {outstanding} jobs outstanding, shutting down");
        self.terminate();
        PoolError::WorkersDisconnected { outstanding }
    }

    /// Terminates the pool immediately: outstanding jobs are abandoned and their processes
    /// terminated.
    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.shared.aborted.store(true, Ordering::Release);
        self.work_sender = None;
        self.pending.clear();

        let signaled = self.shared.signal_children(TerminateSignal::Term);
        info!("aborting execution pool, terminating {signaled} running processes");

        let deadline = Instant::now() + self.grace_period;
        while Instant::now() < deadline && !self.workers.iter().all(JoinHandle::is_finished) {
            while self.outcome_receiver.try_recv().is_ok() {}
            thread::sleep(EXIT_POLL_INTERVAL);
        }

        let killed = self.shared.signal_children(TerminateSignal::Kill);
        if killed > 0 {
            debug!("killed {killed} processes that outlived the grace period");
        }
        if let Err(error) = self.join_workers() {
            error!("error while joining pool workers after abort: {error}");
        }
    }

    fn join_workers(&mut self) -> Result<(), PoolError> {
        // Drain outcomes in the background so no worker can block on a full channel.
        let receiver = self.outcome_receiver.clone();
        let drain = thread::spawn(move || receiver.iter().count());

        let mut result = Ok(());
        for (worker_id, handle) in self.workers.drain(..).enumerate() {
            if handle.join().is_err() {
                error!("pool worker {worker_id} panicked");
                result = Err(PoolError::WorkerPanicked { worker_id });
            }
        }
        let drained = drain.join().unwrap_or_default();
        if drained > 0 {
            debug!("discarded {drained} outcomes during pool shutdown");
        }
        result
    }
}

impl<J: PoolJob> Drop for ExecutionPool<J> {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.terminate();
        }
    }
}

impl<J: PoolJob> fmt::Debug for ExecutionPool<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPool")
            .field("worker_count", &self.worker_count)
            .field("processing", &self.processing)
            .field("pending", &self.pending.len())
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}

fn worker_loop<J: PoolJob>(
    cx: WorkerContext,
    work_receiver: Receiver<WorkItem<J>>,
    outcome_sender: Sender<WorkerOutcome<J::Output>>,
) {
    for item in work_receiver {
        let (job_id, job) = match item {
            WorkItem::Run { job_id, job } => (job_id, job),
            WorkItem::Stop => break,
        };
        // Once aborted, finish nothing new: only the job already running completes.
        if cx.is_aborted() {
            break;
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.run(&cx))).unwrap_or_else(
            |payload| {
                Err(JobError::Panicked {
                    message: panic_message(payload.as_ref()),
                })
            },
        );
        if outcome_sender.send(WorkerOutcome { job_id, outcome }).is_err() {
            break;
        }
    }
    debug!("pool worker {} exiting", cx.worker_id);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "(non-string panic payload)".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::BTreeSet, sync::atomic::AtomicUsize};

    #[derive(Debug)]
    enum TestJob {
        Sleep(Duration, usize),
        Panic,
        Track(Arc<AtomicUsize>),
        KillWorker,
    }

    /// Panics again when the worker drops the caught payload, so the worker thread dies.
    struct PanicOnDrop;

    impl Drop for PanicOnDrop {
        fn drop(&mut self) {
            panic!("worker torn down");
        }
    }

    impl PoolJob for TestJob {
        type Output = usize;

        fn run(self, _cx: &WorkerContext) -> Result<usize, JobError> {
            match self {
                TestJob::Sleep(duration, value) => {
                    thread::sleep(duration);
                    Ok(value)
                }
                TestJob::Panic => panic!("job exploded"),
                TestJob::Track(started) => Ok(started.fetch_add(1, Ordering::SeqCst)),
                TestJob::KillWorker => panic::panic_any(PanicOnDrop),
            }
        }
    }

    fn drain(pool: &mut ExecutionPool<TestJob>) -> Vec<(JobId, Result<usize, JobError>)> {
        let mut completed = Vec::new();
        while let Some(event) = pool.next_event().expect("no internal error") {
            if let PoolEvent::Completed { job_id, outcome } = event {
                completed.push((job_id, outcome));
            }
        }
        completed
    }

    #[test]
    fn all_outcomes_are_reported() {
        let mut pool = ExecutionPool::new(3, Duration::from_millis(500)).unwrap();
        let ids = pool.add((0..10).map(|i| TestJob::Sleep(Duration::from_millis(5), i)));
        let completed = drain(&mut pool);

        let completed_ids: BTreeSet<_> = completed.iter().map(|(id, _)| *id).collect();
        assert_eq!(completed_ids, ids.into_iter().collect());
        let values: BTreeSet<_> = completed
            .into_iter()
            .map(|(_, outcome)| outcome.unwrap())
            .collect();
        assert_eq!(values, (0..10).collect());
        pool.close().unwrap();
    }

    #[test]
    fn jobs_can_be_added_while_draining() {
        let mut pool = ExecutionPool::new(2, Duration::from_millis(500)).unwrap();
        pool.submit(TestJob::Sleep(Duration::ZERO, 0));
        let mut seen = 0;
        while let Some(event) = pool.next_event().unwrap() {
            if let PoolEvent::Completed { outcome, .. } = event {
                let value = outcome.unwrap();
                seen += 1;
                if value < 5 {
                    pool.submit(TestJob::Sleep(Duration::ZERO, value + 1));
                }
            }
        }
        assert_eq!(seen, 6);
        pool.close().unwrap();
    }

    #[test]
    fn panicking_job_is_reported_as_error() {
        let mut pool = ExecutionPool::new(1, Duration::from_millis(500)).unwrap();
        let panicked = pool.submit(TestJob::Panic);
        let fine = pool.submit(TestJob::Sleep(Duration::ZERO, 7));

        let completed = drain(&mut pool);
        assert_eq!(completed.len(), 2, "the pool survives a panicking job");
        for (job_id, outcome) in completed {
            if job_id == panicked {
                match outcome {
                    Err(JobError::Panicked { message }) => assert_eq!(message, "job exploded"),
                    other => panic!("expected a panic error, got {other:?}"),
                }
            } else {
                assert_eq!(job_id, fine);
                assert_eq!(outcome.unwrap(), 7);
            }
        }
        pool.close().unwrap();
    }

    #[test]
    fn dead_workers_are_an_internal_error() {
        let mut pool = ExecutionPool::new(1, Duration::from_millis(500)).unwrap();
        pool.submit(TestJob::KillWorker);
        pool.submit(TestJob::Sleep(Duration::ZERO, 0));

        match pool.next_event() {
            Err(PoolError::WorkersDisconnected { outstanding }) => assert_eq!(outstanding, 2),
            other => panic!("expected a disconnected pool, got {other:?}"),
        }
        assert!(pool.next_event().unwrap().is_none(), "stream ends after the error");
        pool.close().unwrap();
    }

    #[test]
    fn heartbeat_when_nothing_finishes() {
        let mut pool = ExecutionPool::new(1, Duration::from_millis(20)).unwrap();
        pool.submit(TestJob::Sleep(Duration::from_millis(200), 0));
        let event = pool.next_event().unwrap().expect("job outstanding");
        assert!(matches!(event, PoolEvent::Heartbeat), "got {event:?}");
        drain(&mut pool);
        pool.close().unwrap();
    }

    #[test]
    fn in_flight_is_bounded() {
        let workers = 2;
        let mut pool = ExecutionPool::new(workers, Duration::from_millis(500)).unwrap();
        let started = Arc::new(AtomicUsize::new(0));
        pool.add((0..100).map(|_| TestJob::Track(Arc::clone(&started))));

        let limit = workers * BUFFER_FACTOR;
        assert!(pool.in_flight() <= limit);
        assert_eq!(pool.in_flight() + pool.pending(), 100);

        let mut received = 0;
        while let Some(event) = pool.next_event().unwrap() {
            if let PoolEvent::Completed { .. } = event {
                received += 1;
            }
            assert!(pool.in_flight() <= limit);
            let started = started.load(Ordering::SeqCst);
            assert!(
                started - received <= limit,
                "{started} started but only {received} received"
            );
        }
        assert_eq!(received, 100);
        pool.close().unwrap();
    }

    #[test]
    fn abort_ends_stream() {
        let mut pool = ExecutionPool::new(2, Duration::from_millis(500))
            .unwrap()
            .with_grace_period(Duration::from_millis(100));
        pool.add((0..50).map(|i| TestJob::Sleep(Duration::from_millis(10), i)));

        let handle = pool.handle();
        let mut completed = 0;
        while let Some(event) = pool.next_event().unwrap() {
            if let PoolEvent::Completed { .. } = event {
                completed += 1;
                if completed == 2 {
                    handle.abort();
                }
            }
        }
        assert_eq!(completed, 2, "no outcomes are returned after an abort");
        assert!(handle.is_aborted());
        assert!(pool.next_event().unwrap().is_none(), "stream stays ended");
    }
}
