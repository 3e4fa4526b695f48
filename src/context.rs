//! Execution contexts for notification delivery and serialized model updates.
//!
//! All model mutation happens on one logical update context. Data sources
//! may notify from any thread; the jobs they post only ever run on the
//! thread that pumps the [`UpdateContext`].

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A unit of work posted to a context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

struct DelayedJob {
    due: Instant,
    seq: u64,
    job: Job,
}

struct ContextInner {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    delayed: Mutex<Vec<DelayedJob>>,
    next_seq: AtomicU64,
}

/// The single serialized update queue.
#[derive(Clone)]
pub struct UpdateContext {
    inner: Arc<ContextInner>,
}

impl UpdateContext {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            inner: Arc::new(ContextInner {
                sender,
                receiver,
                delayed: Mutex::new(Vec::new()),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Post a job. Callable from any thread.
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // The receiver lives as long as `inner`, so this cannot disconnect.
        let _ = self.inner.sender.send(Box::new(job));
    }

    /// Post a job that becomes runnable once `delay` has elapsed.
    pub fn dispatch_after<F>(&self, delay: Duration, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if delay.is_zero() {
            self.dispatch(job);
            return;
        }

        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        self.inner.delayed.lock().push(DelayedJob {
            due: Instant::now() + delay,
            seq,
            job: Box::new(job),
        });
    }

    /// Move delayed jobs whose deadline passed onto the run queue, in
    /// deadline order.
    fn promote_due(&self) {
        let now = Instant::now();
        let mut due = {
            let mut delayed = self.inner.delayed.lock();
            if delayed.is_empty() {
                return;
            }
            let (ready, waiting): (Vec<_>, Vec<_>) =
                delayed.drain(..).partition(|job| job.due <= now);
            *delayed = waiting;
            ready
        };

        due.sort_by_key(|job| (job.due, job.seq));
        for job in due {
            let _ = self.inner.sender.send(job.job);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.inner.delayed.lock().iter().map(|job| job.due).min()
    }

    /// Run every runnable job, including jobs posted while draining.
    /// Returns the number of jobs executed.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            self.promote_due();
            match self.inner.receiver.try_recv() {
                Ok(job) => {
                    job();
                    ran += 1;
                }
                Err(_) => break,
            }
        }
        ran
    }

    /// Like [`run_pending`](Self::run_pending) but also waits for delayed
    /// jobs that fall due within `timeout`.
    pub fn run_until_idle(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut ran = 0;

        loop {
            ran += self.run_pending();

            let Some(due) = self.next_deadline() else {
                break;
            };
            if due > deadline {
                break;
            }

            let now = Instant::now();
            if due > now {
                // Wake early if someone posts a job meanwhile
                if let Ok(job) = self.inner.receiver.recv_timeout(due - now) {
                    job();
                    ran += 1;
                }
            }
        }

        ran
    }

    /// Number of queued jobs (runnable and delayed).
    pub fn pending_jobs(&self) -> usize {
        self.inner.receiver.len() + self.inner.delayed.lock().len()
    }
}

impl Default for UpdateContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UpdateContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateContext")
            .field("pending_jobs", &self.pending_jobs())
            .finish()
    }
}

/// Where a subscription handler is delivered.
#[derive(Clone, Debug)]
pub enum ExecutionContext {
    /// Run synchronously on the notifying thread.
    Immediate,
    /// Marshal onto an update context.
    Update(UpdateContext),
}

impl ExecutionContext {
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            ExecutionContext::Immediate => job(),
            ExecutionContext::Update(context) => context.dispatch(job),
        }
    }
}

impl From<UpdateContext> for ExecutionContext {
    fn from(context: UpdateContext) -> Self {
        ExecutionContext::Update(context)
    }
}

/// Debounce primitive: a pending flag plus a flush delay.
///
/// Only the first request after a flush is told to schedule one; later
/// requests fold into it. The flush is animated only if every folded
/// request asked for animation.
#[derive(Debug)]
pub struct Coalescer {
    pending: Mutex<Option<bool>>,
    delay: Duration,
}

impl Coalescer {
    pub fn new(delay: Duration) -> Self {
        Self {
            pending: Mutex::new(None),
            delay,
        }
    }

    /// Register a request. Returns true if the caller must schedule the flush.
    pub fn request(&self, animated: bool) -> bool {
        let mut pending = self.pending.lock();
        match pending.as_mut() {
            None => {
                *pending = Some(animated);
                true
            }
            Some(current) => {
                *current = *current && animated;
                false
            }
        }
    }

    /// Clear the pending flag, returning the folded animation choice.
    pub fn take(&self) -> Option<bool> {
        self.pending.lock().take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

type QueuedJob = Box<dyn FnOnce(Done) + Send + 'static>;

struct QueueState {
    busy: bool,
    jobs: VecDeque<QueuedJob>,
}

struct QueueInner {
    context: UpdateContext,
    state: Mutex<QueueState>,
}

/// Completion token handed to a [`SequentialQueue`] job.
///
/// The next job starts once this is finished or dropped.
pub struct Done {
    inner: Option<Arc<QueueInner>>,
}

impl Done {
    pub fn finish(mut self) {
        if let Some(inner) = self.inner.take() {
            SequentialQueue::advance(inner);
        }
    }
}

impl Drop for Done {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            SequentialQueue::advance(inner);
        }
    }
}

impl fmt::Debug for Done {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Done")
            .field("pending", &self.inner.is_some())
            .finish()
    }
}

/// Queue running at most one job at a time on an update context.
#[derive(Clone)]
pub struct SequentialQueue {
    inner: Arc<QueueInner>,
}

impl SequentialQueue {
    pub fn new(context: UpdateContext) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                context,
                state: Mutex::new(QueueState {
                    busy: false,
                    jobs: VecDeque::new(),
                }),
            }),
        }
    }

    /// Enqueue a job. It is dispatched on the update context once every
    /// previously enqueued job has finished its [`Done`].
    pub fn push<F>(&self, job: F)
    where
        F: FnOnce(Done) + Send + 'static,
    {
        {
            let mut state = self.inner.state.lock();
            if state.busy {
                state.jobs.push_back(Box::new(job));
                return;
            }
            state.busy = true;
        }

        Self::start(Arc::clone(&self.inner), Box::new(job));
    }

    fn start(inner: Arc<QueueInner>, job: QueuedJob) {
        let context = inner.context.clone();
        context.dispatch(move || {
            job(Done { inner: Some(inner) });
        });
    }

    fn advance(inner: Arc<QueueInner>) {
        let next = {
            let mut state = inner.state.lock();
            let next = state.jobs.pop_front();
            if next.is_none() {
                state.busy = false;
            }
            next
        };

        if let Some(job) = next {
            Self::start(inner, job);
        }
    }

    /// Whether a job is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.inner.state.lock().busy
    }

    /// Jobs waiting behind the in-flight one.
    pub fn queued(&self) -> usize {
        self.inner.state.lock().jobs.len()
    }
}

impl fmt::Debug for SequentialQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequentialQueue")
            .field("busy", &self.is_busy())
            .field("queued", &self.queued())
            .finish()
    }
}
