use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

mod async_op;

pub use async_op::AsyncOp;

/// The two dispatch ports of a queue. Work runs background stages; the
/// Completion port is where client completion callbacks are delivered, so
/// the host can pump results on a thread of its choosing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    Work,
    Completion,
}

/// A scheduled unit of work. The bool argument reports cancellation: jobs
/// still run when their queue is terminated, but with `canceled = true`.
pub type Job = Box<dyn FnOnce(bool) + Send>;

struct Scheduled {
    due: Instant,
    seq: u64,
    composite: Option<Weak<CompositeState>>,
    job: Job,
}

#[derive(Default)]
struct PortQueue {
    jobs: Mutex<Vec<Scheduled>>,
}

struct QueueInner {
    work: PortQueue,
    completion: PortQueue,
    next_seq: AtomicU64,
    terminated: AtomicBool,
    notify: Notify,
}

/// Host-pumped task queue with Work and Completion ports and delayed
/// submission. The core never sleeps a thread: delays are deadlines the
/// pump honors with `tokio::time::sleep_until`.
///
/// A lock-protected job store is deliberate; the scale here does not call
/// for a lock-free queue.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        TaskQueue {
            inner: Arc::new(QueueInner {
                work: PortQueue::default(),
                completion: PortQueue::default(),
                next_seq: AtomicU64::new(0),
                terminated: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn submit(&self, port: Port, job: impl FnOnce(bool) + Send + 'static) {
        self.submit_delayed(port, Duration::ZERO, job);
    }

    pub fn submit_delayed(
        &self,
        port: Port,
        delay: Duration,
        job: impl FnOnce(bool) + Send + 'static,
    ) {
        self.submit_scheduled(port, delay, None, Box::new(job));
    }

    fn submit_scheduled(
        &self,
        port: Port,
        delay: Duration,
        composite: Option<Weak<CompositeState>>,
        job: Job,
    ) {
        let scheduled = Scheduled {
            due: Instant::now() + delay,
            seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
            composite,
            job,
        };
        self.port(port).jobs.lock().unwrap().push(scheduled);
        self.inner.notify.notify_waiters();
    }

    fn port(&self, port: Port) -> &PortQueue {
        match port {
            Port::Work => &self.inner.work,
            Port::Completion => &self.inner.completion,
        }
    }

    fn is_scheduled_canceled(&self, scheduled: &Scheduled) -> bool {
        if self.inner.terminated.load(Ordering::SeqCst) {
            return true;
        }
        match &scheduled.composite {
            Some(weak) => match weak.upgrade() {
                Some(state) => state.terminated.load(Ordering::SeqCst),
                None => true,
            },
            None => false,
        }
    }

    /// Runs the next ready job on `port`, if any. A job is ready when its
    /// deadline has passed or its owning (sub)queue was terminated; ready
    /// jobs run in submission order.
    pub fn dispatch_due(&self, port: Port) -> bool {
        let now = Instant::now();
        let (job, canceled) = {
            let mut jobs = self.port(port).jobs.lock().unwrap();
            let mut best: Option<usize> = None;
            for (index, scheduled) in jobs.iter().enumerate() {
                if scheduled.due > now && !self.is_scheduled_canceled(scheduled) {
                    continue;
                }
                best = match best {
                    Some(current) if jobs[current].seq <= scheduled.seq => Some(current),
                    _ => Some(index),
                };
            }
            let Some(index) = best else {
                return false;
            };
            let scheduled = jobs.remove(index);
            let canceled = self.is_scheduled_canceled(&scheduled);
            (scheduled.job, canceled)
        };
        job(canceled);
        true
    }

    /// Earliest deadline across both ports, with terminated jobs counting
    /// as due immediately.
    pub fn earliest_due(&self) -> Option<Instant> {
        let now = Instant::now();
        let mut earliest: Option<Instant> = None;
        for port in [Port::Work, Port::Completion] {
            let jobs = self.port(port).jobs.lock().unwrap();
            for scheduled in jobs.iter() {
                let due = if self.is_scheduled_canceled(scheduled) {
                    now
                } else {
                    scheduled.due
                };
                earliest = Some(match earliest {
                    Some(current) if current <= due => current,
                    _ => due,
                });
            }
        }
        earliest
    }

    /// Creates a terminatable subqueue whose submissions land on this
    /// queue's Work port. Terminating it flips pending jobs to canceled
    /// without affecting the parent queue.
    pub fn create_composite(&self) -> CompositeQueue {
        CompositeQueue {
            queue: self.clone(),
            state: Arc::new(CompositeState {
                terminated: AtomicBool::new(false),
            }),
        }
    }

    /// Terminates the whole queue: pending jobs run once more with
    /// `canceled = true` and the pump exits after draining them.
    pub fn terminate(&self) {
        self.inner.terminated.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    /// Drives both ports until the queue is terminated. The host owns the
    /// runtime this runs on; many pumps may run concurrently.
    pub async fn pump(&self) {
        loop {
            let notified = self.inner.notify.notified();
            while self.dispatch_due(Port::Work) | self.dispatch_due(Port::Completion) {}
            if self.is_terminated() {
                break;
            }
            match self.earliest_due() {
                Some(due) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(due.into()) => {}
                    }
                }
                None => notified.await,
            }
        }
    }
}

struct CompositeState {
    terminated: AtomicBool,
}

/// Terminatable view over a parent queue's Work port. The engine gives each
/// logical call its own composite so canceling that call reliably aborts
/// its pending stages without disturbing unrelated work.
#[derive(Clone)]
pub struct CompositeQueue {
    queue: TaskQueue,
    state: Arc<CompositeState>,
}

impl CompositeQueue {
    pub fn submit(&self, job: impl FnOnce(bool) + Send + 'static) {
        self.submit_delayed(Duration::ZERO, job);
    }

    pub fn submit_delayed(&self, delay: Duration, job: impl FnOnce(bool) + Send + 'static) {
        self.queue
            .submit_scheduled(Port::Work, delay, Some(Arc::downgrade(&self.state)), Box::new(job));
    }

    pub fn terminate(&self) {
        self.state.terminated.store(true, Ordering::SeqCst);
        self.queue.inner.notify.notify_waiters();
    }

    pub fn is_terminated(&self) -> bool {
        self.state.terminated.load(Ordering::SeqCst)
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }
}
