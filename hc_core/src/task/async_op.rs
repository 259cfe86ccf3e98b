use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::error::HcError;

use super::{Port, TaskQueue};

type CompletionCallback<R> = Box<dyn FnOnce(&AsyncOp<R>) + Send>;

struct Shared<R> {
    queue: TaskQueue,
    // Internal suboperations route their completion callback to the Work
    // port, mirroring a composite whose both ports are the parent's Work
    // port. Client-facing ops deliver on the Completion port.
    work_only: bool,
    result: Mutex<Option<Result<R, HcError>>>,
    callback: Mutex<Option<CompletionCallback<R>>>,
    claimed: AtomicBool,
    completed: AtomicBool,
    done: Notify,
    cancel_hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// One outstanding asynchronous operation with exactly-once completion.
///
/// `complete` transitions the op on the queue's Work port; the completion
/// callback is then dispatched on the Completion port, from which the
/// client reads the operation result (`result()`). Later completions are
/// ignored, so every op observes exactly one terminal transition.
pub struct AsyncOp<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for AsyncOp<R> {
    fn clone(&self) -> Self {
        AsyncOp {
            shared: self.shared.clone(),
        }
    }
}

impl<R: Clone + Send + 'static> AsyncOp<R> {
    pub fn new(queue: &TaskQueue) -> Self {
        Self::build(queue, None, false)
    }

    pub fn with_callback(
        queue: &TaskQueue,
        callback: impl FnOnce(&AsyncOp<R>) + Send + 'static,
    ) -> Self {
        Self::build(queue, Some(Box::new(callback)), false)
    }

    /// Suboperation whose completion callback runs on the Work port.
    pub(crate) fn new_internal(
        queue: &TaskQueue,
        callback: impl FnOnce(&AsyncOp<R>) + Send + 'static,
    ) -> Self {
        Self::build(queue, Some(Box::new(callback)), true)
    }

    fn build(queue: &TaskQueue, callback: Option<CompletionCallback<R>>, work_only: bool) -> Self {
        AsyncOp {
            shared: Arc::new(Shared {
                queue: queue.clone(),
                work_only,
                result: Mutex::new(None),
                callback: Mutex::new(callback),
                claimed: AtomicBool::new(false),
                completed: AtomicBool::new(false),
                done: Notify::new(),
                cancel_hook: Mutex::new(None),
            }),
        }
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.shared.queue
    }

    /// Completes the operation. The first call wins; any further calls are
    /// ignored. Completion is always delivered, even on a terminated
    /// queue, so clients reliably observe their terminal transition.
    pub fn complete(&self, result: Result<R, HcError>) {
        if self.shared.claimed.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        self.shared.queue.submit(Port::Work, move |_| {
            *this.shared.result.lock().unwrap() = Some(result);
            this.shared.completed.store(true, Ordering::SeqCst);
            this.shared.done.notify_waiters();

            let callback = this.shared.callback.lock().unwrap().take();
            if let Some(callback) = callback {
                let port = if this.shared.work_only {
                    Port::Work
                } else {
                    Port::Completion
                };
                let op = this.clone();
                this.shared.queue.submit(port, move |_| callback(&op));
            }
        });
    }

    /// Installs the hook `cancel` invokes; the engine points this at its
    /// per-call work queue's terminate.
    pub fn set_cancel_hook(&self, hook: impl FnOnce() + Send + 'static) {
        *self.shared.cancel_hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn cancel(&self) {
        let hook = self.shared.cancel_hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    pub fn is_completed(&self) -> bool {
        self.shared.completed.load(Ordering::SeqCst)
    }

    /// The operation result, available once completed. Callable from
    /// within the completion callback.
    pub fn result(&self) -> Option<Result<R, HcError>> {
        self.shared.result.lock().unwrap().clone()
    }

    /// Waits for completion. The host must be pumping the queue elsewhere;
    /// waiting does not dispatch jobs.
    pub async fn wait(&self) -> Result<R, HcError> {
        loop {
            let notified = self.shared.done.notified();
            if self.is_completed() {
                return self.result().expect("completed op has a result");
            }
            notified.await;
        }
    }
}
