//! # Work scheduler
//!
//! A fixed pool of worker threads draining one shared priority queue. Each worker
//! pops the highest-priority item (FIFO among equal priorities) and hands it to the
//! [`Dispatch`] implementation, which routes it by matching on the item's variant.
//! Handlers run to completion and never block; a handler that cannot make progress
//! returns and relies on a later callback to resubmit its work.
//!
//! The first handler error (or panic) is captured, dispatching stops, queued work is
//! dropped and [`WorkScheduler::join`] reports the error. Nothing is retried.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, ResourceError, Result};

/// Work items carry a priority; higher values run first
pub trait Prioritized {
    fn priority(&self) -> u8;
}

/// Routes work items to their handlers
pub trait Dispatch<W>: Send + Sync + 'static {
    /// Runs the handler for `item` to completion
    fn dispatch(&self, item: W, queue: &WorkQueue<W>) -> Result<()>;

    /// Called once, on the worker that captured the first fatal error
    #[allow(unused_variables)]
    fn on_failure(&self, error: &Error) {}
}

struct Queued<W> {
    priority: u8,
    order: u64,
    item: W,
}
impl<W> PartialEq for Queued<W> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.order == other.order
    }
}
impl<W> Eq for Queued<W> {}
impl<W> PartialOrd for Queued<W> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<W> Ord for Queued<W> {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: higher priority first, then earlier submission first
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.order.cmp(&self.order))
    }
}

struct QueueState<W> {
    heap: BinaryHeap<Queued<W>>,
    next_order: u64,
    stopped: bool,
}

/// The shared ready queue; handlers use it to submit follow-on work
pub struct WorkQueue<W> {
    state: Mutex<QueueState<W>>,
    ready: Condvar,
    failed: AtomicBool,
    error: Mutex<Option<Error>>,
}
impl<W: Prioritized> Default for WorkQueue<W> {
    fn default() -> Self {
        Self::new()
    }
}
impl<W: Prioritized> WorkQueue<W> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_order: 0,
                stopped: false,
            }),
            ready: Condvar::new(),
            failed: AtomicBool::new(false),
            error: Mutex::new(None),
        }
    }

    /// Enqueues an item; fails once the scheduler has stopped
    pub fn submit(&self, item: W) -> Result<()> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(ResourceError::SchedulerStopped.into());
        }
        let order = state.next_order;
        state.next_order += 1;
        state.heap.push(Queued {
            priority: item.priority(),
            order,
            item,
        });
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    /// Blocks until an item is ready or the queue stops
    fn pop(&self) -> Option<W> {
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return None;
            }
            if let Some(queued) = state.heap.pop() {
                return Some(queued.item);
            }
            self.ready.wait(&mut state);
        }
    }

    /// Records a fatal error; returns true if it is the first one
    fn fail(&self, error: Error) -> bool {
        let mut slot = self.error.lock();
        if slot.is_some() {
            debug!("Ignoring error after failure: {error}");
            return false;
        }
        warn!("Pipeline failure: {error}");
        *slot = Some(error);
        self.failed.store(true, AtomicOrdering::Release);
        true
    }

    /// Captures `error` as the pipeline failure (first one wins) and stops dispatching
    pub fn abort(&self, error: Error) {
        self.fail(error);
        self.stop();
    }

    /// Returns true once a handler has failed
    pub fn is_failed(&self) -> bool {
        self.failed.load(AtomicOrdering::Acquire)
    }

    /// Number of items waiting to be dispatched
    pub fn queued(&self) -> usize {
        self.state.lock().heap.len()
    }
}

impl<W> WorkQueue<W> {
    fn stop(&self) -> Vec<W> {
        let mut state = self.state.lock();
        state.stopped = true;
        let dropped = state.heap.drain().map(|queued| queued.item).collect();
        drop(state);
        self.ready.notify_all();
        dropped
    }
}

/// A fixed-size worker-thread pool
///
/// Dropping the scheduler stops the queue and joins the workers, so no thread
/// outlives it.
pub struct WorkScheduler<W, D> {
    queue: Arc<WorkQueue<W>>,
    dispatcher: Arc<D>,
    handles: Vec<JoinHandle<()>>,
}
impl<W, D> WorkScheduler<W, D>
where
    W: Prioritized + Send + 'static,
    D: Dispatch<W>,
{
    pub fn new(dispatcher: Arc<D>) -> Self {
        Self::with_queue(Arc::new(WorkQueue::new()), dispatcher)
    }

    /// Creates a scheduler draining a queue that was handed out before the dispatcher existed
    pub fn with_queue(queue: Arc<WorkQueue<W>>, dispatcher: Arc<D>) -> Self {
        Self {
            queue,
            dispatcher,
            handles: Vec::new(),
        }
    }

    /// The queue handlers submit into
    #[must_use]
    pub fn queue(&self) -> Arc<WorkQueue<W>> {
        Arc::clone(&self.queue)
    }

    /// Spawns `num_workers` worker threads
    pub fn start(&mut self, num_workers: usize) -> Result<()> {
        for tid in 0..num_workers.max(1) {
            let queue = Arc::clone(&self.queue);
            let dispatcher = Arc::clone(&self.dispatcher);
            let handle = thread::Builder::new()
                .name(format!("bqpipe-worker-{tid}"))
                .spawn(move || worker_loop(&queue, dispatcher.as_ref()))?;
            self.handles.push(handle);
        }
        debug!("Started {} worker threads", self.handles.len());
        Ok(())
    }

    /// Enqueues an item from outside a handler
    pub fn submit(&self, item: W) -> Result<()> {
        self.queue.submit(item)
    }

    /// Stops dispatching; queued items are dropped
    pub fn shutdown(&self) {
        let dropped = self.queue.stop();
        if !dropped.is_empty() {
            debug!("Dropped {} queued work items on shutdown", dropped.len());
        }
    }

    /// Waits for all workers to exit and reports the first captured error
    pub fn join(mut self) -> Result<()> {
        self.shutdown();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                self.queue.fail(
                    ResourceError::HandlerPanicked("worker thread exited abnormally".into()).into(),
                );
            }
        }
        match self.queue.error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl<W, D> Drop for WorkScheduler<W, D> {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        let dropped = self.queue.stop();
        debug!(
            "Scheduler dropped: stopping {} workers ({} queued items discarded)",
            self.handles.len(),
            dropped.len()
        );
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop<W: Prioritized, D: Dispatch<W>>(queue: &WorkQueue<W>, dispatcher: &D) {
    while let Some(item) = queue.pop() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| dispatcher.dispatch(item, queue)));
        let error = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(error)) => error,
            Err(payload) => ResourceError::HandlerPanicked(panic_message(payload.as_ref())).into(),
        };
        dispatcher.on_failure(&error);
        queue.abort(error);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
