//! Keyed, coalescing task queue with a single worker.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error};

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct QueueState {
    /// Dispatch order of pending keys; each key appears at most once.
    order: VecDeque<String>,
    /// Pending task per key. Re-dispatching a key replaces the task.
    tasks: HashMap<String, Task>,
    /// A task is currently executing on the worker.
    running: bool,
    stopping: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    cond: Condvar,
}

/// Serialises all state mutation onto one worker thread.
///
/// Dispatching a key that is already queued but not yet started replaces
/// the pending task (last-writer-wins coalescing), so a burst of updates
/// for the same object collapses into one run. A panic inside a task is
/// logged and swallowed; the worker keeps going.
pub struct TaskQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskQueue {
    /// Creates the queue and spawns its worker thread.
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            cond: Condvar::new(),
        });
        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("policy-tasks".to_string())
            .spawn(move || Self::run(worker_shared))
            .ok();
        if worker.is_none() {
            error!("failed to spawn task queue worker");
        }
        TaskQueue {
            shared,
            worker: Mutex::new(worker),
        }
    }

    /// Enqueues `task` under `key`, replacing any pending task with the
    /// same key. Dispatches after [`TaskQueue::stop`] are dropped.
    pub fn dispatch(&self, key: impl Into<String>, task: impl FnOnce() + Send + 'static) {
        let key = key.into();
        let mut state = self.shared.state.lock().unwrap();
        if state.stopping {
            debug!(key, "dropping dispatch to stopped task queue");
            return;
        }
        if state.tasks.insert(key.clone(), Box::new(task)).is_none() {
            state.order.push_back(key);
        }
        self.shared.cond.notify_all();
    }

    /// Blocks until no task is queued or executing.
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while state.running || !state.order.is_empty() {
            state = self.shared.cond.wait(state).unwrap();
        }
    }

    /// Drains remaining tasks and joins the worker. In-flight and queued
    /// tasks complete; only the worker stops.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.stopping {
                return;
            }
            state.stopping = true;
            self.shared.cond.notify_all();
        }
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn run(shared: Arc<Shared>) {
        loop {
            let task = {
                let mut state = shared.state.lock().unwrap();
                loop {
                    if let Some(key) = state.order.pop_front() {
                        let task = state.tasks.remove(&key);
                        state.running = true;
                        break task;
                    }
                    if state.stopping {
                        return;
                    }
                    state = shared.cond.wait(state).unwrap();
                }
            };

            if let Some(task) = task {
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    error!("task panicked; continuing");
                }
            }

            let mut state = shared.state.lock().unwrap();
            state.running = false;
            shared.cond.notify_all();
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        TaskQueue::new()
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.stop();
    }
}
