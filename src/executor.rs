//! Microtask queue for rendering passes
//!
//! The scheduler never renders synchronously. Writes and sessions only mark
//! work as pending and post a single rendering task here; the host decides
//! when that task runs:
//!
//! - **Event loop integration**: call [`TaskQueue::run_until_idle`] once per
//!   turn, after the handlers that may have written state.
//! - **Tests / sync applications**: call it right after the writes.
//!
//! Several engines may share one queue (a parent and its children, say), in
//! which case their rendering passes run in the order they were scheduled.
//!
//! ## Usage
//!
//! ```ignore
//! let tasks = TaskQueue::new();
//! let engine = StateEngine::builder(json!({"count": 0}))
//!     .tasks(tasks.clone())
//!     .build()?;
//!
//! engine.enqueue(count_ref, json!(1));
//! engine.enqueue(count_ref, json!(2));
//! tasks.run_until_idle(); // one rendering pass for both writes
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

type Task = Box<dyn FnOnce()>;

/// Single-threaded FIFO of deferred tasks.
///
/// Cloning is cheap; clones share the same queue.
#[derive(Clone, Default)]
pub struct TaskQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl TaskQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` to run after everything already queued.
    pub fn post(&self, task: impl FnOnce() + 'static) {
        self.tasks.borrow_mut().push_back(Box::new(task));
    }

    /// Run the oldest task. Returns `false` if the queue was empty.
    pub fn run_one(&self) -> bool {
        // The borrow must end before the task runs: tasks post more tasks.
        let Some(task) = self.tasks.borrow_mut().pop_front() else {
            return false;
        };
        task();
        true
    }

    /// Run tasks until the queue is empty, including tasks posted by the
    /// tasks being run.
    ///
    /// Returns the number of tasks processed.
    pub fn run_until_idle(&self) -> usize {
        let mut processed = 0;
        while self.run_one() {
            processed += 1;
        }
        if processed > 0 {
            tracing::trace!(processed, "task queue idle");
        }
        processed
    }

    /// Whether no task is waiting.
    pub fn is_idle(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Number of waiting tasks.
    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Same as [`is_idle`](Self::is_idle).
    pub fn is_empty(&self) -> bool {
        self.is_idle()
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("pending", &self.len())
            .finish()
    }
}
