/*
 * Painting Executor
 *
 * Worker pool draining the task worklist. The queue is a mutex-guarded
 * deque with per-task atomic membership flags; workers poll for
 * termination: the run is over when the queue is empty and no worker holds
 * a task. The in-flight counter is incremented under the queue lock, so an
 * empty queue plus a zero counter is a consistent idle observation.
 *
 * Cancellation is cooperative: the flag is checked between tasks and a
 * cancelled run drains the queue without executing.
 */

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::features::session::domain::PaintingTask;

/// MPMC FIFO of tasks with claim-once membership.
struct TaskQueue {
    queue: Mutex<VecDeque<Arc<PaintingTask>>>,
    in_flight: AtomicUsize,
}

impl TaskQueue {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Enqueue unless the task is already waiting. A task that is currently
    /// running re-enqueues fine: its membership flag was cleared at pop.
    fn push(&self, task: Arc<PaintingTask>) -> bool {
        if !task.try_mark_queued() {
            return false;
        }
        self.queue.lock().push_back(task);
        true
    }

    fn pop(&self) -> Option<Arc<PaintingTask>> {
        let mut queue = self.queue.lock();
        let task = queue.pop_front()?;
        // counted before the lock drops so idle() never sees a popped task
        // as neither queued nor in flight
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        drop(queue);
        task.clear_queued();
        Some(task)
    }

    fn task_done(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn is_idle(&self) -> bool {
        let queue = self.queue.lock();
        queue.is_empty() && self.in_flight.load(Ordering::SeqCst) == 0
    }
}

/// Parallel worklist executor for painting tasks.
pub struct PaintingExecutor {
    queue: TaskQueue,
    cancelled: AtomicBool,
    workers: usize,
}

impl PaintingExecutor {
    /// `workers == 0` picks the rayon pool width.
    pub fn new(workers: usize) -> Self {
        let workers = if workers == 0 {
            rayon::current_num_threads().max(1)
        } else {
            workers
        };
        Self {
            queue: TaskQueue::new(),
            cancelled: AtomicBool::new(false),
            workers,
        }
    }

    /// Enqueue a task; false if it was already queued.
    pub fn queue_task(&self, task: Arc<PaintingTask>) -> bool {
        self.queue.push(task)
    }

    /// Request cooperative cancellation. Tasks in progress finish.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Run workers until the worklist drains (or cancellation empties it).
    /// Blocks the calling thread.
    pub fn run(&self, execute: &(dyn Fn(&Arc<PaintingTask>) + Sync)) {
        (0..self.workers).into_par_iter().for_each(|_worker| {
            loop {
                if self.is_cancelled() {
                    while let Some(_task) = self.queue.pop() {
                        self.queue.task_done();
                    }
                    break;
                }
                match self.queue.pop() {
                    Some(task) => {
                        execute(&task);
                        self.queue.task_done();
                    }
                    None => {
                        if self.queue.is_idle() {
                            break;
                        }
                        // someone is still executing and may requeue work
                        std::thread::sleep(Duration::from_micros(20));
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::session::domain::{ColoringSummary, TaskId, TaskKey};
    use crate::shared::models::MethodRef;
    use std::sync::atomic::AtomicU32;

    fn task(id: u32) -> Arc<PaintingTask> {
        Arc::new(PaintingTask::new(
            TaskId(id),
            TaskKey {
                method: MethodRef::new("demo.Simple", "f", "()V"),
                ins: ColoringSummary::empty(),
                outs: ColoringSummary::empty(),
            },
            Vec::new(),
            Vec::new(),
        ))
    }

    #[test]
    fn test_duplicate_queueing_is_claimed_once() {
        let executor = PaintingExecutor::new(2);
        let t = task(1);
        assert!(executor.queue_task(t.clone()));
        assert!(!executor.queue_task(t));
    }

    #[test]
    fn test_run_drains_all_tasks() {
        let executor = PaintingExecutor::new(4);
        for i in 0..32 {
            executor.queue_task(task(i));
        }
        let executed = AtomicU32::new(0);
        executor.run(&|_task| {
            executed.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(executed.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn test_tasks_queued_during_execution_still_run() {
        let executor = PaintingExecutor::new(2);
        let follow_up = task(100);
        executor.queue_task(task(1));
        let executed = AtomicU32::new(0);
        executor.run(&|t| {
            executed.fetch_add(1, Ordering::SeqCst);
            if t.id == TaskId(1) {
                executor.queue_task(follow_up.clone());
            }
        });
        assert_eq!(executed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cancel_drains_without_executing() {
        let executor = PaintingExecutor::new(2);
        executor.cancel();
        for i in 0..8 {
            executor.queue_task(task(i));
        }
        let executed = AtomicU32::new(0);
        executor.run(&|_task| {
            executed.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }
}
