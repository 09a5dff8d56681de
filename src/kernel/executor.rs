//! Task executor for a single-threaded host
//!
//! Foreground lines and background jobs are both tasks on one
//! [`LocalPool`]; the kernel decides which one the terminal is waiting on.
//! The host drives it: `run_until_stalled` polls until every task is parked
//! on a waker (timer, modal answer, mailbox).

use futures::executor::{LocalPool, LocalSpawner};
use futures::task::LocalSpawnExt;
use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Handle for spawning tasks, usable from inside running tasks
#[derive(Clone)]
pub struct Spawner {
    inner: LocalSpawner,
    next_id: Rc<Cell<u64>>,
    live: Rc<Cell<usize>>,
}

impl Spawner {
    /// Queue a future; it is first polled on the next run
    pub fn spawn<F>(&self, future: F) -> TaskId
    where
        F: Future<Output = ()> + 'static,
    {
        let id = TaskId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        let live = self.live.clone();
        live.set(live.get() + 1);
        let tracked = {
            let live = live.clone();
            async move {
                future.await;
                live.set(live.get() - 1);
                log::trace!("{} finished", id);
            }
        };
        if let Err(e) = self.inner.spawn_local(tracked) {
            live.set(live.get() - 1);
            log::warn!("cannot spawn {}: {}", id, e);
        }
        id
    }
}

impl std::fmt::Debug for Spawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spawner")
            .field("next_id", &self.next_id.get())
            .field("live", &self.live.get())
            .finish()
    }
}

pub struct Executor {
    pool: LocalPool,
    spawner: Spawner,
}

impl Executor {
    pub fn new() -> Self {
        let pool = LocalPool::new();
        let spawner = Spawner {
            inner: pool.spawner(),
            next_id: Rc::new(Cell::new(0)),
            live: Rc::new(Cell::new(0)),
        };
        Self { pool, spawner }
    }

    pub fn spawner(&self) -> Spawner {
        self.spawner.clone()
    }

    pub fn spawn<F>(&self, future: F) -> TaskId
    where
        F: Future<Output = ()> + 'static,
    {
        self.spawner.spawn(future)
    }

    /// Poll until no task can make progress without an outside wake
    pub fn run_until_stalled(&mut self) {
        self.pool.run_until_stalled();
    }

    /// Any task not yet finished, parked or not
    pub fn has_tasks(&self) -> bool {
        self.task_count() > 0
    }

    pub fn task_count(&self) -> usize {
        self.spawner.live.get()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::signal::yield_now;

    #[test]
    fn test_spawn_returns_increasing_ids() {
        let exec = Executor::new();
        let id1 = exec.spawn(async {});
        let id2 = exec.spawn(async {});
        assert!(id2 > id1);
        assert_eq!(exec.task_count(), 2);
    }

    #[test]
    fn test_all_tasks_complete() {
        let mut exec = Executor::new();
        let counter = Rc::new(Cell::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            exec.spawn(async move {
                counter.set(counter.get() + 1);
            });
        }
        exec.run_until_stalled();
        assert_eq!(counter.get(), 10);
        assert!(!exec.has_tasks());
    }

    #[test]
    fn test_yielding_task_finishes_in_one_run() {
        let mut exec = Executor::new();
        let steps = Rc::new(Cell::new(0));
        {
            let steps = steps.clone();
            exec.spawn(async move {
                steps.set(1);
                yield_now().await;
                steps.set(2);
            });
        }
        exec.run_until_stalled();
        assert_eq!(steps.get(), 2);
    }

    #[test]
    fn test_parked_task_stays_live() {
        let mut exec = Executor::new();
        exec.spawn(futures::future::pending::<()>());
        exec.run_until_stalled();
        assert!(exec.has_tasks());
        assert_eq!(exec.task_count(), 1);
    }

    #[test]
    fn test_spawn_from_running_task() {
        let mut exec = Executor::new();
        let spawner = exec.spawner();
        let inner_ran = Rc::new(Cell::new(false));
        {
            let inner_ran = inner_ran.clone();
            exec.spawn(async move {
                spawner.spawn(async move {
                    inner_ran.set(true);
                });
            });
        }
        exec.run_until_stalled();
        assert!(inner_ran.get());
        assert!(!exec.has_tasks());
    }
}
