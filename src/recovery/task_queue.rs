//! Cooperative task driver
//!
//! A scheduled task is moved out of the idle set into its own future and
//! performed there. Steps of different tasks interleave freely: a task stuck
//! at an await point holds back no other task. Each task is only ever touched
//! through the `&mut` its step owns, so task state needs no locking.
//!
//! A task clears its own schedule flag when performed and sets it again if it
//! has more work. When its step returns, the task goes back to the idle set,
//! where it can be inspected and relaunched.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;

use futures_util::stream::{FuturesUnordered, StreamExt};

/// Future returned by `Task::perform_task`
pub type TaskFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Work the driver can step
pub trait Task: Send {
    fn is_scheduled(&self) -> bool;

    /// Advance the task by one step.
    fn perform_task(&mut self) -> TaskFuture<'_>;
}

type Running<K, T> = Pin<Box<dyn Future<Output = (K, T)> + Send>>;

/// Tasks keyed by id, each step running as its own future
pub struct TaskQueue<K, T> {
    idle: BTreeMap<K, T>,
    running: FuturesUnordered<Running<K, T>>,
    running_keys: BTreeSet<K>,
}

impl<K, T> TaskQueue<K, T>
where
    K: Ord + Copy + Send + 'static,
    T: Task + 'static,
{
    pub fn new() -> Self {
        Self {
            idle: BTreeMap::new(),
            running: FuturesUnordered::new(),
            running_keys: BTreeSet::new(),
        }
    }

    /// Add a task, replacing any idle task with the same key.
    pub fn insert(&mut self, key: K, task: T) -> Option<T> {
        self.idle.insert(key, task)
    }

    /// An idle task. A task whose step is in flight is not reachable.
    pub fn get(&self, key: &K) -> Option<&T> {
        self.idle.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut T> {
        self.idle.get_mut(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<T> {
        self.idle.remove(key)
    }

    /// Idle and running tasks together.
    pub fn len(&self) -> usize {
        self.idle.len() + self.running_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &K) -> bool {
        self.idle.contains_key(key) || self.running_keys.contains(key)
    }

    pub fn is_running(&self, key: &K) -> bool {
        self.running_keys.contains(key)
    }

    /// True if any idle task is waiting to be performed.
    pub fn has_ready(&self) -> bool {
        self.idle.values().any(Task::is_scheduled)
    }

    pub fn has_running(&self) -> bool {
        !self.running_keys.is_empty()
    }

    /// Start a step for every scheduled idle task; returns how many started.
    pub fn launch_ready(&mut self) -> usize {
        let ready: Vec<K> = self
            .idle
            .iter()
            .filter(|(_, task)| task.is_scheduled())
            .map(|(key, _)| *key)
            .collect();

        for key in &ready {
            let Some(mut task) = self.idle.remove(key) else {
                continue;
            };
            let key = *key;
            self.running_keys.insert(key);
            let step: Running<K, T> = Box::pin(async move {
                task.perform_task().await;
                (key, task)
            });
            self.running.push(step);
        }
        ready.len()
    }

    /// Wait for the next step to return and put its task back.
    ///
    /// Returns `None` at once if nothing is running.
    pub async fn next_finished(&mut self) -> Option<K> {
        let (key, task) = self.running.next().await?;
        self.running_keys.remove(&key);
        self.idle.insert(key, task);
        Some(key)
    }

    /// Launch every ready task and wait until no step is in flight.
    ///
    /// Returns how many tasks were launched.
    pub async fn perform_round(&mut self) -> usize {
        let launched = self.launch_ready();
        while self.next_finished().await.is_some() {}
        launched
    }

    /// Run rounds until no task is scheduled or running; returns the number
    /// of rounds.
    pub async fn run_until_idle(&mut self) -> usize {
        let mut rounds = 0;
        while self.has_ready() || self.has_running() {
            self.perform_round().await;
            rounds += 1;
        }
        rounds
    }
}

impl<K, T> Default for TaskQueue<K, T>
where
    K: Ord + Copy + Send + 'static,
    T: Task + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    /// Counts down to zero, one step per round.
    struct Countdown {
        remaining: u32,
        steps: u32,
        scheduled: bool,
    }

    impl Countdown {
        fn new(remaining: u32) -> Self {
            Self {
                remaining,
                steps: 0,
                scheduled: true,
            }
        }
    }

    impl Task for Countdown {
        fn is_scheduled(&self) -> bool {
            self.scheduled
        }

        fn perform_task(&mut self) -> TaskFuture<'_> {
            Box::pin(async move {
                self.scheduled = false;
                tokio::task::yield_now().await;
                self.steps += 1;
                if self.remaining > 0 {
                    self.remaining -= 1;
                    self.scheduled = self.remaining > 0;
                }
            })
        }
    }

    /// Finishes its step only once released, if it holds a release.
    struct Gate {
        release: Option<oneshot::Receiver<()>>,
        steps: u32,
        scheduled: bool,
    }

    impl Gate {
        fn new(release: Option<oneshot::Receiver<()>>) -> Self {
            Self {
                release,
                steps: 0,
                scheduled: true,
            }
        }
    }

    impl Task for Gate {
        fn is_scheduled(&self) -> bool {
            self.scheduled
        }

        fn perform_task(&mut self) -> TaskFuture<'_> {
            Box::pin(async move {
                self.scheduled = false;
                if let Some(release) = self.release.take() {
                    let _ = release.await;
                }
                self.steps += 1;
            })
        }
    }

    #[tokio::test]
    async fn test_round_runs_only_ready_tasks() {
        let mut queue = TaskQueue::new();
        queue.insert(1u64, Countdown::new(2));
        let mut idle = Countdown::new(5);
        idle.scheduled = false;
        queue.insert(2u64, idle);

        assert_eq!(queue.perform_round().await, 1);
        assert_eq!(queue.get(&1).unwrap().steps, 1);
        assert_eq!(queue.get(&2).unwrap().steps, 0);
    }

    #[tokio::test]
    async fn test_run_until_idle() {
        let mut queue = TaskQueue::new();
        queue.insert(1u64, Countdown::new(3));
        queue.insert(2u64, Countdown::new(1));

        assert_eq!(queue.run_until_idle().await, 3);
        assert!(!queue.has_ready());
        assert_eq!(queue.get(&1).unwrap().steps, 3);
        assert_eq!(queue.get(&2).unwrap().steps, 1);

        // Nothing scheduled, nothing to do.
        assert_eq!(queue.run_until_idle().await, 0);
    }

    #[tokio::test]
    async fn test_rescheduled_task_runs_again() {
        let mut queue = TaskQueue::new();
        let mut task = Countdown::new(1);
        task.scheduled = false;
        queue.insert(7u64, task);
        assert_eq!(queue.run_until_idle().await, 0);

        queue.get_mut(&7).unwrap().scheduled = true;
        assert_eq!(queue.run_until_idle().await, 1);
        assert!(queue.remove(&7).is_some());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_blocked_step_does_not_hold_back_others() {
        let (open, release) = oneshot::channel();
        let mut queue = TaskQueue::new();
        queue.insert(1u64, Gate::new(Some(release)));
        queue.insert(2u64, Gate::new(None));

        assert_eq!(queue.launch_ready(), 2);
        assert_eq!(queue.next_finished().await, Some(2));
        assert!(queue.is_running(&1));
        assert!(queue.get(&1).is_none());
        assert!(queue.contains(&1));
        assert_eq!(queue.len(), 2);

        // The finished task can run again while the other is still blocked.
        queue.get_mut(&2).unwrap().scheduled = true;
        assert_eq!(queue.launch_ready(), 1);
        assert_eq!(queue.next_finished().await, Some(2));
        assert_eq!(queue.get(&2).unwrap().steps, 2);

        open.send(()).unwrap();
        assert_eq!(queue.next_finished().await, Some(1));
        assert_eq!(queue.get(&1).unwrap().steps, 1);
        assert!(!queue.has_running());
        assert_eq!(queue.next_finished().await, None);
    }
}
