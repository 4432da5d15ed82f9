//! Single-threaded cooperative scheduler.
//!
//! Everything asynchronous in StashDB (request completion, commit, event
//! delivery, timers) is a task on an [`EventLoop`]. The loop is driven
//! explicitly by the embedder with [`EventLoop::run_until_idle`] or
//! [`EventLoop::run_until`].
//!
//! Each iteration:
//!
//! 1. due timers move to the task queue,
//! 2. one task runs and the virtual clock advances by the task quantum,
//! 3. microtasks drain, then checkpoint hooks run.
//!
//! Code that runs before the loop is first driven counts as one task: its
//! checkpoint runs at the start of the next `run_*` call.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// A unit of work queued on the loop.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a pending timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct Timer {
    due: Duration,
    id: u64,
    task: Task,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.id == other.id
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    // Reversed so the max-heap pops the earliest timer first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.id.cmp(&self.id))
    }
}

struct LoopState {
    tasks: VecDeque<Task>,
    microtasks: VecDeque<Task>,
    checkpoint_hooks: Vec<Task>,
    timers: BinaryHeap<Timer>,
    cancelled: HashSet<u64>,
    next_timer: u64,
    clock: Duration,
    quantum: Duration,
    running: bool,
    executed: u64,
}

/// The scheduler shared by a factory and everything it hands out.
///
/// Cloning yields another handle to the same loop.
#[derive(Clone)]
pub struct EventLoop {
    state: Arc<Mutex<LoopState>>,
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EventLoop")
            .field("tasks", &state.tasks.len())
            .field("timers", &state.timers.len())
            .field("clock", &state.clock)
            .finish()
    }
}

impl EventLoop {
    /// Creates a loop whose tasks each consume `quantum` of virtual time.
    #[must_use]
    pub fn new(quantum: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(LoopState {
                tasks: VecDeque::new(),
                microtasks: VecDeque::new(),
                checkpoint_hooks: Vec::new(),
                timers: BinaryHeap::new(),
                cancelled: HashSet::new(),
                next_timer: 0,
                clock: Duration::ZERO,
                quantum,
                running: false,
                executed: 0,
            })),
        }
    }

    /// Appends a task to the macrotask queue.
    pub fn queue_task(&self, task: impl FnOnce() + Send + 'static) {
        self.state.lock().tasks.push_back(Box::new(task));
    }

    /// Queues a microtask, run before the current task's checkpoint hooks.
    pub fn queue_microtask(&self, task: impl FnOnce() + Send + 'static) {
        self.state.lock().microtasks.push_back(Box::new(task));
    }

    /// Registers a hook for the checkpoint that ends the current task.
    pub fn at_checkpoint(&self, hook: impl FnOnce() + Send + 'static) {
        self.state.lock().checkpoint_hooks.push(Box::new(hook));
    }

    /// Runs `task` once `delay` of virtual time has elapsed.
    pub fn set_timeout(&self, delay: Duration, task: impl FnOnce() + Send + 'static) -> TimerId {
        let mut state = self.state.lock();
        let id = state.next_timer;
        state.next_timer += 1;
        let due = state.clock + delay;
        state.timers.push(Timer {
            due,
            id,
            task: Box::new(task),
        });
        TimerId(id)
    }

    /// Cancels a timer that has not fired yet. Clearing a timer that
    /// already fired or was cleared does nothing.
    pub fn clear_timeout(&self, timer: TimerId) {
        let mut state = self.state.lock();
        if state.timers.iter().any(|t| t.id == timer.0) {
            state.cancelled.insert(timer.0);
        }
    }

    /// Returns the virtual clock.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.state.lock().clock
    }

    /// Returns the number of tasks executed so far.
    #[must_use]
    pub fn tasks_executed(&self) -> u64 {
        self.state.lock().executed
    }

    /// Returns true if no task, microtask, hook or timer is pending.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.tasks.is_empty()
            && state.microtasks.is_empty()
            && state.checkpoint_hooks.is_empty()
            && state.timers.iter().all(|t| state.cancelled.contains(&t.id))
    }

    /// Runs tasks until nothing is left. Returns the number of tasks run.
    ///
    /// Calling this from inside a task returns 0 without running anything.
    pub fn run_until_idle(&self) -> u64 {
        let Some(_guard) = self.enter() else {
            return 0;
        };
        let before = self.tasks_executed();
        self.checkpoint();
        while self.run_one() {}
        self.tasks_executed() - before
    }

    /// Runs tasks until `done` returns true or the loop goes idle.
    ///
    /// Returns the final value of `done`. Calling this from inside a task
    /// evaluates `done` once without running anything.
    pub fn run_until(&self, mut done: impl FnMut() -> bool) -> bool {
        let Some(_guard) = self.enter() else {
            return done();
        };
        self.checkpoint();
        loop {
            if done() {
                return true;
            }
            if !self.run_one() {
                return done();
            }
        }
    }

    fn enter(&self) -> Option<RunGuard<'_>> {
        let mut state = self.state.lock();
        if state.running {
            tracing::warn!(target: "stashdb::db", "event loop re-entered from a task; ignoring");
            return None;
        }
        state.running = true;
        Some(RunGuard { event_loop: self })
    }

    fn run_one(&self) -> bool {
        let task = {
            let mut state = self.state.lock();
            state.promote_due_timers();
            if state.tasks.is_empty() {
                if let Some(next) = state.next_due() {
                    state.clock = state.clock.max(next);
                    state.promote_due_timers();
                }
            }
            let Some(task) = state.tasks.pop_front() else {
                return false;
            };
            let quantum = state.quantum;
            state.clock += quantum;
            state.executed += 1;
            task
        };
        task();
        self.checkpoint();
        true
    }

    fn checkpoint(&self) {
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.microtasks.pop_front() {
                    Some(task) => Some(vec![task]),
                    None if state.checkpoint_hooks.is_empty() => None,
                    None => Some(std::mem::take(&mut state.checkpoint_hooks)),
                }
            };
            let Some(batch) = next else {
                return;
            };
            for task in batch {
                task();
            }
        }
    }
}

impl LoopState {
    fn promote_due_timers(&mut self) {
        while self.timers.peek().is_some_and(|t| t.due <= self.clock) {
            if let Some(timer) = self.timers.pop() {
                if !self.cancelled.remove(&timer.id) {
                    self.tasks.push_back(timer.task);
                }
            }
        }
    }

    fn next_due(&mut self) -> Option<Duration> {
        while let Some(timer) = self.timers.peek() {
            if self.cancelled.contains(&timer.id) {
                let id = timer.id;
                self.timers.pop();
                self.cancelled.remove(&id);
            } else {
                return Some(timer.due);
            }
        }
        None
    }
}

struct RunGuard<'a> {
    event_loop: &'a EventLoop,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.event_loop.state.lock().running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, EventLoop) {
        (
            Arc::new(Mutex::new(Vec::new())),
            EventLoop::new(Duration::from_micros(100)),
        )
    }

    #[test]
    fn tasks_run_in_fifo_order() {
        let (log, el) = recorder();
        for name in ["a", "b", "c"] {
            let log = Arc::clone(&log);
            el.queue_task(move || log.lock().push(name));
        }
        assert_eq!(el.run_until_idle(), 3);
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
        assert!(el.is_idle());
    }

    #[test]
    fn microtasks_and_hooks_run_between_tasks() {
        let (log, el) = recorder();
        {
            let log = Arc::clone(&log);
            let inner = el.clone();
            el.queue_task(move || {
                log.lock().push("task1");
                let hook_log = Arc::clone(&log);
                inner.at_checkpoint(move || hook_log.lock().push("hook"));
                let micro_log = Arc::clone(&log);
                inner.queue_microtask(move || micro_log.lock().push("micro"));
            });
        }
        {
            let log = Arc::clone(&log);
            el.queue_task(move || log.lock().push("task2"));
        }
        el.run_until_idle();
        assert_eq!(*log.lock(), vec!["task1", "micro", "hook", "task2"]);
    }

    #[test]
    fn top_level_hooks_run_first() {
        let (log, el) = recorder();
        {
            let log = Arc::clone(&log);
            el.queue_task(move || log.lock().push("task"));
        }
        {
            let log = Arc::clone(&log);
            el.at_checkpoint(move || log.lock().push("hook"));
        }
        el.run_until_idle();
        assert_eq!(*log.lock(), vec!["hook", "task"]);
    }

    #[test]
    fn timers_interleave_with_task_chains() {
        let (log, el) = recorder();

        fn chain(el: EventLoop, log: Arc<Mutex<Vec<&'static str>>>, left: u32) {
            if left == 0 {
                return;
            }
            log.lock().push("step");
            let next = el.clone();
            el.queue_task(move || chain(next, log, left - 1));
        }

        {
            let log = Arc::clone(&log);
            el.set_timeout(Duration::from_micros(150), move || log.lock().push("timer"));
        }
        {
            let log = Arc::clone(&log);
            let inner = el.clone();
            el.queue_task(move || chain(inner, log, 5));
        }
        el.run_until_idle();

        let log = log.lock();
        let timer_at = log.iter().position(|e| *e == "timer").unwrap();
        assert_eq!(timer_at, 3, "timer must not wait for the chain");
        assert_eq!(log.iter().filter(|e| **e == "step").count(), 5);
    }

    #[test]
    fn idle_loop_jumps_to_next_timer() {
        let (log, el) = recorder();
        {
            let log = Arc::clone(&log);
            el.set_timeout(Duration::from_secs(5), move || log.lock().push("late"));
        }
        {
            let log = Arc::clone(&log);
            el.set_timeout(Duration::from_millis(1), move || log.lock().push("early"));
        }
        el.run_until_idle();
        assert_eq!(*log.lock(), vec!["early", "late"]);
        assert!(el.now() >= Duration::from_secs(5));
    }

    #[test]
    fn cleared_timers_do_not_fire() {
        let (log, el) = recorder();
        let timer = {
            let log = Arc::clone(&log);
            el.set_timeout(Duration::from_millis(1), move || log.lock().push("fired"))
        };
        el.clear_timeout(timer);
        assert!(el.is_idle());
        el.run_until_idle();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn clearing_a_fired_timer_keeps_the_loop_idle() {
        let (log, el) = recorder();
        let fired = {
            let log = Arc::clone(&log);
            el.set_timeout(Duration::from_millis(1), move || log.lock().push("fired"))
        };
        el.run_until_idle();
        el.clear_timeout(fired);
        el.clear_timeout(fired);
        assert!(el.is_idle());

        let log_late = Arc::clone(&log);
        el.set_timeout(Duration::from_millis(1), move || log_late.lock().push("late"));
        assert!(!el.is_idle(), "a live timer is pending");
        el.run_until_idle();
        assert_eq!(*log.lock(), vec!["fired", "late"]);
        assert!(el.state.lock().cancelled.is_empty());
    }

    #[test]
    fn run_until_stops_early() {
        let (log, el) = recorder();
        for name in ["a", "b", "c"] {
            let log = Arc::clone(&log);
            el.queue_task(move || log.lock().push(name));
        }
        let seen = Arc::clone(&log);
        assert!(el.run_until(|| seen.lock().len() == 2));
        assert_eq!(log.lock().len(), 2);
        assert!(!el.is_idle());
    }

    #[test]
    fn nested_run_is_ignored() {
        let (log, el) = recorder();
        {
            let log = Arc::clone(&log);
            let inner = el.clone();
            el.queue_task(move || {
                assert_eq!(inner.run_until_idle(), 0);
                log.lock().push("outer");
            });
        }
        el.run_until_idle();
        assert_eq!(*log.lock(), vec!["outer"]);
    }
}
