//! N-worker work-stealing pool: per-worker deques, a shared priority global
//! queue, random-victim stealing, and cooperative shutdown.

use crate::deque::{try_steal, WorkerDeque};
use crate::global_queue::GlobalQueue;
use crate::priority::{Priority, PriorityTask};
use crate::stats::{SchedulerStats, WorkerCounters};
use crossbeam_deque::Stealer;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default steal attempts per empty-deque, empty-global cycle (§4.6).
pub const DEFAULT_STEAL_ATTEMPTS: u32 = 4;

/// A handle a running task's executor receives, letting it spawn subtasks
/// onto the *current* worker's own deque bottom — per §4.6/§9, external
/// submissions go to the global queue, driver-spawned subtasks go local.
pub struct WorkerHandle<'a, T> {
    local: &'a WorkerDeque<T>,
    global: &'a GlobalQueue<T>,
    sequence: &'a AtomicU64,
    outstanding: &'a Outstanding,
}

impl<'a, T> WorkerHandle<'a, T> {
    /// Push a subtask to this worker's own deque bottom.
    pub fn spawn_local(&self, payload: T, priority: Priority, critical_path_cost: u64, depth: u32, dependents_count: u32) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.outstanding.add(1);
        self.local.push(PriorityTask::new(payload, priority, critical_path_cost, depth, dependents_count, sequence));
    }
}

struct Outstanding {
    count: AtomicI64,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl Outstanding {
    fn new() -> Self {
        Self { count: AtomicI64::new(0), lock: Mutex::new(()), condvar: Condvar::new() }
    }

    fn add(&self, n: i64) {
        let _ = self.count.fetch_add(n, Ordering::SeqCst);
    }

    fn done_one(&self) {
        let prev = self.count.fetch_sub(1, Ordering::SeqCst);
        if prev <= 1 {
            let _guard = self.lock.lock();
            self.condvar.notify_all();
        }
    }

    fn wait_until_zero(&self) {
        let mut guard = self.lock.lock();
        while self.count.load(Ordering::SeqCst) > 0 {
            self.condvar.wait(&mut guard);
        }
    }
}

/// N worker threads sharing one priority global queue, each owning a
/// work-stealing deque. Generic over the task payload `T` and the executor
/// closure invoked for each task.
pub struct WorkStealingScheduler<T: Send + 'static> {
    global: Arc<GlobalQueue<T>>,
    stealers: Arc<Vec<Stealer<PriorityTask<T>>>>,
    sequence: Arc<AtomicU64>,
    counters: Arc<Vec<WorkerCounters>>,
    deque_lens: Arc<Vec<AtomicU64>>,
    stopping: Arc<AtomicBool>,
    force_stop: Arc<AtomicBool>,
    outstanding: Arc<Outstanding>,
    handles: Vec<JoinHandle<()>>,
    num_workers: usize,
}

impl<T: Send + 'static> WorkStealingScheduler<T> {
    /// Start `num_workers` worker threads (clamped to at least 1), each
    /// running `executor` for every task it pops. `executor` must not panic
    /// across the unwind boundary in a way that should be silently
    /// swallowed — a panicking task is counted as executed but its error is
    /// the caller's (e.g. the build executor's) responsibility to surface.
    #[must_use]
    pub fn start<F>(num_workers: usize, executor: F) -> Self
    where
        F: Fn(T, &WorkerHandle<'_, T>) + Send + Sync + 'static,
    {
        let num_workers = num_workers.max(1);
        let executor = Arc::new(executor);
        let global = Arc::new(GlobalQueue::new());
        let stopping = Arc::new(AtomicBool::new(false));
        let force_stop = Arc::new(AtomicBool::new(false));
        let sequence = Arc::new(AtomicU64::new(0));
        let outstanding = Arc::new(Outstanding::new());

        let locals: Vec<WorkerDeque<T>> = (0..num_workers).map(|_| WorkerDeque::new()).collect();
        let stealers: Arc<Vec<Stealer<PriorityTask<T>>>> = Arc::new(locals.iter().map(WorkerDeque::stealer).collect());
        let counters: Arc<Vec<WorkerCounters>> = Arc::new((0..num_workers).map(|_| WorkerCounters::default()).collect());
        let deque_lens: Arc<Vec<AtomicU64>> = Arc::new((0..num_workers).map(|_| AtomicU64::new(0)).collect());

        let mut handles = Vec::with_capacity(num_workers);
        for (index, local) in locals.into_iter().enumerate() {
            let global = Arc::clone(&global);
            let stealers = Arc::clone(&stealers);
            let counters = Arc::clone(&counters);
            let deque_lens = Arc::clone(&deque_lens);
            let stopping = Arc::clone(&stopping);
            let force_stop = Arc::clone(&force_stop);
            let sequence = Arc::clone(&sequence);
            let outstanding = Arc::clone(&outstanding);
            let executor = Arc::clone(&executor);

            handles.push(
                thread::Builder::new()
                    .name(format!("ember-worker-{index}"))
                    .spawn(move || {
                        worker_loop(index, &local, &global, &stealers, &counters, &deque_lens, &stopping, &force_stop, &sequence, &outstanding, executor.as_ref());
                    })
                    .expect("spawning a worker thread should not fail under normal OS conditions"),
            );
        }

        Self { global, stealers, sequence, counters, deque_lens, stopping, force_stop, outstanding, handles, num_workers }
    }

    /// Submit a new externally-originated task to the shared global queue.
    pub fn submit(&self, payload: T, priority: Priority, critical_path_cost: u64, depth: u32, dependents_count: u32) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.outstanding.add(1);
        self.global.push(PriorityTask::new(payload, priority, critical_path_cost, depth, dependents_count, sequence));
    }

    /// Block until every task submitted so far (including subtasks spawned
    /// by executors, transitively) has completed.
    pub fn wait_all(&self) {
        self.outstanding.wait_until_zero();
    }

    /// Cooperative shutdown: workers finish what's already in their deque
    /// but accept no new global work, then exit. Blocks until all worker
    /// threads have joined.
    pub fn shutdown(mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.global.stop();
        self.join_all(&mut self.handles);
    }

    /// Shutdown that force-stops workers after `deadline` even if they have
    /// not drained their local deques.
    pub fn shutdown_with_deadline(mut self, deadline: Duration) {
        self.stopping.store(true, Ordering::SeqCst);
        self.global.stop();
        let force_stop = Arc::clone(&self.force_stop);
        let deadline_at = Instant::now() + deadline;
        let watcher = thread::spawn(move || {
            let remaining = deadline_at.saturating_duration_since(Instant::now());
            thread::sleep(remaining);
            force_stop.store(true, Ordering::SeqCst);
        });
        self.join_all(&mut self.handles);
        let _ = watcher.join();
    }

    fn join_all(&mut self, handles: &mut Vec<JoinHandle<()>>) {
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// Number of worker threads in the pool.
    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Per-worker and aggregate counters, §4.6's "`get_stats`".
    #[must_use]
    pub fn get_stats(&self) -> SchedulerStats {
        let workers: Vec<_> = self
            .counters
            .iter()
            .zip(self.deque_lens.iter())
            .map(|(c, depth)| c.snapshot(depth.load(Ordering::Relaxed) as usize))
            .collect();
        let total_executed = workers.iter().map(|w| w.executed).sum();
        let total_stolen = workers.iter().map(|w| w.stolen_from_others).sum();
        let total_steal_attempts = workers.iter().map(|w| w.steal_attempts).sum();
        SchedulerStats { workers, total_executed, total_stolen, total_steal_attempts }
    }
}

#[allow(clippy::too_many_arguments)]
fn worker_loop<T: Send + 'static>(
    index: usize,
    local: &WorkerDeque<T>,
    global: &GlobalQueue<T>,
    stealers: &[Stealer<PriorityTask<T>>],
    counters: &[WorkerCounters],
    deque_lens: &[AtomicU64],
    stopping: &AtomicBool,
    force_stop: &AtomicBool,
    sequence: &AtomicU64,
    outstanding: &Outstanding,
    executor: &(dyn Fn(T, &WorkerHandle<'_, T>) + Send + Sync),
) {
    let mut fail_streak: u32 = 0;
    loop {
        if force_stop.load(Ordering::SeqCst) {
            return;
        }
        deque_lens[index].store(local.len() as u64, Ordering::Relaxed);

        // 1. Own deque bottom, wait-free.
        if let Some(task) = local.pop() {
            run_task(task, index, local, global, sequence, outstanding, counters, executor);
            fail_streak = 0;
            continue;
        }

        let is_stopping = stopping.load(Ordering::SeqCst);
        if is_stopping {
            // Cooperative: only drain what's already local; never touch
            // global work once shutdown has been requested.
            return;
        }

        // 2. Drain a batch from the global queue.
        let batch = global.try_drain_batch(4);
        if !batch.is_empty() {
            let mut iter = batch.into_iter();
            if let Some(first) = iter.next() {
                for rest in iter {
                    local.push(rest);
                }
                run_task(first, index, local, global, sequence, outstanding, counters, executor);
            }
            fail_streak = 0;
            continue;
        }

        // 3. Up to K steal attempts against random peers.
        let stolen = try_steal(stealers, index, DEFAULT_STEAL_ATTEMPTS, &counters[index].steal_aborts);
        counters[index].steal_attempts.fetch_add(u64::from(DEFAULT_STEAL_ATTEMPTS), Ordering::Relaxed);
        if let Some(task) = stolen {
            counters[index].stolen_from_others.fetch_add(1, Ordering::Relaxed);
            run_task(task, index, local, global, sequence, outstanding, counters, executor);
            fail_streak = 0;
            continue;
        }

        // 4. All steals failed: spin-yield, then bounded exponential
        // back-off, then block on the global queue's condvar.
        fail_streak += 1;
        if fail_streak == 1 {
            thread::yield_now();
        } else if fail_streak < 8 {
            let micros = 1u64 << fail_streak.min(7);
            thread::sleep(Duration::from_micros(micros.min(100)));
        } else {
            let _ = global.drain_batch_blocking(1).into_iter().for_each(|task| local.push(task));
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_task<T: Send + 'static>(
    task: PriorityTask<T>,
    index: usize,
    local: &WorkerDeque<T>,
    global: &GlobalQueue<T>,
    sequence: &AtomicU64,
    outstanding: &Outstanding,
    counters: &[WorkerCounters],
    executor: &(dyn Fn(T, &WorkerHandle<'_, T>) + Send + Sync),
) {
    let handle = WorkerHandle { local, global, sequence, outstanding };
    executor(task.into_payload(), &handle);
    counters[index].executed.fetch_add(1, Ordering::Relaxed);
    outstanding.done_one();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn hundred_independent_tasks_all_execute() {
        let executed = Arc::new(AtomicUsize::new(0));
        let executed2 = Arc::clone(&executed);
        let scheduler = WorkStealingScheduler::start(4, move |payload: u32, _handle| {
            let _ = payload;
            thread::sleep(Duration::from_micros(200));
            executed2.fetch_add(1, Ordering::SeqCst);
        });
        for i in 0..100u32 {
            scheduler.submit(i, Priority::Normal, 0, 0, 0);
        }
        scheduler.wait_all();
        assert_eq!(executed.load(Ordering::SeqCst), 100);
        let stats = scheduler.get_stats();
        assert_eq!(stats.total_executed, 100);
        scheduler.shutdown();
    }

    #[test]
    fn empty_submission_returns_immediately() {
        let scheduler: WorkStealingScheduler<u32> = WorkStealingScheduler::start(2, |_payload, _handle| {});
        scheduler.wait_all();
        scheduler.shutdown();
    }

    #[test]
    fn spawned_subtasks_count_toward_wait_all() {
        let executed = Arc::new(AtomicUsize::new(0));
        let executed2 = Arc::clone(&executed);
        let scheduler = WorkStealingScheduler::start(2, move |payload: u32, handle| {
            executed2.fetch_add(1, Ordering::SeqCst);
            if payload == 0 {
                handle.spawn_local(1, Priority::Normal, 0, 0, 0);
            }
        });
        scheduler.submit(0, Priority::Normal, 0, 0, 0);
        scheduler.wait_all();
        assert_eq!(executed.load(Ordering::SeqCst), 2);
        scheduler.shutdown();
    }

    #[test]
    fn shutdown_stops_accepting_new_global_work() {
        let scheduler: WorkStealingScheduler<u32> = WorkStealingScheduler::start(2, |_payload, _handle| {
            thread::sleep(Duration::from_millis(5));
        });
        scheduler.submit(0, Priority::Normal, 0, 0, 0);
        scheduler.wait_all();
        scheduler.shutdown();
    }

    #[test]
    fn steal_count_is_non_negative_and_bounded_by_executed() {
        let scheduler = WorkStealingScheduler::start(4, |_payload: u32, _handle| {
            thread::sleep(Duration::from_micros(50));
        });
        for i in 0..50u32 {
            scheduler.submit(i, Priority::Normal, 0, 0, 0);
        }
        scheduler.wait_all();
        let stats = scheduler.get_stats();
        assert!(stats.total_stolen <= stats.total_executed);
        scheduler.shutdown();
    }
}
