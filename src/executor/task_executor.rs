//! Task executor - runs long-running command bodies on a bounded worker pool

use super::pool::{Job, WorkerPool};
use super::task::{notify, AbortEvent, TaskCallback, TaskUpdate};
use lrc_shared::TaskStatus;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tracing::{debug, error, info};

const WORKER_NAME: &str = "lrc-worker";

/// Errors creating an executor
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Failed to spawn worker threads: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Signals the end of one abort drain to every abort call waiting on it
#[derive(Default)]
struct DrainSignal {
    done: Mutex<bool>,
    cond: Condvar,
}

impl DrainSignal {
    fn finish(&self) {
        *self.done.lock() = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }
}

/// Mutable executor state; the pool and abort event are swapped as a pair
struct PoolState {
    /// `None` while an abort is draining the previous pool
    pool: Option<WorkerPool>,
    abort_event: AbortEvent,
    draining: Option<Arc<DrainSignal>>,
}

/// Accepts task bodies, acknowledges them immediately and runs them on worker threads
pub struct TaskExecutor {
    max_workers: usize,
    /// Held while a task is queued and acknowledged; workers pass through it before running
    handoff: Arc<Mutex<()>>,
    state: Arc<Mutex<PoolState>>,
}

impl fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("max_workers", &self.max_workers)
            .field("aborting", &self.is_aborting())
            .finish()
    }
}

impl TaskExecutor {
    /// Create an executor with `max_workers` worker threads
    ///
    /// A `max_workers` of zero is treated as one.
    pub fn new(max_workers: usize) -> Result<Self, ExecutorError> {
        let max_workers = max_workers.max(1);
        let pool = WorkerPool::new(max_workers, WORKER_NAME)?;

        Ok(Self {
            max_workers,
            handoff: Arc::new(Mutex::new(())),
            state: Arc::new(Mutex::new(PoolState {
                pool: Some(pool),
                abort_event: AbortEvent::new(),
                draining: None,
            })),
        })
    }

    /// Number of worker threads, after the zero clamp
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Whether an abort is currently draining the pool
    pub fn is_aborting(&self) -> bool {
        self.state.lock().draining.is_some()
    }

    /// Queue `func` for execution
    ///
    /// `func` receives the pool's abort event and `task_callback`, and is
    /// responsible for reporting its own progress and outcome. QUEUED is
    /// delivered before this returns and before `func` can report anything.
    pub fn submit<F>(&self, func: F, task_callback: Option<TaskCallback>) -> (TaskStatus, String)
    where
        F: FnOnce(AbortEvent, Option<TaskCallback>) + Send + 'static,
    {
        let _handoff = self.handoff.lock();

        let queued = {
            let state = self.state.lock();
            match &state.pool {
                Some(pool) if !state.abort_event.is_set() => {
                    let job = self.wrap(func, state.abort_event.clone(), task_callback.clone());
                    pool.execute(job).is_ok()
                }
                _ => false,
            }
        };

        if queued {
            notify(&task_callback, TaskUpdate::status(TaskStatus::Queued));
            (TaskStatus::Queued, "Task queued".into())
        } else {
            let message = "Queue is aborting";
            debug!("[EXECUTOR] Rejected task: {}", message);
            notify(
                &task_callback,
                TaskUpdate::status(TaskStatus::Rejected).with_message(message),
            );
            (TaskStatus::Rejected, message.into())
        }
    }

    /// Build the job run by a worker for one submitted task
    fn wrap<F>(&self, func: F, abort_event: AbortEvent, task_callback: Option<TaskCallback>) -> Job
    where
        F: FnOnce(AbortEvent, Option<TaskCallback>) + Send + 'static,
    {
        let handoff = self.handoff.clone();
        Box::new(move || {
            // Wait until the submitter has delivered QUEUED
            drop(handoff.lock());

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| func(abort_event, task_callback)));
            if let Err(payload) = outcome {
                error!("[EXECUTOR] Task panicked: {}", panic_message(payload.as_ref()));
            }
        })
    }

    /// Abort all work: signal running tasks, drain the pool, then start afresh
    ///
    /// Returns immediately. `task_callback` receives IN_PROGRESS now and
    /// COMPLETED once the drain finishes and a new pool accepts work.
    pub fn abort(&self, task_callback: Option<TaskCallback>) -> (TaskStatus, String) {
        let (signal, role) = {
            let mut state = self.state.lock();
            state.abort_event.set();
            match &state.draining {
                Some(signal) => (signal.clone(), DrainRole::Waiter),
                None => {
                    let signal = Arc::new(DrainSignal::default());
                    state.draining = Some(signal.clone());
                    (signal, DrainRole::Owner(state.pool.take()))
                }
            }
        };

        notify(&task_callback, TaskUpdate::status(TaskStatus::InProgress));

        let owns_drain = matches!(role, DrainRole::Owner(_));
        let state = self.state.clone();
        let max_workers = self.max_workers;
        let callback = task_callback.clone();
        let spawned = thread::Builder::new()
            .name("lrc-abort".into())
            .spawn(move || {
                match role {
                    DrainRole::Owner(pool) => {
                        info!("[EXECUTOR] Abort requested, draining task queue");
                        if let Some(pool) = pool {
                            pool.shutdown();
                        }
                        let replaced = replace_pool(&state, max_workers);
                        signal.finish();
                        if let Err(e) = replaced {
                            error!("[EXECUTOR] Failed to restart worker pool: {}", e);
                            notify(
                                &callback,
                                TaskUpdate::status(TaskStatus::Failed).with_message(e.to_string()),
                            );
                            return;
                        }
                        info!("[EXECUTOR] Abort complete, accepting tasks again");
                    }
                    DrainRole::Waiter => signal.wait(),
                }
                notify(&callback, TaskUpdate::status(TaskStatus::Completed));
            });

        if let Err(e) = spawned {
            error!("[EXECUTOR] Failed to spawn abort coordinator: {}", e);
            if owns_drain {
                // The taken pool went down with the closure; let the next abort rebuild it
                if let Some(signal) = self.state.lock().draining.take() {
                    signal.finish();
                }
            }
            notify(
                &task_callback,
                TaskUpdate::status(TaskStatus::Failed).with_message(e.to_string()),
            );
            return (TaskStatus::Failed, format!("Abort failed: {e}"));
        }

        (TaskStatus::InProgress, "Aborting tasks".into())
    }
}

/// Part an abort call plays in the current drain
enum DrainRole {
    /// First abort: drains the pool it took out of service (if any)
    Owner(Option<WorkerPool>),
    /// Later abort: waits for the owner to finish
    Waiter,
}

/// Install a fresh pool and abort event after a drain
fn replace_pool(state: &Mutex<PoolState>, max_workers: usize) -> std::io::Result<()> {
    let pool = WorkerPool::new(max_workers, WORKER_NAME);
    let mut state = state.lock();
    state.draining = None;
    state.abort_event = AbortEvent::new();
    state.pool = Some(pool?);
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    const WAIT: Duration = Duration::from_secs(5);

    /// Callback recording every update, plus a channel to wait on
    fn recorder() -> (TaskCallback, Arc<Mutex<Vec<TaskUpdate>>>, mpsc::Receiver<TaskUpdate>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel();
        let sink = log.clone();
        let tx = Mutex::new(tx);
        let callback: TaskCallback = Arc::new(move |update: TaskUpdate| {
            sink.lock().push(update.clone());
            let _ = tx.lock().send(update);
        });
        (callback, log, rx)
    }

    fn statuses(log: &Mutex<Vec<TaskUpdate>>) -> Vec<TaskStatus> {
        log.lock().iter().filter_map(|u| u.status).collect()
    }

    fn wait_for_status(rx: &mpsc::Receiver<TaskUpdate>, wanted: TaskStatus) {
        let deadline = Instant::now() + WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(update) if update.status == Some(wanted) => return,
                Ok(_) => continue,
                Err(_) => panic!("timed out waiting for {wanted}"),
            }
        }
    }

    /// Well-behaved body: reports progress and honours the abort event
    fn looping_task(steps: u32, step: Duration) -> impl FnOnce(AbortEvent, Option<TaskCallback>) + Send + 'static {
        move |abort, callback| {
            if abort.is_set() {
                notify(&callback, TaskUpdate::status(TaskStatus::Aborted));
                return;
            }
            notify(&callback, TaskUpdate::status(TaskStatus::InProgress));
            for _ in 0..steps {
                if abort.is_set() {
                    notify(&callback, TaskUpdate::status(TaskStatus::Aborted));
                    return;
                }
                thread::sleep(step);
            }
            notify(&callback, TaskUpdate::status(TaskStatus::Completed));
        }
    }

    #[test]
    fn test_submit_reports_queued_then_terminal() {
        let executor = TaskExecutor::new(2).unwrap();
        let (callback, log, rx) = recorder();

        let reply = executor.submit(looping_task(1, Duration::from_millis(1)), Some(callback));
        assert_eq!(reply, (TaskStatus::Queued, "Task queued".to_string()));

        wait_for_status(&rx, TaskStatus::Completed);
        assert_eq!(
            statuses(&log),
            vec![TaskStatus::Queued, TaskStatus::InProgress, TaskStatus::Completed]
        );
    }

    #[test]
    fn test_queued_precedes_body_updates() {
        let executor = TaskExecutor::new(4).unwrap();

        for _ in 0..50 {
            let (callback, log, rx) = recorder();
            // Body reports immediately, racing the submitter
            executor.submit(
                |_, cb| notify(&cb, TaskUpdate::status(TaskStatus::Completed)),
                Some(callback),
            );
            wait_for_status(&rx, TaskStatus::Completed);
            assert_eq!(statuses(&log), vec![TaskStatus::Queued, TaskStatus::Completed]);
        }
    }

    #[test]
    fn test_concurrent_submitters_each_see_queued_first() {
        const SUBMITTERS: usize = 4;
        const TASKS_EACH: usize = 25;
        let executor = Arc::new(TaskExecutor::new(4).unwrap());
        let (done_tx, done_rx) = mpsc::channel();

        let submitters: Vec<_> = (0..SUBMITTERS)
            .map(|_| {
                let executor = executor.clone();
                let done_tx = done_tx.clone();
                thread::spawn(move || {
                    (0..TASKS_EACH)
                        .map(|_| {
                            let log = Arc::new(Mutex::new(Vec::new()));
                            let sink = log.clone();
                            let done_tx = Mutex::new(done_tx.clone());
                            let callback: TaskCallback = Arc::new(move |update: TaskUpdate| {
                                let terminal = update.status.map_or(false, |s| s.is_terminal());
                                sink.lock().push(update);
                                if terminal {
                                    let _ = done_tx.lock().send(());
                                }
                            });
                            let reply = executor.submit(
                                |_, cb| notify(&cb, TaskUpdate::status(TaskStatus::Completed)),
                                Some(callback),
                            );
                            assert_eq!(reply.0, TaskStatus::Queued);
                            log
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let logs: Vec<_> = submitters
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        for _ in 0..SUBMITTERS * TASKS_EACH {
            done_rx.recv_timeout(WAIT).unwrap();
        }

        assert_eq!(logs.len(), SUBMITTERS * TASKS_EACH);
        for log in &logs {
            assert_eq!(statuses(log), vec![TaskStatus::Queued, TaskStatus::Completed]);
        }
    }

    #[test]
    fn test_zero_workers_treated_as_one() {
        let executor = TaskExecutor::new(0).unwrap();
        assert_eq!(executor.max_workers(), 1);

        let (callback, log, rx) = recorder();
        executor.submit(looping_task(1, Duration::ZERO), Some(callback));
        wait_for_status(&rx, TaskStatus::Completed);
        assert_eq!(statuses(&log).last(), Some(&TaskStatus::Completed));
    }

    #[test]
    fn test_single_worker_serializes_tasks() {
        let executor = TaskExecutor::new(1).unwrap();
        let log = Arc::new(Mutex::new(Vec::<(usize, TaskStatus)>::new()));
        let (done_tx, done_rx) = mpsc::channel();
        let done_tx = Arc::new(Mutex::new(done_tx));

        // Occupy the only worker so all three submissions queue up first
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        executor.submit(
            move |_, _| {
                let _ = gate_rx.recv_timeout(WAIT);
            },
            None,
        );

        for task in 0..3 {
            let sink = log.clone();
            let done = done_tx.clone();
            let callback: TaskCallback = Arc::new(move |update: TaskUpdate| {
                if let Some(status) = update.status {
                    sink.lock().push((task, status));
                    if status == TaskStatus::Completed {
                        let _ = done.lock().send(task);
                    }
                }
            });
            executor.submit(looping_task(3, Duration::from_millis(10)), Some(callback));
        }
        gate_tx.send(()).unwrap();

        for _ in 0..3 {
            done_rx.recv_timeout(WAIT).expect("task did not complete");
        }

        use TaskStatus::*;
        assert_eq!(
            *log.lock(),
            vec![
                (0, Queued),
                (1, Queued),
                (2, Queued),
                (0, InProgress),
                (0, Completed),
                (1, InProgress),
                (1, Completed),
                (2, InProgress),
                (2, Completed),
            ]
        );
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let executor = TaskExecutor::new(1).unwrap();

        let reply = executor.submit(|_, _| panic!("body exploded"), None);
        assert_eq!(reply.0, TaskStatus::Queued);

        let (callback, _log, rx) = recorder();
        executor.submit(looping_task(1, Duration::from_millis(1)), Some(callback));
        wait_for_status(&rx, TaskStatus::Completed);
    }

    #[test]
    fn test_abort_running_task_then_accept_again() {
        let executor = TaskExecutor::new(1).unwrap();
        let (task_cb, task_log, task_rx) = recorder();
        let (abort_cb, abort_log, abort_rx) = recorder();

        executor.submit(looping_task(500, Duration::from_millis(10)), Some(task_cb));
        wait_for_status(&task_rx, TaskStatus::InProgress);

        let reply = executor.abort(Some(abort_cb));
        assert_eq!(reply, (TaskStatus::InProgress, "Aborting tasks".to_string()));

        wait_for_status(&task_rx, TaskStatus::Aborted);
        wait_for_status(&abort_rx, TaskStatus::Completed);
        assert_eq!(
            statuses(&task_log),
            vec![TaskStatus::Queued, TaskStatus::InProgress, TaskStatus::Aborted]
        );
        assert_eq!(statuses(&abort_log), vec![TaskStatus::InProgress, TaskStatus::Completed]);
        assert!(!executor.is_aborting());

        // Fresh pool and abort event after the drain
        let (callback, _log, rx) = recorder();
        let reply = executor.submit(looping_task(1, Duration::from_millis(1)), Some(callback));
        assert_eq!(reply.0, TaskStatus::Queued);
        wait_for_status(&rx, TaskStatus::Completed);
    }

    #[test]
    fn test_queued_tasks_self_abort() {
        let executor = TaskExecutor::new(1).unwrap();
        let (first_cb, _first_log, first_rx) = recorder();
        let (second_cb, second_log, second_rx) = recorder();

        executor.submit(looping_task(500, Duration::from_millis(10)), Some(first_cb));
        executor.submit(looping_task(500, Duration::from_millis(10)), Some(second_cb));
        wait_for_status(&first_rx, TaskStatus::InProgress);

        executor.abort(None);

        wait_for_status(&second_rx, TaskStatus::Aborted);
        assert_eq!(statuses(&second_log), vec![TaskStatus::Queued, TaskStatus::Aborted]);
    }

    #[test]
    fn test_submit_during_abort_is_rejected() {
        let executor = TaskExecutor::new(1).unwrap();
        let (task_cb, _task_log, task_rx) = recorder();

        // A body that ignores the abort event keeps the drain open for a while
        executor.submit(
            |_, cb| {
                notify(&cb, TaskUpdate::status(TaskStatus::InProgress));
                thread::sleep(Duration::from_millis(200));
                notify(&cb, TaskUpdate::status(TaskStatus::Completed));
            },
            Some(task_cb),
        );
        wait_for_status(&task_rx, TaskStatus::InProgress);

        let (abort_cb, _abort_log, abort_rx) = recorder();
        executor.abort(Some(abort_cb));
        assert!(executor.is_aborting());

        let (late_cb, late_log, _late_rx) = recorder();
        let reply = executor.submit(looping_task(1, Duration::from_millis(1)), Some(late_cb));
        assert_eq!(reply, (TaskStatus::Rejected, "Queue is aborting".to_string()));

        let late = late_log.lock().clone();
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].status, Some(TaskStatus::Rejected));
        assert_eq!(late[0].message.as_deref(), Some("Queue is aborting"));

        wait_for_status(&abort_rx, TaskStatus::Completed);
    }

    #[test]
    fn test_second_abort_while_draining() {
        let executor = TaskExecutor::new(1).unwrap();
        let (task_cb, task_log, task_rx) = recorder();
        executor.submit(looping_task(500, Duration::from_millis(10)), Some(task_cb));
        wait_for_status(&task_rx, TaskStatus::InProgress);

        let (first_cb, first_log, first_rx) = recorder();
        let (second_cb, second_log, second_rx) = recorder();
        executor.abort(Some(first_cb));
        let reply = executor.abort(Some(second_cb));
        assert_eq!(reply.0, TaskStatus::InProgress);

        wait_for_status(&first_rx, TaskStatus::Completed);
        wait_for_status(&second_rx, TaskStatus::Completed);
        assert_eq!(statuses(&first_log), vec![TaskStatus::InProgress, TaskStatus::Completed]);
        assert_eq!(statuses(&second_log), vec![TaskStatus::InProgress, TaskStatus::Completed]);

        // The aborted task reported exactly one terminal status
        let terminal = statuses(&task_log).into_iter().filter(|s| s.is_terminal()).count();
        assert_eq!(terminal, 1);
    }
}
