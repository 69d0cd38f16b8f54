use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SendError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use parking_lot::Mutex;
use thiserror::Error;

/// Smallest number of workers created by [`TaskThreadPool::with_default_threads`].
pub const MIN_DEFAULT_THREADS: usize = 8;

/// A unit of work executed by a [`TaskThreadPool`] worker.
///
/// Closures implement this trait, so most callers can pass a `move || { .. }` directly.
/// Tasks that own a completion channel should implement [`ThreadTask::abandon`] so waiters
/// learn about tasks dropped during shutdown. A task that panics is dropped during unwinding
/// and its worker moves on to the next task.
pub trait ThreadTask: Send {
    /// Runs the task on a worker thread.
    fn do_threaded_work(self: Box<Self>);

    /// Called instead of [`ThreadTask::do_threaded_work`] when the pool shuts down before the
    /// task was started.
    fn abandon(self: Box<Self>) {}
}

impl<F> ThreadTask for F
where
    F: FnOnce() + Send + 'static,
{
    fn do_threaded_work(self: Box<Self>) {
        (*self)()
    }
}

type BoxedTask = Box<dyn ThreadTask + 'static>;

/// Errors raised while creating a [`TaskThreadPool`].
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

enum WorkerMessage {
    DoWork(BoxedTask),
    Shutdown,
}

#[derive(Default)]
struct PoolState {
    queued_tasks: VecDeque<BoxedTask>,
    idle_workers: Vec<usize>,
    time_to_die: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    workers: Vec<Sender<WorkerMessage>>,
}

impl Shared {
    /// Hands the next queued task to a worker that just finished one, or marks the worker
    /// idle when nothing is queued.
    fn return_to_pool_or_get_next_job(&self, worker: usize) -> Option<BoxedTask> {
        let mut state = self.state.lock();
        if state.time_to_die {
            return None;
        }
        let next = state.queued_tasks.pop_front();
        if next.is_none() {
            state.idle_workers.push(worker);
        }
        next
    }
}

/// A fixed size pool of worker threads.
///
/// Every worker blocks on its own channel. [`TaskThreadPool::add_task`] sends the task
/// straight to the most recently idled worker, or queues it when every worker is busy.
/// A worker that finishes a task takes the next queued one before going idle.
///
/// # Examples
///
/// ```
/// use std::sync::mpsc;
/// use scene_bvh::job::TaskThreadPool;
///
/// let mut pool = TaskThreadPool::new(2).unwrap();
/// let (sender, receiver) = mpsc::channel();
/// for i in 0..4 {
///     let sender = sender.clone();
///     pool.add_task(move || sender.send(i * i).unwrap());
/// }
/// let mut results: Vec<i32> = receiver.iter().take(4).collect();
/// results.sort();
/// assert_eq!(results, vec![0, 1, 4, 9]);
/// pool.destroy();
/// ```
pub struct TaskThreadPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
    num_threads: usize,
}

impl TaskThreadPool {
    /// Spawns `num_threads` workers, at least one.
    pub fn new(num_threads: usize) -> Result<TaskThreadPool, PoolError> {
        let num_threads = num_threads.max(1);
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..num_threads).map(|_| mpsc::channel()).unzip();

        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                idle_workers: (0..num_threads).collect(),
                ..PoolState::default()
            }),
            workers: senders,
        });

        let mut pool = TaskThreadPool {
            shared,
            handles: Vec::with_capacity(num_threads),
            num_threads,
        };
        // On error the partially spawned pool is torn down by `Drop`.
        for (worker, receiver) in receivers.into_iter().enumerate() {
            let shared = pool.shared.clone();
            let handle = thread::Builder::new()
                .name(format!("TaskThread {}", worker))
                .spawn(move || worker_loop(worker, &shared, receiver))?;
            pool.handles.push(handle);
        }

        debug!("task pool started with {} threads", num_threads);
        Ok(pool)
    }

    /// Spawns one worker per available core, but no fewer than eight.
    pub fn with_default_threads() -> Result<TaskThreadPool, PoolError> {
        let cores = thread::available_parallelism().map_or(1, |n| n.get());
        TaskThreadPool::new(cores.max(MIN_DEFAULT_THREADS))
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Number of tasks waiting for a worker.
    pub fn num_queued_tasks(&self) -> usize {
        self.shared.state.lock().queued_tasks.len()
    }

    /// Schedules `task`. Tasks added after [`TaskThreadPool::destroy`] are abandoned right away.
    pub fn add_task<T>(&self, task: T)
    where
        T: ThreadTask + 'static,
    {
        let task: BoxedTask = Box::new(task);
        let worker = {
            let mut state = self.shared.state.lock();
            if state.time_to_die {
                drop(state);
                task.abandon();
                return;
            }
            match state.idle_workers.pop() {
                Some(worker) => worker,
                None => {
                    state.queued_tasks.push_back(task);
                    return;
                }
            }
        };

        if let Err(SendError(WorkerMessage::DoWork(task))) =
            self.shared.workers[worker].send(WorkerMessage::DoWork(task))
        {
            warn!("TaskThread {} is gone, abandoning task", worker);
            task.abandon();
        }
    }

    /// Abandons every queued task, lets running tasks finish and joins all workers.
    pub fn destroy(&mut self) {
        if self.handles.is_empty() {
            return;
        }

        let abandoned: Vec<BoxedTask> = {
            let mut state = self.shared.state.lock();
            state.time_to_die = true;
            state.queued_tasks.drain(..).collect()
        };
        if !abandoned.is_empty() {
            debug!("abandoning {} queued tasks", abandoned.len());
        }
        for task in abandoned {
            task.abandon();
        }

        for sender in &self.shared.workers {
            // Workers that already exited have dropped their receiver.
            let _ = sender.send(WorkerMessage::Shutdown);
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("a task thread panicked");
            }
        }
        debug!("task pool stopped");
    }
}

impl Drop for TaskThreadPool {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn worker_loop(worker: usize, shared: &Shared, receiver: Receiver<WorkerMessage>) {
    while let Ok(message) = receiver.recv() {
        match message {
            WorkerMessage::DoWork(task) => {
                let mut next = Some(task);
                while let Some(task) = next.take() {
                    // A panicking task is dropped mid-unwind; the worker keeps serving.
                    let result = panic::catch_unwind(AssertUnwindSafe(|| task.do_threaded_work()));
                    if result.is_err() {
                        warn!("a task panicked on TaskThread {}", worker);
                    }
                    next = shared.return_to_pool_or_get_next_job(worker);
                }
            }
            WorkerMessage::Shutdown => break,
        }
    }
}
