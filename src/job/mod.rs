//! A fixed size pool of worker threads used to load assets and build bottom level
//! hierarchies in parallel.

mod task_thread_pool;

pub use self::task_thread_pool::{PoolError, TaskThreadPool, ThreadTask};
