pub mod pool;

pub use pool::{Task, WorkerPool};
