pub mod control;
pub mod engine;
mod error;
pub mod result;
pub mod runner;
pub mod topology;

pub use engine::{ExecutorSettings, MasterTaskExecutor};
pub use error::{ExecutorError, Result};
pub use result::{CombinedResult, FanOutState};
pub use runner::{ShellSubTaskRunner, SubTaskRequest, SubTaskResult, SubTaskRunner};
