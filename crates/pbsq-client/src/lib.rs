pub mod agent;
pub mod backend;
pub mod error;
pub mod kill;
pub mod registry;
pub mod status;
pub mod store;
pub mod submission;

pub use error::{ClientError, Result};
