pub mod config;
pub mod constants;
pub mod context;
pub mod errors;
pub mod logging;
pub mod model;
pub mod pattern;
pub mod template;
