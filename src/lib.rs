pub mod clean;
pub mod cli;
pub mod environment;
pub mod error;
pub mod graph;
pub mod linearize;
pub mod logging;
pub mod plugin;
pub mod scheduler;
pub mod target;

pub use environment::{EnvValue, Environment};
pub use error::{Result, SandwormError};
pub use target::{BuilderFn, Target};
