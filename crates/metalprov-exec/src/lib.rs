//! metalprov-exec: External process execution
//!
//! Runs driver scripts and configuration tooling as child processes, feeding
//! stdin while draining stdout and stderr concurrently.

pub mod error;
pub mod local;
pub mod result;
pub mod traits;

pub use error::ExecError;
pub use local::LocalRunner;
pub use result::{CommandLine, CommandResult, RunOptions};
pub use traits::CommandRunner;
