//! CLI command implementations.
//!
//! | Module     | Commands handled        |
//! |------------|-------------------------|
//! | `run`      | `Run`                   |
//! | `workflow` | `List`, `Validate`      |

pub mod run;
pub mod workflow;

pub use run::cmd_run;
pub use workflow::{cmd_list, cmd_validate};

/// Process exit code for a fully successful run.
pub const EXIT_SUCCESS: i32 = 0;
/// Process exit code when a block exhausted its retries.
pub const EXIT_RUN_FAILED: i32 = 1;
/// Process exit code for workflow validation failures.
pub const EXIT_INVALID_WORKFLOW: i32 = 2;
