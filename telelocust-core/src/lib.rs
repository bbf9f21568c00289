//! # Telelocust Core
//!
//! Run orchestration for short-lived load tests: every submission gets an
//! isolated workspace, one external load-generator process, and an entry in
//! an in-memory registry that callers poll until the run is terminal.
//!
//! ## Components
//!
//! - [`store`]: per-run workspace layout and zip packaging of artifacts
//! - [`registry`]: concurrency-safe token -> run map with per-run locking
//! - [`supervisor`]: worker spawning, non-blocking polling, finalization
//! - [`orchestrator`]: the [`RunOrchestrator`] facade used by transports
//!
//! ## Run lifecycle
//!
//! ```text
//! Started --(first poll, alive)--> Running --(exit 0 + result.json)--> Finished
//!                                          \--(nonzero / bad result)--> Failed
//! ```
//!
//! Spawn failures are returned from [`RunOrchestrator::submit`] and never
//! register a run.
//!
//! ## Feature Flags
//!
//! - `test-utils`: exposes `testing`, a fake load generator for test suites

pub mod error;
pub mod orchestrator;
pub mod params;
pub mod registry;
pub mod run;
pub mod store;
pub mod supervisor;
pub mod token;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use error::{OrchestratorError, Result};
pub use orchestrator::RunOrchestrator;
pub use params::{JobTemplate, ParametersView, RunOverrides, RunParameters, ValidationError};
pub use registry::RunRegistry;
pub use run::{Run, RunSnapshot, RunState, RunSummary};
pub use store::{ArtifactStore, WorkspaceLayout};
pub use supervisor::{ProcessSupervisor, WorkerConfig};
pub use token::RunToken;
