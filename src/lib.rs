//! epicflow: epic workflow engine with content-addressed tree sync and
//! sub-agent routing.
//!
//! Three subsystems back the CLI collaborator:
//!
//! - [`workflow`]: the epic state machine. Validated transitions, derived
//!   progress, history and events, subscribers, and background
//!   reconciliation from story state.
//! - [`sync`]: content-addressed diffing of two directory trees, plan
//!   construction with glob filtering, dry-run/apply semantics, and
//!   deterministic manifest regeneration.
//! - [`agents`]: pattern-scored routing of commands to specialized agents
//!   with token-budget accounting, bounded-context execution, fallback, and
//!   metrics.
//!
//! Persistence is plain JSON under a project root ([`store`]); presentation,
//! flag parsing, and hook installation are external collaborators.

pub mod agents;
pub mod error;
pub mod logging;
pub mod store;
pub mod sync;
pub mod workflow;

pub use error::{Classify, ErrorKind};
pub use store::{EpicStore, StoreError};
pub use workflow::{WorkflowConfig, WorkflowEngine, WorkflowError};
