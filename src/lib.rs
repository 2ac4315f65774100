//! Workflow ledger and governance gates for multi-agent document pipelines.
//!
//! A project names one workflow [`manifest`]. Agents are activated one at a
//! time through the [`orchestrator::Orchestrator`], which checks [`gate`]
//! preconditions and records every transition in the append-only
//! [`ledger`].

pub mod errors;
pub mod gate;
pub mod ledger;
pub mod manifest;
pub mod orchestrator;
pub mod paths;
pub mod project;
pub mod session;
pub mod status;

#[cfg(test)]
mod test_support;

pub use errors::{Result, WorkflowError};
pub use orchestrator::Orchestrator;
pub use project::GovernanceMode;
pub use session::SessionState;
