//! Context preprocessing contract.
//!
//! A preprocessor inspects the command and its context ahead of routing and
//! returns a narrowed view of what the agent actually needs. The crate only
//! defines the contract; implementations live with the CLI collaborator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ContextData;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Preprocessing failed: {0}")]
    Analysis(String),
}

/// Narrowed context emitted by a preprocessor pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreprocessReport {
    pub relevant_files: Vec<String>,
    pub key_symbols: Vec<String>,
    pub dependencies: Vec<String>,
    /// Replaces the router's own context-size estimate.
    pub reduced_context_size: usize,
    /// Tokens saved on top of the routing estimate.
    pub additional_savings: u64,
}

pub trait ContextPreprocessor: Send + Sync {
    fn analyze(
        &self,
        command_path: &str,
        context: &ContextData,
    ) -> Result<PreprocessReport, PreprocessError>;
}
