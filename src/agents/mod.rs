//! Sub-agent routing and execution.
//!
//! A command path is scored against the trigger patterns of every registered
//! sub-agent; the winning agent runs with a bounded slice of the caller's
//! context, and anything below the confidence threshold falls back to the
//! main agent with full context. Every decision and execution feeds the
//! metrics recorder.

pub mod executor;
pub mod metrics;
pub mod preprocess;
pub mod registry;
pub mod router;
pub mod spawner;

use serde::{Deserialize, Serialize};

pub use executor::{ExecError, ExecutionResult, ExecutorConfig, SubAgentExecutor};
pub use metrics::{MetricsConfig, MetricsSummary, RoutingHistoryEntry, RoutingMetrics};
pub use preprocess::{ContextPreprocessor, PreprocessError, PreprocessReport};
pub use registry::{RegistryError, SubAgentRegistry};
pub use router::{Router, RouterConfig};
pub use spawner::{AgentProcess, CancelHandle, RunOutcome, SpawnError};

/// Name routed to when no specialized agent qualifies.
pub const MAIN_AGENT: &str = "main";

/// Context entries passed alongside a command, keyed by name. String values
/// count toward the context budget; other values ride along uncounted.
pub type ContextData = serde_json::Map<String, serde_json::Value>;

/// Configuration of one specialized agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentConfig {
    pub name: String,
    pub system_prompt: String,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Substrings matched case-insensitively against the command path.
    #[serde(default)]
    pub trigger_patterns: Vec<String>,
    pub context_limit_bytes: usize,
    #[serde(default)]
    pub cost_tier: CostTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostTier {
    Low,
    Medium,
    High,
}

impl Default for CostTier {
    fn default() -> Self {
        CostTier::Medium
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Template,
    Status,
    Planning,
    Review,
    General,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Template => "template",
            TaskType::Status => "status",
            TaskType::Planning => "planning",
            TaskType::Review => "review",
            TaskType::General => "general",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    /// One step up the ladder; High saturates.
    pub fn upgraded(self) -> Self {
        match self {
            Complexity::Low => Complexity::Medium,
            Complexity::Medium | Complexity::High => Complexity::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutePriority {
    Low,
    Medium,
    High,
    Critical,
}

/// Everything the router derived about one command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteContext {
    pub command_path: String,
    pub task_type: TaskType,
    pub estimated_context_size: usize,
    pub complexity: Complexity,
    pub priority: RoutePriority,
}

/// Token accounting for one routing decision. Always non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenSavings {
    pub original_tokens: u64,
    pub subagent_tokens: u64,
    pub saved_tokens: u64,
    pub savings_percent: f64,
}

impl TokenSavings {
    pub fn compute(original_tokens: u64, subagent_tokens: u64) -> Self {
        let saved_tokens = original_tokens.saturating_sub(subagent_tokens);
        let savings_percent = if original_tokens > 0 {
            saved_tokens as f64 / original_tokens as f64 * 100.0
        } else {
            0.0
        };
        Self {
            original_tokens,
            subagent_tokens,
            saved_tokens,
            savings_percent,
        }
    }
}

/// Outcome of routing one command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub subagent_name: String,
    /// In [0, 1].
    pub confidence: f64,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_savings: Option<TokenSavings>,
    pub fallback_required: bool,
    pub context: RouteContext,
}
