//! Execution of routing decisions.
//!
//! A routed command either runs on its specialized agent with a bounded
//! slice of the caller's context, or on the main agent with everything.
//! Subagent failures and timeouts fall back to the main agent when the
//! policy allows; cancellation stops work and reports a Cancelled outcome.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

use super::metrics::RoutingMetrics;
use super::registry::SubAgentRegistry;
use super::router::Router;
use super::spawner::{AgentProcess, CancelHandle, RunOutcome, SpawnError};
use super::{ContextData, RoutingDecision, SubAgentConfig, MAIN_AGENT};
use crate::error::{Classify, ErrorKind};

/// Context keys admitted first when bounding a subagent's context.
const PRIORITY_CONTEXT_KEYS: &[&str] =
    &["task_type", "project_name", "template_type", "command_path"];

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("No subagent available: {0}")]
    SubagentUnavailable(String),

    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

impl Classify for ExecError {
    fn kind(&self) -> ErrorKind {
        match self {
            ExecError::SubagentUnavailable(_) => ErrorKind::NotFound,
            ExecError::Spawn(SpawnError::Timeout(_)) => ErrorKind::Timeout,
            ExecError::Spawn(SpawnError::Cancelled) => ErrorKind::Cancelled,
            ExecError::Spawn(_) => ErrorKind::Io,
        }
    }

    fn remediation(&self) -> Option<&'static str> {
        match self {
            ExecError::SubagentUnavailable(_) => {
                Some("rerun with --no-subagent to fall back to the main agent")
            }
            ExecError::Spawn(SpawnError::Timeout(_)) => {
                Some("raise the timeout or rerun with --no-subagent")
            }
            ExecError::Spawn(SpawnError::Cancelled) => Some("rerun the command when ready"),
            ExecError::Spawn(SpawnError::BinaryNotFound(_)) => {
                Some("install the agent CLI or configure the agent binary path")
            }
            ExecError::Spawn(SpawnError::SpawnFailed(_)) => {
                Some("check the agent binary is executable from the working directory")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub agent_binary: String,
    /// Extra arguments always passed to the agent binary.
    pub agent_args: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Duration,
    pub fallback_enabled: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            agent_binary: "claude".to_string(),
            agent_args: vec![],
            working_dir: PathBuf::from("."),
            timeout: Duration::from_secs(120),
            fallback_enabled: true,
        }
    }
}

/// Outcome of one executed command.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub run_id: Uuid,
    /// Agent that produced the final output.
    pub agent: String,
    pub outcome: RunOutcome,
    pub exit_code: Option<i32>,
    pub output: String,
    /// True when the subagent failed and the main agent re-ran the command.
    pub fallback_used: bool,
    pub duration_secs: f64,
    pub decision: RoutingDecision,
}

pub struct SubAgentExecutor {
    router: Router,
    registry: Arc<SubAgentRegistry>,
    metrics: Arc<RoutingMetrics>,
    config: ExecutorConfig,
}

impl SubAgentExecutor {
    pub fn new(
        registry: Arc<SubAgentRegistry>,
        metrics: Arc<RoutingMetrics>,
        router: Router,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            router,
            registry,
            metrics,
            config,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn metrics(&self) -> &Arc<RoutingMetrics> {
        &self.metrics
    }

    pub async fn execute(
        &self,
        command_path: &str,
        prompt: &str,
        context_data: &ContextData,
    ) -> Result<ExecutionResult, ExecError> {
        self.execute_cancellable(command_path, prompt, context_data, CancelHandle::new())
            .await
    }

    /// Execute with an externally owned cancellation handle.
    pub async fn execute_cancellable(
        &self,
        command_path: &str,
        prompt: &str,
        context_data: &ContextData,
        cancel: CancelHandle,
    ) -> Result<ExecutionResult, ExecError> {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let decision = self.router.route(command_path, context_data);

        if decision.fallback_required || decision.subagent_name == MAIN_AGENT {
            let result = self
                .run_main(run_id, prompt, context_data, decision, false, started, &cancel)
                .await;
            return result;
        }

        let config = match self.registry.get(&decision.subagent_name) {
            Some(config) => config.clone(),
            None => {
                if self.config.fallback_enabled {
                    tracing::warn!(
                        "Routed agent {} vanished from registry, using main",
                        decision.subagent_name
                    );
                    return self
                        .run_main(run_id, prompt, context_data, decision, true, started, &cancel)
                        .await;
                }
                return Err(ExecError::SubagentUnavailable(decision.subagent_name));
            }
        };

        let bounded = build_bounded_context(context_data, config.context_limit_bytes);
        let subagent_prompt = build_subagent_prompt(&config, &bounded, prompt);

        match self.run_process(&subagent_prompt, &cancel).await {
            Ok((Some(0), output)) => {
                let duration_secs = started.elapsed().as_secs_f64();
                self.metrics
                    .record_execution(&decision.subagent_name, duration_secs);
                tracing::info!(
                    "Subagent {} finished {} in {:.1}s",
                    decision.subagent_name,
                    command_path,
                    duration_secs
                );
                Ok(ExecutionResult {
                    run_id,
                    agent: decision.subagent_name.clone(),
                    outcome: RunOutcome::Success,
                    exit_code: Some(0),
                    output,
                    fallback_used: false,
                    duration_secs,
                    decision,
                })
            }
            Ok((exit_code, output)) => {
                tracing::warn!(
                    "Subagent {} exited with {:?} for {}",
                    decision.subagent_name,
                    exit_code,
                    command_path
                );
                if self.config.fallback_enabled {
                    self.run_main(run_id, prompt, context_data, decision, true, started, &cancel)
                        .await
                } else {
                    let duration_secs = started.elapsed().as_secs_f64();
                    self.metrics
                        .record_execution(&decision.subagent_name, duration_secs);
                    Ok(ExecutionResult {
                        run_id,
                        agent: decision.subagent_name.clone(),
                        outcome: RunOutcome::Error,
                        exit_code,
                        output,
                        fallback_used: false,
                        duration_secs,
                        decision,
                    })
                }
            }
            Err(SpawnError::Timeout(secs)) => {
                tracing::warn!(
                    "Subagent {} timed out after {}s for {}",
                    decision.subagent_name,
                    secs,
                    command_path
                );
                if self.config.fallback_enabled {
                    self.run_main(run_id, prompt, context_data, decision, true, started, &cancel)
                        .await
                } else {
                    let duration_secs = started.elapsed().as_secs_f64();
                    self.metrics
                        .record_execution(&decision.subagent_name, duration_secs);
                    Ok(ExecutionResult {
                        run_id,
                        agent: decision.subagent_name.clone(),
                        outcome: RunOutcome::Timeout,
                        exit_code: None,
                        output: String::new(),
                        fallback_used: false,
                        duration_secs,
                        decision,
                    })
                }
            }
            Err(SpawnError::Cancelled) => {
                let duration_secs = started.elapsed().as_secs_f64();
                self.metrics
                    .record_execution(&decision.subagent_name, duration_secs);
                Ok(ExecutionResult {
                    run_id,
                    agent: decision.subagent_name.clone(),
                    outcome: RunOutcome::Cancelled,
                    exit_code: None,
                    output: String::new(),
                    fallback_used: false,
                    duration_secs,
                    decision,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Template generation wrapper: canonical command path and context.
    pub async fn execute_template(
        &self,
        kind: &str,
        vars: &ContextData,
    ) -> Result<ExecutionResult, ExecError> {
        let command_path = format!("templates/{}-template.md", kind);
        let mut context = vars.clone();
        context.insert("task_type".to_string(), serde_json::json!("template"));
        context.insert("template_type".to_string(), serde_json::json!(kind));
        let prompt = format!("Generate the {} template from the provided context.", kind);
        self.execute(&command_path, &prompt, &context).await
    }

    /// Status reporting wrapper.
    pub async fn execute_status(
        &self,
        kind: &str,
        state: &ContextData,
    ) -> Result<ExecutionResult, ExecError> {
        let command_path = format!("status/{}-status.md", kind);
        let mut context = state.clone();
        context.insert("task_type".to_string(), serde_json::json!("status"));
        let prompt = format!("Produce a {} status report from the provided state.", kind);
        self.execute(&command_path, &prompt, &context).await
    }

    /// Story planning wrapper.
    pub async fn execute_planning(
        &self,
        story_description: &str,
        tech_context: &str,
    ) -> Result<ExecutionResult, ExecError> {
        let command_path = "planning/story-decompose.md".to_string();
        let mut context = ContextData::new();
        context.insert("task_type".to_string(), serde_json::json!("planning"));
        context.insert(
            "story_description".to_string(),
            serde_json::json!(story_description),
        );
        context.insert(
            "technical_context".to_string(),
            serde_json::json!(tech_context),
        );
        let prompt = "Decompose the story into ordered, independently testable tasks.";
        self.execute(&command_path, prompt, &context).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_main(
        &self,
        run_id: Uuid,
        prompt: &str,
        context_data: &ContextData,
        decision: RoutingDecision,
        fallback_used: bool,
        started: Instant,
        cancel: &CancelHandle,
    ) -> Result<ExecutionResult, ExecError> {
        let main_prompt = build_main_prompt(context_data, prompt);
        let (exit_code, output, outcome) = match self.run_process(&main_prompt, cancel).await {
            Ok((code, output)) => {
                let outcome = if code == Some(0) {
                    RunOutcome::Success
                } else {
                    RunOutcome::Error
                };
                (code, output, outcome)
            }
            Err(SpawnError::Timeout(_)) => (None, String::new(), RunOutcome::Timeout),
            Err(SpawnError::Cancelled) => (None, String::new(), RunOutcome::Cancelled),
            Err(e) => return Err(e.into()),
        };

        let duration_secs = started.elapsed().as_secs_f64();
        self.metrics.record_execution(MAIN_AGENT, duration_secs);
        Ok(ExecutionResult {
            run_id,
            agent: MAIN_AGENT.to_string(),
            outcome,
            exit_code,
            output,
            fallback_used,
            duration_secs,
            decision,
        })
    }

    async fn run_process(
        &self,
        prompt: &str,
        cancel: &CancelHandle,
    ) -> Result<(Option<i32>, String), SpawnError> {
        let binary = self.config.agent_binary.clone();
        let args = self.config.agent_args.clone();
        let working_dir = self.config.working_dir.clone();
        let timeout = self.config.timeout;
        let prompt = prompt.to_string();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || {
            let process = AgentProcess::spawn(&binary, &args, &working_dir, &prompt)?;
            process.wait(Some(timeout), &cancel)
        })
        .await
        .map_err(|e| SpawnError::SpawnFailed(std::io::Error::other(e)))?
    }
}

/// Admit context entries up to the byte budget. Priority keys go first, the
/// rest in sorted order; string values count toward the budget, non-string
/// values ride along uncounted.
pub fn build_bounded_context(context: &ContextData, limit: usize) -> ContextData {
    let mut ordered: Vec<String> = Vec::new();
    for key in PRIORITY_CONTEXT_KEYS {
        if context.contains_key(*key) {
            ordered.push(key.to_string());
        }
    }
    let mut rest: Vec<String> = context
        .keys()
        .filter(|k| !PRIORITY_CONTEXT_KEYS.contains(&k.as_str()))
        .cloned()
        .collect();
    rest.sort();
    ordered.extend(rest);

    let mut bounded = ContextData::new();
    let mut total = 0usize;
    for key in ordered {
        let Some(value) = context.get(&key) else {
            continue;
        };
        if let Some(s) = value.as_str() {
            if total + s.len() >= limit {
                tracing::debug!("Context key {} dropped by budget", key);
                continue;
            }
            total += s.len();
        }
        bounded.insert(key, value.clone());
    }
    bounded
}

fn render_value(value: &serde_json::Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

/// System prompt, bounded context, the original prompt, then constraints.
fn build_subagent_prompt(config: &SubAgentConfig, bounded: &ContextData, prompt: &str) -> String {
    let mut out = String::new();
    out.push_str(&config.system_prompt);
    out.push_str("\n\n## Context\n");
    for (key, value) in bounded {
        out.push_str(&format!("- {}: {}\n", key, render_value(value)));
    }
    out.push('\n');
    out.push_str(prompt);
    out.push_str("\n\n## Constraints\n");
    out.push_str(&format!(
        "Allowed tools: {}\n",
        config.allowed_tools.join(", ")
    ));
    out
}

/// Full context and the prompt, nothing withheld.
fn build_main_prompt(context: &ContextData, prompt: &str) -> String {
    let mut out = String::new();
    if !context.is_empty() {
        out.push_str("## Context\n");
        for (key, value) in context {
            out.push_str(&format!("- {}: {}\n", key, render_value(value)));
        }
        out.push('\n');
    }
    out.push_str(prompt);
    out
}
