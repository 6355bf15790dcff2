//! Pattern-scored routing of commands to specialized agents.

use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Instant;

use super::metrics::RoutingMetrics;
use super::preprocess::{ContextPreprocessor, PreprocessError};
use super::registry::SubAgentRegistry;
use super::{
    Complexity, ContextData, RouteContext, RoutePriority, RoutingDecision, SubAgentConfig,
    TaskType, TokenSavings, MAIN_AGENT,
};

/// Fixed overhead added to every context-size estimate for prompt scaffolding.
const CONTEXT_BASE_OVERHEAD: usize = 5_000;

const COMPLEXITY_UPGRADE_BYTES: usize = 50_000;
const COMPLEXITY_DOUBLE_UPGRADE_BYTES: usize = 100_000;

/// Tokens a subagent consumes beyond its context budget.
const SUBAGENT_TOKEN_OVERHEAD: u64 = 1_000;

static TEMPLATE_KEYWORDS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["template", "architecture.md", "prd.md", "technical.md"]);
static STATUS_KEYWORDS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["status", "dashboard", "debug", "metrics"]);
static PLANNING_KEYWORDS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["plan", "decompose", "estimate"]);
static REVIEW_KEYWORDS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["review", "validate", "architecture-review"]);
static CRITICAL_KEYWORDS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["implement", "security", "production"]);

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Matches scoring below this confidence fall back to the main agent.
    pub confidence_threshold: f64,
    /// Route via the base path when a preprocessor fails.
    pub preprocess_fallback: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
            preprocess_fallback: true,
        }
    }
}

pub struct Router {
    registry: Arc<SubAgentRegistry>,
    metrics: Arc<RoutingMetrics>,
    config: RouterConfig,
}

impl Router {
    pub fn new(
        registry: Arc<SubAgentRegistry>,
        metrics: Arc<RoutingMetrics>,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            metrics,
            config,
        }
    }

    pub fn metrics(&self) -> &Arc<RoutingMetrics> {
        &self.metrics
    }

    pub fn registry(&self) -> &Arc<SubAgentRegistry> {
        &self.registry
    }

    /// Score the command path against every registered agent and emit a
    /// routing decision, falling back to the main agent below the
    /// confidence threshold.
    pub fn route(&self, command_path: &str, context_data: &ContextData) -> RoutingDecision {
        let started = Instant::now();
        let context = derive_route_context(command_path, context_data);
        let candidate = self.match_subagent(command_path);
        self.finish_route(command_path, context, candidate, started)
    }

    /// Route with a preprocessor pass merged into the context. A failing
    /// preprocessor either degrades to the base route or surfaces its error,
    /// depending on configuration.
    pub fn route_preprocessed(
        &self,
        preprocessor: &dyn ContextPreprocessor,
        command_path: &str,
        context_data: &ContextData,
    ) -> Result<RoutingDecision, PreprocessError> {
        let report = match preprocessor.analyze(command_path, context_data) {
            Ok(report) => report,
            Err(e) => {
                if self.config.preprocess_fallback {
                    tracing::warn!("Preprocessor failed for {}: {}, routing without it", command_path, e);
                    return Ok(self.route(command_path, context_data));
                }
                return Err(e);
            }
        };

        let started = Instant::now();
        let mut merged = context_data.clone();
        merged.insert(
            "relevant_files".to_string(),
            serde_json::json!(report.relevant_files),
        );
        merged.insert(
            "key_symbols".to_string(),
            serde_json::json!(report.key_symbols),
        );
        merged.insert(
            "dependencies".to_string(),
            serde_json::json!(report.dependencies),
        );

        let mut context = derive_route_context(command_path, &merged);
        context.estimated_context_size = report.reduced_context_size;

        let candidate = self.match_subagent(command_path);
        let mut decision = self.finish_route(command_path, context, candidate, started);
        if let Some(savings) = decision.estimated_savings.as_mut() {
            savings.saved_tokens += report.additional_savings;
            savings.savings_percent = if savings.original_tokens > 0 {
                savings.saved_tokens as f64 / savings.original_tokens as f64 * 100.0
            } else {
                0.0
            };
        }
        Ok(decision)
    }

    /// Best-scoring agent for the command path, if any pattern matches.
    pub fn match_subagent(&self, command_path: &str) -> Option<(&SubAgentConfig, f64)> {
        let path = command_path.to_lowercase();
        let mut best: Option<(&SubAgentConfig, f64)> = None;
        for config in self.registry.list() {
            if config.trigger_patterns.is_empty() {
                continue;
            }
            let matched = config
                .trigger_patterns
                .iter()
                .filter(|p| path.contains(&p.to_lowercase()))
                .count();
            if matched == 0 {
                continue;
            }
            let ratio = matched as f64 / config.trigger_patterns.len() as f64;
            let confidence = (0.4 + 0.6 * ratio).min(1.0);
            if best.map(|(_, c)| confidence > c).unwrap_or(true) {
                best = Some((config, confidence));
            }
        }
        best
    }

    fn finish_route(
        &self,
        command_path: &str,
        context: RouteContext,
        candidate: Option<(&SubAgentConfig, f64)>,
        started: Instant,
    ) -> RoutingDecision {
        let routing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        match candidate {
            Some((config, confidence)) if confidence >= self.config.confidence_threshold => {
                let savings = estimate_savings(&context, config);
                self.metrics.record_success(
                    command_path,
                    &config.name,
                    confidence,
                    &savings,
                    routing_time_ms,
                );
                tracing::debug!(
                    "Routed {} to {} (confidence {:.2})",
                    command_path,
                    config.name,
                    confidence
                );
                RoutingDecision {
                    subagent_name: config.name.clone(),
                    confidence,
                    reason: format!(
                        "matched_trigger_patterns_confidence_{:.2}",
                        confidence
                    ),
                    estimated_savings: Some(savings),
                    fallback_required: false,
                    context,
                }
            }
            other => {
                let confidence = other.map(|(_, c)| c).unwrap_or(0.0);
                self.metrics
                    .record_fallback(command_path, confidence, routing_time_ms);
                tracing::debug!(
                    "No suitable agent for {} (confidence {:.2}), falling back",
                    command_path,
                    confidence
                );
                RoutingDecision {
                    subagent_name: MAIN_AGENT.to_string(),
                    confidence,
                    reason: format!("no_suitable_subagent_confidence_{:.2}", confidence),
                    estimated_savings: None,
                    fallback_required: true,
                    context,
                }
            }
        }
    }
}

/// Baseline token cost of handling a task type with the main agent.
pub fn baseline_tokens(task_type: TaskType) -> u64 {
    match task_type {
        TaskType::Template => 70_000,
        TaskType::Status => 45_000,
        TaskType::Planning => 100_000,
        TaskType::Review => 120_000,
        TaskType::General => 80_000,
    }
}

fn estimate_savings(context: &RouteContext, config: &SubAgentConfig) -> TokenSavings {
    let baseline = baseline_tokens(context.task_type);
    let scaled = context.estimated_context_size as u64 * 4;
    let original = baseline.max(scaled);
    let subagent = config.context_limit_bytes as u64 + SUBAGENT_TOKEN_OVERHEAD;
    TokenSavings::compute(original, subagent)
}

/// Heuristic classification of the command path.
pub fn derive_task_type(command_path: &str) -> TaskType {
    let path = command_path.to_lowercase();
    if TEMPLATE_KEYWORDS.iter().any(|k| path.contains(k)) {
        TaskType::Template
    } else if STATUS_KEYWORDS.iter().any(|k| path.contains(k)) {
        TaskType::Status
    } else if PLANNING_KEYWORDS.iter().any(|k| path.contains(k)) {
        TaskType::Planning
    } else if REVIEW_KEYWORDS.iter().any(|k| path.contains(k)) {
        TaskType::Review
    } else {
        TaskType::General
    }
}

/// String values count toward the size; everything else is free.
pub fn estimate_context_size(context_data: &ContextData) -> usize {
    let strings: usize = context_data
        .values()
        .filter_map(|v| v.as_str())
        .map(str::len)
        .sum();
    strings + CONTEXT_BASE_OVERHEAD
}

fn derive_complexity(task_type: TaskType, context_size: usize) -> Complexity {
    let base = match task_type {
        TaskType::Template | TaskType::Status => Complexity::Low,
        TaskType::Planning => Complexity::High,
        TaskType::Review | TaskType::General => Complexity::Medium,
    };
    if context_size > COMPLEXITY_DOUBLE_UPGRADE_BYTES {
        base.upgraded().upgraded()
    } else if context_size > COMPLEXITY_UPGRADE_BYTES {
        base.upgraded()
    } else {
        base
    }
}

fn derive_priority(command_path: &str, task_type: TaskType) -> RoutePriority {
    let path = command_path.to_lowercase();
    if CRITICAL_KEYWORDS.iter().any(|k| path.contains(k)) {
        return RoutePriority::Critical;
    }
    if path.contains("review") || path.contains("validate") {
        return RoutePriority::High;
    }
    match task_type {
        TaskType::Planning | TaskType::Template => RoutePriority::Medium,
        TaskType::Status => RoutePriority::Low,
        TaskType::Review => RoutePriority::High,
        TaskType::General => RoutePriority::Medium,
    }
}

pub fn derive_route_context(command_path: &str, context_data: &ContextData) -> RouteContext {
    let task_type = derive_task_type(command_path);
    let estimated_context_size = estimate_context_size(context_data);
    RouteContext {
        command_path: command_path.to_string(),
        task_type,
        estimated_context_size,
        complexity: derive_complexity(task_type, estimated_context_size),
        priority: derive_priority(command_path, task_type),
    }
}
