//! Cumulative routing metrics.
//!
//! In-memory and concurrency-safe. Counters only ever grow; the per-decision
//! history is a bounded rolling window.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

use super::TokenSavings;

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Dollars saved per 1k tokens not sent.
    pub cost_per_1k_tokens: f64,
    pub history_limit: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            cost_per_1k_tokens: 0.003,
            history_limit: 100,
        }
    }
}

/// Immutable record of one routing decision.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingHistoryEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub command_path: String,
    pub subagent_name: String,
    pub confidence: f64,
    pub fallback_required: bool,
    pub saved_tokens: u64,
    pub routing_time_ms: f64,
}

#[derive(Debug, Default, Clone)]
struct AgentStats {
    calls: u64,
    total_response_secs: f64,
}

#[derive(Default)]
struct MetricsInner {
    total_routings: u64,
    successful_routings: u64,
    fallbacks_required: u64,
    agent_calls: HashMap<String, u64>,
    total_original_tokens: u64,
    total_subagent_tokens: u64,
    total_saved_tokens: u64,
    savings_percent_sum: f64,
    savings_samples: u64,
    routing_time_sum_ms: f64,
    response_stats: HashMap<String, AgentStats>,
    history: VecDeque<RoutingHistoryEntry>,
}

/// Aggregate snapshot for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub total_routings: u64,
    pub successful_routings: u64,
    pub fallbacks_required: u64,
    pub agent_calls: HashMap<String, u64>,
    pub total_original_tokens: u64,
    pub total_subagent_tokens: u64,
    pub total_saved_tokens: u64,
    pub avg_savings_percent: f64,
    pub estimated_cost_saved: f64,
    pub avg_routing_time_ms: f64,
    pub agent_avg_response_secs: HashMap<String, f64>,
    pub history_len: usize,
}

pub struct RoutingMetrics {
    config: MetricsConfig,
    inner: Mutex<MetricsInner>,
}

impl RoutingMetrics {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(MetricsInner::default()),
        }
    }

    /// Record a decision that selected a specialized agent.
    pub fn record_success(
        &self,
        command_path: &str,
        subagent_name: &str,
        confidence: f64,
        savings: &TokenSavings,
        routing_time_ms: f64,
    ) {
        let mut inner = self.inner.lock().expect("metrics mutex poisoned");
        inner.total_routings += 1;
        inner.successful_routings += 1;
        *inner
            .agent_calls
            .entry(subagent_name.to_string())
            .or_insert(0) += 1;
        inner.total_original_tokens += savings.original_tokens;
        inner.total_subagent_tokens += savings.subagent_tokens;
        inner.total_saved_tokens += savings.saved_tokens;
        inner.savings_percent_sum += savings.savings_percent;
        inner.savings_samples += 1;
        inner.routing_time_sum_ms += routing_time_ms;
        let entry = RoutingHistoryEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            command_path: command_path.to_string(),
            subagent_name: subagent_name.to_string(),
            confidence,
            fallback_required: false,
            saved_tokens: savings.saved_tokens,
            routing_time_ms,
        };
        push_history(&mut inner, entry, self.config.history_limit);
    }

    /// Record a decision that fell back to the main agent.
    pub fn record_fallback(&self, command_path: &str, confidence: f64, routing_time_ms: f64) {
        let mut inner = self.inner.lock().expect("metrics mutex poisoned");
        inner.total_routings += 1;
        inner.fallbacks_required += 1;
        *inner
            .agent_calls
            .entry(super::MAIN_AGENT.to_string())
            .or_insert(0) += 1;
        inner.routing_time_sum_ms += routing_time_ms;
        let entry = RoutingHistoryEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            command_path: command_path.to_string(),
            subagent_name: super::MAIN_AGENT.to_string(),
            confidence,
            fallback_required: true,
            saved_tokens: 0,
            routing_time_ms,
        };
        push_history(&mut inner, entry, self.config.history_limit);
    }

    /// Record an execution's wall-clock time against the agent that ran.
    pub fn record_execution(&self, agent: &str, duration_secs: f64) {
        let mut inner = self.inner.lock().expect("metrics mutex poisoned");
        let stats = inner.response_stats.entry(agent.to_string()).or_default();
        stats.calls += 1;
        stats.total_response_secs += duration_secs;
    }

    pub fn fallbacks_required(&self) -> u64 {
        self.inner.lock().expect("metrics mutex poisoned").fallbacks_required
    }

    pub fn total_routings(&self) -> u64 {
        self.inner.lock().expect("metrics mutex poisoned").total_routings
    }

    pub fn history(&self) -> Vec<RoutingHistoryEntry> {
        let inner = self.inner.lock().expect("metrics mutex poisoned");
        inner.history.iter().cloned().collect()
    }

    pub fn summary(&self) -> MetricsSummary {
        let inner = self.inner.lock().expect("metrics mutex poisoned");
        let avg_savings_percent = if inner.savings_samples > 0 {
            inner.savings_percent_sum / inner.savings_samples as f64
        } else {
            0.0
        };
        let avg_routing_time_ms = if inner.total_routings > 0 {
            inner.routing_time_sum_ms / inner.total_routings as f64
        } else {
            0.0
        };
        let agent_avg_response_secs = inner
            .response_stats
            .iter()
            .map(|(name, stats)| {
                let avg = if stats.calls > 0 {
                    stats.total_response_secs / stats.calls as f64
                } else {
                    0.0
                };
                (name.clone(), avg)
            })
            .collect();

        MetricsSummary {
            total_routings: inner.total_routings,
            successful_routings: inner.successful_routings,
            fallbacks_required: inner.fallbacks_required,
            agent_calls: inner.agent_calls.clone(),
            total_original_tokens: inner.total_original_tokens,
            total_subagent_tokens: inner.total_subagent_tokens,
            total_saved_tokens: inner.total_saved_tokens,
            avg_savings_percent,
            estimated_cost_saved: inner.total_saved_tokens as f64 / 1000.0
                * self.config.cost_per_1k_tokens,
            avg_routing_time_ms,
            agent_avg_response_secs,
            history_len: inner.history.len(),
        }
    }

    /// Pretty JSON export. Never fails toward the caller; serialization
    /// problems yield an empty object.
    pub fn export_json(&self) -> String {
        serde_json::to_string_pretty(&self.summary()).unwrap_or_else(|e| {
            tracing::warn!("Metrics export failed: {}", e);
            "{}".to_string()
        })
    }

    /// Plain-text report for the CLI collaborator to print.
    pub fn report(&self) -> String {
        let summary = self.summary();
        let mut out = String::new();
        out.push_str("Routing metrics\n");
        out.push_str(&format!(
            "  routings: {} total, {} to subagents, {} fallbacks\n",
            summary.total_routings, summary.successful_routings, summary.fallbacks_required
        ));
        out.push_str(&format!(
            "  tokens: {} saved of {} ({:.1}% avg)\n",
            summary.total_saved_tokens, summary.total_original_tokens, summary.avg_savings_percent
        ));
        out.push_str(&format!(
            "  estimated cost saved: ${:.4}\n",
            summary.estimated_cost_saved
        ));
        out.push_str(&format!(
            "  avg routing time: {:.2} ms\n",
            summary.avg_routing_time_ms
        ));

        let mut agents: Vec<(&String, &u64)> = summary.agent_calls.iter().collect();
        agents.sort_by(|a, b| a.0.cmp(b.0));
        for (agent, calls) in agents {
            let avg = summary
                .agent_avg_response_secs
                .get(agent)
                .copied()
                .unwrap_or(0.0);
            out.push_str(&format!(
                "  {}: {} calls, {:.1}s avg response\n",
                agent, calls, avg
            ));
        }
        out
    }
}

impl Default for RoutingMetrics {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

fn push_history(inner: &mut MetricsInner, entry: RoutingHistoryEntry, limit: usize) {
    inner.history.push_back(entry);
    while inner.history.len() > limit {
        inner.history.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn savings() -> TokenSavings {
        TokenSavings::compute(80_000, 25_000)
    }

    #[test]
    fn totals_stay_consistent() {
        let metrics = RoutingMetrics::default();
        metrics.record_success("templates/prd.md", "template-writer", 0.8, &savings(), 1.0);
        metrics.record_fallback("misc/unknown.md", 0.0, 0.5);
        metrics.record_success("templates/prd.md", "template-writer", 0.9, &savings(), 2.0);

        let summary = metrics.summary();
        assert_eq!(summary.total_routings, 3);
        assert_eq!(
            summary.total_routings,
            summary.successful_routings + summary.fallbacks_required
        );
        assert_eq!(summary.agent_calls["template-writer"], 2);
        assert_eq!(summary.agent_calls["main"], 1);
    }

    #[test]
    fn cost_saved_uses_configured_rate() {
        let metrics = RoutingMetrics::new(MetricsConfig {
            cost_per_1k_tokens: 0.003,
            history_limit: 100,
        });
        metrics.record_success("x", "a", 1.0, &TokenSavings::compute(101_000, 1_000), 1.0);
        let summary = metrics.summary();
        assert_eq!(summary.total_saved_tokens, 100_000);
        assert!((summary.estimated_cost_saved - 0.3).abs() < 1e-9);
    }

    #[test]
    fn history_is_bounded() {
        let metrics = RoutingMetrics::new(MetricsConfig {
            history_limit: 5,
            ..Default::default()
        });
        for i in 0..12 {
            metrics.record_fallback(&format!("cmd/{}.md", i), 0.1, 1.0);
        }
        let history = metrics.history();
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].command_path, "cmd/7.md");
        assert_eq!(history[4].command_path, "cmd/11.md");
    }

    #[test]
    fn averages_compute() {
        let metrics = RoutingMetrics::default();
        metrics.record_success("x", "a", 1.0, &TokenSavings::compute(100, 50), 2.0);
        metrics.record_success("y", "a", 1.0, &TokenSavings::compute(100, 0), 4.0);
        metrics.record_execution("a", 1.0);
        metrics.record_execution("a", 3.0);

        let summary = metrics.summary();
        assert!((summary.avg_savings_percent - 75.0).abs() < 1e-9);
        assert!((summary.avg_routing_time_ms - 3.0).abs() < 1e-9);
        assert!((summary.agent_avg_response_secs["a"] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn export_is_valid_json() {
        let metrics = RoutingMetrics::default();
        metrics.record_fallback("misc/unknown.md", 0.0, 0.5);
        let raw = metrics.export_json();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["fallbacks_required"], 1);
    }

    #[test]
    fn report_lists_agents_and_totals() {
        let metrics = RoutingMetrics::default();
        metrics.record_success("templates/prd.md", "template-writer", 0.8, &savings(), 1.0);
        metrics.record_fallback("misc/unknown.md", 0.0, 0.5);
        metrics.record_execution("template-writer", 2.0);

        let report = metrics.report();
        assert!(report.contains("routings: 2 total, 1 to subagents, 1 fallbacks"));
        assert!(report.contains("template-writer: 1 calls"));
        assert!(report.contains("main: 1 calls"));
    }

    #[test]
    fn concurrent_recording_is_safe() {
        use std::sync::Arc;
        let metrics = Arc::new(RoutingMetrics::default());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = metrics.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    m.record_fallback("cmd.md", 0.0, 0.1);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.total_routings(), 400);
        assert_eq!(metrics.fallbacks_required(), 400);
    }
}
