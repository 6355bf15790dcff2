//! Epic workflow engine.
//!
//! Owns every legal mutation of an epic's status, recomputes derived
//! progress, records transition history and events, notifies subscribers,
//! and applies the auto-transition rules driven by story state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

use super::rules::{can_transition, TransitionPermission};
use crate::error::{Classify, ErrorKind};
use crate::store::models::{
    Epic, EpicCollection, EpicStatus, Priority, ProgressMetrics, StoryStatus, UserStory,
};
use crate::store::{EpicStore, StoreError};

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Epic not found: {0}")]
    NotFound(String),

    #[error("Transition from {from} to {to} is not allowed")]
    InvalidTransition { from: EpicStatus, to: EpicStatus },

    #[error("Backward transition from {from} to {to} is disabled")]
    BackwardDisabled { from: EpicStatus, to: EpicStatus },

    #[error("Progress {observed:.1}% is below the required {required:.1}% for completion")]
    ProgressInsufficient { required: f64, observed: f64 },

    #[error("Epic {id} cannot be selected while {status}")]
    NotSelectable { id: String, status: EpicStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Classify for WorkflowError {
    fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::InvalidInput(_) => ErrorKind::InvalidInput,
            WorkflowError::NotFound(_) => ErrorKind::NotFound,
            WorkflowError::InvalidTransition { .. }
            | WorkflowError::BackwardDisabled { .. }
            | WorkflowError::ProgressInsufficient { .. }
            | WorkflowError::NotSelectable { .. } => ErrorKind::WorkflowViolation,
            WorkflowError::Store(e) => e.kind(),
        }
    }

    fn remediation(&self) -> Option<&'static str> {
        match self {
            WorkflowError::InvalidInput(_) => {
                Some("provide a non-blank title and a priority in P0..P3")
            }
            WorkflowError::NotFound(_) => Some("list epics to find a valid id"),
            WorkflowError::InvalidTransition { .. } => {
                Some("check the epic's current status for the transitions it allows")
            }
            WorkflowError::BackwardDisabled { .. } => {
                Some("retry with --allow-backward-transitions")
            }
            WorkflowError::ProgressInsufficient { .. } => {
                Some("advance story completion before completing the epic")
            }
            WorkflowError::NotSelectable { .. } => {
                Some("select an epic that is planned or in progress")
            }
            WorkflowError::Store(e) => e.remediation(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub auto_transition_enabled: bool,
    pub allow_backward_transitions: bool,
    pub require_progress_for_completion: bool,
    /// Completion percentage an epic must reach before Completed is legal.
    pub min_progress_for_completion: f64,
    /// Auto-hold epics in progress longer than this. Zero disables the bound.
    pub max_duration_days: i64,
    pub max_history_entries: usize,
    /// Period of the background reconciliation loop.
    pub progress_update_freq: std::time::Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            auto_transition_enabled: true,
            allow_backward_transitions: false,
            require_progress_for_completion: true,
            min_progress_for_completion: 100.0,
            max_duration_days: 0,
            max_history_entries: 100,
            progress_update_freq: std::time::Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    Manual,
    Auto,
}

impl TriggeredBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggeredBy::Manual => "manual",
            TriggeredBy::Auto => "auto",
        }
    }
}

/// One applied status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: EpicStatus,
    pub to: EpicStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub triggered_by: TriggeredBy,
    /// Completion percentage at the moment the transition applied.
    pub progress: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    EpicCreated,
    EpicUpdated,
    EpicDeleted,
    TransitionApplied,
    ValidationError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub epic_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Observer invoked for each applied transition, inside the transition's
/// critical section after persistence succeeds. Implementations must not
/// block; heavy work belongs on a channel consumed elsewhere.
pub trait TransitionSubscriber: Send + Sync {
    fn on_transition(&self, epic: &Epic, transition: &StateTransition) -> Result<(), String>;
}

#[derive(Debug, Clone, Default)]
pub struct CreateEpicOptions {
    pub title: String,
    pub description: String,
    /// Priority label ("P0".."P3"); defaults to P2 when unset.
    pub priority: Option<String>,
    pub duration: Option<String>,
    pub tags: Vec<String>,
    pub dependencies: Vec<String>,
}

/// Partial update applied by `update_epic`.
#[derive(Debug, Clone, Default)]
pub struct EpicPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub status: Option<EpicStatus>,
    pub duration: Option<String>,
    pub tags: Option<Vec<String>>,
    pub dependencies: Option<Vec<String>>,
    pub user_stories: Option<Vec<UserStory>>,
    /// Reason recorded when the patch includes a status change.
    pub reason: Option<String>,
}

/// Advanced per-epic metrics derived from history and progress.
#[derive(Debug, Clone, Serialize)]
pub struct EpicMetrics {
    pub total_duration_secs: i64,
    pub duration_days: i64,
    pub transition_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition: Option<DateTime<Utc>>,
    pub avg_secs_between_transitions: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_completion: Option<DateTime<Utc>>,
}

struct TrackerState {
    history: HashMap<String, Vec<StateTransition>>,
    events: Vec<WorkflowEvent>,
    subscribers: Vec<Box<dyn TransitionSubscriber>>,
}

/// The workflow engine. Safe for concurrent use; every mutating operation
/// runs under the exclusive lock, reads under the shared lock.
pub struct WorkflowEngine {
    store: EpicStore,
    config: WorkflowConfig,
    inner: RwLock<TrackerState>,
}

impl WorkflowEngine {
    pub fn new(store: EpicStore, config: WorkflowConfig) -> Self {
        Self {
            store,
            config,
            inner: RwLock::new(TrackerState {
                history: HashMap::new(),
                events: Vec::new(),
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn store(&self) -> &EpicStore {
        &self.store
    }

    /// Register a transition observer. Errors from the observer are logged
    /// as validation-error events and never roll back a transition.
    pub fn subscribe(&self, subscriber: Box<dyn TransitionSubscriber>) {
        let mut state = self.inner.write().expect("tracker lock poisoned");
        state.subscribers.push(subscriber);
    }

    pub fn create_epic(&self, options: CreateEpicOptions) -> Result<Epic, WorkflowError> {
        if options.title.trim().is_empty() {
            return Err(WorkflowError::InvalidInput(
                "epic title must not be blank".to_string(),
            ));
        }
        let priority = match options.priority.as_deref() {
            None | Some("") => Priority::default(),
            Some(label) => Priority::from_str(label).ok_or_else(|| {
                WorkflowError::InvalidInput(format!("invalid priority: {}", label))
            })?,
        };

        let mut state = self.inner.write().expect("tracker lock poisoned");
        let mut collection = self.store.load()?;

        let id = generate_epic_id(&collection, &options.title);
        let now = Utc::now();
        let epic = Epic {
            id: id.clone(),
            title: options.title.trim().to_string(),
            description: options.description,
            priority,
            status: EpicStatus::Planned,
            start_date: None,
            end_date: None,
            duration: options.duration,
            tags: options.tags,
            dependencies: options.dependencies,
            user_stories: vec![],
            progress: ProgressMetrics::default(),
            created_at: now,
            updated_at: now,
        };
        collection.epics.insert(id.clone(), epic.clone());
        self.store.save(&mut collection)?;

        push_event(
            &mut state,
            &self.config,
            EventKind::EpicCreated,
            &id,
            format!("epic created: {}", epic.title),
        );
        tracing::info!("Created epic {} ({})", id, epic.title);
        Ok(epic)
    }

    pub fn update_epic(&self, id: &str, patch: EpicPatch) -> Result<Epic, WorkflowError> {
        let mut state = self.inner.write().expect("tracker lock poisoned");
        let mut collection = self.store.load()?;
        let epic = collection
            .epics
            .get_mut(id)
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?;

        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(WorkflowError::InvalidInput(
                    "epic title must not be blank".to_string(),
                ));
            }
        }

        if let Some(title) = patch.title {
            epic.title = title.trim().to_string();
        }
        if let Some(description) = patch.description {
            epic.description = description;
        }
        if let Some(priority) = patch.priority {
            epic.priority = priority;
        }
        if let Some(duration) = patch.duration {
            epic.duration = Some(duration);
        }
        if let Some(tags) = patch.tags {
            epic.tags = tags;
        }
        if let Some(dependencies) = patch.dependencies {
            epic.dependencies = dependencies;
        }
        if let Some(stories) = patch.user_stories {
            epic.user_stories = stories;
        }

        // Status last, so a patch that also rewrites the story list is
        // validated against its own stories.
        let transition = match patch.status {
            Some(to) if to != epic.status => {
                self.validate_transition(epic, to)?;
                let reason = patch.reason.as_deref().unwrap_or("manual");
                Some(apply_status(epic, to, reason, TriggeredBy::Manual))
            }
            _ => None,
        };
        epic.recompute_progress();
        refresh_estimate(epic);
        epic.updated_at = Utc::now();

        let updated = epic.clone();
        self.store.save(&mut collection)?;

        if let Some(transition) = transition {
            self.record_transition(&mut state, &updated, transition);
        }
        push_event(
            &mut state,
            &self.config,
            EventKind::EpicUpdated,
            id,
            "epic updated".to_string(),
        );
        Ok(updated)
    }

    /// Select an epic as current. Only Planned or InProgress epics are
    /// selectable; selecting a Planned epic auto-starts it.
    pub fn select_epic(&self, id: &str) -> Result<Epic, WorkflowError> {
        let mut state = self.inner.write().expect("tracker lock poisoned");
        let mut collection = self.store.load()?;
        let epic = collection
            .epics
            .get_mut(id)
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?;

        if !epic.status.is_selectable() {
            return Err(WorkflowError::NotSelectable {
                id: id.to_string(),
                status: epic.status,
            });
        }

        let transition = if epic.status == EpicStatus::Planned {
            self.validate_transition(epic, EpicStatus::InProgress)?;
            Some(apply_status(
                epic,
                EpicStatus::InProgress,
                "manual",
                TriggeredBy::Manual,
            ))
        } else {
            None
        };
        epic.recompute_progress();
        refresh_estimate(epic);
        epic.updated_at = Utc::now();

        let selected = epic.clone();
        collection.current_epic = id.to_string();
        self.store.save(&mut collection)?;

        if let Some(transition) = transition {
            self.record_transition(&mut state, &selected, transition);
        }
        tracing::info!("Selected epic {}", id);
        Ok(selected)
    }

    pub fn delete_epic(&self, id: &str) -> Result<(), WorkflowError> {
        let mut state = self.inner.write().expect("tracker lock poisoned");
        let mut collection = self.store.load()?;
        if collection.epics.remove(id).is_none() {
            return Err(WorkflowError::NotFound(id.to_string()));
        }
        if collection.current_epic == id {
            collection.current_epic.clear();
        }
        self.store.save(&mut collection)?;

        state.history.remove(id);
        push_event(
            &mut state,
            &self.config,
            EventKind::EpicDeleted,
            id,
            "epic deleted".to_string(),
        );
        tracing::info!("Deleted epic {}", id);
        Ok(())
    }

    /// Transition an epic's status with an explicit reason.
    pub fn transition_status(
        &self,
        id: &str,
        to: EpicStatus,
        reason: &str,
    ) -> Result<Epic, WorkflowError> {
        let mut state = self.inner.write().expect("tracker lock poisoned");
        self.transition_locked(&mut state, id, to, reason, TriggeredBy::Manual)
    }

    /// Recompute progress from stories and, when auto-transition is on,
    /// move the epic per the auto-status rules.
    pub fn update_epic_from_stories(&self, id: &str) -> Result<Epic, WorkflowError> {
        let mut state = self.inner.write().expect("tracker lock poisoned");
        let mut collection = self.store.load()?;
        let epic = collection
            .epics
            .get_mut(id)
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?;

        epic.recompute_progress();
        refresh_estimate(epic);
        epic.updated_at = Utc::now();
        let auto = if self.config.auto_transition_enabled {
            self.auto_target(epic)
        } else {
            None
        };
        let current = epic.clone();
        self.store.save(&mut collection)?;

        match auto {
            Some((to, reason)) => self.transition_locked(&mut state, id, to, reason, TriggeredBy::Auto),
            None => Ok(current),
        }
    }

    /// Reconcile every epic that is not yet terminal. Used by the periodic
    /// reconciler; failures on one epic do not stop the sweep.
    pub fn reconcile_all(&self) -> Result<usize, WorkflowError> {
        let ids: Vec<String> = {
            let collection = self.store.load()?;
            collection
                .epics
                .values()
                .filter(|e| !e.status.is_terminal())
                .map(|e| e.id.clone())
                .collect()
        };

        let mut updated = 0;
        for id in ids {
            match self.update_epic_from_stories(&id) {
                Ok(_) => updated += 1,
                Err(e) => tracing::warn!("Reconciliation of {} failed: {}", id, e),
            }
        }
        Ok(updated)
    }

    pub fn get_epic(&self, id: &str) -> Result<Epic, WorkflowError> {
        let collection = self.store.load()?;
        collection
            .epics
            .get(id)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))
    }

    pub fn list_epics(&self) -> Result<Vec<Epic>, WorkflowError> {
        let collection = self.store.load()?;
        let mut epics: Vec<Epic> = collection.epics.values().cloned().collect();
        epics.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(epics)
    }

    pub fn list_epics_by_status(&self, status: EpicStatus) -> Result<Vec<Epic>, WorkflowError> {
        Ok(self
            .list_epics()?
            .into_iter()
            .filter(|e| e.status == status)
            .collect())
    }

    /// The currently selected epic, if any.
    pub fn current_epic(&self) -> Result<Option<Epic>, WorkflowError> {
        let collection = self.store.load()?;
        Ok(collection.current().cloned())
    }

    pub fn state_history(&self, id: &str) -> Vec<StateTransition> {
        let state = self.inner.read().expect("tracker lock poisoned");
        state.history.get(id).cloned().unwrap_or_default()
    }

    /// The most recent `limit` events, oldest first.
    pub fn recent_events(&self, limit: usize) -> Vec<WorkflowEvent> {
        let state = self.inner.read().expect("tracker lock poisoned");
        let start = state.events.len().saturating_sub(limit);
        state.events[start..].to_vec()
    }

    pub fn advanced_metrics(&self, id: &str) -> Result<EpicMetrics, WorkflowError> {
        let epic = self.get_epic(id)?;
        let state = self.inner.read().expect("tracker lock poisoned");
        let history = state.history.get(id).map(Vec::as_slice).unwrap_or(&[]);

        let now = Utc::now();
        let anchor = epic.start_date.unwrap_or(epic.created_at);
        let total = now - anchor;

        let avg_secs = if history.len() >= 2 {
            let span = history[history.len() - 1].timestamp - history[0].timestamp;
            span.num_milliseconds() as f64 / 1000.0 / (history.len() - 1) as f64
        } else {
            0.0
        };

        Ok(EpicMetrics {
            total_duration_secs: total.num_seconds(),
            duration_days: total.num_days(),
            transition_count: history.len(),
            last_transition: history.last().map(|t| t.timestamp),
            avg_secs_between_transitions: avg_secs,
            estimated_completion: estimate_completion(&epic, now),
        })
    }

    fn transition_locked(
        &self,
        state: &mut TrackerState,
        id: &str,
        to: EpicStatus,
        reason: &str,
        triggered_by: TriggeredBy,
    ) -> Result<Epic, WorkflowError> {
        let mut collection = self.store.load()?;
        let epic = collection
            .epics
            .get_mut(id)
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?;

        if epic.status == to {
            return Ok(epic.clone());
        }
        self.validate_transition(epic, to)?;

        let transition = apply_status(epic, to, reason, triggered_by);
        epic.recompute_progress();
        refresh_estimate(epic);
        epic.updated_at = Utc::now();

        let updated = epic.clone();
        self.store.save(&mut collection)?;
        self.record_transition(state, &updated, transition);
        Ok(updated)
    }

    /// Table + policy + completion validation for one candidate transition.
    fn validate_transition(&self, epic: &Epic, to: EpicStatus) -> Result<(), WorkflowError> {
        match can_transition(epic.status, to, self.config.allow_backward_transitions) {
            TransitionPermission::Allowed => {}
            TransitionPermission::DeniedBackward(_) => {
                return Err(WorkflowError::BackwardDisabled {
                    from: epic.status,
                    to,
                })
            }
            TransitionPermission::Denied(_) => {
                return Err(WorkflowError::InvalidTransition {
                    from: epic.status,
                    to,
                })
            }
        }

        if to == EpicStatus::Completed && self.config.require_progress_for_completion {
            let observed = ProgressMetrics::from_stories(&epic.user_stories).completion_percentage;
            if observed < self.config.min_progress_for_completion {
                return Err(WorkflowError::ProgressInsufficient {
                    required: self.config.min_progress_for_completion,
                    observed,
                });
            }
        }
        Ok(())
    }

    /// Decide the auto-transition target for an epic, if any.
    fn auto_target(&self, epic: &Epic) -> Option<(EpicStatus, &'static str)> {
        let stories = &epic.user_stories;
        match epic.status {
            EpicStatus::Planned => {
                let any_started = stories.iter().any(|s| {
                    s.status == StoryStatus::InProgress || s.status == StoryStatus::Completed
                });
                any_started.then_some((EpicStatus::InProgress, "auto_story_progress"))
            }
            EpicStatus::InProgress => {
                let pct = epic.progress.completion_percentage;
                let complete = if self.config.require_progress_for_completion {
                    pct >= self.config.min_progress_for_completion
                } else {
                    !stories.is_empty()
                        && stories.iter().all(|s| s.status == StoryStatus::Completed)
                };
                if complete {
                    return Some((EpicStatus::Completed, "auto_progress_threshold"));
                }
                if self.config.max_duration_days > 0 {
                    if let Some(start) = epic.start_date {
                        let elapsed = Utc::now() - start;
                        if elapsed > Duration::days(self.config.max_duration_days) {
                            return Some((EpicStatus::OnHold, "auto_duration_exceeded"));
                        }
                    }
                }
                None
            }
            _ => None,
        }
    }

    /// Append to history and events and notify subscribers. Runs inside the
    /// write-lock critical section after the store write has succeeded.
    fn record_transition(&self, state: &mut TrackerState, epic: &Epic, transition: StateTransition) {
        tracing::info!(
            "Epic {}: {} -> {} ({})",
            epic.id,
            transition.from,
            transition.to,
            transition.reason
        );

        let history = state.history.entry(epic.id.clone()).or_default();
        history.push(transition.clone());
        let max = self.config.max_history_entries;
        if history.len() > max {
            let excess = history.len() - max;
            history.drain(..excess);
        }

        push_event(
            &mut *state,
            &self.config,
            EventKind::TransitionApplied,
            &epic.id,
            format!(
                "{} -> {} ({})",
                transition.from, transition.to, transition.reason
            ),
        );

        let mut failures = Vec::new();
        for subscriber in &state.subscribers {
            if let Err(e) = subscriber.on_transition(epic, &transition) {
                tracing::warn!("Subscriber failed for epic {}: {}", epic.id, e);
                failures.push(e);
            }
        }
        for failure in failures {
            push_event(
                &mut *state,
                &self.config,
                EventKind::ValidationError,
                &epic.id,
                format!("subscriber error: {}", failure),
            );
        }
    }
}

/// Mutate the epic's status and stamp start/end dates on the appropriate
/// transitions. Returns the transition record to append.
fn apply_status(
    epic: &mut Epic,
    to: EpicStatus,
    reason: &str,
    triggered_by: TriggeredBy,
) -> StateTransition {
    let from = epic.status;
    let now = Utc::now();
    epic.status = to;
    if to == EpicStatus::InProgress && epic.start_date.is_none() {
        epic.start_date = Some(now);
    }
    if to == EpicStatus::Completed && epic.end_date.is_none() {
        epic.end_date = Some(now);
    }
    StateTransition {
        from,
        to,
        timestamp: now,
        reason: reason.to_string(),
        triggered_by,
        progress: ProgressMetrics::from_stories(&epic.user_stories).completion_percentage,
    }
}

fn refresh_estimate(epic: &mut Epic) {
    epic.progress.estimated_end_date = estimate_completion(epic, Utc::now());
}

/// `start + elapsed / completion_fraction` when the fraction is positive and
/// the epic is not yet Completed.
fn estimate_completion(epic: &Epic, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if epic.status == EpicStatus::Completed {
        return None;
    }
    let start = epic.start_date?;
    let fraction = epic.progress.completion_percentage / 100.0;
    if fraction <= 0.0 {
        return None;
    }
    let elapsed_ms = (now - start).num_milliseconds();
    if elapsed_ms < 0 {
        return None;
    }
    let projected_ms = (elapsed_ms as f64 / fraction) as i64;
    Some(start + Duration::milliseconds(projected_ms))
}

fn push_event(
    state: &mut TrackerState,
    config: &WorkflowConfig,
    kind: EventKind,
    epic_id: &str,
    message: String,
) {
    state.events.push(WorkflowEvent {
        id: Uuid::new_v4(),
        kind,
        epic_id: epic_id.to_string(),
        message,
        timestamp: Utc::now(),
    });
    let bound = config.max_history_entries * 5;
    if state.events.len() > bound {
        let excess = state.events.len() - bound;
        state.events.drain(..excess);
    }
}

/// `EPIC-<NNN>-<UPPER-SLUG>` with the smallest NNN producing a unique id.
fn generate_epic_id(collection: &EpicCollection, title: &str) -> String {
    let slug = upper_slug(title);
    let mut n = 1u32;
    loop {
        let id = format!("EPIC-{:03}-{}", n, slug);
        if !collection.epics.contains_key(&id) {
            return id;
        }
        n += 1;
    }
}

/// Uppercase the title, collapse non-alphanumeric runs to single dashes.
/// An empty result falls back to "EPIC".
fn upper_slug(title: &str) -> String {
    let slug: String = title
        .to_uppercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .take(50)
        .collect();
    if slug.is_empty() {
        "EPIC".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn engine_with(config: WorkflowConfig) -> (TempDir, WorkflowEngine) {
        let dir = TempDir::new().unwrap();
        let store = EpicStore::new(dir.path());
        (dir, WorkflowEngine::new(store, config))
    }

    fn engine() -> (TempDir, WorkflowEngine) {
        engine_with(WorkflowConfig::default())
    }

    fn story(id: &str, status: StoryStatus, points: u32) -> UserStory {
        UserStory {
            id: id.to_string(),
            title: id.to_string(),
            status,
            priority: Priority::default(),
            points,
        }
    }

    fn create(engine: &WorkflowEngine, title: &str) -> Epic {
        engine
            .create_epic(CreateEpicOptions {
                title: title.to_string(),
                ..Default::default()
            })
            .unwrap()
    }

    #[test]
    fn upper_slug_collapses_runs() {
        assert_eq!(upper_slug("Auth"), "AUTH");
        assert_eq!(upper_slug("user  login / signup"), "USER-LOGIN-SIGNUP");
        assert_eq!(upper_slug("***"), "EPIC");
    }

    #[test]
    fn create_defaults_and_id_shape() {
        let (_dir, engine) = engine();
        let epic = create(&engine, "Auth");
        assert_eq!(epic.id, "EPIC-001-AUTH");
        assert_eq!(epic.status, EpicStatus::Planned);
        assert_eq!(epic.priority, Priority::P2);
        assert!(epic.start_date.is_none());
    }

    #[test]
    fn create_rejects_blank_title() {
        let (_dir, engine) = engine();
        let err = engine
            .create_epic(CreateEpicOptions {
                title: "   ".to_string(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidInput(_)));
    }

    #[test]
    fn create_rejects_invalid_priority() {
        let (_dir, engine) = engine();
        let err = engine
            .create_epic(CreateEpicOptions {
                title: "Auth".to_string(),
                priority: Some("urgent".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidInput(_)));
    }

    #[test]
    fn ids_stay_unique_for_duplicate_titles() {
        let (_dir, engine) = engine();
        assert_eq!(create(&engine, "Auth").id, "EPIC-001-AUTH");
        assert_eq!(create(&engine, "Auth").id, "EPIC-002-AUTH");
        assert_eq!(create(&engine, "Auth").id, "EPIC-003-AUTH");
    }

    #[test]
    fn select_auto_starts_planned_epic() {
        let (_dir, engine) = engine();
        let epic = create(&engine, "Auth");

        let selected = engine.select_epic(&epic.id).unwrap();
        assert_eq!(selected.status, EpicStatus::InProgress);
        assert!(selected.start_date.is_some());

        let history = engine.state_history(&epic.id);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from, EpicStatus::Planned);
        assert_eq!(history[0].to, EpicStatus::InProgress);
        assert_eq!(history[0].reason, "manual");
        assert_eq!(history[0].triggered_by, TriggeredBy::Manual);

        let collection = engine.store().load().unwrap();
        assert_eq!(collection.current_epic, epic.id);
    }

    #[test]
    fn select_rejects_on_hold_epic() {
        let (_dir, engine) = engine();
        let epic = create(&engine, "Auth");
        engine
            .transition_status(&epic.id, EpicStatus::OnHold, "pausing")
            .unwrap();
        let err = engine.select_epic(&epic.id).unwrap_err();
        assert!(matches!(err, WorkflowError::NotSelectable { .. }));
    }

    #[test]
    fn planned_cannot_jump_to_completed() {
        let (_dir, engine) = engine();
        let epic = create(&engine, "Auth");
        let err = engine
            .update_epic(
                &epic.id,
                EpicPatch {
                    status: Some(EpicStatus::Completed),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidTransition {
                from: EpicStatus::Planned,
                to: EpicStatus::Completed
            }
        ));
    }

    #[test]
    fn backward_transition_honors_policy() {
        let (_dir, engine) = engine();
        let epic = create(&engine, "Auth");
        engine.select_epic(&epic.id).unwrap();

        let err = engine
            .transition_status(&epic.id, EpicStatus::Planned, "restart")
            .unwrap_err();
        assert!(matches!(err, WorkflowError::BackwardDisabled { .. }));

        // Cancellation still works while backward transitions are disabled.
        let cancelled = engine
            .transition_status(&epic.id, EpicStatus::Cancelled, "dropped")
            .unwrap();
        assert_eq!(cancelled.status, EpicStatus::Cancelled);
    }

    #[test]
    fn backward_transition_allowed_when_enabled() {
        let (_dir, engine) = engine_with(WorkflowConfig {
            allow_backward_transitions: true,
            ..Default::default()
        });
        let epic = create(&engine, "Auth");
        engine.select_epic(&epic.id).unwrap();
        let back = engine
            .transition_status(&epic.id, EpicStatus::Planned, "restart")
            .unwrap();
        assert_eq!(back.status, EpicStatus::Planned);
    }

    #[test]
    fn completion_requires_progress() {
        let (_dir, engine) = engine();
        let epic = create(&engine, "Auth");
        engine.select_epic(&epic.id).unwrap();

        engine
            .update_epic(
                &epic.id,
                EpicPatch {
                    user_stories: Some(vec![
                        story("STORY-1", StoryStatus::Completed, 5),
                        story("STORY-2", StoryStatus::Completed, 5),
                    ]),
                    ..Default::default()
                },
            )
            .unwrap();

        let done = engine
            .transition_status(&epic.id, EpicStatus::Completed, "manual")
            .unwrap();
        assert_eq!(done.status, EpicStatus::Completed);
        assert!(done.end_date.is_some());
        assert_eq!(done.progress.completion_percentage, 100.0);
    }

    #[test]
    fn completion_fails_below_threshold_with_percentages_in_message() {
        let (_dir, engine) = engine();
        let epic = create(&engine, "Auth");
        engine.select_epic(&epic.id).unwrap();
        engine
            .update_epic(
                &epic.id,
                EpicPatch {
                    user_stories: Some(vec![
                        story("STORY-1", StoryStatus::Completed, 5),
                        story("STORY-2", StoryStatus::Planned, 5),
                    ]),
                    ..Default::default()
                },
            )
            .unwrap();

        let err = engine
            .transition_status(&epic.id, EpicStatus::Completed, "manual")
            .unwrap_err();
        match &err {
            WorkflowError::ProgressInsufficient { required, observed } => {
                assert_eq!(*required, 100.0);
                assert_eq!(*observed, 50.0);
            }
            other => panic!("expected ProgressInsufficient, got {:?}", other),
        }
        let message = err.to_string();
        assert!(message.contains("50.0"), "message was: {}", message);
        assert!(message.contains("100.0"), "message was: {}", message);
    }

    #[test]
    fn completion_without_requirement_needs_all_stories_done() {
        let (_dir, engine) = engine_with(WorkflowConfig {
            require_progress_for_completion: false,
            ..Default::default()
        });
        let epic = create(&engine, "Auth");
        engine.select_epic(&epic.id).unwrap();
        engine
            .update_epic(
                &epic.id,
                EpicPatch {
                    user_stories: Some(vec![
                        story("STORY-1", StoryStatus::Completed, 0),
                        story("STORY-2", StoryStatus::Completed, 0),
                    ]),
                    ..Default::default()
                },
            )
            .unwrap();

        let updated = engine.update_epic_from_stories(&epic.id).unwrap();
        assert_eq!(updated.status, EpicStatus::Completed);
    }

    #[test]
    fn auto_starts_planned_epic_with_story_in_progress() {
        let (_dir, engine) = engine();
        let epic = create(&engine, "Auth");
        engine
            .update_epic(
                &epic.id,
                EpicPatch {
                    user_stories: Some(vec![story("STORY-1", StoryStatus::InProgress, 3)]),
                    ..Default::default()
                },
            )
            .unwrap();

        let updated = engine.update_epic_from_stories(&epic.id).unwrap();
        assert_eq!(updated.status, EpicStatus::InProgress);
        assert!(updated.start_date.is_some());

        let history = engine.state_history(&epic.id);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].triggered_by, TriggeredBy::Auto);
        assert_eq!(history[0].reason, "auto_story_progress");
    }

    #[test]
    fn auto_completes_at_threshold() {
        let (_dir, engine) = engine();
        let epic = create(&engine, "Auth");
        engine.select_epic(&epic.id).unwrap();
        engine
            .update_epic(
                &epic.id,
                EpicPatch {
                    user_stories: Some(vec![story("STORY-1", StoryStatus::Completed, 8)]),
                    ..Default::default()
                },
            )
            .unwrap();

        let updated = engine.update_epic_from_stories(&epic.id).unwrap();
        assert_eq!(updated.status, EpicStatus::Completed);
        assert!(updated.end_date.is_some());
    }

    #[test]
    fn auto_disabled_leaves_status_alone() {
        let (_dir, engine) = engine_with(WorkflowConfig {
            auto_transition_enabled: false,
            ..Default::default()
        });
        let epic = create(&engine, "Auth");
        engine
            .update_epic(
                &epic.id,
                EpicPatch {
                    user_stories: Some(vec![story("STORY-1", StoryStatus::Completed, 8)]),
                    ..Default::default()
                },
            )
            .unwrap();

        let updated = engine.update_epic_from_stories(&epic.id).unwrap();
        assert_eq!(updated.status, EpicStatus::Planned);
        assert_eq!(updated.progress.completion_percentage, 100.0);
    }

    #[test]
    fn overdue_in_progress_epic_goes_on_hold() {
        let (_dir, engine) = engine_with(WorkflowConfig {
            max_duration_days: 10,
            ..Default::default()
        });
        let epic = create(&engine, "Auth");
        engine.select_epic(&epic.id).unwrap();

        // Backdate the start past the bound, keeping one unfinished story so
        // the completion rule does not win first.
        {
            let store = engine.store();
            let mut collection = store.load().unwrap();
            let e = collection.epics.get_mut(&epic.id).unwrap();
            e.start_date = Some(Utc::now() - Duration::days(30));
            e.user_stories = vec![story("STORY-1", StoryStatus::InProgress, 3)];
            store.save(&mut collection).unwrap();
        }

        let updated = engine.update_epic_from_stories(&epic.id).unwrap();
        assert_eq!(updated.status, EpicStatus::OnHold);
        let history = engine.state_history(&epic.id);
        assert_eq!(history.last().unwrap().reason, "auto_duration_exceeded");
    }

    #[test]
    fn history_is_trimmed_to_bound() {
        let (_dir, engine) = engine_with(WorkflowConfig {
            max_history_entries: 2,
            ..Default::default()
        });
        let epic = create(&engine, "Auth");
        engine.select_epic(&epic.id).unwrap();
        engine
            .transition_status(&epic.id, EpicStatus::OnHold, "pause")
            .unwrap();
        engine
            .transition_status(&epic.id, EpicStatus::InProgress, "resume")
            .unwrap();
        engine
            .transition_status(&epic.id, EpicStatus::OnHold, "pause again")
            .unwrap();

        let history = engine.state_history(&epic.id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].reason, "pause again");
    }

    #[test]
    fn events_are_recorded_and_bounded() {
        let (_dir, engine) = engine_with(WorkflowConfig {
            max_history_entries: 2,
            ..Default::default()
        });
        let epic = create(&engine, "Auth");
        for _ in 0..20 {
            engine
                .update_epic(&epic.id, EpicPatch::default())
                .unwrap();
        }
        let events = engine.recent_events(100);
        assert!(events.len() <= 10, "events grew to {}", events.len());
        assert!(events
            .iter()
            .all(|e| e.kind == EventKind::EpicUpdated || e.kind == EventKind::EpicCreated));
    }

    #[test]
    fn delete_clears_current_selection() {
        let (_dir, engine) = engine();
        let epic = create(&engine, "Auth");
        engine.select_epic(&epic.id).unwrap();
        engine.delete_epic(&epic.id).unwrap();

        let collection = engine.store().load().unwrap();
        assert!(collection.epics.is_empty());
        assert_eq!(collection.current_epic, "");
        assert!(matches!(
            engine.get_epic(&epic.id),
            Err(WorkflowError::NotFound(_))
        ));
    }

    struct CountingSubscriber {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl TransitionSubscriber for CountingSubscriber {
        fn on_transition(&self, _epic: &Epic, _transition: &StateTransition) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err("subscriber exploded".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn subscribers_observe_transitions() {
        let (_dir, engine) = engine();
        let calls = Arc::new(AtomicUsize::new(0));
        engine.subscribe(Box::new(CountingSubscriber {
            calls: calls.clone(),
            fail: false,
        }));

        let epic = create(&engine, "Auth");
        engine.select_epic(&epic.id).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_subscriber_does_not_roll_back() {
        let (_dir, engine) = engine();
        let calls = Arc::new(AtomicUsize::new(0));
        engine.subscribe(Box::new(CountingSubscriber {
            calls: calls.clone(),
            fail: true,
        }));

        let epic = create(&engine, "Auth");
        let selected = engine.select_epic(&epic.id).unwrap();
        assert_eq!(selected.status, EpicStatus::InProgress);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let events = engine.recent_events(10);
        assert!(events
            .iter()
            .any(|e| e.kind == EventKind::ValidationError
                && e.message.contains("subscriber exploded")));
    }

    #[test]
    fn reconcile_all_skips_terminal_epics() {
        let (_dir, engine) = engine();
        let a = create(&engine, "Alpha");
        let b = create(&engine, "Beta");
        engine
            .transition_status(&b.id, EpicStatus::Cancelled, "dropped")
            .unwrap();

        let updated = engine.reconcile_all().unwrap();
        assert_eq!(updated, 1);
        assert_eq!(engine.get_epic(&a.id).unwrap().status, EpicStatus::Planned);
    }

    #[test]
    fn advanced_metrics_reflect_history() {
        let (_dir, engine) = engine();
        let epic = create(&engine, "Auth");
        engine.select_epic(&epic.id).unwrap();
        engine
            .update_epic(
                &epic.id,
                EpicPatch {
                    user_stories: Some(vec![
                        story("STORY-1", StoryStatus::Completed, 5),
                        story("STORY-2", StoryStatus::Planned, 5),
                    ]),
                    ..Default::default()
                },
            )
            .unwrap();

        let metrics = engine.advanced_metrics(&epic.id).unwrap();
        assert_eq!(metrics.transition_count, 1);
        assert!(metrics.last_transition.is_some());
        // Half done and in progress: a completion estimate exists.
        assert!(metrics.estimated_completion.is_some());
    }

    #[test]
    fn completed_epic_has_no_completion_estimate() {
        let (_dir, engine) = engine();
        let epic = create(&engine, "Auth");
        engine.select_epic(&epic.id).unwrap();
        engine
            .update_epic(
                &epic.id,
                EpicPatch {
                    user_stories: Some(vec![story("STORY-1", StoryStatus::Completed, 5)]),
                    ..Default::default()
                },
            )
            .unwrap();
        engine
            .transition_status(&epic.id, EpicStatus::Completed, "manual")
            .unwrap();

        let metrics = engine.advanced_metrics(&epic.id).unwrap();
        assert!(metrics.estimated_completion.is_none());
    }

    #[test]
    fn list_and_current_queries() {
        let (_dir, engine) = engine();
        let a = create(&engine, "Alpha");
        let b = create(&engine, "Beta");
        engine.select_epic(&b.id).unwrap();

        let all = engine.list_epics().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].id < all[1].id);

        let planned = engine.list_epics_by_status(EpicStatus::Planned).unwrap();
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].id, a.id);

        let current = engine.current_epic().unwrap().unwrap();
        assert_eq!(current.id, b.id);
        assert_eq!(current.status, EpicStatus::InProgress);
    }

    #[test]
    fn workflow_errors_carry_remediation_hints() {
        let (_dir, engine) = engine();
        let epic = create(&engine, "Auth");
        engine.select_epic(&epic.id).unwrap();

        let backward = engine
            .transition_status(&epic.id, EpicStatus::Planned, "restart")
            .unwrap_err();
        assert_eq!(backward.kind(), ErrorKind::WorkflowViolation);
        assert!(backward.remediation().unwrap().contains("--allow-backward-transitions"));

        let missing = engine.get_epic("EPIC-999-NOPE").unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        assert!(missing.remediation().is_some());

        let insufficient = engine
            .transition_status(&epic.id, EpicStatus::Completed, "manual")
            .unwrap_err();
        assert!(insufficient
            .remediation()
            .unwrap()
            .contains("story completion"));
    }

    #[test]
    fn transition_to_same_status_is_a_noop() {
        let (_dir, engine) = engine();
        let epic = create(&engine, "Auth");
        let unchanged = engine
            .transition_status(&epic.id, EpicStatus::Planned, "noop")
            .unwrap();
        assert_eq!(unchanged.status, EpicStatus::Planned);
        assert!(engine.state_history(&epic.id).is_empty());
    }
}
