use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Schema version written into collection metadata.
pub const COLLECTION_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::P0 => "P0",
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "P0" => Some(Priority::P0),
            "P1" => Some(Priority::P1),
            "P2" => Some(Priority::P2),
            "P3" => Some(Priority::P3),
            _ => None,
        }
    }

    /// Map a legacy lowercase priority word onto the current scale.
    pub fn from_legacy(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(Priority::P0),
            "high" => Some(Priority::P1),
            "medium" => Some(Priority::P2),
            "low" => Some(Priority::P3),
            _ => None,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::P2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpicStatus {
    Planned,
    InProgress,
    OnHold,
    Completed,
    Cancelled,
}

impl EpicStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpicStatus::Planned => "planned",
            EpicStatus::InProgress => "in_progress",
            EpicStatus::OnHold => "on_hold",
            EpicStatus::Completed => "completed",
            EpicStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "planned" => Some(EpicStatus::Planned),
            "in_progress" => Some(EpicStatus::InProgress),
            "on_hold" => Some(EpicStatus::OnHold),
            "completed" => Some(EpicStatus::Completed),
            "cancelled" => Some(EpicStatus::Cancelled),
            _ => None,
        }
    }

    /// Map a legacy status string; unknown values land in Planned.
    pub fn from_legacy(s: &str) -> Self {
        match s {
            "todo" | "backlog" => EpicStatus::Planned,
            "in_progress" => EpicStatus::InProgress,
            "completed" => EpicStatus::Completed,
            "cancelled" => EpicStatus::Cancelled,
            _ => EpicStatus::Planned,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(
            self,
            EpicStatus::Planned
                | EpicStatus::InProgress
                | EpicStatus::OnHold
                | EpicStatus::Completed
                | EpicStatus::Cancelled
        )
    }

    /// Terminal states accept no further transitions except the explicit
    /// Cancelled → Planned reopen in the transition table.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EpicStatus::Completed | EpicStatus::Cancelled)
    }

    /// Only Planned or InProgress epics may become the current selection.
    pub fn is_selectable(&self) -> bool {
        matches!(self, EpicStatus::Planned | EpicStatus::InProgress)
    }
}

impl Default for EpicStatus {
    fn default() -> Self {
        EpicStatus::Planned
    }
}

impl std::fmt::Display for EpicStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    Planned,
    InProgress,
    Completed,
    Cancelled,
}

impl StoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoryStatus::Planned => "planned",
            StoryStatus::InProgress => "in_progress",
            StoryStatus::Completed => "completed",
            StoryStatus::Cancelled => "cancelled",
        }
    }
}

impl Default for StoryStatus {
    fn default() -> Self {
        StoryStatus::Planned
    }
}

/// A child work item of an epic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStory {
    pub id: String,
    pub title: String,
    pub status: StoryStatus,
    #[serde(default)]
    pub priority: Priority,
    /// Story-point weight used for progress calculation.
    #[serde(default)]
    pub points: u32,
}

/// Derived progress, cached on the epic and recomputed on every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProgressMetrics {
    pub total_stories: usize,
    pub completed_stories: usize,
    pub total_points: u32,
    pub completed_points: u32,
    pub completion_percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_end_date: Option<DateTime<Utc>>,
}

impl ProgressMetrics {
    /// Pure function of the story list. Points-weighted when any story
    /// carries points, story-count-weighted otherwise.
    pub fn from_stories(stories: &[UserStory]) -> Self {
        let total_stories = stories.len();
        let completed_stories = stories
            .iter()
            .filter(|s| s.status == StoryStatus::Completed)
            .count();
        let total_points: u32 = stories.iter().map(|s| s.points).sum();
        let completed_points: u32 = stories
            .iter()
            .filter(|s| s.status == StoryStatus::Completed)
            .map(|s| s.points)
            .sum();

        let completion_percentage = if total_points > 0 {
            f64::from(completed_points) / f64::from(total_points) * 100.0
        } else if total_stories > 0 {
            completed_stories as f64 / total_stories as f64 * 100.0
        } else {
            0.0
        };

        Self {
            total_stories,
            completed_stories,
            total_points,
            completed_points,
            completion_percentage,
            estimated_end_date: None,
        }
    }
}

/// One unit of planned work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epic {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub priority: Priority,
    pub status: EpicStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    /// Textual duration estimate, e.g. "2 weeks".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Ids of epics this one depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub user_stories: Vec<UserStory>,
    #[serde(default)]
    pub progress: ProgressMetrics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Epic {
    /// Recompute the cached progress from the current story list.
    pub fn recompute_progress(&mut self) {
        let estimated = self.progress.estimated_end_date;
        self.progress = ProgressMetrics::from_stories(&self.user_stories);
        self.progress.estimated_end_date = estimated;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub version: String,
    pub last_updated: DateTime<Utc>,
    pub total_epics: usize,
}

/// The on-disk epic collection document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpicCollection {
    pub project_id: String,
    pub epics: HashMap<String, Epic>,
    /// Id of the currently selected epic; empty when none is selected.
    #[serde(default)]
    pub current_epic: String,
    pub metadata: CollectionMetadata,
}

impl EpicCollection {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            epics: HashMap::new(),
            current_epic: String::new(),
            metadata: CollectionMetadata {
                version: COLLECTION_VERSION.to_string(),
                last_updated: Utc::now(),
                total_epics: 0,
            },
        }
    }

    /// Refresh metadata ahead of a write.
    pub fn touch(&mut self) {
        self.metadata.last_updated = Utc::now();
        self.metadata.total_epics = self.epics.len();
    }

    pub fn current(&self) -> Option<&Epic> {
        if self.current_epic.is_empty() {
            None
        } else {
            self.epics.get(&self.current_epic)
        }
    }
}
