//! Read-only typed access to the current-work documents.
//!
//! These documents are produced by the CLI collaborator as the user walks
//! down the Epic → Story → Task hierarchy; the core only ever reads them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::models::{Epic, StoryStatus, UserStory};
use super::StoreError;

pub const CURRENT_EPIC_PATH: &str = "docs/2-current-epic/current-epic.json";
pub const CURRENT_STORY_PATH: &str = "docs/2-current-epic/current-story.json";
pub const STORIES_PATH: &str = "docs/2-current-epic/stories.json";
pub const CURRENT_TASK_PATH: &str = "docs/3-current-task/current-task.json";

/// Story collection for the current epic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoriesDocument {
    #[serde(default)]
    pub stories: Vec<UserStory>,
}

/// The task currently being executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub status: StoryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub story_id: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// Reader over the per-project current-work documents.
#[derive(Clone)]
pub struct ContextReader {
    project_root: PathBuf,
}

impl ContextReader {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    /// The epic currently selected for work, if any.
    pub fn current_epic(&self) -> Result<Option<Epic>, StoreError> {
        self.read_optional(CURRENT_EPIC_PATH)
    }

    /// The story currently in flight, if any.
    pub fn current_story(&self) -> Result<Option<UserStory>, StoreError> {
        self.read_optional(CURRENT_STORY_PATH)
    }

    /// All stories of the current epic; an absent document reads as empty.
    pub fn stories(&self) -> Result<Vec<UserStory>, StoreError> {
        Ok(self
            .read_optional::<StoriesDocument>(STORIES_PATH)?
            .map(|doc| doc.stories)
            .unwrap_or_default())
    }

    /// The task currently being executed, if any.
    pub fn current_task(&self) -> Result<Option<CurrentTask>, StoreError> {
        self.read_optional(CURRENT_TASK_PATH)
    }

    fn read_optional<T: serde::de::DeserializeOwned>(
        &self,
        relative: &str,
    ) -> Result<Option<T>, StoreError> {
        let path = self.project_root.join(relative);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| StoreError::Io {
            path: path.clone(),
            source: e,
        })?;
        let parsed = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Parse(format!("{}: {}", display_relative(&path), e)))?;
        Ok(Some(parsed))
    }
}

fn display_relative(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
