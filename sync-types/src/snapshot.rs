//! Replica state carried between peers.
//!
//! A [`Snapshot`] is one replica's full application state at a point in
//! time. Snapshots are never edited in place: a new one is built on every
//! local mutation cycle, and merging two snapshots produces a third.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::TypesError;

/// Snapshot format version stamped by this crate.
pub const SNAPSHOT_VERSION: &str = "1.0.0";

/// A single task.
///
/// `id` is replica-independent and unique. `created_at` is set once at
/// creation and never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique identifier.
    pub id: String,
    /// Short title.
    pub title: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Whether the task is done.
    #[serde(default)]
    pub completed: bool,
    /// Whether the task is flagged important.
    #[serde(default)]
    pub important: bool,
    /// Owning category, if any.
    #[serde(default)]
    pub category_id: Option<String>,
    /// Due date as an ISO string, if any.
    #[serde(default)]
    pub due_date: Option<String>,
    /// Creation instant (ISO 8601 / RFC 3339).
    pub created_at: String,
    /// Last edit instant. Absent on the wire unless set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Task {
    /// Create a task with only the required fields set.
    pub fn new(id: &str, title: &str, created_at: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            completed: false,
            important: false,
            category_id: None,
            due_date: None,
            created_at: created_at.to_string(),
            updated_at: None,
        }
    }
}

/// A task category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    /// Unique identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Display color (CSS color string).
    pub color: String,
}

impl Category {
    /// Create a category.
    pub fn new(id: &str, name: &str, color: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            color: color.to_string(),
        }
    }
}

/// User settings, merged only as a whole object.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Accent color.
    pub primary_color: String,
    /// Dense layout.
    pub compact_mode: bool,
    /// UI animations enabled.
    pub show_animations: bool,
    /// View opened on start.
    pub default_view: String,
    /// Sidebar collapsed on start.
    pub sidebar_collapsed: bool,
    /// API key for the assistant backend.
    #[serde(default)]
    pub openai_api_key: String,
    /// Base URL for the assistant backend.
    #[serde(default)]
    pub openai_base_url: String,
    /// Model name for the assistant backend.
    #[serde(default)]
    pub openai_model: String,
    /// Access code, if one was issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_code: Option<String>,
    /// Access code lifetime in hours. May be fractional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_code_expiry: Option<f64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            primary_color: "blue".to_string(),
            compact_mode: false,
            show_animations: true,
            default_view: "list".to_string(),
            sidebar_collapsed: false,
            openai_api_key: String::new(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-3.5-turbo".to_string(),
            auth_code: None,
            auth_code_expiry: None,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("primary_color", &self.primary_color)
            .field("compact_mode", &self.compact_mode)
            .field("show_animations", &self.show_animations)
            .field("default_view", &self.default_view)
            .field("sidebar_collapsed", &self.sidebar_collapsed)
            .field("openai_api_key", &"[REDACTED]")
            .field("openai_base_url", &self.openai_base_url)
            .field("openai_model", &self.openai_model)
            .field("auth_code", &self.auth_code.as_ref().map(|_| "[REDACTED]"))
            .field("auth_code_expiry", &self.auth_code_expiry)
            .finish()
    }
}

/// One replica's complete state at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// All tasks.
    pub tasks: Vec<Task>,
    /// All categories.
    pub categories: Vec<Category>,
    /// User settings.
    pub settings: Settings,
    /// Milliseconds since the Unix epoch when the snapshot was taken.
    pub timestamp: i64,
    /// Snapshot format version.
    pub version: String,
}

impl Snapshot {
    /// Build a snapshot stamped with the current time.
    pub fn new(tasks: Vec<Task>, categories: Vec<Category>, settings: Settings) -> Self {
        Self {
            tasks,
            categories,
            settings,
            timestamp: now_millis(),
            version: SNAPSHOT_VERSION.to_string(),
        }
    }

    /// An empty snapshot with default settings, stamped with the given time.
    pub fn empty_at(timestamp: i64) -> Self {
        Self {
            tasks: Vec::new(),
            categories: Vec::new(),
            settings: Settings::default(),
            timestamp,
            version: SNAPSHOT_VERSION.to_string(),
        }
    }

    /// Build a snapshot from exported data and a timestamp.
    pub fn from_export(data: ExportData, timestamp: i64) -> Self {
        Self {
            tasks: data.tasks,
            categories: data.categories,
            settings: data.settings,
            timestamp,
            version: data.version,
        }
    }

    /// Drop the timestamp, keeping the exportable state.
    pub fn into_export(self) -> ExportData {
        ExportData {
            tasks: self.tasks,
            categories: self.categories,
            settings: self.settings,
            version: self.version,
        }
    }

    /// Look up a task by id.
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Look up a category by id.
    pub fn category(&self, id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    /// Serialize to pretty JSON (for state files).
    pub fn to_json_pretty(&self) -> Result<String, TypesError> {
        serde_json::to_string_pretty(self).map_err(TypesError::Serialization)
    }

    /// Parse from JSON text.
    pub fn from_json(text: &str) -> Result<Self, TypesError> {
        serde_json::from_str(text).map_err(TypesError::Deserialization)
    }
}

/// Exported application data: a snapshot without its timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportData {
    /// All tasks.
    pub tasks: Vec<Task>,
    /// All categories.
    pub categories: Vec<Category>,
    /// User settings.
    pub settings: Settings,
    /// Snapshot format version.
    pub version: String,
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
