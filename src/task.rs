//! Task data model.
//!
//! Tasks form a forest encoded as a flat `Vec<Task>` with parent pointers.
//! Sibling order is the order of the vector; nothing else defines it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum chain length from a root. A task at depth `MAX_DEPTH` is never created.
pub const MAX_DEPTH: usize = 10;

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Interrupted,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Interrupted => "interrupted",
            TaskStatus::Completed => "completed",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "interrupted" => Ok(TaskStatus::Interrupted),
            "completed" | "done" => Ok(TaskStatus::Completed),
            other => Err(crate::error::Error::InvalidArgument(format!(
                "unknown status '{other}' (expected pending|in_progress|interrupted|completed)"
            ))),
        }
    }
}

/// Where a task came from, if not typed in by the user.
///
/// A task carries at most one origin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOrigin {
    /// Durable "today" folder for calendar events of one logical day.
    CalendarSection { date: NaiveDate },
    /// A calendar event projected under the day's section.
    CalendarEvent { event_id: String },
    /// Durable folder holding projected external goals.
    GoalSection,
    /// An external goal projected under the goal section.
    Goal { goal_id: String },
    /// Generated from a recurring template; discarded at the next reset.
    Recurring { template_id: String },
}

impl TaskOrigin {
    pub fn is_calendar(&self) -> bool {
        matches!(
            self,
            TaskOrigin::CalendarSection { .. } | TaskOrigin::CalendarEvent { .. }
        )
    }

    pub fn is_goal(&self) -> bool {
        matches!(self, TaskOrigin::Goal { .. })
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, TaskOrigin::Recurring { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub text: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<TaskOrigin>,
}

impl Task {
    /// A fresh pending task with a random id.
    pub fn new(text: impl Into<String>, parent_id: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            text: text.into(),
            status: TaskStatus::Pending,
            created_at: now,
            parent_id,
            origin: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_origin(mut self, origin: TaskOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }

    pub fn is_recurring(&self) -> bool {
        self.origin.as_ref().is_some_and(TaskOrigin::is_recurring)
    }

    pub fn is_goal(&self) -> bool {
        self.origin.as_ref().is_some_and(TaskOrigin::is_goal)
    }

    pub fn is_calendar(&self) -> bool {
        self.origin.as_ref().is_some_and(TaskOrigin::is_calendar)
    }

    /// Reason the user may not rename this task, if any.
    pub fn text_lock(&self) -> Option<&'static str> {
        match self.origin {
            Some(TaskOrigin::CalendarSection { .. }) | Some(TaskOrigin::CalendarEvent { .. }) => {
                Some("calendar tasks follow the calendar feed")
            }
            Some(TaskOrigin::Goal { .. }) => Some("goal titles follow the goal feed"),
            _ => None,
        }
    }

    /// Reason the user may not change this task's status directly, if any.
    ///
    /// Goal tasks are not locked here: their status changes go through the
    /// override cache and a toggle request instead.
    pub fn status_lock(&self) -> Option<&'static str> {
        match self.origin {
            Some(TaskOrigin::CalendarSection { .. }) | Some(TaskOrigin::CalendarEvent { .. }) => {
                Some("calendar tasks follow the calendar feed")
            }
            Some(TaskOrigin::GoalSection) => {
                Some("the goal section status is derived from its goals")
            }
            _ => None,
        }
    }
}

/// Counts of what one feed application changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0
    }
}

/// Generate a fresh opaque task id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Trim and validate display text.
pub fn normalize_text(text: &str) -> crate::error::Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(crate::error::Error::InvalidArgument(
            "text cannot be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_aliases() {
        assert_eq!("pending".parse::<TaskStatus>().expect("p"), TaskStatus::Pending);
        assert_eq!("in-progress".parse::<TaskStatus>().expect("ip"), TaskStatus::InProgress);
        assert_eq!("Done".parse::<TaskStatus>().expect("done"), TaskStatus::Completed);
        assert!("closed".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn origin_round_trips_as_tagged_object() {
        let task = Task::new("Standup", None, Utc::now()).with_origin(TaskOrigin::CalendarEvent {
            event_id: "abc".to_string(),
        });
        let json = serde_json::to_value(&task).expect("json");
        assert_eq!(json["origin"]["kind"], "calendar_event");
        assert_eq!(json["origin"]["event_id"], "abc");
        assert_eq!(json["status"], "pending");

        let back: Task = serde_json::from_value(json).expect("parse");
        assert_eq!(back, task);
    }

    #[test]
    fn plain_task_omits_origin() {
        let task = Task::new("Buy milk", None, Utc::now());
        let json = serde_json::to_string(&task).expect("json");
        assert!(!json.contains("origin"));
    }

    #[test]
    fn locks_depend_on_origin() {
        let now = Utc::now();
        let plain = Task::new("a", None, now);
        assert!(plain.text_lock().is_none());
        assert!(plain.status_lock().is_none());

        let goal = Task::new("g", None, now).with_origin(TaskOrigin::Goal {
            goal_id: "1".to_string(),
        });
        assert!(goal.text_lock().is_some());
        assert!(goal.status_lock().is_none());

        let section = Task::new("Goals", None, now).with_origin(TaskOrigin::GoalSection);
        assert!(section.text_lock().is_none());
        assert!(section.status_lock().is_some());

        let recurring = Task::new("r", None, now).with_origin(TaskOrigin::Recurring {
            template_id: "t".to_string(),
        });
        assert!(recurring.text_lock().is_none());
        assert!(recurring.is_recurring());
    }

    #[test]
    fn normalize_text_trims_and_rejects_blank() {
        assert_eq!(normalize_text("  hi  ").expect("ok"), "hi");
        assert!(normalize_text("   ").is_err());
    }
}
