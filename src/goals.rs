//! External goal reconciliation.
//!
//! Goals are projected under a durable section task. Unlike calendar events,
//! goals that drop out of a snapshot are kept and marked completed.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::task::{ReconcileReport, Task, TaskOrigin, TaskStatus, MAX_DEPTH};
use crate::tree;

pub const SECTION_ID: &str = "goals-section";
pub const GOAL_PREFIX: &str = "goal-";

/// One goal as reported by the goal feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalGoal {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub parent_id: Option<String>,
}

pub fn goal_task_id(goal_id: &str) -> String {
    format!("{GOAL_PREFIX}{goal_id}")
}

/// Decode a snapshot payload (a JSON array of goals).
pub fn parse_snapshot(payload: &str) -> Result<Vec<ExternalGoal>> {
    serde_json::from_str(payload).map_err(|err| Error::Parse(format!("goal snapshot: {err}")))
}

/// Parent task id for every goal in the snapshot.
///
/// Follows the external hierarchy where it is usable. A goal whose parent is
/// missing from the snapshot, closes a loop, or would sit too deep hangs
/// directly off the section instead.
fn resolve_parents(goals: &[ExternalGoal], section: &str, section_depth: usize) -> HashMap<String, String> {
    struct Resolver<'a> {
        parents: HashMap<&'a str, &'a str>,
        section: &'a str,
        section_depth: usize,
        resolved: HashMap<String, (String, usize)>,
        visiting: HashSet<&'a str>,
    }

    impl<'a> Resolver<'a> {
        fn resolve(&mut self, id: &'a str) -> usize {
            if let Some((_, depth)) = self.resolved.get(id) {
                return *depth;
            }
            self.visiting.insert(id);
            let fallback = (self.section.to_string(), self.section_depth + 1);
            let entry = match self.parents.get(id).copied() {
                Some(parent) if parent != id && !self.visiting.contains(parent) => {
                    let depth = self.resolve(parent) + 1;
                    if depth < MAX_DEPTH {
                        (goal_task_id(parent), depth)
                    } else {
                        fallback
                    }
                }
                _ => fallback,
            };
            self.visiting.remove(id);
            let depth = entry.1;
            self.resolved.insert(id.to_string(), entry);
            depth
        }
    }

    let known: HashSet<&str> = goals.iter().map(|g| g.id.as_str()).collect();
    let parents = goals
        .iter()
        .filter_map(|goal| {
            goal.parent_id
                .as_deref()
                .filter(|parent| known.contains(parent))
                .map(|parent| (goal.id.as_str(), parent))
        })
        .collect();

    let mut resolver = Resolver {
        parents,
        section,
        section_depth,
        resolved: HashMap::new(),
        visiting: HashSet::new(),
    };
    for goal in goals {
        resolver.resolve(&goal.id);
    }
    resolver
        .resolved
        .into_iter()
        .map(|(id, (parent, _))| (id, parent))
        .collect()
}

/// Local status for a goal, keeping in-flight local states the feed cannot see.
fn mapped_status(goal: &ExternalGoal, current: Option<TaskStatus>) -> TaskStatus {
    match (goal.completed, current) {
        (true, _) => TaskStatus::Completed,
        (false, Some(status @ (TaskStatus::InProgress | TaskStatus::Interrupted))) => status,
        (false, _) => TaskStatus::Pending,
    }
}

/// Merge a goal snapshot into the task collection.
pub fn sync_goals(
    tasks: &[Task],
    goals: &[ExternalGoal],
    section_label: &str,
    now: DateTime<Utc>,
) -> (Vec<Task>, ReconcileReport) {
    let mut report = ReconcileReport::default();
    let mut next = tasks.to_vec();

    let section = match next
        .iter()
        .find(|task| matches!(task.origin, Some(TaskOrigin::GoalSection)))
    {
        Some(task) => task.id.clone(),
        None => {
            next.push(
                Task::new(section_label, None, now)
                    .with_id(SECTION_ID)
                    .with_origin(TaskOrigin::GoalSection),
            );
            report.added += 1;
            SECTION_ID.to_string()
        }
    };

    let incoming: HashSet<String> = goals.iter().map(|g| goal_task_id(&g.id)).collect();
    for task in next.iter_mut() {
        if task.is_goal() && !incoming.contains(&task.id) && !task.is_completed() {
            task.status = TaskStatus::Completed;
            report.removed += 1;
        }
    }

    let parents = resolve_parents(goals, &section, tree::depth(&next, &section));
    for goal in goals {
        let id = goal_task_id(&goal.id);
        let parent = parents.get(&goal.id).cloned().unwrap_or_else(|| section.clone());
        match next.iter_mut().find(|task| task.id == id) {
            Some(existing) => {
                let status = mapped_status(goal, Some(existing.status));
                if existing.text != goal.title
                    || existing.status != status
                    || existing.parent_id.as_deref() != Some(parent.as_str())
                {
                    existing.text = goal.title.clone();
                    existing.status = status;
                    existing.parent_id = Some(parent);
                    report.updated += 1;
                }
            }
            None => {
                next.push(
                    Task::new(goal.title.clone(), Some(parent), now)
                        .with_id(id)
                        .with_status(mapped_status(goal, None))
                        .with_origin(TaskOrigin::Goal {
                            goal_id: goal.id.clone(),
                        }),
                );
                report.added += 1;
            }
        }
    }

    let children: Vec<&Task> = next
        .iter()
        .filter(|task| task.is_goal() && task.parent_id.as_deref() == Some(section.as_str()))
        .collect();
    let section_status = if !children.is_empty() && children.iter().all(|t| t.is_completed()) {
        TaskStatus::Completed
    } else {
        TaskStatus::Pending
    };
    if let Some(task) = next.iter_mut().find(|task| task.id == section) {
        if task.status != section_status {
            task.status = section_status;
            report.updated += 1;
        }
    }

    (next, report)
}
