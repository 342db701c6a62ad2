//! Status transitions and completion cascades.
//!
//! Completing a task pushes completion down to every descendant and then up
//! through any ancestor whose direct children are now all completed.
//! Reopening a task only climbs: completed ancestors flip back to pending,
//! descendants keep their state.

use std::collections::HashMap;

use crate::task::{Task, TaskStatus};
use crate::tree::descendant_ids;

/// The single deterministic step from `current`, if there is one.
///
/// `InProgress` forks into completed or interrupted, so callers must pick
/// with [`set_status`].
pub fn next_status(current: TaskStatus) -> Option<TaskStatus> {
    match current {
        TaskStatus::Pending => Some(TaskStatus::InProgress),
        TaskStatus::Completed => Some(TaskStatus::Pending),
        TaskStatus::Interrupted => Some(TaskStatus::Completed),
        TaskStatus::InProgress => None,
    }
}

/// Apply [`next_status`] to the task. Unchanged for unknown ids and for
/// tasks in progress.
pub fn advance(tasks: &[Task], id: &str) -> Vec<Task> {
    let Some(current) = tasks.iter().find(|task| task.id == id).map(|t| t.status) else {
        return tasks.to_vec();
    };
    match next_status(current) {
        Some(next) => set_status(tasks, id, next),
        None => tasks.to_vec(),
    }
}

/// Set the task's status and run the matching cascade.
pub fn set_status(tasks: &[Task], id: &str, status: TaskStatus) -> Vec<Task> {
    if !tasks.iter().any(|task| task.id == id) {
        return tasks.to_vec();
    }

    let mut next: Vec<Task> = tasks.to_vec();
    let index: HashMap<String, usize> = next
        .iter()
        .enumerate()
        .map(|(i, task)| (task.id.clone(), i))
        .collect();

    if let Some(&i) = index.get(id) {
        next[i].status = status;
    }

    match status {
        TaskStatus::Completed => {
            for child in descendant_ids(tasks, id) {
                if let Some(&i) = index.get(&child) {
                    next[i].status = TaskStatus::Completed;
                }
            }
            complete_ancestors(&mut next, &index, id);
        }
        TaskStatus::Pending => reopen_ancestors(&mut next, &index, id),
        TaskStatus::InProgress | TaskStatus::Interrupted => {}
    }

    next
}

fn parent_of(tasks: &[Task], index: &HashMap<String, usize>, id: &str) -> Option<String> {
    index
        .get(id)
        .and_then(|&i| tasks[i].parent_id.clone())
        .filter(|parent| index.contains_key(parent))
}

fn complete_ancestors(tasks: &mut [Task], index: &HashMap<String, usize>, id: &str) {
    let mut current = parent_of(tasks, index, id);
    let mut steps = 0;
    while let Some(parent) = current {
        steps += 1;
        if steps > tasks.len() {
            break;
        }
        let all_done = tasks
            .iter()
            .filter(|task| task.parent_id.as_deref() == Some(parent.as_str()))
            .all(Task::is_completed);
        if !all_done {
            break;
        }
        if let Some(&i) = index.get(&parent) {
            tasks[i].status = TaskStatus::Completed;
        }
        current = parent_of(tasks, index, &parent);
    }
}

fn reopen_ancestors(tasks: &mut [Task], index: &HashMap<String, usize>, id: &str) {
    let mut current = parent_of(tasks, index, id);
    let mut steps = 0;
    while let Some(parent) = current {
        steps += 1;
        if steps > tasks.len() {
            break;
        }
        let Some(&i) = index.get(&parent) else {
            break;
        };
        if !tasks[i].is_completed() {
            break;
        }
        tasks[i].status = TaskStatus::Pending;
        current = parent_of(tasks, index, &parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn task(id: &str, parent: Option<&str>, status: TaskStatus) -> Task {
        Task::new(id, parent.map(str::to_string), Utc::now())
            .with_id(id)
            .with_status(status)
    }

    fn status_of(tasks: &[Task], id: &str) -> TaskStatus {
        tasks
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.status)
            .expect("task present")
    }

    #[test]
    fn next_status_table() {
        assert_eq!(next_status(TaskStatus::Pending), Some(TaskStatus::InProgress));
        assert_eq!(next_status(TaskStatus::Completed), Some(TaskStatus::Pending));
        assert_eq!(next_status(TaskStatus::Interrupted), Some(TaskStatus::Completed));
        assert_eq!(next_status(TaskStatus::InProgress), None);
    }

    #[test]
    fn advance_in_progress_is_noop() {
        let tasks = vec![task("a", None, TaskStatus::InProgress)];
        assert_eq!(advance(&tasks, "a"), tasks);
        assert_eq!(advance(&tasks, "missing"), tasks);
    }

    #[test]
    fn completing_cascades_down_and_up() {
        let tasks = vec![
            task("root", None, TaskStatus::Pending),
            task("p", Some("root"), TaskStatus::Pending),
            task("c1", Some("p"), TaskStatus::Pending),
            task("c2", Some("p"), TaskStatus::InProgress),
            task("c2x", Some("c2"), TaskStatus::Pending),
            task("other", Some("root"), TaskStatus::Pending),
        ];

        let next = set_status(&tasks, "c1", TaskStatus::Completed);
        assert_eq!(status_of(&next, "c1"), TaskStatus::Completed);
        assert_eq!(status_of(&next, "p"), TaskStatus::Pending);

        let next = set_status(&next, "c2", TaskStatus::Completed);
        assert_eq!(status_of(&next, "c2x"), TaskStatus::Completed);
        assert_eq!(status_of(&next, "p"), TaskStatus::Completed);
        // Climb stops at root because "other" is still open.
        assert_eq!(status_of(&next, "root"), TaskStatus::Pending);
    }

    #[test]
    fn completing_parent_completes_every_child() {
        let tasks = vec![
            task("p", None, TaskStatus::Pending),
            task("c1", Some("p"), TaskStatus::Interrupted),
            task("c2", Some("p"), TaskStatus::Pending),
        ];
        let next = set_status(&tasks, "p", TaskStatus::Completed);
        assert!(next.iter().all(Task::is_completed));
    }

    #[test]
    fn reopening_climbs_but_leaves_descendants() {
        let tasks = vec![
            task("root", None, TaskStatus::Completed),
            task("p", Some("root"), TaskStatus::Completed),
            task("c", Some("p"), TaskStatus::Completed),
            task("cx", Some("c"), TaskStatus::Completed),
        ];
        let next = advance(&tasks, "c");
        assert_eq!(status_of(&next, "c"), TaskStatus::Pending);
        assert_eq!(status_of(&next, "p"), TaskStatus::Pending);
        assert_eq!(status_of(&next, "root"), TaskStatus::Pending);
        // Asymmetric: the completed grandchild stays completed under a pending parent.
        assert_eq!(status_of(&next, "cx"), TaskStatus::Completed);
    }

    #[test]
    fn reopening_stops_at_first_open_ancestor() {
        let tasks = vec![
            task("root", None, TaskStatus::Completed),
            task("p", Some("root"), TaskStatus::InProgress),
            task("c", Some("p"), TaskStatus::Completed),
        ];
        let next = set_status(&tasks, "c", TaskStatus::Pending);
        assert_eq!(status_of(&next, "p"), TaskStatus::InProgress);
        assert_eq!(status_of(&next, "root"), TaskStatus::Completed);
    }

    #[test]
    fn in_progress_and_interrupted_touch_only_target() {
        let tasks = vec![
            task("p", None, TaskStatus::Completed),
            task("c", Some("p"), TaskStatus::Pending),
        ];
        let next = set_status(&tasks, "p", TaskStatus::Interrupted);
        assert_eq!(status_of(&next, "p"), TaskStatus::Interrupted);
        assert_eq!(status_of(&next, "c"), TaskStatus::Pending);

        let next = set_status(&tasks, "c", TaskStatus::InProgress);
        assert_eq!(status_of(&next, "p"), TaskStatus::Completed);
    }
}
