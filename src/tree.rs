//! Task tree operations.
//!
//! Every function here is pure: it reads a `&[Task]` snapshot and returns a
//! new collection (or a derived view). Invalid edits return the input
//! unchanged instead of producing a cyclic or over-deep tree.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::task::{normalize_text, Task, MAX_DEPTH};

/// Parent id to child ids, in persisted order. Roots live under `None`.
pub fn child_map(tasks: &[Task]) -> HashMap<Option<&str>, Vec<&str>> {
    let mut map: HashMap<Option<&str>, Vec<&str>> = HashMap::new();
    for task in tasks {
        map.entry(task.parent_id.as_deref())
            .or_default()
            .push(task.id.as_str());
    }
    map
}

pub fn find<'a>(tasks: &'a [Task], id: &str) -> Option<&'a Task> {
    tasks.iter().find(|task| task.id == id)
}

pub fn position(tasks: &[Task], id: &str) -> Option<usize> {
    tasks.iter().position(|task| task.id == id)
}

/// All transitive children of `id`. Never contains `id` itself.
pub fn descendant_ids(tasks: &[Task], id: &str) -> Vec<String> {
    let map = child_map(tasks);
    let mut out = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    seen.insert(id);
    let mut stack = vec![id];
    while let Some(current) = stack.pop() {
        if let Some(children) = map.get(&Some(current)) {
            for &child in children.iter().rev() {
                if seen.insert(child) {
                    out.push(child.to_string());
                    stack.push(child);
                }
            }
        }
    }
    out
}

/// Number of ancestors above `id` (0 for roots and unknown ids).
pub fn depth(tasks: &[Task], id: &str) -> usize {
    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut depth = 0;
    let mut current = by_id.get(id).and_then(|t| t.parent_id.as_deref());
    while let Some(parent) = current {
        depth += 1;
        if depth > tasks.len() {
            break;
        }
        current = by_id.get(parent).and_then(|t| t.parent_id.as_deref());
    }
    depth
}

/// Height of the subtree below `id` (0 for a leaf).
fn subtree_height(tasks: &[Task], id: &str) -> usize {
    let map = child_map(tasks);
    let mut best = 0;
    let mut stack = vec![(id, 0usize)];
    let mut seen: HashSet<&str> = HashSet::new();
    while let Some((current, level)) = stack.pop() {
        if !seen.insert(current) {
            continue;
        }
        best = best.max(level);
        if let Some(children) = map.get(&Some(current)) {
            for &child in children {
                stack.push((child, level + 1));
            }
        }
    }
    best
}

fn siblings<'a>(tasks: &'a [Task], parent_id: Option<&str>) -> Vec<&'a Task> {
    tasks
        .iter()
        .filter(|task| task.parent_id.as_deref() == parent_id)
        .collect()
}

/// Make the task the last child of its immediately preceding sibling.
///
/// Unchanged when the task is the first sibling or the move would put any
/// node of its subtree at depth `MAX_DEPTH` or deeper.
pub fn indent(tasks: &[Task], id: &str) -> Vec<Task> {
    let Some(target) = find(tasks, id) else {
        return tasks.to_vec();
    };
    let peers = siblings(tasks, target.parent_id.as_deref());
    let idx = match peers.iter().position(|task| task.id == id) {
        Some(idx) if idx > 0 => idx,
        _ => return tasks.to_vec(),
    };
    let new_parent = peers[idx - 1].id.clone();

    if depth(tasks, &new_parent) + 1 + subtree_height(tasks, id) >= MAX_DEPTH {
        return tasks.to_vec();
    }

    let reparented: Vec<Task> = tasks
        .iter()
        .map(|task| {
            if task.id == id {
                Task {
                    parent_id: Some(new_parent.clone()),
                    ..task.clone()
                }
            } else {
                task.clone()
            }
        })
        .collect();

    let child_count = reparented
        .iter()
        .filter(|task| task.parent_id.as_deref() == Some(new_parent.as_str()))
        .count();
    move_to(&reparented, id, child_count)
}

/// Move the task up one level, right after its former parent.
///
/// The task travels with its descendant block, which is placed after the
/// former parent's remaining descendants. Roots are left unchanged.
pub fn outdent(tasks: &[Task], id: &str) -> Vec<Task> {
    let Some(target) = find(tasks, id) else {
        return tasks.to_vec();
    };
    let Some(parent_id) = target.parent_id.clone() else {
        return tasks.to_vec();
    };
    let Some(parent) = find(tasks, &parent_id) else {
        return tasks.to_vec();
    };
    let grandparent = parent.parent_id.clone();

    let block_ids: HashSet<String> = std::iter::once(id.to_string())
        .chain(descendant_ids(tasks, id))
        .collect();

    let mut block = Vec::new();
    let mut rest = Vec::new();
    for task in tasks {
        if block_ids.contains(&task.id) {
            let mut moved = task.clone();
            if moved.id == id {
                moved.parent_id = grandparent.clone();
            }
            block.push(moved);
        } else {
            rest.push(task.clone());
        }
    }

    let insert_at = end_of_block(&rest, &parent_id);
    splice(rest, insert_at, block)
}

/// Index just past `id` and every descendant that directly follows it.
fn end_of_block(tasks: &[Task], id: &str) -> usize {
    let Some(mut last) = position(tasks, id) else {
        return tasks.len();
    };
    let descendants: HashSet<String> = descendant_ids(tasks, id).into_iter().collect();
    while last + 1 < tasks.len() && descendants.contains(&tasks[last + 1].id) {
        last += 1;
    }
    last + 1
}

fn splice(mut rest: Vec<Task>, at: usize, block: Vec<Task>) -> Vec<Task> {
    let tail = rest.split_off(at.min(rest.len()));
    rest.extend(block);
    rest.extend(tail);
    rest
}

/// Relocate a task and its descendants to `target_sibling_index` among the
/// tasks sharing its parent.
///
/// The index is clamped to `[0, sibling_count]`; the end position lands after
/// the last sibling's whole descendant block.
pub fn move_to(tasks: &[Task], id: &str, target_sibling_index: usize) -> Vec<Task> {
    let Some(target) = find(tasks, id) else {
        return tasks.to_vec();
    };
    let parent_id = target.parent_id.clone();
    let block_ids: HashSet<String> = std::iter::once(id.to_string())
        .chain(descendant_ids(tasks, id))
        .collect();

    let (block, rest): (Vec<Task>, Vec<Task>) = tasks
        .iter()
        .cloned()
        .partition(|task| block_ids.contains(&task.id));

    let peers: Vec<String> = rest
        .iter()
        .filter(|task| task.parent_id == parent_id)
        .map(|task| task.id.clone())
        .collect();
    let Some(last_peer) = peers.last() else {
        return tasks.to_vec();
    };

    let clamped = target_sibling_index.min(peers.len());
    let insert_at = if clamped >= peers.len() {
        end_of_block(&rest, last_peer)
    } else {
        position(&rest, &peers[clamped]).unwrap_or(rest.len())
    };

    splice(rest, insert_at, block)
}

/// True when the task and every descendant are completed.
pub fn is_subtree_completed(tasks: &[Task], id: &str) -> bool {
    Presentation::new(tasks).settled.contains(id)
}

/// Children lists and settled subtrees for one snapshot, built in a single
/// pass so presentation queries stay linear in the number of tasks.
struct Presentation<'a> {
    children: HashMap<Option<&'a str>, Vec<&'a Task>>,
    /// Ids whose whole subtree is completed.
    settled: HashSet<&'a str>,
}

impl<'a> Presentation<'a> {
    fn new(tasks: &'a [Task]) -> Self {
        let mut children: HashMap<Option<&str>, Vec<&Task>> = HashMap::new();
        for task in tasks {
            children.entry(task.parent_id.as_deref()).or_default().push(task);
        }

        // Children before parents: reverse DFS pre-order from the roots.
        let mut order = Vec::with_capacity(tasks.len());
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&Task> = children.get(&None).cloned().unwrap_or_default();
        while let Some(task) = stack.pop() {
            if !seen.insert(task.id.as_str()) {
                continue;
            }
            order.push(task);
            if let Some(kids) = children.get(&Some(task.id.as_str())) {
                stack.extend(kids.iter().copied());
            }
        }

        let mut settled: HashSet<&str> = HashSet::new();
        for task in order.into_iter().rev() {
            let kids_settled = children
                .get(&Some(task.id.as_str()))
                .map_or(true, |kids| kids.iter().all(|kid| settled.contains(kid.id.as_str())));
            if task.is_completed() && kids_settled {
                settled.insert(task.id.as_str());
            }
        }

        Self { children, settled }
    }

    /// Stable partition that sinks fully completed subtrees to the end.
    fn ordered(&self, parent_id: Option<&str>) -> Vec<&'a Task> {
        let peers = self.children.get(&parent_id).map(Vec::as_slice).unwrap_or_default();
        let (open, done): (Vec<&Task>, Vec<&Task>) = peers
            .iter()
            .copied()
            .partition(|task| !self.settled.contains(task.id.as_str()));
        open.into_iter().chain(done).collect()
    }
}

/// Direct children of `parent_id` in presentation order.
pub fn children_of<'a>(tasks: &'a [Task], parent_id: &str) -> Vec<&'a Task> {
    Presentation::new(tasks).ordered(Some(parent_id))
}

/// Root tasks in presentation order.
pub fn root_tasks(tasks: &[Task]) -> Vec<&Task> {
    Presentation::new(tasks).ordered(None)
}

/// Depth-first pre-order ids in presentation order, skipping the subtree
/// below any collapsed id.
pub fn visible_ids(tasks: &[Task], collapsed: &HashSet<String>) -> Vec<String> {
    let view = Presentation::new(tasks);
    let mut out = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&Task> = view.ordered(None).into_iter().rev().collect();
    while let Some(task) = stack.pop() {
        if !seen.insert(task.id.as_str()) {
            continue;
        }
        out.push(task.id.clone());
        if !collapsed.contains(&task.id) {
            stack.extend(view.ordered(Some(task.id.as_str())).into_iter().rev());
        }
    }
    out
}

/// Remove a task and all of its descendants.
pub fn delete(tasks: &[Task], id: &str) -> Vec<Task> {
    let mut doomed: HashSet<String> = descendant_ids(tasks, id).into_iter().collect();
    doomed.insert(id.to_string());
    tasks
        .iter()
        .filter(|task| !doomed.contains(&task.id))
        .cloned()
        .collect()
}

/// Append a new pending task. Returns the new collection and the new id.
pub fn add(
    tasks: &[Task],
    text: &str,
    parent_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(Vec<Task>, String)> {
    let text = normalize_text(text)?;
    if let Some(parent) = parent_id {
        if find(tasks, parent).is_none() {
            return Err(Error::TaskNotFound(parent.to_string()));
        }
        if depth(tasks, parent) + 1 >= MAX_DEPTH {
            return Err(Error::InvalidArgument(format!(
                "cannot nest deeper than {MAX_DEPTH} levels"
            )));
        }
    }
    let task = Task::new(text, parent_id.map(str::to_string), now);
    let id = task.id.clone();
    let mut next = tasks.to_vec();
    next.push(task);
    Ok((next, id))
}

/// Replace a task's text.
pub fn rename(tasks: &[Task], id: &str, text: &str) -> Result<Vec<Task>> {
    let text = normalize_text(text)?;
    if find(tasks, id).is_none() {
        return Err(Error::TaskNotFound(id.to_string()));
    }
    Ok(tasks
        .iter()
        .map(|task| {
            if task.id == id {
                Task {
                    text: text.clone(),
                    ..task.clone()
                }
            } else {
                task.clone()
            }
        })
        .collect())
}

/// Structural problem found in a persisted collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ForestIssue {
    DuplicateId { id: String },
    DanglingParent { id: String, parent_id: String },
    Cycle { id: String },
    TooDeep { id: String },
}

/// Report structural problems without changing anything.
pub fn validate_forest(tasks: &[Task]) -> Vec<ForestIssue> {
    let mut issues = Vec::new();
    let mut ids: HashSet<&str> = HashSet::new();
    for task in tasks {
        if !ids.insert(task.id.as_str()) {
            issues.push(ForestIssue::DuplicateId {
                id: task.id.clone(),
            });
        }
    }
    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    for task in tasks {
        if let Some(parent) = task.parent_id.as_deref() {
            if !by_id.contains_key(parent) {
                issues.push(ForestIssue::DanglingParent {
                    id: task.id.clone(),
                    parent_id: parent.to_string(),
                });
                continue;
            }
        }
        let mut seen: HashSet<&str> = HashSet::new();
        seen.insert(task.id.as_str());
        let mut current = task.parent_id.as_deref();
        let mut level = 0;
        while let Some(parent) = current {
            level += 1;
            if !seen.insert(parent) {
                issues.push(ForestIssue::Cycle {
                    id: task.id.clone(),
                });
                break;
            }
            current = by_id.get(parent).and_then(|t| t.parent_id.as_deref());
        }
        if level >= MAX_DEPTH {
            issues.push(ForestIssue::TooDeep {
                id: task.id.clone(),
            });
        }
    }
    issues
}

/// Repair a loaded collection: drop duplicate ids (first wins) and promote
/// tasks with dangling, cyclic or over-deep parent chains to roots.
pub fn repair_forest(tasks: Vec<Task>) -> (Vec<Task>, Vec<ForestIssue>) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut reported = Vec::new();
    let mut current: Vec<Task> = Vec::with_capacity(tasks.len());
    for task in tasks {
        if seen.insert(task.id.clone()) {
            current.push(task);
        } else {
            reported.push(ForestIssue::DuplicateId { id: task.id });
        }
    }

    // Each pass promotes at least one task, so this terminates.
    loop {
        let issues = validate_forest(&current);
        let Some(issue) = issues.into_iter().next() else {
            break;
        };
        let id = match &issue {
            ForestIssue::DuplicateId { .. } => break,
            ForestIssue::DanglingParent { id, .. }
            | ForestIssue::Cycle { id }
            | ForestIssue::TooDeep { id } => id.clone(),
        };
        if let Some(task) = current.iter_mut().find(|task| task.id == id) {
            task.parent_id = None;
        }
        reported.push(issue);
    }

    (current, reported)
}
