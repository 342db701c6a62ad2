//! Recurring templates and the daily reset.
//!
//! Templates are expanded into fresh task subtrees on the days their period
//! lands on. The reset also drops completed and previously generated tasks,
//! carrying the rest over to the new logical day.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::task::{new_id, normalize_text, Task, TaskOrigin, MAX_DEPTH};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Days,
    Weeks,
}

impl IntervalUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalUnit::Days => "days",
            IntervalUnit::Weeks => "weeks",
        }
    }
}

impl std::str::FromStr for IntervalUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "d" | "day" | "days" => Ok(IntervalUnit::Days),
            "w" | "week" | "weeks" => Ok(IntervalUnit::Weeks),
            other => Err(Error::InvalidArgument(format!(
                "unknown interval unit '{other}' (expected days|weeks)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecurringSubTask {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub children: Vec<RecurringSubTask>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RecurringTaskTemplate {
    pub id: String,
    pub text: String,
    pub interval_value: u32,
    pub interval_unit: IntervalUnit,
    pub start_date: NaiveDate,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub children: Vec<RecurringSubTask>,
}

/// On-disk template shape, tolerant of records written before intervals,
/// enable flags and subtasks existed.
#[derive(Deserialize)]
struct StoredTemplate {
    id: String,
    text: String,
    #[serde(default, alias = "intervalValue")]
    interval_value: Option<u32>,
    #[serde(default, alias = "intervalUnit")]
    interval_unit: Option<IntervalUnit>,
    #[serde(default, alias = "startDate")]
    start_date: Option<NaiveDate>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default, alias = "createdAt")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    children: Option<Vec<RecurringSubTask>>,
}

impl<'de> Deserialize<'de> for RecurringTaskTemplate {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let stored = StoredTemplate::deserialize(deserializer)?;
        let created_at = stored.created_at.unwrap_or_else(Utc::now);
        // Legacy records without an interval fired every day since creation.
        let (interval_value, interval_unit, start_date) = match stored.interval_value {
            Some(value) => (
                value.max(1),
                stored.interval_unit.unwrap_or(IntervalUnit::Days),
                stored.start_date.unwrap_or_else(|| created_at.date_naive()),
            ),
            None => (1, IntervalUnit::Days, created_at.date_naive()),
        };
        Ok(RecurringTaskTemplate {
            id: stored.id,
            text: stored.text,
            interval_value,
            interval_unit,
            start_date,
            enabled: stored.enabled.unwrap_or(true),
            created_at,
            children: stored.children.unwrap_or_default(),
        })
    }
}

impl RecurringTaskTemplate {
    pub fn period_days(&self) -> i64 {
        match self.interval_unit {
            IntervalUnit::Days => i64::from(self.interval_value),
            IntervalUnit::Weeks => i64::from(self.interval_value) * 7,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResetState {
    #[serde(default, alias = "lastResetDate")]
    pub last_reset_date: Option<NaiveDate>,
}

/// The calendar day the user is living in: before `reset_hour` it is still
/// yesterday.
pub fn logical_date<Tz: TimeZone>(now: &DateTime<Tz>, reset_hour: u32) -> NaiveDate {
    let local = now.naive_local();
    let date = local.date();
    if local.hour() < reset_hour {
        date.pred_opt().unwrap_or(date)
    } else {
        date
    }
}

pub fn is_reset_needed<Tz: TimeZone>(
    last_reset_date: Option<NaiveDate>,
    now: &DateTime<Tz>,
    reset_hour: u32,
) -> bool {
    last_reset_date != Some(logical_date(now, reset_hour))
}

/// Whether the template fires on `today`.
pub fn should_generate(template: &RecurringTaskTemplate, today: NaiveDate) -> bool {
    if !template.enabled {
        return false;
    }
    let diff = (today - template.start_date).num_days();
    let period = template.period_days();
    diff >= 0 && period > 0 && diff % period == 0
}

/// Build the task collection for a new logical day.
///
/// Completed and generated tasks are dropped; survivors whose parent was
/// dropped become roots. Fresh subtrees for the templates firing today come
/// first, carried-over tasks after them.
pub fn perform_reset<Tz: TimeZone>(
    tasks: &[Task],
    templates: &[RecurringTaskTemplate],
    now: &DateTime<Tz>,
    reset_hour: u32,
) -> Vec<Task> {
    let today = logical_date(now, reset_hour);
    let created_at = now.with_timezone(&Utc);

    let carried: Vec<&Task> = tasks
        .iter()
        .filter(|task| !task.is_recurring() && !task.is_completed())
        .collect();
    let carried_ids: HashSet<&str> = carried.iter().map(|task| task.id.as_str()).collect();

    let mut next: Vec<Task> = Vec::new();
    for template in templates.iter().filter(|t| should_generate(t, today)) {
        let root = Task::new(template.text.clone(), None, created_at).with_origin(
            TaskOrigin::Recurring {
                template_id: template.id.clone(),
            },
        );
        let root_id = root.id.clone();
        next.push(root);
        expand_subtasks(&template.children, &root_id, &template.id, created_at, &mut next);
    }

    next.extend(carried.into_iter().map(|task| {
        let orphaned = task
            .parent_id
            .as_deref()
            .is_some_and(|parent| !carried_ids.contains(parent));
        if orphaned {
            Task {
                parent_id: None,
                ..task.clone()
            }
        } else {
            task.clone()
        }
    }));

    next
}

fn expand_subtasks(
    subs: &[RecurringSubTask],
    parent_id: &str,
    template_id: &str,
    created_at: DateTime<Utc>,
    out: &mut Vec<Task>,
) {
    for sub in subs {
        let task = Task::new(sub.text.clone(), Some(parent_id.to_string()), created_at)
            .with_origin(TaskOrigin::Recurring {
                template_id: template_id.to_string(),
            });
        let id = task.id.clone();
        out.push(task);
        expand_subtasks(&sub.children, &id, template_id, created_at, out);
    }
}

/// Partial template edit; `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct TemplateUpdate {
    pub text: Option<String>,
    pub interval_value: Option<u32>,
    pub interval_unit: Option<IntervalUnit>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

fn validate_interval(value: u32) -> Result<()> {
    if value < 1 {
        return Err(Error::InvalidArgument(
            "interval must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn template_index(templates: &[RecurringTaskTemplate], id: &str) -> Result<usize> {
    templates
        .iter()
        .position(|t| t.id == id)
        .ok_or_else(|| Error::TemplateNotFound(id.to_string()))
}

/// Append a new enabled template starting on `today`.
pub fn add_template(
    templates: &[RecurringTaskTemplate],
    text: &str,
    interval_value: u32,
    interval_unit: IntervalUnit,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<(Vec<RecurringTaskTemplate>, String)> {
    let text = normalize_text(text)?;
    validate_interval(interval_value)?;
    let template = RecurringTaskTemplate {
        id: new_id(),
        text,
        interval_value,
        interval_unit,
        start_date: today,
        enabled: true,
        created_at: now,
        children: Vec::new(),
    };
    let id = template.id.clone();
    let mut next = templates.to_vec();
    next.push(template);
    Ok((next, id))
}

pub fn update_template(
    templates: &[RecurringTaskTemplate],
    id: &str,
    update: TemplateUpdate,
) -> Result<Vec<RecurringTaskTemplate>> {
    let idx = template_index(templates, id)?;
    let text = update.text.as_deref().map(normalize_text).transpose()?;
    if let Some(value) = update.interval_value {
        validate_interval(value)?;
    }

    let mut next = templates.to_vec();
    let template = &mut next[idx];
    if let Some(text) = text {
        template.text = text;
    }
    if let Some(value) = update.interval_value {
        template.interval_value = value;
    }
    if let Some(unit) = update.interval_unit {
        template.interval_unit = unit;
    }
    if let Some(enabled) = update.enabled {
        template.enabled = enabled;
    }
    Ok(next)
}

pub fn delete_template(
    templates: &[RecurringTaskTemplate],
    id: &str,
) -> Result<Vec<RecurringTaskTemplate>> {
    template_index(templates, id)?;
    Ok(templates.iter().filter(|t| t.id != id).cloned().collect())
}

/// Swap the template with its neighbour. No-op at either end.
pub fn move_template(
    templates: &[RecurringTaskTemplate],
    id: &str,
    direction: MoveDirection,
) -> Result<Vec<RecurringTaskTemplate>> {
    let idx = template_index(templates, id)?;
    let mut next = templates.to_vec();
    let target = match direction {
        MoveDirection::Up => idx.checked_sub(1),
        MoveDirection::Down => Some(idx + 1).filter(|&i| i < next.len()),
    };
    if let Some(target) = target {
        next.swap(idx, target);
    }
    Ok(next)
}

/// Depth of `sub_id` within `subs`, counting the template root as 0.
fn subtask_depth(subs: &[RecurringSubTask], sub_id: &str, level: usize) -> Option<usize> {
    subs.iter().find_map(|sub| {
        if sub.id == sub_id {
            Some(level)
        } else {
            subtask_depth(&sub.children, sub_id, level + 1)
        }
    })
}

fn insert_child(subs: &mut [RecurringSubTask], parent_id: &str, child: &RecurringSubTask) -> bool {
    for sub in subs.iter_mut() {
        if sub.id == parent_id {
            sub.children.push(child.clone());
            return true;
        }
        if insert_child(&mut sub.children, parent_id, child) {
            return true;
        }
    }
    false
}

fn remove_subtask(subs: &[RecurringSubTask], sub_id: &str) -> Vec<RecurringSubTask> {
    subs.iter()
        .filter(|sub| sub.id != sub_id)
        .map(|sub| RecurringSubTask {
            children: remove_subtask(&sub.children, sub_id),
            ..sub.clone()
        })
        .collect()
}

fn rename_subtask(subs: &mut [RecurringSubTask], sub_id: &str, text: &str) -> bool {
    for sub in subs.iter_mut() {
        if sub.id == sub_id {
            sub.text = text.to_string();
            return true;
        }
        if rename_subtask(&mut sub.children, sub_id, text) {
            return true;
        }
    }
    false
}

/// Add a subtask under the template root or under another subtask.
pub fn add_subtask(
    templates: &[RecurringTaskTemplate],
    template_id: &str,
    parent_sub_id: Option<&str>,
    text: &str,
) -> Result<(Vec<RecurringTaskTemplate>, String)> {
    let idx = template_index(templates, template_id)?;
    let text = normalize_text(text)?;
    let child = RecurringSubTask {
        id: new_id(),
        text,
        children: Vec::new(),
    };
    let id = child.id.clone();

    let mut next = templates.to_vec();
    let template = &mut next[idx];
    match parent_sub_id {
        None => template.children.push(child),
        Some(parent) => {
            let depth = subtask_depth(&template.children, parent, 1)
                .ok_or_else(|| Error::InvalidArgument(format!("unknown subtask '{parent}'")))?;
            if depth + 1 >= MAX_DEPTH {
                return Err(Error::InvalidArgument(format!(
                    "cannot nest deeper than {MAX_DEPTH} levels"
                )));
            }
            insert_child(&mut template.children, parent, &child);
        }
    }
    Ok((next, id))
}

pub fn delete_subtask(
    templates: &[RecurringTaskTemplate],
    template_id: &str,
    sub_id: &str,
) -> Result<Vec<RecurringTaskTemplate>> {
    let idx = template_index(templates, template_id)?;
    let mut next = templates.to_vec();
    next[idx].children = remove_subtask(&next[idx].children, sub_id);
    Ok(next)
}

pub fn update_subtask(
    templates: &[RecurringTaskTemplate],
    template_id: &str,
    sub_id: &str,
    text: &str,
) -> Result<Vec<RecurringTaskTemplate>> {
    let idx = template_index(templates, template_id)?;
    let text = normalize_text(text)?;
    let mut next = templates.to_vec();
    if !rename_subtask(&mut next[idx].children, sub_id, &text) {
        return Err(Error::InvalidArgument(format!("unknown subtask '{sub_id}'")));
    }
    Ok(next)
}
