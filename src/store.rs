//! Task store: the single owner of persisted state.
//!
//! Tree, status and reconciliation functions are pure; the store feeds them
//! the current snapshot, installs the result and writes it to disk. Every
//! mutation persists before returning, so a store inside
//! [`TaskStore::transaction`] never holds unsaved state when the lock drops.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use crate::calendar::{self, CalendarEvent};
use crate::config::{self, Config};
use crate::error::{Error, Result};
use crate::goals::{self, ExternalGoal};
use crate::overrides::OverrideCache;
use crate::recurring::{
    self, IntervalUnit, MoveDirection, RecurringTaskTemplate, ResetState, TemplateUpdate,
};
use crate::status;
use crate::storage::Storage;
use crate::task::{ReconcileReport, Task, TaskStatus};
use crate::tree;

/// A completion change that must be mirrored to the goal feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToggleRequest {
    pub title: String,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub id: String,
    pub status: TaskStatus,
    /// Tasks whose status changed, cascades included.
    pub affected: usize,
    pub toggles: Vec<ToggleRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetOutcome {
    pub date: NaiveDate,
    pub generated: usize,
    pub carried: usize,
    pub dropped: usize,
}

pub struct TaskStore {
    storage: Storage,
    config: Config,
    tasks: Vec<Task>,
    templates: Vec<RecurringTaskTemplate>,
    reset_state: ResetState,
    overrides: OverrideCache,
}

impl TaskStore {
    /// Open the store and load everything from disk.
    pub fn open(storage: Storage, config: Config) -> Result<Self> {
        let ttl = config::parse_duration(&config.goals.override_ttl)?;
        let mut store = Self {
            storage,
            config,
            tasks: Vec::new(),
            templates: Vec::new(),
            reset_state: ResetState::default(),
            overrides: OverrideCache::new(ttl),
        };
        store.transaction(|_| Ok(()))?;
        Ok(store)
    }

    /// Re-read all state from disk. Structural damage in the task file is
    /// repaired in memory and written back on the next mutation.
    pub fn reload(&mut self) -> Result<()> {
        let (tasks, issues) = tree::repair_forest(self.storage.load_tasks()?);
        for issue in &issues {
            tracing::warn!(?issue, "repaired task file");
        }
        self.tasks = tasks;
        self.templates = self.storage.load_templates()?;
        self.reset_state = self.storage.load_reset_state()?;
        self.overrides =
            OverrideCache::with_entries(self.overrides.ttl(), self.storage.load_overrides()?);
        Ok(())
    }

    /// Run `f` against fresh state while holding the data directory lock.
    pub fn transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let _lock = self.storage.lock()?;
        self.reload()?;
        f(self)
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn templates(&self) -> &[RecurringTaskTemplate] {
        &self.templates
    }

    pub fn reset_state(&self) -> &ResetState {
        &self.reset_state
    }

    pub fn overrides(&self) -> &OverrideCache {
        &self.overrides
    }

    fn commit_tasks(&mut self, next: Vec<Task>) -> Result<()> {
        self.storage.save_tasks(&next)?;
        self.tasks = next;
        Ok(())
    }

    fn commit_templates(&mut self, next: Vec<RecurringTaskTemplate>) -> Result<()> {
        self.storage.save_templates(&next)?;
        self.templates = next;
        Ok(())
    }

    fn save_overrides(&self) -> Result<()> {
        self.storage.save_overrides(self.overrides.entries())
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Resolve a full id or a unique id prefix.
    pub fn resolve_task_id(&self, input: &str) -> Result<String> {
        resolve_id(input, self.tasks.iter().map(|t| t.id.as_str()))
            .map_err(|err| match err {
                ResolveError::Missing(id) => Error::TaskNotFound(id),
                ResolveError::Invalid(msg) => Error::InvalidArgument(msg),
            })
    }

    pub fn resolve_template_id(&self, input: &str) -> Result<String> {
        resolve_id(input, self.templates.iter().map(|t| t.id.as_str()))
            .map_err(|err| match err {
                ResolveError::Missing(id) => Error::TemplateNotFound(id),
                ResolveError::Invalid(msg) => Error::InvalidArgument(msg),
            })
    }

    pub fn task(&self, id: &str) -> Result<&Task> {
        tree::find(&self.tasks, id).ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    // =========================================================================
    // User edits
    // =========================================================================

    pub fn add_task(&mut self, text: &str, parent: Option<&str>, now: DateTime<Utc>) -> Result<String> {
        let parent = parent.map(|p| self.resolve_task_id(p)).transpose()?;
        if let Some(parent) = parent.as_deref() {
            let task = self.task(parent)?;
            if task.is_calendar() {
                return Err(Error::ReadOnly {
                    id: task.id.clone(),
                    reason: "calendar sections only hold calendar events".to_string(),
                });
            }
        }
        let (next, id) = tree::add(&self.tasks, text, parent.as_deref(), now)?;
        self.commit_tasks(next)?;
        tracing::debug!(%id, "task added");
        Ok(id)
    }

    pub fn rename_task(&mut self, id: &str, text: &str) -> Result<String> {
        let id = self.resolve_task_id(id)?;
        if let Some(reason) = self.task(&id)?.text_lock() {
            return Err(Error::ReadOnly {
                id,
                reason: reason.to_string(),
            });
        }
        let next = tree::rename(&self.tasks, &id, text)?;
        self.commit_tasks(next)?;
        Ok(id)
    }

    /// Step the task along its single deterministic transition.
    pub fn advance(&mut self, id: &str, now: DateTime<Utc>) -> Result<StatusChange> {
        let id = self.resolve_task_id(id)?;
        let current = self.task(&id)?.status;
        let next = status::next_status(current).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "task {id} is in progress; choose completed or interrupted explicitly"
            ))
        })?;
        self.change_status(id, next, now)
    }

    pub fn set_status(&mut self, id: &str, status: TaskStatus, now: DateTime<Utc>) -> Result<StatusChange> {
        let id = self.resolve_task_id(id)?;
        self.change_status(id, status, now)
    }

    fn change_status(&mut self, id: String, target: TaskStatus, now: DateTime<Utc>) -> Result<StatusChange> {
        if let Some(reason) = self.task(&id)?.status_lock() {
            return Err(Error::ReadOnly {
                id,
                reason: reason.to_string(),
            });
        }

        let next = status::set_status(&self.tasks, &id, target);
        let mut affected = 0;
        let mut toggles = Vec::new();
        for (before, after) in self.tasks.iter().zip(next.iter()) {
            if before.status == after.status {
                continue;
            }
            affected += 1;
            if after.is_goal() && before.is_completed() != after.is_completed() {
                toggles.push(ToggleRequest {
                    title: after.text.clone(),
                    completed: after.is_completed(),
                });
            }
        }

        // Overrides go to disk before anyone can issue the toggle.
        for toggle in &toggles {
            self.overrides.record_at(&toggle.title, toggle.completed, now);
        }
        if !toggles.is_empty() {
            self.save_overrides()?;
        }
        self.commit_tasks(next)?;
        tracing::debug!(%id, status = %target, affected, toggles = toggles.len(), "status changed");

        Ok(StatusChange {
            id,
            status: target,
            affected,
            toggles,
        })
    }

    /// Calendar tasks are placed by the calendar feed, and nothing else may
    /// live under them.
    fn ensure_movable(&self, id: &str, next: &[Task]) -> Result<()> {
        if self.task(id)?.is_calendar() {
            return Err(Error::ReadOnly {
                id: id.to_string(),
                reason: "calendar tasks are placed by the calendar feed".to_string(),
            });
        }
        let parent = tree::find(next, id).and_then(|task| task.parent_id.as_deref());
        if let Some(parent) = parent.and_then(|parent| tree::find(next, parent)) {
            if parent.is_calendar() {
                return Err(Error::ReadOnly {
                    id: parent.id.clone(),
                    reason: "calendar sections only hold calendar events".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Returns whether anything moved.
    pub fn indent(&mut self, id: &str) -> Result<bool> {
        let id = self.resolve_task_id(id)?;
        let next = tree::indent(&self.tasks, &id);
        self.ensure_movable(&id, &next)?;
        self.commit_if_changed(next)
    }

    pub fn outdent(&mut self, id: &str) -> Result<bool> {
        let id = self.resolve_task_id(id)?;
        let next = tree::outdent(&self.tasks, &id);
        self.ensure_movable(&id, &next)?;
        self.commit_if_changed(next)
    }

    pub fn move_to(&mut self, id: &str, index: usize) -> Result<bool> {
        let id = self.resolve_task_id(id)?;
        let next = tree::move_to(&self.tasks, &id, index);
        self.ensure_movable(&id, &next)?;
        self.commit_if_changed(next)
    }

    /// Delete a task with its subtree. Returns the number of tasks removed.
    pub fn delete(&mut self, id: &str) -> Result<usize> {
        let id = self.resolve_task_id(id)?;
        let next = tree::delete(&self.tasks, &id);
        let removed = self.tasks.len() - next.len();
        self.commit_tasks(next)?;
        Ok(removed)
    }

    fn commit_if_changed(&mut self, next: Vec<Task>) -> Result<bool> {
        if next == self.tasks {
            return Ok(false);
        }
        self.commit_tasks(next)?;
        Ok(true)
    }

    // =========================================================================
    // Templates
    // =========================================================================

    pub fn add_template<Tz: TimeZone>(
        &mut self,
        text: &str,
        interval_value: u32,
        interval_unit: IntervalUnit,
        now: &DateTime<Tz>,
    ) -> Result<String> {
        let today = recurring::logical_date(now, self.config.reset.hour);
        let (next, id) = recurring::add_template(
            &self.templates,
            text,
            interval_value,
            interval_unit,
            today,
            now.with_timezone(&Utc),
        )?;
        self.commit_templates(next)?;
        Ok(id)
    }

    pub fn update_template(&mut self, id: &str, update: TemplateUpdate) -> Result<String> {
        let id = self.resolve_template_id(id)?;
        let next = recurring::update_template(&self.templates, &id, update)?;
        self.commit_templates(next)?;
        Ok(id)
    }

    pub fn delete_template(&mut self, id: &str) -> Result<String> {
        let id = self.resolve_template_id(id)?;
        let next = recurring::delete_template(&self.templates, &id)?;
        self.commit_templates(next)?;
        Ok(id)
    }

    pub fn move_template(&mut self, id: &str, direction: MoveDirection) -> Result<String> {
        let id = self.resolve_template_id(id)?;
        let next = recurring::move_template(&self.templates, &id, direction)?;
        self.commit_templates(next)?;
        Ok(id)
    }

    pub fn add_subtask(&mut self, template_id: &str, parent_sub_id: Option<&str>, text: &str) -> Result<String> {
        let template_id = self.resolve_template_id(template_id)?;
        let (next, id) = recurring::add_subtask(&self.templates, &template_id, parent_sub_id, text)?;
        self.commit_templates(next)?;
        Ok(id)
    }

    pub fn delete_subtask(&mut self, template_id: &str, sub_id: &str) -> Result<()> {
        let template_id = self.resolve_template_id(template_id)?;
        let next = recurring::delete_subtask(&self.templates, &template_id, sub_id)?;
        self.commit_templates(next)
    }

    pub fn update_subtask(&mut self, template_id: &str, sub_id: &str, text: &str) -> Result<()> {
        let template_id = self.resolve_template_id(template_id)?;
        let next = recurring::update_subtask(&self.templates, &template_id, sub_id, text)?;
        self.commit_templates(next)
    }

    // =========================================================================
    // Feeds and the daily reset
    // =========================================================================

    /// Run the daily reset if the logical day moved on (or `force` is set).
    ///
    /// The reset date is recorded only after the new task list is on disk.
    pub fn run_daily_reset<Tz: TimeZone>(
        &mut self,
        now: &DateTime<Tz>,
        force: bool,
    ) -> Result<Option<ResetOutcome>> {
        let hour = self.config.reset.hour;
        if !force && !recurring::is_reset_needed(self.reset_state.last_reset_date, now, hour) {
            return Ok(None);
        }

        let date = recurring::logical_date(now, hour);
        let next = recurring::perform_reset(&self.tasks, &self.templates, now, hour);
        let generated = next.iter().filter(|t| t.is_recurring()).count();
        let carried = next.len() - generated;
        let dropped = self.tasks.len() - carried;
        self.commit_tasks(next)?;

        let state = ResetState {
            last_reset_date: Some(date),
        };
        self.storage.save_reset_state(&state)?;
        self.reset_state = state;

        tracing::info!(%date, generated, carried, dropped, "daily reset");
        Ok(Some(ResetOutcome {
            date,
            generated,
            carried,
            dropped,
        }))
    }

    /// Merge today's calendar events.
    pub fn apply_calendar_events<Tz: TimeZone>(
        &mut self,
        events: &[CalendarEvent],
        now: &DateTime<Tz>,
    ) -> Result<ReconcileReport> {
        let today = now.naive_local().date();
        let (next, report) = calendar::sync_calendar_events(
            &self.tasks,
            events,
            today,
            &self.config.sections.calendar_label,
            now.with_timezone(&Utc),
        );
        self.commit_if_changed(next)?;
        tracing::debug!(?report, events = events.len(), "calendar applied");
        Ok(report)
    }

    /// Decode and merge a raw goal snapshot. A malformed payload leaves the
    /// store untouched.
    pub fn apply_goal_payload(&mut self, payload: &str, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let goals = goals::parse_snapshot(payload)?;
        self.apply_goal_snapshot(&goals, now)
    }

    pub fn apply_goal_snapshot(&mut self, goals: &[ExternalGoal], now: DateTime<Utc>) -> Result<ReconcileReport> {
        let before = self.overrides.entries().clone();
        let masked = self.overrides.apply_at(goals, now);
        if *self.overrides.entries() != before {
            self.save_overrides()?;
        }

        let (next, report) = goals::sync_goals(
            &self.tasks,
            &masked,
            &self.config.sections.goals_label,
            now,
        );
        self.commit_if_changed(next)?;
        tracing::debug!(?report, goals = goals.len(), "goals applied");
        Ok(report)
    }

    /// Whether a snapshot shows the toggle for `title` took effect.
    pub fn toggle_confirmed(&self, title: &str, goals: &[ExternalGoal]) -> bool {
        self.overrides.is_confirmed_by(title, goals)
    }

    pub fn mark_toggle_unconfirmed(&mut self, title: &str) -> Result<()> {
        self.overrides.mark_unconfirmed(title);
        self.save_overrides()
    }
}

enum ResolveError {
    Missing(String),
    Invalid(String),
}

fn resolve_id<'a>(input: &str, ids: impl Iterator<Item = &'a str>) -> std::result::Result<String, ResolveError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ResolveError::Invalid("id cannot be empty".to_string()));
    }

    let mut matches: Vec<&str> = Vec::new();
    for id in ids {
        if id == trimmed {
            return Ok(id.to_string());
        }
        if id.starts_with(trimmed) {
            matches.push(id);
        }
    }

    match matches.as_slice() {
        [] => Err(ResolveError::Missing(trimmed.to_string())),
        [only] => Ok(only.to_string()),
        many => Err(ResolveError::Invalid(format!(
            "ambiguous id '{trimmed}': {}",
            many.join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskOrigin;
    use chrono::{Duration, FixedOffset};
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> TaskStore {
        TaskStore::open(Storage::new(dir.path()), Config::default()).unwrap()
    }

    fn local(y: i32, m: u32, d: u32, h: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(y, m, d, h, 0, 0)
            .single()
            .unwrap()
    }

    #[test]
    fn mutations_persist_immediately() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);
        let parent = store.add_task("Groceries", None, Utc::now()).unwrap();
        let child = store.add_task("Milk", Some(&parent[..6]), Utc::now()).unwrap();

        let reopened = open(&dir);
        assert_eq!(reopened.tasks().len(), 2);
        assert_eq!(reopened.task(&child).unwrap().parent_id.as_deref(), Some(parent.as_str()));
    }

    #[test]
    fn prefix_resolution_rejects_ambiguity() {
        let ids = ["abc1", "abc2", "xyz"];
        assert!(matches!(resolve_id("xy", ids.iter().copied()), Ok(id) if id == "xyz"));
        assert!(matches!(resolve_id("abc", ids.iter().copied()), Err(ResolveError::Invalid(_))));
        assert!(matches!(resolve_id("q", ids.iter().copied()), Err(ResolveError::Missing(_))));
        assert!(matches!(resolve_id(" ", ids.iter().copied()), Err(ResolveError::Invalid(_))));
    }

    #[test]
    fn calendar_tasks_are_read_only() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);
        let event = CalendarEvent {
            id: "e1".to_string(),
            summary: "Standup".to_string(),
            start: "2026-03-10T09:00:00Z".to_string(),
            end: "2026-03-10T09:15:00Z".to_string(),
            is_all_day: false,
            html_link: None,
        };
        store.apply_calendar_events(&[event], &local(2026, 3, 10, 8)).unwrap();

        let err = store.rename_task("cal-evt-e1", "other").unwrap_err();
        assert!(matches!(err, Error::ReadOnly { .. }));
        let err = store.advance("cal-evt-e1", Utc::now()).unwrap_err();
        assert!(matches!(err, Error::ReadOnly { .. }));
        let err = store.add_task("note", Some("cal-today-2026-03-10"), Utc::now()).unwrap_err();
        assert!(matches!(err, Error::ReadOnly { .. }));
        assert!(matches!(store.move_to("cal-evt-e1", 5), Err(Error::ReadOnly { .. })));
        assert_eq!(store.tasks().len(), 2);

        // The section is the previous root sibling of a new root task.
        let mine = store.add_task("mine", None, Utc::now()).unwrap();
        assert!(matches!(store.indent(&mine), Err(Error::ReadOnly { .. })));
        assert!(store.task(&mine).unwrap().parent_id.is_none());
    }

    #[test]
    fn goal_status_change_records_override_and_toggle() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);
        let t0 = Utc::now();
        store
            .apply_goal_payload(r#"[{"id":"1","title":"Ship","completed":false}]"#, t0)
            .unwrap();

        assert!(matches!(store.rename_task("goal-1", "x"), Err(Error::ReadOnly { .. })));
        assert!(matches!(
            store.set_status(SECTION, TaskStatus::Completed, t0),
            Err(Error::ReadOnly { .. })
        ));

        let change = store.set_status("goal-1", TaskStatus::Completed, t0).unwrap();
        assert_eq!(
            change.toggles,
            vec![ToggleRequest {
                title: "Ship".to_string(),
                completed: true
            }]
        );
        assert!(store.overrides().get("Ship").is_some());

        // A stale snapshot a few seconds later does not undo the change.
        store
            .apply_goal_payload(r#"[{"id":"1","title":"Ship","completed":false}]"#, t0 + Duration::seconds(5))
            .unwrap();
        assert_eq!(store.task("goal-1").unwrap().status, TaskStatus::Completed);

        // Overrides survive a reopen, so the daemon sees what the CLI recorded.
        let reopened = open(&dir);
        assert!(reopened.overrides().get("Ship").is_some());
    }

    const SECTION: &str = goals::SECTION_ID;

    #[test]
    fn malformed_goal_payload_leaves_state() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);
        store.add_task("mine", None, Utc::now()).unwrap();
        let before = store.tasks().to_vec();
        let err = store.apply_goal_payload("<html>", Utc::now()).unwrap_err();
        assert!(err.is_feed_failure());
        assert_eq!(store.tasks(), before.as_slice());
    }

    #[test]
    fn daily_reset_runs_once_per_logical_day() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);
        store
            .add_template("Stretch", 1, IntervalUnit::Days, &local(2026, 3, 9, 12))
            .unwrap();
        let done = store.add_task("done", None, Utc::now()).unwrap();
        store.set_status(&done, TaskStatus::Completed, Utc::now()).unwrap();
        store.add_task("open", None, Utc::now()).unwrap();

        let now = local(2026, 3, 10, 7);
        let outcome = store.run_daily_reset(&now, false).unwrap().unwrap();
        assert_eq!(outcome.generated, 1);
        assert_eq!(outcome.carried, 1);
        assert_eq!(outcome.dropped, 1);
        assert_eq!(store.reset_state().last_reset_date, NaiveDate::from_ymd_opt(2026, 3, 10));

        assert!(store.run_daily_reset(&(now + Duration::hours(3)), false).unwrap().is_none());
        assert_eq!(store.tasks().iter().filter(|t| t.is_recurring()).count(), 1);

        let reopened = open(&dir);
        assert_eq!(reopened.reset_state().last_reset_date, NaiveDate::from_ymd_opt(2026, 3, 10));
    }

    #[test]
    fn load_repairs_dangling_parents() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());
        let orphan = Task::new("orphan", Some("ghost".to_string()), Utc::now())
            .with_id("orphan")
            .with_origin(TaskOrigin::Recurring {
                template_id: "t".to_string(),
            });
        storage.save_tasks(&[orphan]).unwrap();

        let store = open(&dir);
        assert!(store.task("orphan").unwrap().parent_id.is_none());
    }
}
