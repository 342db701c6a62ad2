//! ftask task command implementations.

use std::collections::HashSet;

use chrono::Utc;
use serde::Serialize;

use crate::cli::{emit_event, sync, GlobalOptions};
use crate::error::Result;
use crate::events::EventKind;
use crate::output::{emit_success, HumanOutput};
use crate::task::{Task, TaskOrigin, TaskStatus};
use crate::tree;

pub struct AddOptions {
    pub text: String,
    pub parent: Option<String>,
}

pub struct ListOptions {
    pub collapsed: Vec<String>,
}

pub struct EditOptions {
    pub id: String,
    pub text: String,
}

pub struct StatusOptions {
    pub id: String,
    /// `None` advances along the default transition.
    pub status: Option<String>,
    pub wait: bool,
}

pub enum MoveAction {
    Indent,
    Outdent,
    To(usize),
}

pub struct MoveOptions {
    pub id: String,
    pub action: MoveAction,
}

pub struct DeleteOptions {
    pub id: String,
}

#[derive(Serialize)]
struct TaskOutput {
    id: String,
    text: String,
    status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
}

impl From<&Task> for TaskOutput {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            text: task.text.clone(),
            status: task.status,
            parent_id: task.parent_id.clone(),
        }
    }
}

#[derive(Serialize)]
struct ListedTask {
    id: String,
    text: String,
    status: TaskStatus,
    depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    origin: Option<TaskOrigin>,
}

#[derive(Serialize)]
struct ListOutput {
    total: usize,
    tasks: Vec<ListedTask>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    unconfirmed: Vec<String>,
}

#[derive(Serialize)]
struct StatusOutput {
    id: String,
    status: TaskStatus,
    affected: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    toggles: Vec<sync::ToggleResult>,
}

#[derive(Serialize)]
struct MoveOutput {
    id: String,
    changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
}

#[derive(Serialize)]
struct DeleteOutput {
    id: String,
    removed: usize,
}

pub fn run_add(options: AddOptions, globals: &GlobalOptions) -> Result<()> {
    let mut store = globals.open_store()?;
    let mut sink = globals.open_events()?;

    let id = store.transaction(|store| store.add_task(&options.text, options.parent.as_deref(), Utc::now()))?;
    let output = TaskOutput::from(store.task(&id)?);
    let warning = emit_event(&mut sink, EventKind::TaskCreated, &output);

    let mut human = HumanOutput::new("Task added");
    human.push_summary("ID", short_id(&output.id));
    human.push_summary("Text", output.text.clone());
    if let Some(parent) = output.parent_id.as_deref() {
        human.push_summary("Parent", short_id(parent));
    }
    if let Some(warning) = warning {
        human.push_warning(warning);
    }

    emit_success(globals.output(), "add", &output, Some(&human))
}

pub fn run_list(options: ListOptions, globals: &GlobalOptions) -> Result<()> {
    let store = globals.open_store()?;
    let collapsed = options
        .collapsed
        .iter()
        .map(|id| store.resolve_task_id(id))
        .collect::<Result<HashSet<String>>>()?;

    let tasks = store.tasks();
    let listed: Vec<ListedTask> = tree::visible_ids(tasks, &collapsed)
        .into_iter()
        .filter_map(|id| tree::find(tasks, &id))
        .map(|task| ListedTask {
            id: task.id.clone(),
            text: task.text.clone(),
            status: task.status,
            depth: tree::depth(tasks, &task.id),
            parent_id: task.parent_id.clone(),
            origin: task.origin.clone(),
        })
        .collect();

    let output = ListOutput {
        total: tasks.len(),
        unconfirmed: store.overrides().unconfirmed(),
        tasks: listed,
    };

    let mut human = HumanOutput::new("Tasks");
    human.push_summary("Total", output.total.to_string());
    if let Some(date) = store.reset_state().last_reset_date {
        human.push_summary("Last reset", date.to_string());
    }
    for task in &output.tasks {
        human.push_detail(render_line(task, collapsed.contains(&task.id)));
    }
    for title in &output.unconfirmed {
        human.push_warning(format!("goal toggle not confirmed yet: {title}"));
    }
    if output.tasks.is_empty() {
        human.push_next_step("ftask add <text>");
    }

    emit_success(globals.output(), "list", &output, Some(&human))
}

pub fn run_edit(options: EditOptions, globals: &GlobalOptions) -> Result<()> {
    let mut store = globals.open_store()?;
    let mut sink = globals.open_events()?;

    let id = store.transaction(|store| store.rename_task(&options.id, &options.text))?;
    let output = TaskOutput::from(store.task(&id)?);
    let warning = emit_event(&mut sink, EventKind::TaskEdited, &output);

    let mut human = HumanOutput::new("Task updated");
    human.push_summary("ID", short_id(&output.id));
    human.push_summary("Text", output.text.clone());
    if let Some(warning) = warning {
        human.push_warning(warning);
    }

    emit_success(globals.output(), "edit", &output, Some(&human))
}

/// Shared by `advance` and `status`.
pub fn run_status(options: StatusOptions, globals: &GlobalOptions) -> Result<()> {
    let mut store = globals.open_store()?;
    let mut sink = globals.open_events()?;
    let command = if options.status.is_some() { "status" } else { "advance" };

    let target = options
        .status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()?;
    let change = store.transaction(|store| match target {
        Some(status) => store.set_status(&options.id, status, Utc::now()),
        None => store.advance(&options.id, Utc::now()),
    })?;

    let mut warnings = Vec::new();
    warnings.extend(emit_event(&mut sink, EventKind::TaskStatusChanged, &change));
    for toggle in &change.toggles {
        warnings.extend(emit_event(&mut sink, EventKind::GoalToggleRequested, toggle));
    }
    let toggles = sync::dispatch_toggles(store, &change.toggles, options.wait)?;

    let output = StatusOutput {
        id: change.id,
        status: change.status,
        affected: change.affected,
        toggles,
    };

    let mut human = HumanOutput::new("Task status updated");
    human.push_summary("ID", short_id(&output.id));
    human.push_summary("Status", output.status.to_string());
    if output.affected > 1 {
        human.push_summary("Cascaded", (output.affected - 1).to_string());
    }
    for toggle in &output.toggles {
        human.push_detail(format!("goal '{}' -> {}", toggle.title, toggle.outcome));
        if toggle.outcome == sync::ToggleState::NotSent {
            human.push_warning("no goal feed configured; set goals.snapshot_file in config.toml".to_string());
        }
    }
    for warning in warnings {
        human.push_warning(warning);
    }

    emit_success(globals.output(), command, &output, Some(&human))
}

pub fn run_move(options: MoveOptions, globals: &GlobalOptions) -> Result<()> {
    let mut store = globals.open_store()?;
    let mut sink = globals.open_events()?;
    let command = match options.action {
        MoveAction::Indent => "indent",
        MoveAction::Outdent => "outdent",
        MoveAction::To(_) => "move",
    };

    let (id, changed) = store.transaction(|store| {
        let id = store.resolve_task_id(&options.id)?;
        let changed = match options.action {
            MoveAction::Indent => store.indent(&id)?,
            MoveAction::Outdent => store.outdent(&id)?,
            MoveAction::To(index) => store.move_to(&id, index)?,
        };
        Ok((id, changed))
    })?;

    let output = MoveOutput {
        parent_id: store.task(&id)?.parent_id.clone(),
        id,
        changed,
    };
    let warning = if changed {
        emit_event(&mut sink, EventKind::TaskMoved, &output)
    } else {
        None
    };

    let mut human = HumanOutput::new(if changed { "Task moved" } else { "Task unchanged" });
    human.push_summary("ID", short_id(&output.id));
    match output.parent_id.as_deref() {
        Some(parent) => human.push_summary("Parent", short_id(parent)),
        None => human.push_summary("Parent", "(root)"),
    }
    if let Some(warning) = warning {
        human.push_warning(warning);
    }

    emit_success(globals.output(), command, &output, Some(&human))
}

pub fn run_delete(options: DeleteOptions, globals: &GlobalOptions) -> Result<()> {
    let mut store = globals.open_store()?;
    let mut sink = globals.open_events()?;

    let output = store.transaction(|store| {
        let id = store.resolve_task_id(&options.id)?;
        let removed = store.delete(&id)?;
        Ok(DeleteOutput { id, removed })
    })?;
    let warning = emit_event(&mut sink, EventKind::TaskDeleted, &output);

    let mut human = HumanOutput::new("Task deleted");
    human.push_summary("ID", short_id(&output.id));
    human.push_summary("Removed", output.removed.to_string());
    if let Some(warning) = warning {
        human.push_warning(warning);
    }

    emit_success(globals.output(), "delete", &output, Some(&human))
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

fn status_marker(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "[ ]",
        TaskStatus::InProgress => "[~]",
        TaskStatus::Interrupted => "[!]",
        TaskStatus::Completed => "[x]",
    }
}

fn render_line(task: &ListedTask, collapsed: bool) -> String {
    let mut line = format!(
        "{}{} {} {}",
        "  ".repeat(task.depth),
        status_marker(task.status),
        short_id(&task.id),
        task.text
    );
    match task.origin {
        Some(TaskOrigin::CalendarEvent { .. }) | Some(TaskOrigin::CalendarSection { .. }) => {
            line.push_str(" (calendar)")
        }
        Some(TaskOrigin::Goal { .. }) | Some(TaskOrigin::GoalSection) => line.push_str(" (goal)"),
        Some(TaskOrigin::Recurring { .. }) => line.push_str(" (recurring)"),
        None => {}
    }
    if collapsed {
        line.push_str(" …");
    }
    line
}
