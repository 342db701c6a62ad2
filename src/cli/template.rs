//! ftask template command implementations.

use chrono::Local;
use serde::Serialize;

use crate::cli::{emit_event, GlobalOptions};
use crate::error::{Error, Result};
use crate::events::EventKind;
use crate::output::{emit_success, HumanOutput};
use crate::recurring::{
    IntervalUnit, MoveDirection, RecurringSubTask, RecurringTaskTemplate, TemplateUpdate,
};

pub struct AddOptions {
    pub text: String,
    pub every: u32,
    pub unit: String,
}

pub struct EditOptions {
    pub id: String,
    pub text: Option<String>,
    pub every: Option<u32>,
    pub unit: Option<String>,
    pub enabled: Option<bool>,
}

pub struct RmOptions {
    pub id: String,
}

pub struct MoveOptions {
    pub id: String,
    pub direction: String,
}

pub enum SubAction {
    Add { text: String, parent: Option<String> },
    Rm { sub: String },
    Edit { sub: String, text: String },
}

pub struct SubOptions {
    pub template: String,
    pub action: SubAction,
}

#[derive(Serialize)]
struct TemplateListOutput<'a> {
    total: usize,
    templates: &'a [RecurringTaskTemplate],
}

#[derive(Serialize)]
struct SubOutput {
    template_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sub_id: Option<String>,
    action: &'static str,
}

fn parse_direction(raw: &str) -> Result<MoveDirection> {
    match raw.trim().to_lowercase().as_str() {
        "up" => Ok(MoveDirection::Up),
        "down" => Ok(MoveDirection::Down),
        other => Err(Error::InvalidArgument(format!(
            "unknown direction '{other}' (expected up|down)"
        ))),
    }
}

fn describe_interval(template: &RecurringTaskTemplate) -> String {
    let unit = match (template.interval_value, template.interval_unit) {
        (1, IntervalUnit::Days) => return "daily".to_string(),
        (1, IntervalUnit::Weeks) => return "weekly".to_string(),
        (_, unit) => unit.as_str(),
    };
    format!("every {} {unit}", template.interval_value)
}

fn template_human(header: &str, template: &RecurringTaskTemplate) -> HumanOutput {
    let mut human = HumanOutput::new(header);
    human.push_summary("ID", template.id.clone());
    human.push_summary("Text", template.text.clone());
    human.push_summary("Repeats", describe_interval(template));
    human.push_summary("Starts", template.start_date.to_string());
    if !template.enabled {
        human.push_summary("Disabled", "");
    }
    human
}

pub fn run_add(options: AddOptions, globals: &GlobalOptions) -> Result<()> {
    let mut store = globals.open_store()?;
    let mut sink = globals.open_events()?;
    let unit: IntervalUnit = options.unit.parse()?;

    let now = Local::now();
    let id = store.transaction(|store| store.add_template(&options.text, options.every, unit, &now))?;
    let template = find(store.templates(), &id)?;
    let warning = emit_event(&mut sink, EventKind::TemplateCreated, template);

    let mut human = template_human("Template added", template);
    if let Some(warning) = warning {
        human.push_warning(warning);
    }
    emit_success(globals.output(), "template add", template, Some(&human))
}

pub fn run_list(globals: &GlobalOptions) -> Result<()> {
    let store = globals.open_store()?;
    let templates = store.templates();
    let output = TemplateListOutput {
        total: templates.len(),
        templates,
    };

    let mut human = HumanOutput::new("Templates");
    human.push_summary("Total", templates.len().to_string());
    for template in templates {
        let state = if template.enabled { "" } else { " (disabled)" };
        human.push_detail(format!(
            "{} {} [{}]{state}",
            template.id,
            template.text,
            describe_interval(template)
        ));
        push_subtasks(&mut human, &template.children, 1);
    }
    if templates.is_empty() {
        human.push_next_step("ftask template add <text> --every 1 --unit days");
    }

    emit_success(globals.output(), "template list", &output, Some(&human))
}

fn push_subtasks(human: &mut HumanOutput, subs: &[RecurringSubTask], depth: usize) {
    for sub in subs {
        human.push_detail(format!("{}{} {}", "  ".repeat(depth), sub.id, sub.text));
        push_subtasks(human, &sub.children, depth + 1);
    }
}

pub fn run_edit(options: EditOptions, globals: &GlobalOptions) -> Result<()> {
    let mut store = globals.open_store()?;
    let mut sink = globals.open_events()?;
    let update = TemplateUpdate {
        text: options.text,
        interval_value: options.every,
        interval_unit: options.unit.as_deref().map(str::parse).transpose()?,
        enabled: options.enabled,
    };

    let id = store.transaction(|store| store.update_template(&options.id, update))?;
    let template = find(store.templates(), &id)?;
    let warning = emit_event(&mut sink, EventKind::TemplateEdited, template);

    let mut human = template_human("Template updated", template);
    if let Some(warning) = warning {
        human.push_warning(warning);
    }
    emit_success(globals.output(), "template edit", template, Some(&human))
}

pub fn run_rm(options: RmOptions, globals: &GlobalOptions) -> Result<()> {
    let mut store = globals.open_store()?;
    let mut sink = globals.open_events()?;

    let id = store.transaction(|store| store.delete_template(&options.id))?;
    let output = serde_json::json!({ "id": id });
    let warning = emit_event(&mut sink, EventKind::TemplateDeleted, &output);

    let mut human = HumanOutput::new("Template removed");
    human.push_summary("ID", id);
    if let Some(warning) = warning {
        human.push_warning(warning);
    }
    emit_success(globals.output(), "template rm", &output, Some(&human))
}

pub fn run_move(options: MoveOptions, globals: &GlobalOptions) -> Result<()> {
    let mut store = globals.open_store()?;
    let direction = parse_direction(&options.direction)?;

    let id = store.transaction(|store| store.move_template(&options.id, direction))?;
    let position = store
        .templates()
        .iter()
        .position(|t| t.id == id)
        .unwrap_or_default();
    let output = serde_json::json!({ "id": id, "position": position });

    let mut human = HumanOutput::new("Template moved");
    human.push_summary("ID", id);
    human.push_summary("Position", position.to_string());
    emit_success(globals.output(), "template move", &output, Some(&human))
}

pub fn run_sub(options: SubOptions, globals: &GlobalOptions) -> Result<()> {
    let mut store = globals.open_store()?;
    let mut sink = globals.open_events()?;

    let (command, output) = store.transaction(|store| {
        let template_id = store.resolve_template_id(&options.template)?;
        Ok(match &options.action {
            SubAction::Add { text, parent } => {
                let sub_id = store.add_subtask(&template_id, parent.as_deref(), text)?;
                (
                    "template sub add",
                    SubOutput {
                        template_id,
                        sub_id: Some(sub_id),
                        action: "added",
                    },
                )
            }
            SubAction::Rm { sub } => {
                store.delete_subtask(&template_id, sub)?;
                (
                    "template sub rm",
                    SubOutput {
                        template_id,
                        sub_id: Some(sub.clone()),
                        action: "removed",
                    },
                )
            }
            SubAction::Edit { sub, text } => {
                store.update_subtask(&template_id, sub, text)?;
                (
                    "template sub edit",
                    SubOutput {
                        template_id,
                        sub_id: Some(sub.clone()),
                        action: "updated",
                    },
                )
            }
        })
    })?;
    let warning = emit_event(&mut sink, EventKind::TemplateEdited, &output);

    let mut human = HumanOutput::new(format!("Subtask {}", output.action));
    human.push_summary("Template", output.template_id.clone());
    if let Some(sub_id) = output.sub_id.as_deref() {
        human.push_summary("Subtask", sub_id);
    }
    if let Some(warning) = warning {
        human.push_warning(warning);
    }
    emit_success(globals.output(), command, &output, Some(&human))
}

fn find<'a>(templates: &'a [RecurringTaskTemplate], id: &str) -> Result<&'a RecurringTaskTemplate> {
    templates
        .iter()
        .find(|t| t.id == id)
        .ok_or_else(|| Error::TemplateNotFound(id.to_string()))
}
