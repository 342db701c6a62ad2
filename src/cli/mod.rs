//! Command-line interface for ftask
//!
//! This module defines the CLI structure using clap derive macros.
//! Command implementations live in the submodules.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::error::Result;
use crate::events::{Event, EventDestination, EventKind, EventSink};
use crate::output::OutputOptions;
use crate::storage::Storage;
use crate::store::TaskStore;

mod sync;
mod task;
mod template;

/// ftask - a floating task list
///
/// Hierarchical personal tasks, merged with today's calendar, an external
/// goal tracker and recurring templates that regenerate every day.
#[derive(Parser, Debug)]
#[command(name = "ftask")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Data directory (defaults to the platform data dir)
    #[arg(long, global = true, env = "FTASK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit JSONL events to a file, or `-` for stdout
    #[arg(long, global = true)]
    pub events: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Add a task
    Add {
        /// Task text
        #[arg(required = true)]
        text: Vec<String>,

        /// Parent task id (or unique prefix)
        #[arg(short, long)]
        parent: Option<String>,
    },

    /// Show the task tree in display order
    List {
        /// Hide the children of these tasks
        #[arg(long = "collapse", value_name = "ID")]
        collapsed: Vec<String>,
    },

    /// Change a task's text
    Edit {
        id: String,
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Move a task to its next status (pending -> in_progress, interrupted -> completed, completed -> pending)
    Advance {
        id: String,

        /// Wait for goal toggles to show up in the goal feed
        #[arg(long)]
        wait: bool,
    },

    /// Set a task's status explicitly
    Status {
        id: String,

        /// pending, in_progress, interrupted or completed
        status: String,

        /// Wait for goal toggles to show up in the goal feed
        #[arg(long)]
        wait: bool,
    },

    /// Make a task the last child of its previous sibling
    Indent { id: String },

    /// Move a task up to its grandparent's level
    Outdent { id: String },

    /// Move a task to a position among its siblings
    Move {
        id: String,

        /// Zero-based target index; large values move to the end
        index: usize,
    },

    /// Delete a task and everything under it
    Delete { id: String },

    /// Recurring templates
    #[command(subcommand)]
    Template(TemplateCommands),

    /// Run the daily reset if the logical day changed
    Reset {
        /// Reset even if it already ran today
        #[arg(long)]
        force: bool,
    },

    /// Apply a feed snapshot from a file
    #[command(subcommand)]
    Import(ImportCommands),

    /// Run the background scheduler
    Daemon {
        /// Run every cycle once and exit
        #[arg(long)]
        once: bool,

        /// Calendar access token
        #[arg(long, env = "FTASK_CALENDAR_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum TemplateCommands {
    /// Add a template
    Add {
        #[arg(required = true)]
        text: Vec<String>,

        /// Interval length
        #[arg(long, default_value_t = 1)]
        every: u32,

        /// Interval unit: days or weeks
        #[arg(long, default_value = "days")]
        unit: String,
    },

    /// List templates
    List,

    /// Edit a template
    Edit {
        id: String,

        #[arg(long)]
        text: Option<String>,

        #[arg(long)]
        every: Option<u32>,

        #[arg(long)]
        unit: Option<String>,

        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        #[arg(long)]
        disable: bool,
    },

    /// Remove a template
    Rm { id: String },

    /// Swap a template with its neighbour
    Move {
        id: String,

        /// up or down
        direction: String,
    },

    /// Template subtasks
    #[command(subcommand)]
    Sub(SubCommands),
}

#[derive(Subcommand, Debug)]
pub enum SubCommands {
    /// Add a subtask
    Add {
        template: String,

        #[arg(required = true)]
        text: Vec<String>,

        /// Parent subtask id
        #[arg(short, long)]
        parent: Option<String>,
    },

    /// Remove a subtask and its children
    Rm { template: String, sub: String },

    /// Change a subtask's text
    Edit {
        template: String,
        sub: String,
        #[arg(required = true)]
        text: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ImportCommands {
    /// Apply a Google Calendar events.list body for today
    Calendar {
        /// Events file (defaults to calendar.snapshot_file)
        file: Option<PathBuf>,
    },

    /// Apply a goal snapshot (JSON array of goals)
    Goals {
        /// Snapshot file (defaults to goals.snapshot_file)
        file: Option<PathBuf>,
    },
}

/// Flags shared by every command.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub data_dir: Option<PathBuf>,
    pub events: Option<String>,
    pub json: bool,
    pub quiet: bool,
}

impl GlobalOptions {
    fn events_to_stdout(&self) -> bool {
        matches!(
            EventDestination::parse(self.events.as_deref()),
            Some(EventDestination::Stdout)
        )
    }

    /// Events on stdout take precedence over regular output.
    fn output(&self) -> OutputOptions {
        let events_to_stdout = self.events_to_stdout();
        OutputOptions {
            json: self.json && !events_to_stdout,
            quiet: self.quiet || events_to_stdout,
        }
    }

    fn open_events(&self) -> Result<Option<EventSink>> {
        EventDestination::parse(self.events.as_deref())
            .map(|dest| dest.open())
            .transpose()
    }

    fn open_store(&self) -> Result<TaskStore> {
        let storage = Storage::resolve(self.data_dir.clone())?;
        let config = Config::load_from_dir(storage.data_dir());
        TaskStore::open(storage, config)
    }
}

/// Emit one event, returning a warning instead of failing the command.
fn emit_event<T: serde::Serialize>(
    sink: &mut Option<EventSink>,
    kind: EventKind,
    data: &T,
) -> Option<String> {
    let sink = sink.as_mut()?;
    let event = match Event::new(kind, Some("cli".to_string())).with_data(data) {
        Ok(event) => event,
        Err(err) => return Some(format!("event output failed: {err}")),
    };
    if let Err(err) = sink.emit(&event) {
        return Some(format!("event output failed: {err}"));
    }
    None
}

fn join_text(words: Vec<String>) -> String {
    words.join(" ")
}

impl Cli {
    fn globals(&self) -> GlobalOptions {
        GlobalOptions {
            data_dir: self.data_dir.clone(),
            events: self.events.clone(),
            json: self.json,
            quiet: self.quiet,
        }
    }

    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let globals = self.globals();
        match self.command {
            Commands::Add { text, parent } => task::run_add(
                task::AddOptions {
                    text: join_text(text),
                    parent,
                },
                &globals,
            ),
            Commands::List { collapsed } => task::run_list(task::ListOptions { collapsed }, &globals),
            Commands::Edit { id, text } => task::run_edit(
                task::EditOptions {
                    id,
                    text: join_text(text),
                },
                &globals,
            ),
            Commands::Advance { id, wait } => task::run_status(
                task::StatusOptions {
                    id,
                    status: None,
                    wait,
                },
                &globals,
            ),
            Commands::Status { id, status, wait } => task::run_status(
                task::StatusOptions {
                    id,
                    status: Some(status),
                    wait,
                },
                &globals,
            ),
            Commands::Indent { id } => task::run_move(
                task::MoveOptions {
                    id,
                    action: task::MoveAction::Indent,
                },
                &globals,
            ),
            Commands::Outdent { id } => task::run_move(
                task::MoveOptions {
                    id,
                    action: task::MoveAction::Outdent,
                },
                &globals,
            ),
            Commands::Move { id, index } => task::run_move(
                task::MoveOptions {
                    id,
                    action: task::MoveAction::To(index),
                },
                &globals,
            ),
            Commands::Delete { id } => task::run_delete(task::DeleteOptions { id }, &globals),
            Commands::Template(cmd) => match cmd {
                TemplateCommands::Add { text, every, unit } => template::run_add(
                    template::AddOptions {
                        text: join_text(text),
                        every,
                        unit,
                    },
                    &globals,
                ),
                TemplateCommands::List => template::run_list(&globals),
                TemplateCommands::Edit {
                    id,
                    text,
                    every,
                    unit,
                    enable,
                    disable,
                } => template::run_edit(
                    template::EditOptions {
                        id,
                        text,
                        every,
                        unit,
                        enabled: match (enable, disable) {
                            (true, _) => Some(true),
                            (_, true) => Some(false),
                            _ => None,
                        },
                    },
                    &globals,
                ),
                TemplateCommands::Rm { id } => template::run_rm(template::RmOptions { id }, &globals),
                TemplateCommands::Move { id, direction } => {
                    template::run_move(template::MoveOptions { id, direction }, &globals)
                }
                TemplateCommands::Sub(sub) => match sub {
                    SubCommands::Add {
                        template: template_id,
                        text,
                        parent,
                    } => template::run_sub(
                        template::SubOptions {
                            template: template_id,
                            action: template::SubAction::Add {
                                text: join_text(text),
                                parent,
                            },
                        },
                        &globals,
                    ),
                    SubCommands::Rm {
                        template: template_id,
                        sub,
                    } => template::run_sub(
                        template::SubOptions {
                            template: template_id,
                            action: template::SubAction::Rm { sub },
                        },
                        &globals,
                    ),
                    SubCommands::Edit {
                        template: template_id,
                        sub,
                        text,
                    } => template::run_sub(
                        template::SubOptions {
                            template: template_id,
                            action: template::SubAction::Edit {
                                sub,
                                text: join_text(text),
                            },
                        },
                        &globals,
                    ),
                },
            },
            Commands::Reset { force } => sync::run_reset(sync::ResetOptions { force }, &globals),
            Commands::Import(cmd) => match cmd {
                ImportCommands::Calendar { file } => sync::run_import(
                    sync::ImportOptions {
                        feed: sync::Feed::Calendar,
                        file,
                    },
                    &globals,
                ),
                ImportCommands::Goals { file } => sync::run_import(
                    sync::ImportOptions {
                        feed: sync::Feed::Goals,
                        file,
                    },
                    &globals,
                ),
            },
            Commands::Daemon { once, token } => {
                sync::run_daemon(sync::DaemonOptions { once, token }, &globals)
            }
        }
    }
}
