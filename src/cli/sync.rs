//! ftask reset, import and daemon commands, plus goal toggle dispatch.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, Utc};
use serde::Serialize;

use crate::calendar;
use crate::cli::{emit_event, GlobalOptions};
use crate::error::{Error, Result};
use crate::events::EventKind;
use crate::output::{emit_success, HumanOutput};
use crate::store::{TaskStore, ToggleRequest};
use crate::sync::{
    FileCalendarSource, FileGoalFeed, GoalFeed, StaticToken, SyncEngine, SyncSettings,
    ToggleOutcome,
};
use crate::task::ReconcileReport;

/// Outbox used when `goals.outbox_file` is not set.
const DEFAULT_OUTBOX_FILE: &str = "goal-toggles.jsonl";

pub struct ResetOptions {
    pub force: bool,
}

pub enum Feed {
    Calendar,
    Goals,
}

pub struct ImportOptions {
    pub feed: Feed,
    pub file: Option<PathBuf>,
}

pub struct DaemonOptions {
    pub once: bool,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleState {
    /// Handed to the goal feed without waiting.
    Requested,
    Confirmed,
    Unconfirmed,
    /// No goal feed is configured.
    NotSent,
}

impl std::fmt::Display for ToggleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ToggleState::Requested => "requested",
            ToggleState::Confirmed => "confirmed",
            ToggleState::Unconfirmed => "unconfirmed",
            ToggleState::NotSent => "not sent",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToggleResult {
    pub title: String,
    pub completed: bool,
    pub outcome: ToggleState,
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

fn goal_feed(store: &TaskStore) -> Option<FileGoalFeed> {
    let goals = &store.config().goals;
    let storage = store.storage();
    let snapshot = storage.resolve_path(goals.snapshot_file.as_deref()?);
    let outbox = goals
        .outbox_file
        .as_deref()
        .map(|path| storage.resolve_path(path))
        .unwrap_or_else(|| storage.data_dir().join(DEFAULT_OUTBOX_FILE));
    Some(FileGoalFeed::new(snapshot, outbox))
}

fn calendar_source(store: &TaskStore) -> Option<FileCalendarSource> {
    let path = store.config().calendar.snapshot_file.as_deref()?;
    Some(FileCalendarSource::new(store.storage().resolve_path(path)))
}

/// Send the toggles produced by a status change to the goal feed.
///
/// With `wait`, each toggle is confirmed against fresh snapshots before the
/// next one is sent.
pub fn dispatch_toggles(
    store: TaskStore,
    toggles: &[ToggleRequest],
    wait: bool,
) -> Result<Vec<ToggleResult>> {
    if toggles.is_empty() {
        return Ok(Vec::new());
    }
    let result = |toggle: &ToggleRequest, outcome| ToggleResult {
        title: toggle.title.clone(),
        completed: toggle.completed,
        outcome,
    };

    let Some(feed) = goal_feed(&store) else {
        tracing::warn!(count = toggles.len(), "no goal feed configured; toggles not sent");
        return Ok(toggles
            .iter()
            .map(|toggle| result(toggle, ToggleState::NotSent))
            .collect());
    };

    let runtime = runtime()?;
    if !wait {
        return runtime.block_on(async {
            let mut results = Vec::with_capacity(toggles.len());
            for toggle in toggles {
                feed.request_toggle(toggle).await?;
                results.push(result(toggle, ToggleState::Requested));
            }
            Ok::<_, Error>(results)
        });
    }

    let settings = SyncSettings::from_config(store.config())?;
    let mut engine = SyncEngine::new(store, settings).with_goals(Arc::new(feed));
    runtime.block_on(async {
        let mut results = Vec::with_capacity(toggles.len());
        for toggle in toggles {
            let outcome = match engine.confirm_toggle(toggle.clone()).await? {
                ToggleOutcome::Confirmed => ToggleState::Confirmed,
                ToggleOutcome::Unconfirmed => ToggleState::Unconfirmed,
            };
            results.push(result(toggle, outcome));
        }
        Ok::<_, Error>(results)
    })
}

pub fn run_reset(options: ResetOptions, globals: &GlobalOptions) -> Result<()> {
    let mut store = globals.open_store()?;
    let mut sink = globals.open_events()?;

    let now = Local::now();
    let outcome = store.transaction(|store| store.run_daily_reset(&now, options.force))?;

    let mut human = match &outcome {
        Some(outcome) => {
            let mut human = HumanOutput::new("Daily reset done");
            human.push_summary("Logical date", outcome.date.to_string());
            human.push_summary("Generated", outcome.generated.to_string());
            human.push_summary("Carried over", outcome.carried.to_string());
            human.push_summary("Dropped", outcome.dropped.to_string());
            human
        }
        None => {
            let mut human = HumanOutput::new("Daily reset already ran");
            if let Some(date) = store.reset_state().last_reset_date {
                human.push_summary("Logical date", date.to_string());
            }
            human.push_next_step("ftask reset --force");
            human
        }
    };
    if let Some(outcome) = &outcome {
        if let Some(warning) = emit_event(&mut sink, EventKind::DailyReset, outcome) {
            human.push_warning(warning);
        }
    }

    let output = serde_json::json!({
        "ran": outcome.is_some(),
        "reset": outcome,
    });
    emit_success(globals.output(), "reset", &output, Some(&human))
}

pub fn run_import(options: ImportOptions, globals: &GlobalOptions) -> Result<()> {
    let mut store = globals.open_store()?;
    let mut sink = globals.open_events()?;

    let configured = match options.feed {
        Feed::Calendar => store.config().calendar.snapshot_file.clone(),
        Feed::Goals => store.config().goals.snapshot_file.clone(),
    };
    let path = options
        .file
        .or_else(|| configured.map(|p| store.storage().resolve_path(&p)))
        .ok_or_else(|| Error::InvalidArgument("no snapshot file given or configured".to_string()))?;
    let payload = std::fs::read_to_string(&path)
        .map_err(|err| Error::Transport(format!("{}: {err}", path.display())))?;

    let (command, kind, report): (&str, EventKind, ReconcileReport) = match options.feed {
        Feed::Calendar => {
            let events = calendar::parse_google_events(&payload)?;
            let now = Local::now();
            let report = store.transaction(|store| store.apply_calendar_events(&events, &now))?;
            ("import calendar", EventKind::CalendarApplied, report)
        }
        Feed::Goals => {
            let report = store.transaction(|store| store.apply_goal_payload(&payload, Utc::now()))?;
            ("import goals", EventKind::GoalsApplied, report)
        }
    };

    let mut human = HumanOutput::new(if report.is_empty() {
        "Already up to date"
    } else {
        "Snapshot applied"
    });
    human.push_summary("File", path.display().to_string());
    human.push_summary("Added", report.added.to_string());
    human.push_summary("Updated", report.updated.to_string());
    human.push_summary("Removed", report.removed.to_string());
    if let Some(warning) = emit_event(&mut sink, kind, &report) {
        human.push_warning(warning);
    }

    emit_success(globals.output(), command, &report, Some(&human))
}

pub fn run_daemon(options: DaemonOptions, globals: &GlobalOptions) -> Result<()> {
    let store = globals.open_store()?;
    let settings = SyncSettings::from_config(store.config())?;
    let calendar = calendar_source(&store);
    let goals = goal_feed(&store);

    let mut engine = SyncEngine::new(store, settings);
    if let Some(source) = calendar {
        engine = engine.with_calendar(Arc::new(StaticToken(options.token)), Arc::new(source));
    }
    if let Some(feed) = goals {
        engine = engine.with_goals(Arc::new(feed));
    }
    if let Some(sink) = globals.open_events()? {
        engine = engine.with_events(sink);
    }

    let runtime = runtime()?;
    runtime.block_on(async {
        if options.once {
            engine.reset_cycle();
            engine.calendar_cycle().await;
            engine.goals_cycle().await;
            return Ok(());
        }
        // CLI toggles go to the outbox or are confirmed with `--wait` in the
        // CLI process, so the sender stays idle here.
        let (_toggle_tx, toggle_rx) = tokio::sync::mpsc::channel(16);
        engine
            .run(toggle_rx, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
    })?;

    let status = engine.status();
    let mut human = HumanOutput::new(if options.once { "Sync cycle done" } else { "Daemon stopped" });
    for (name, feed) in [("Calendar", &status.calendar), ("Goals", &status.goals)] {
        let state = match (&feed.last_error, feed.last_success) {
            (Some(err), _) => format!("skipped: {err}"),
            (None, Some(at)) => format!("ok at {}", at.with_timezone(&Local).format("%H:%M:%S")),
            (None, None) => "not configured".to_string(),
        };
        human.push_summary(name, state);
    }
    for title in &status.unconfirmed {
        human.push_warning(format!("goal toggle not confirmed: {title}"));
    }

    emit_success(globals.output(), "daemon", status, Some(&human))
}
