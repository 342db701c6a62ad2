//! Background feed scheduler.
//!
//! [`SyncEngine`] runs one cooperative loop over three timers (daily reset
//! check, calendar poll, goal poll) and a channel of goal toggle requests.
//! Feed failures never reach the caller: they are logged, kept in
//! [`SyncStatus`] and the cycle is skipped with the task tree untouched.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use ulid::Ulid;

use crate::calendar::{self, CalendarEvent};
use crate::config::{self, Config};
use crate::error::{Error, Result};
use crate::events::{Event, EventKind, EventSink};
use crate::goals;
use crate::storage;
use crate::store::{TaskStore, ToggleRequest};
use crate::task::ReconcileReport;

// =============================================================================
// Collaborators
// =============================================================================

/// Supplies calendar access tokens. `None` means not signed in.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<Option<String>>;
}

#[async_trait]
pub trait CalendarSource: Send + Sync {
    async fn fetch_today_events(&self, access_token: &str) -> Result<Vec<CalendarEvent>>;
}

#[async_trait]
pub trait GoalFeed: Send + Sync {
    /// Raw snapshot payload: a JSON array of goals.
    async fn fetch_snapshot(&self) -> Result<String>;

    /// Fire-and-forget toggle. Success only means the request was handed off.
    async fn request_toggle(&self, request: &ToggleRequest) -> Result<()>;
}

/// Fixed token, or none when calendar access is not configured.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<Option<String>> {
        Ok(self.0.clone())
    }
}

/// Reads a Google Calendar `events.list` body from disk.
#[derive(Debug, Clone)]
pub struct FileCalendarSource {
    path: PathBuf,
}

impl FileCalendarSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CalendarSource for FileCalendarSource {
    async fn fetch_today_events(&self, _access_token: &str) -> Result<Vec<CalendarEvent>> {
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|err| Error::Transport(format!("{}: {err}", self.path.display())))?;
        calendar::parse_google_events(&body)
    }
}

/// Goal feed backed by files shared with the automation bridge: the bridge
/// writes snapshots to one file and reads toggle requests from a JSONL outbox.
#[derive(Debug, Clone)]
pub struct FileGoalFeed {
    snapshot: PathBuf,
    outbox: PathBuf,
}

#[derive(Debug, Serialize)]
struct OutboxRecord {
    id: String,
    title: String,
    completed: bool,
    requested_at: DateTime<Utc>,
}

impl FileGoalFeed {
    pub fn new(snapshot: impl Into<PathBuf>, outbox: impl Into<PathBuf>) -> Self {
        Self {
            snapshot: snapshot.into(),
            outbox: outbox.into(),
        }
    }
}

#[async_trait]
impl GoalFeed for FileGoalFeed {
    async fn fetch_snapshot(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.snapshot)
            .await
            .map_err(|err| Error::Transport(format!("{}: {err}", self.snapshot.display())))
    }

    async fn request_toggle(&self, request: &ToggleRequest) -> Result<()> {
        let record = OutboxRecord {
            id: Ulid::new().to_string(),
            title: request.title.clone(),
            completed: request.completed,
            requested_at: Utc::now(),
        };
        let outbox = self.outbox.clone();
        tokio::task::spawn_blocking(move || storage::append_jsonl(&outbox, &record))
            .await
            .map_err(|err| Error::Transport(format!("outbox writer: {err}")))?
    }
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub reset_check_interval: Duration,
    pub calendar_interval: Duration,
    pub goals_interval: Duration,
    pub goals_initial_delay: Duration,
    pub toggle_timeout: Duration,
    pub toggle_poll_interval: Duration,
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            reset_check_interval: config::parse_std_duration(&config.reset.check_interval)?,
            calendar_interval: config::parse_std_duration(&config.calendar.poll_interval)?,
            goals_interval: config::parse_std_duration(&config.goals.poll_interval)?,
            goals_initial_delay: config::parse_std_duration(&config.goals.initial_delay)?,
            toggle_timeout: config::parse_std_duration(&config.goals.toggle_timeout)?,
            toggle_poll_interval: config::parse_std_duration(&config.goals.toggle_poll_interval)?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    /// User-visible reason the last cycle was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// The last failure came from local state (store, lock, config), not
    /// from the feed itself.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub local_failure: bool,
}

impl FeedStatus {
    fn succeeded(&mut self) {
        self.last_success = Some(Utc::now());
        self.last_error = None;
        self.local_failure = false;
    }

    fn failed(&mut self, message: String) {
        self.last_error = Some(message);
        self.local_failure = false;
    }

    fn failed_with(&mut self, err: &Error) {
        self.last_error = Some(err.to_string());
        self.local_failure = !err.is_feed_failure();
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    pub calendar: FeedStatus,
    pub goals: FeedStatus,
    /// Goal titles whose toggle was never observed in a snapshot.
    pub unconfirmed: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleOutcome {
    Confirmed,
    Unconfirmed,
}

pub struct SyncEngine {
    store: TaskStore,
    settings: SyncSettings,
    tokens: Arc<dyn TokenProvider>,
    calendar: Option<Arc<dyn CalendarSource>>,
    goals: Option<Arc<dyn GoalFeed>>,
    events: Option<EventSink>,
    status: SyncStatus,
}

impl SyncEngine {
    pub fn new(store: TaskStore, settings: SyncSettings) -> Self {
        Self {
            store,
            settings,
            tokens: Arc::new(StaticToken::default()),
            calendar: None,
            goals: None,
            events: None,
            status: SyncStatus::default(),
        }
    }

    pub fn with_calendar(mut self, tokens: Arc<dyn TokenProvider>, source: Arc<dyn CalendarSource>) -> Self {
        self.tokens = tokens;
        self.calendar = Some(source);
        self
    }

    pub fn with_goals(mut self, feed: Arc<dyn GoalFeed>) -> Self {
        self.goals = Some(feed);
        self
    }

    pub fn with_events(mut self, sink: EventSink) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn into_store(self) -> TaskStore {
        self.store
    }

    /// Run until `shutdown` resolves.
    ///
    /// The reset check and the calendar poll fire immediately; the first goal
    /// poll waits for the configured initial delay. Toggle requests are
    /// handled inline, so a slow confirmation delays the next timer.
    ///
    /// `toggles` is for callers that host the engine next to an interactive
    /// surface. The `ftask daemon` binary keeps the sender idle: CLI status
    /// changes write to the bridge outbox themselves, and `--wait` runs
    /// [`SyncEngine::confirm_toggle`] in that process.
    pub async fn run(
        &mut self,
        mut toggles: mpsc::Receiver<ToggleRequest>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let mut reset_tick = interval(self.settings.reset_check_interval);
        let mut calendar_tick = interval(self.settings.calendar_interval);
        let mut goals_tick = interval_at(
            Instant::now() + self.settings.goals_initial_delay,
            self.settings.goals_interval,
        );
        for tick in [&mut reset_tick, &mut calendar_tick, &mut goals_tick] {
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }
        tokio::pin!(shutdown);

        tracing::info!(
            calendar = self.calendar.is_some(),
            goals = self.goals.is_some(),
            "sync engine started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = reset_tick.tick() => self.reset_cycle(),
                _ = calendar_tick.tick(), if self.calendar.is_some() => self.calendar_cycle().await,
                _ = goals_tick.tick(), if self.goals.is_some() => self.goals_cycle().await,
                Some(request) = toggles.recv() => {
                    if let Err(err) = self.confirm_toggle(request).await {
                        tracing::warn!(%err, "goal toggle failed");
                        self.status.goals.failed_with(&err);
                    }
                }
            }
        }

        tracing::info!("sync engine stopped");
        Ok(())
    }

    /// Apply the daily reset if due. Errors are logged; the next tick retries.
    pub fn reset_cycle(&mut self) {
        let now = Local::now();
        match self.store.transaction(|store| store.run_daily_reset(&now, false)) {
            Ok(Some(outcome)) => self.emit(EventKind::DailyReset, &outcome),
            Ok(None) => {}
            Err(err) => tracing::warn!(%err, "daily reset failed"),
        }
    }

    pub async fn calendar_cycle(&mut self) {
        match self.poll_calendar().await {
            Ok(Some(report)) => {
                self.status.calendar.succeeded();
                self.emit(EventKind::CalendarApplied, &report);
            }
            Ok(None) => {
                self.status.calendar.failed("not signed in".to_string());
            }
            Err(err) => {
                self.status.calendar.failed_with(&err);
                self.cycle_failed("calendar", &err);
            }
        }
    }

    pub async fn goals_cycle(&mut self) {
        match self.poll_goals().await {
            Ok(report) => {
                self.status.goals.succeeded();
                self.emit(EventKind::GoalsApplied, &report);
            }
            Err(err) => {
                self.status.goals.failed_with(&err);
                self.cycle_failed("goals", &err);
            }
        }
    }

    /// Fetch and apply today's events. `Ok(None)` when no token is available.
    pub async fn poll_calendar(&mut self) -> Result<Option<ReconcileReport>> {
        let Some(source) = self.calendar.clone() else {
            return Ok(None);
        };
        let Some(token) = self.tokens.access_token().await? else {
            return Ok(None);
        };
        let events = source.fetch_today_events(&token).await?;
        let now = Local::now();
        let report = self
            .store
            .transaction(|store| store.apply_calendar_events(&events, &now))?;
        Ok(Some(report))
    }

    pub async fn poll_goals(&mut self) -> Result<ReconcileReport> {
        let feed = self.goal_feed()?;
        let payload = feed.fetch_snapshot().await?;
        self.store
            .transaction(|store| store.apply_goal_payload(&payload, Utc::now()))
    }

    fn goal_feed(&self) -> Result<Arc<dyn GoalFeed>> {
        self.goals
            .clone()
            .ok_or_else(|| Error::InvalidConfig("no goal feed configured".to_string()))
    }

    /// Request a toggle, then poll snapshots until the feed reports the
    /// desired completion or the timeout passes.
    ///
    /// The override for `request.title` must already be recorded (the store
    /// does this when the status change is made). Every snapshot read while
    /// waiting is applied like a regular poll.
    pub async fn confirm_toggle(&mut self, request: ToggleRequest) -> Result<ToggleOutcome> {
        let feed = self.goal_feed()?;
        feed.request_toggle(&request).await?;
        self.emit(EventKind::GoalToggleRequested, &request);

        let deadline = Instant::now() + self.settings.toggle_timeout;
        loop {
            tokio::time::sleep(self.settings.toggle_poll_interval).await;

            match self.observe_toggle(feed.as_ref(), &request.title).await {
                Ok(true) => {
                    tracing::debug!(title = %request.title, "goal toggle confirmed");
                    self.status.goals.succeeded();
                    self.status.unconfirmed.retain(|t| *t != request.title);
                    self.emit(EventKind::GoalToggleConfirmed, &request);
                    return Ok(ToggleOutcome::Confirmed);
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::debug!(%err, title = %request.title, "snapshot unavailable while confirming");
                    self.status.goals.failed_with(&err);
                }
            }

            if Instant::now() >= deadline {
                break;
            }
        }

        tracing::warn!(title = %request.title, "goal toggle not confirmed before timeout");
        self.store
            .transaction(|store| store.mark_toggle_unconfirmed(&request.title))?;
        if !self.status.unconfirmed.contains(&request.title) {
            self.status.unconfirmed.push(request.title.clone());
        }
        self.emit(EventKind::GoalToggleUnconfirmed, &request);
        Ok(ToggleOutcome::Unconfirmed)
    }

    /// Read one snapshot, check it against the pending override, then apply it.
    async fn observe_toggle(&mut self, feed: &dyn GoalFeed, title: &str) -> Result<bool> {
        let payload = feed.fetch_snapshot().await?;
        let goals = goals::parse_snapshot(&payload)?;
        self.store.transaction(|store| {
            let confirmed = store.toggle_confirmed(title, &goals);
            store.apply_goal_snapshot(&goals, Utc::now())?;
            Ok(confirmed)
        })
    }

    /// Feed failures skip the cycle quietly; anything else means the local
    /// store could not take the snapshot and is logged as an error.
    fn cycle_failed(&mut self, feed: &'static str, err: &Error) {
        let local = !err.is_feed_failure();
        if local {
            tracing::error!(feed, %err, "sync cycle could not be applied");
        } else {
            tracing::warn!(feed, %err, "sync cycle skipped");
        }
        self.emit(
            EventKind::FeedFailed,
            &serde_json::json!({"feed": feed, "error": err.to_string(), "local": local}),
        );
    }

    fn emit<T: Serialize>(&mut self, kind: EventKind, data: &T) {
        let Some(sink) = self.events.as_mut() else {
            return;
        };
        let result = Event::new(kind, Some("daemon".to_string()))
            .with_data(data)
            .and_then(|event| sink.emit(&event));
        if let Err(err) = result {
            tracing::warn!(%err, "failed to emit event");
        }
    }
}
