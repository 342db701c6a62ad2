mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ftask::calendar::CalendarEvent;
use ftask::error::{Error, Result};
use ftask::goals::ExternalGoal;
use ftask::store::{TaskStore, ToggleRequest};
use ftask::sync::{
    CalendarSource, GoalFeed, StaticToken, SyncEngine, SyncSettings, ToggleOutcome,
};
use ftask::task::{TaskOrigin, TaskStatus};

use support::TestDir;

/// Goal feed that applies toggles after `lag` further snapshot reads.
#[derive(Default)]
struct FakeGoalFeed {
    state: Mutex<FeedState>,
}

#[derive(Default)]
struct FeedState {
    goals: Vec<ExternalGoal>,
    raw_payload: Option<String>,
    applies_toggles: bool,
    lag: usize,
    queued: Vec<(ToggleRequest, usize)>,
    requested: Vec<ToggleRequest>,
}

impl FakeGoalFeed {
    fn new(goals: Vec<ExternalGoal>, applies_toggles: bool, lag: usize) -> Self {
        Self {
            state: Mutex::new(FeedState {
                goals,
                applies_toggles,
                lag,
                ..FeedState::default()
            }),
        }
    }

    fn with_raw_payload(payload: &str) -> Self {
        Self {
            state: Mutex::new(FeedState {
                raw_payload: Some(payload.to_string()),
                ..FeedState::default()
            }),
        }
    }

    fn requested(&self) -> Vec<ToggleRequest> {
        self.state.lock().unwrap().requested.clone()
    }
}

#[async_trait]
impl GoalFeed for FakeGoalFeed {
    async fn fetch_snapshot(&self) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if let Some(raw) = &state.raw_payload {
            return Ok(raw.clone());
        }
        let queued = std::mem::take(&mut state.queued);
        for (request, remaining) in queued {
            if remaining == 0 {
                for goal in state.goals.iter_mut().filter(|g| g.title == request.title) {
                    goal.completed = request.completed;
                }
            } else {
                state.queued.push((request, remaining - 1));
            }
        }
        Ok(serde_json::to_string(&state.goals)?)
    }

    async fn request_toggle(&self, request: &ToggleRequest) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.requested.push(request.clone());
        if state.applies_toggles {
            let lag = state.lag;
            state.queued.push((request.clone(), lag));
        }
        Ok(())
    }
}

struct FakeCalendar {
    events: Vec<CalendarEvent>,
}

#[async_trait]
impl CalendarSource for FakeCalendar {
    async fn fetch_today_events(&self, access_token: &str) -> Result<Vec<CalendarEvent>> {
        if access_token != "secret" {
            return Err(Error::Transport("401 unauthorized".to_string()));
        }
        Ok(self.events.clone())
    }
}

fn goal(id: &str, title: &str, completed: bool) -> ExternalGoal {
    ExternalGoal {
        id: id.to_string(),
        title: title.to_string(),
        completed,
        parent_id: None,
    }
}

fn standup() -> CalendarEvent {
    CalendarEvent {
        id: "e1".to_string(),
        summary: "Standup".to_string(),
        start: "2026-05-04T09:00:00+02:00".to_string(),
        end: "2026-05-04T09:15:00+02:00".to_string(),
        is_all_day: false,
        html_link: None,
    }
}

fn fast_settings() -> SyncSettings {
    SyncSettings {
        reset_check_interval: Duration::from_millis(20),
        calendar_interval: Duration::from_millis(20),
        goals_interval: Duration::from_millis(20),
        goals_initial_delay: Duration::from_millis(10),
        toggle_timeout: Duration::from_millis(60),
        toggle_poll_interval: Duration::from_millis(5),
    }
}

/// A store holding goal "Ship", completed locally with the toggle pending.
fn store_with_local_completion(dir: &TestDir) -> (TaskStore, ToggleRequest) {
    let mut store = dir.store();
    store
        .apply_goal_payload(r#"[{"id":"1","title":"Ship","completed":false}]"#, Utc::now())
        .unwrap();
    let change = store.set_status("goal-1", TaskStatus::Completed, Utc::now()).unwrap();
    assert_eq!(change.toggles.len(), 1);
    (store, change.toggles[0].clone())
}

#[tokio::test]
async fn toggle_is_confirmed_once_the_feed_catches_up() {
    let dir = TestDir::new();
    let (store, request) = store_with_local_completion(&dir);
    let feed = Arc::new(FakeGoalFeed::new(vec![goal("1", "Ship", false)], true, 2));

    let mut engine = SyncEngine::new(store, fast_settings()).with_goals(feed.clone());
    let outcome = engine.confirm_toggle(request.clone()).await.unwrap();

    assert_eq!(outcome, ToggleOutcome::Confirmed);
    assert_eq!(feed.requested(), vec![request]);
    assert_eq!(engine.store().task("goal-1").unwrap().status, TaskStatus::Completed);
    assert!(engine.status().unconfirmed.is_empty());
}

#[tokio::test]
async fn silent_feed_leaves_toggle_unconfirmed() {
    let dir = TestDir::new();
    let (store, request) = store_with_local_completion(&dir);
    let feed = Arc::new(FakeGoalFeed::new(vec![goal("1", "Ship", false)], false, 0));

    let mut engine = SyncEngine::new(store, fast_settings()).with_goals(feed);
    let outcome = engine.confirm_toggle(request).await.unwrap();

    assert_eq!(outcome, ToggleOutcome::Unconfirmed);
    assert_eq!(engine.status().unconfirmed, vec!["Ship".to_string()]);
    // Still masked locally while the override lives.
    assert_eq!(engine.store().task("goal-1").unwrap().status, TaskStatus::Completed);

    // The unconfirmed state is persisted for other processes.
    let reopened = dir.store();
    assert_eq!(reopened.overrides().unconfirmed(), vec!["Ship".to_string()]);
}

#[tokio::test]
async fn malformed_snapshot_skips_the_cycle() {
    let dir = TestDir::new();
    let mut store = dir.store();
    store.add_task("mine", None, Utc::now()).unwrap();
    let before = store.tasks().to_vec();

    let feed = Arc::new(FakeGoalFeed::with_raw_payload("<html>login</html>"));
    let mut engine = SyncEngine::new(store, fast_settings()).with_goals(feed);
    engine.goals_cycle().await;

    assert!(engine.status().goals.last_error.is_some());
    assert!(engine.status().goals.last_success.is_none());
    assert!(!engine.status().goals.local_failure);
    assert_eq!(engine.store().tasks(), before.as_slice());
}

#[tokio::test]
async fn local_failures_are_told_apart_from_feed_skips() {
    let dir = TestDir::new();
    let mut engine = SyncEngine::new(dir.store(), fast_settings());
    engine.goals_cycle().await;
    assert!(engine.status().goals.local_failure);
    assert!(engine
        .status()
        .goals
        .last_error
        .as_deref()
        .is_some_and(|err| err.contains("no goal feed")));

    let feed = Arc::new(FakeGoalFeed::new(vec![goal("1", "Ship", false)], false, 0));
    let mut engine = SyncEngine::new(engine.into_store(), fast_settings()).with_goals(feed);
    engine.goals_cycle().await;
    assert!(!engine.status().goals.local_failure);
    assert!(engine.status().goals.last_error.is_none());
}

#[tokio::test]
async fn calendar_cycle_needs_a_token() {
    let dir = TestDir::new();
    let source = Arc::new(FakeCalendar {
        events: vec![standup()],
    });

    let mut engine = SyncEngine::new(dir.store(), fast_settings())
        .with_calendar(Arc::new(StaticToken(None)), source.clone());
    engine.calendar_cycle().await;
    assert_eq!(engine.status().calendar.last_error.as_deref(), Some("not signed in"));
    assert!(engine.store().tasks().is_empty());

    let mut engine = SyncEngine::new(engine.into_store(), fast_settings())
        .with_calendar(Arc::new(StaticToken(Some("wrong".to_string()))), source.clone());
    engine.calendar_cycle().await;
    assert!(engine
        .status()
        .calendar
        .last_error
        .as_deref()
        .is_some_and(|err| err.contains("401")));

    let mut engine = SyncEngine::new(engine.into_store(), fast_settings())
        .with_calendar(Arc::new(StaticToken(Some("secret".to_string()))), source);
    engine.calendar_cycle().await;
    assert!(engine.status().calendar.last_error.is_none());
    let event = engine.store().task("cal-evt-e1").unwrap();
    assert_eq!(event.text, "09:00 – 09:15  Standup");
}

#[tokio::test]
async fn run_loop_drives_every_feed_and_toggles() {
    let dir = TestDir::new();
    let (store, request) = store_with_local_completion(&dir);
    let goals = Arc::new(FakeGoalFeed::new(
        vec![goal("1", "Ship", false), goal("2", "Docs", false)],
        true,
        1,
    ));
    let calendar = Arc::new(FakeCalendar {
        events: vec![standup()],
    });

    let mut engine = SyncEngine::new(store, fast_settings())
        .with_calendar(Arc::new(StaticToken(Some("secret".to_string()))), calendar)
        .with_goals(goals.clone());

    let (tx, rx) = tokio::sync::mpsc::channel(4);
    tx.send(request.clone()).await.unwrap();
    engine
        .run(rx, tokio::time::sleep(Duration::from_millis(250)))
        .await
        .unwrap();

    let store = engine.store();
    assert!(store.reset_state().last_reset_date.is_some());
    assert!(store
        .tasks()
        .iter()
        .any(|t| matches!(t.origin, Some(TaskOrigin::CalendarSection { .. }))));
    assert!(store.task("cal-evt-e1").is_ok());
    assert!(store.task("goal-2").is_ok());
    assert_eq!(store.task("goal-1").unwrap().status, TaskStatus::Completed);
    assert_eq!(goals.requested(), vec![request]);
    assert!(engine.status().unconfirmed.is_empty());
    assert!(engine.status().goals.last_success.is_some());
}
