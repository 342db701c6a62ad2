//! Calendar feed reconciliation.
//!
//! Today's events live under a single section task whose id embeds the
//! logical date. Event tasks use synthetic ids derived from the event id, so
//! applying the same snapshot twice is a no-op.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::task::{ReconcileReport, Task, TaskOrigin};
use crate::tree;

pub const SECTION_PREFIX: &str = "cal-today-";
pub const EVENT_PREFIX: &str = "cal-evt-";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    /// RFC 3339 instant for timed events, `YYYY-MM-DD` for all-day ones.
    pub start: String,
    pub end: String,
    pub is_all_day: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_link: Option<String>,
}

pub fn section_id(date: NaiveDate) -> String {
    format!("{SECTION_PREFIX}{}", date.format("%Y-%m-%d"))
}

pub fn event_task_id(event_id: &str) -> String {
    format!("{EVENT_PREFIX}{event_id}")
}

fn parse_instant(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value).ok()
}

fn clock(value: &str) -> String {
    parse_instant(value)
        .map(|dt| dt.format("%H:%M").to_string())
        .unwrap_or_else(|| value.to_string())
}

/// Display text for an event task.
pub fn event_text(event: &CalendarEvent) -> String {
    if event.is_all_day {
        format!("All day  {}", event.summary)
    } else {
        format!("{} – {}  {}", clock(&event.start), clock(&event.end), event.summary)
    }
}

fn compare_events(a: &CalendarEvent, b: &CalendarEvent) -> Ordering {
    b.is_all_day
        .cmp(&a.is_all_day)
        .then_with(|| match (parse_instant(&a.start), parse_instant(&b.start)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => a.start.cmp(&b.start),
        })
}

/// All-day events first, then by start time. Stable for ties.
pub fn sort_events(events: &[CalendarEvent]) -> Vec<CalendarEvent> {
    let mut sorted = events.to_vec();
    sorted.sort_by(compare_events);
    sorted
}

/// Merge a snapshot of today's events into the task collection.
///
/// Sections for other days are removed with their subtrees. Event tasks
/// whose event vanished are deleted; the remaining ones are placed right
/// after the section in event order.
pub fn sync_calendar_events(
    tasks: &[Task],
    events: &[CalendarEvent],
    today: NaiveDate,
    section_label: &str,
    now: DateTime<Utc>,
) -> (Vec<Task>, ReconcileReport) {
    let mut report = ReconcileReport::default();
    let section = section_id(today);
    let sorted = sort_events(events);

    let mut next = tasks.to_vec();
    let stale: Vec<String> = next
        .iter()
        .filter(|task| {
            matches!(&task.origin, Some(TaskOrigin::CalendarSection { date }) if *date != today)
        })
        .map(|task| task.id.clone())
        .collect();
    for id in &stale {
        let before = next.len();
        next = tree::delete(&next, id);
        report.removed += before - next.len();
    }

    if tree::find(&next, &section).is_none() {
        let task = Task::new(section_label, None, now)
            .with_id(section.clone())
            .with_origin(TaskOrigin::CalendarSection { date: today });
        next.insert(0, task);
        report.added += 1;
    }

    let incoming: HashSet<String> = sorted.iter().map(|e| event_task_id(&e.id)).collect();
    let vanished: Vec<String> = next
        .iter()
        .filter(|task| matches!(task.origin, Some(TaskOrigin::CalendarEvent { .. })))
        .filter(|task| !incoming.contains(&task.id))
        .map(|task| task.id.clone())
        .collect();
    for id in &vanished {
        let before = next.len();
        next = tree::delete(&next, id);
        report.removed += before - next.len();
    }

    for event in &sorted {
        let id = event_task_id(&event.id);
        let text = event_text(event);
        match next.iter_mut().find(|task| task.id == id) {
            Some(existing) => {
                if existing.text != text || existing.parent_id.as_deref() != Some(&section) {
                    existing.text = text;
                    existing.parent_id = Some(section.clone());
                    report.updated += 1;
                }
            }
            None => {
                next.push(
                    Task::new(text, Some(section.clone()), now)
                        .with_id(id)
                        .with_origin(TaskOrigin::CalendarEvent {
                            event_id: event.id.clone(),
                        }),
                );
                report.added += 1;
            }
        }
    }

    (place_event_block(next, &section, &sorted), report)
}

fn place_event_block(tasks: Vec<Task>, section: &str, sorted: &[CalendarEvent]) -> Vec<Task> {
    let order: HashMap<String, usize> = sorted
        .iter()
        .enumerate()
        .map(|(i, e)| (event_task_id(&e.id), i))
        .collect();

    let (mut block, mut rest): (Vec<Task>, Vec<Task>) = tasks.into_iter().partition(|task| {
        task.parent_id.as_deref() == Some(section)
            && matches!(task.origin, Some(TaskOrigin::CalendarEvent { .. }))
    });
    block.sort_by_key(|task| order.get(&task.id).copied().unwrap_or(usize::MAX));

    let at = tree::position(&rest, section).map_or(0, |i| i + 1);
    let tail = rest.split_off(at);
    rest.extend(block);
    rest.extend(tail);
    rest
}

#[derive(Deserialize)]
struct GoogleEventList {
    #[serde(default)]
    items: Vec<GoogleEvent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    start: Option<GoogleTime>,
    #[serde(default)]
    end: Option<GoogleTime>,
    #[serde(default)]
    html_link: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleTime {
    #[serde(default)]
    date_time: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

impl GoogleTime {
    fn value(&self) -> String {
        self.date_time
            .clone()
            .or_else(|| self.date.clone())
            .unwrap_or_default()
    }
}

/// Decode a Google Calendar `events.list` response body.
pub fn parse_google_events(body: &str) -> Result<Vec<CalendarEvent>> {
    let list: GoogleEventList = serde_json::from_str(body)
        .map_err(|err| Error::Parse(format!("calendar events: {err}")))?;
    Ok(list
        .items
        .into_iter()
        .map(|item| {
            let is_all_day = item
                .start
                .as_ref()
                .map_or(true, |start| start.date_time.is_none());
            CalendarEvent {
                id: item.id,
                summary: item.summary.unwrap_or_else(|| "(No title)".to_string()),
                start: item.start.as_ref().map(GoogleTime::value).unwrap_or_default(),
                end: item.end.as_ref().map(GoogleTime::value).unwrap_or_default(),
                is_all_day,
                html_link: item.html_link,
            }
        })
        .collect())
}
