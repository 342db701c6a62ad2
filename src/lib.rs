//! ftask - Floating Task List Library
//!
//! A personal task manager whose task tree is merged with several
//! unreliable outside sources.
//!
//! # Core Concepts
//!
//! - **Task tree**: a flat list with parent pointers; array order is sibling order
//! - **Status cascades**: completing a task completes its subtree and any
//!   ancestor whose children are now all done
//! - **Daily reset**: drops finished work and expands recurring templates
//! - **Feeds**: calendar events and external goals projected under section tasks
//! - **Overrides**: short-lived local goal states that mask stale snapshots
//!
//! # Module Organization
//!
//! - `task`: data model
//! - `tree`: structural edits and presentation order
//! - `status`: status transitions and cascades
//! - `recurring`: templates, logical dates and the daily reset
//! - `calendar` / `goals`: feed reconciliation
//! - `overrides`: local goal override cache
//! - `store`: single owner of persisted state
//! - `sync`: async scheduler and feed collaborators
//! - `storage` / `lock`: JSON files, atomic writes and the data dir lock
//! - `cli`, `output`, `events`: the command-line surface

pub mod calendar;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod goals;
pub mod lock;
pub mod output;
pub mod overrides;
pub mod recurring;
pub mod status;
pub mod storage;
pub mod store;
pub mod sync;
pub mod task;
pub mod tree;

pub use error::{Error, Result};
