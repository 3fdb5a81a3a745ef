//! Metadata identification and writing.
//!
//! # Module layout
//!
//! - [`matcher`] -- Name similarity matching for provider search candidates.
//! - [`config_applier`] -- Per-field filtering of provider output.
//! - [`merge`] -- Priority merge and lock-aware update building.
//! - [`service`] -- Orchestration of search/identify/match/reset flows.
//! - [`registry`] -- Per-library service routing.

pub mod config_applier;
pub mod matcher;
pub mod merge;
pub mod registry;
pub mod service;
