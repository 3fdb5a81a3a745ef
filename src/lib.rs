//! Metadata identification and sync for comic, manga, and light-novel
//! libraries on Komga-style media servers.
//!
//! The flow: a series name from the media server is matched against
//! external metadata providers, the per-provider results are filtered and
//! merged by priority, and the outcome is written back field by field under
//! a lock policy that protects manual edits. Long-running operations run as
//! tracked jobs with an observable event feed.

pub mod config;
pub mod jobs;
pub mod mediaserver;
pub mod metadata;
pub mod providers;
pub mod server;
