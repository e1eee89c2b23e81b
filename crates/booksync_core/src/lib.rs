//! Sync Markdown files into BookStack pages.
//!
//! A run resolves a path or glob, turns each file with a level-1 heading into
//! a [`parser::Page`], lists the pages already in the target book or chapter
//! and then creates or updates pages by name.

pub mod client;
pub mod config;
pub mod discover;
pub mod error;
pub mod parser;
pub mod sync;
pub mod upsert;

pub use error::{Result, SyncError};
