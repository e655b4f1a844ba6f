#![allow(clippy::uninlined_format_args)]

pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod data;
pub mod feed;
pub mod logging;
pub mod record;
pub mod session;
pub mod storage;
pub mod ui;
pub mod video;
pub mod vote;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, RunOptions};
