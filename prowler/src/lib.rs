//! Per-user marketplace search watcher.
//!
//! Each user session polls a signed search API for its queries and announces
//! new finds. All sessions of a domain share one credential set, cached and
//! refreshed single-flight by [`credentials::CredentialCache`].

pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod notification;
pub mod panic_hook;
pub mod scheduler;
pub mod search;
pub mod session;
pub mod utils;

pub use error::{Error, Result};
