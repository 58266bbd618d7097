use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use punchsync_config::ErrorTail;
use tokio_util::sync::CancellationToken;

use crate::notify::Notifier;

/// Source of "now" in the terminals' wall-clock frame.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Process-wide collaborators, built once in `main` and handed to the
/// orchestrator.
#[derive(Clone)]
pub struct SyncContext {
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
    pub error_tail: ErrorTail,
    pub shutdown: CancellationToken,
}
