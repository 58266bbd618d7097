use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Initialize the tracing subscriber with env-based filtering.
///
/// Reads `RUST_LOG` (or `LOG_LEVEL`) to set the filter.
/// Defaults to `default_level` if neither is set.
///
/// Returns the handle to the most recent WARN/ERROR lines, which escalation
/// notifications quote.
pub fn init_tracing(default_level: &str, tail_capacity: usize) -> ErrorTail {
    let filter = EnvFilter::try_from_env("RUST_LOG")
        .or_else(|_| EnvFilter::try_from_env("LOG_LEVEL"))
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let tail = ErrorTail::new(tail_capacity);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(tail.layer())
        .init();

    tail
}

/// Bounded in-memory buffer of recent WARN/ERROR log lines.
#[derive(Debug, Clone)]
pub struct ErrorTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl ErrorTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn layer(&self) -> ErrorTailLayer {
        ErrorTailLayer { tail: self.clone() }
    }

    pub fn push(&self, line: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    pub fn lines(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().cloned().collect()
    }

    /// Last `n` lines joined for a notification body.
    pub fn render_last(&self, n: usize) -> String {
        let lines = self.lines();
        if lines.is_empty() {
            return "No recent errors found.".to_owned();
        }
        let skip = lines.len().saturating_sub(n);
        lines[skip..].join("\n")
    }
}

pub struct ErrorTailLayer {
    tail: ErrorTail,
}

impl<S: Subscriber> Layer<S> for ErrorTailLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // More verbose levels compare greater.
        if *metadata.level() > Level::WARN {
            return;
        }

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        self.tail.push(format!(
            "{} {} {}: {}{}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            metadata.level(),
            metadata.target(),
            visitor.message,
            visitor.fields
        ));
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
