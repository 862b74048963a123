//! Broadcast sink for operator-facing log lines.
//!
//! Every component reports progress through a shared `LogFanout`. Each line
//! is delivered to every registered observer in emission order; a failing or
//! panicking observer is reported and skipped without affecting the others.

use crate::observers::ChannelObserver;
use chrono::{DateTime, Local};
use dockyard_runtime::{OutputLine, OutputStream};
use serde::Serialize;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl LogLine {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    /// `HH:MM:SS message`, with errors marked.
    pub fn render(&self) -> String {
        let time = self.timestamp.format("%H:%M:%S");
        match self.level {
            LogLevel::Info => format!("{time} {}", self.message),
            LogLevel::Error => format!("{time} error: {}", self.message),
        }
    }
}

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("{0}")]
    Failed(String),
    /// The observer can never accept another line and should be dropped.
    #[error("observer closed")]
    Closed,
}

pub trait LogObserver: Send + Sync {
    fn on_line(&self, line: &LogLine) -> Result<(), ObserverError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Live feed of log lines for a consumer that prefers to pull.
///
/// The stream ends once the subscription is removed from the fan-out.
pub struct Subscription {
    id: ObserverId,
    rx: mpsc::UnboundedReceiver<LogLine>,
}

impl Subscription {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<LogLine> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LogLine> {
        self.rx.try_recv().ok()
    }
}

type Registered = (ObserverId, Arc<dyn LogObserver>);

#[derive(Default)]
pub struct LogFanout {
    observers: RwLock<Vec<Registered>>,
    next_id: AtomicU64,
    /// Serializes deliveries so every observer sees the same order.
    delivery: Mutex<()>,
}

impl LogFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn LogObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    /// Returns whether the observer was registered.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.register(Arc::new(ChannelObserver::new(tx)));
        Subscription { id, rx }
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(&LogLine::info(message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(&LogLine::error(message));
    }

    /// Forward one line of child process output: stdout as info, stderr as error.
    pub fn relay(&self, line: OutputLine) {
        match line.stream {
            OutputStream::Stdout => self.info(line.text),
            OutputStream::Stderr => self.error(line.text),
        }
    }

    /// Deliver `line` to every observer. Returns how many accepted it.
    ///
    /// Observers must not emit into the fan-out that is calling them.
    pub fn emit(&self, line: &LogLine) -> usize {
        let _order = self.delivery.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot: Vec<Registered> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, observer) in &snapshot {
            match catch_unwind(AssertUnwindSafe(|| observer.on_line(line))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(ObserverError::Closed)) => closed.push(*id),
                Ok(Err(e)) => warn!("log observer {id:?} failed: {e}"),
                Err(_) => warn!("log observer {id:?} panicked"),
            }
        }
        for id in closed {
            self.unregister(id);
        }
        delivered
    }
}
