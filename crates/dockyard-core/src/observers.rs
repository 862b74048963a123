use crate::logsink::{LogLevel, LogLine, LogObserver, ObserverError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Forwards lines into the process's tracing subscriber.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl LogObserver for TracingObserver {
    fn on_line(&self, line: &LogLine) -> Result<(), ObserverError> {
        match line.level {
            LogLevel::Info => info!(target: "dockyard::log", "{}", line.message),
            LogLevel::Error => error!(target: "dockyard::log", "{}", line.message),
        }
        Ok(())
    }
}

/// Adapts a closure into an observer.
pub struct FnObserver<F> {
    f: F,
}

impl<F> FnObserver<F>
where
    F: Fn(&LogLine) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> LogObserver for FnObserver<F>
where
    F: Fn(&LogLine) + Send + Sync,
{
    fn on_line(&self, line: &LogLine) -> Result<(), ObserverError> {
        (self.f)(line);
        Ok(())
    }
}

/// Pushes lines into an unbounded tokio channel.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<LogLine>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::UnboundedSender<LogLine>) -> Self {
        Self { tx }
    }
}

impl LogObserver for ChannelObserver {
    fn on_line(&self, line: &LogLine) -> Result<(), ObserverError> {
        self.tx.send(line.clone()).map_err(|_| ObserverError::Closed)
    }
}

#[derive(Default)]
struct DisplayText {
    text: String,
    chars: usize,
}

/// Bounded text display for a status pane.
///
/// Once the accumulated text exceeds the budget (in characters) it is
/// cleared before the next line is appended, so the display never grows
/// past one budget plus one line.
pub struct DisplayBuffer {
    budget: usize,
    inner: Mutex<DisplayText>,
}

impl DisplayBuffer {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            inner: Mutex::new(DisplayText::default()),
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn append(&self, line: &LogLine) {
        let mut display = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if display.chars > self.budget {
            display.text.clear();
            display.chars = 0;
        }
        let rendered = line.render();
        display.chars += rendered.chars().count() + 1;
        display.text.push_str(&rendered);
        display.text.push('\n');
    }

    pub fn text(&self) -> String {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .text
            .clone()
    }

    pub fn char_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .chars
    }
}

impl LogObserver for DisplayBuffer {
    fn on_line(&self, line: &LogLine) -> Result<(), ObserverError> {
        self.append(line);
        Ok(())
    }
}

/// Runs another observer on one dedicated thread.
///
/// Lines are queued FIFO and handed to the wrapped observer from a single
/// named thread, for consumers that may only be touched from the thread
/// that owns them (a UI loop, for instance). Emission never blocks on the
/// wrapped observer.
pub struct AffinityObserver {
    tx: Mutex<Option<std_mpsc::Sender<LogLine>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AffinityObserver {
    pub fn spawn(name: &str, observer: Arc<dyn LogObserver>) -> std::io::Result<Self> {
        let (tx, rx) = std_mpsc::channel::<LogLine>();
        let worker = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                for line in rx {
                    match catch_unwind(AssertUnwindSafe(|| observer.on_line(&line))) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!("affine log observer failed: {e}"),
                        Err(_) => warn!("affine log observer panicked"),
                    }
                }
            })?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Stop accepting lines and wait until everything queued was delivered.
    pub fn close(&self) {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = worker {
            if handle.join().is_err() {
                warn!("affinity thread exited abnormally");
            }
        }
    }
}

impl LogObserver for AffinityObserver {
    fn on_line(&self, line: &LogLine) -> Result<(), ObserverError> {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match tx.as_ref() {
            Some(tx) => tx.send(line.clone()).map_err(|_| ObserverError::Closed),
            None => Err(ObserverError::Closed),
        }
    }
}

impl Drop for AffinityObserver {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogFanout;

    fn line_of(len: usize) -> LogLine {
        // "HH:MM:SS " prefix is nine characters.
        LogLine::info("x".repeat(len - 9))
    }

    #[test]
    fn display_buffer_keeps_text_under_budget() {
        let display = DisplayBuffer::new(100);
        for _ in 0..3 {
            display.append(&line_of(30));
        }
        assert_eq!(display.char_count(), 93);
        assert_eq!(display.text().lines().count(), 3);
    }

    #[test]
    fn display_buffer_at_budget_is_not_cleared() {
        let display = DisplayBuffer::new(62);
        display.append(&line_of(30));
        display.append(&line_of(30));
        assert_eq!(display.char_count(), 62);
        display.append(&line_of(30));
        assert_eq!(display.text().lines().count(), 3);
    }

    #[test]
    fn display_buffer_clears_once_over_budget() {
        let display = DisplayBuffer::new(60);
        display.append(&line_of(30));
        display.append(&line_of(30));
        assert_eq!(display.char_count(), 62);
        display.append(&LogLine::info("fresh"));
        let text = display.text();
        assert_eq!(text.lines().count(), 1);
        assert!(text.ends_with(" fresh\n"));
    }

    #[test]
    fn display_buffer_counts_characters_not_bytes() {
        let display = DisplayBuffer::new(1000);
        display.append(&LogLine::info("été"));
        assert_eq!(display.char_count(), 9 + 3 + 1);
    }

    #[test]
    fn affinity_observer_delivers_in_order_on_one_thread() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let inner = FnObserver::new(move |line: &LogLine| {
            let thread = std::thread::current().name().map(str::to_owned);
            sink.lock().unwrap().push((thread, line.message.clone()));
        });
        let affine = Arc::new(AffinityObserver::spawn("ui", Arc::new(inner)).unwrap());

        let fanout = LogFanout::new();
        fanout.register(Arc::clone(&affine) as Arc<dyn LogObserver>);
        for i in 0..20 {
            fanout.info(i.to_string());
        }
        affine.close();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 20);
        for (i, (thread, message)) in seen.iter().enumerate() {
            assert_eq!(thread.as_deref(), Some("ui"));
            assert_eq!(message, &i.to_string());
        }
    }

    #[test]
    fn closed_affinity_observer_rejects_lines() {
        let affine = AffinityObserver::spawn("closed", Arc::new(TracingObserver)).unwrap();
        affine.close();
        assert!(matches!(
            affine.on_line(&LogLine::info("late")),
            Err(ObserverError::Closed)
        ));
    }

    #[test]
    fn tracing_observer_accepts_both_levels() {
        let observer = TracingObserver;
        assert!(observer.on_line(&LogLine::info("ok")).is_ok());
        assert!(observer.on_line(&LogLine::error("bad")).is_ok());
    }
}
