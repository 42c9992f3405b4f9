//! Tests for the event loop

use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

use prometheus_operation::config::LoopConfig;
use prometheus_operation::core::Operation;
use prometheus_operation::runtime::{self, RunStats};

#[test]
fn test_idle_loop_returns_immediately() {
    let stats = runtime::run().unwrap();
    assert_eq!(stats, RunStats::default());
}

#[test]
fn test_deferrals_run_before_later_timers() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let timer_log = Rc::clone(&log);
    let defer_log = Rc::clone(&log);

    runtime::defer_after(Duration::from_millis(1), move || timer_log.borrow_mut().push("timer"));
    runtime::defer_later(move || defer_log.borrow_mut().push("deferred"));
    runtime::run().unwrap();

    assert_eq!(*log.borrow(), vec!["deferred", "timer"]);
}

#[test]
fn test_install_uses_configured_delay() {
    let event_loop = runtime::install(LoopConfig::new().with_default_delay_ms(40)).unwrap();
    assert_eq!(event_loop.config().default_delay(), Duration::from_millis(40));
    assert_eq!(runtime::current().config().default_delay_ms, 40);
}

#[test]
fn test_install_discards_queued_work() {
    let operation = Operation::immediate_success(1);
    let mapped = operation.map(|v| v + 1);
    assert_eq!(runtime::current().pending_tasks(), 1);

    runtime::install(LoopConfig::default()).unwrap();
    runtime::run().unwrap();

    assert!(mapped.result().is_none());
}

/// In-memory log sink for asserting on emitted events.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    fn capture<R>(&self, level: Level, f: impl FnOnce() -> R) -> R {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(level)
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[test]
fn test_install_warns_about_discarded_work() {
    let operation: Operation<u32> = Operation::new();
    let _pending = operation.remote_completion();
    let _mapped = Operation::immediate_success(1).map(|v| v + 1);
    let _timer = runtime::delay(Duration::from_millis(5));

    let logs = CapturedLogs::default();
    logs.capture(Level::WARN, || runtime::install(LoopConfig::default()))
        .unwrap();

    let output = logs.contents();
    assert!(output.contains("replacing event loop discards queued work"));
    assert!(output.contains("dropped_tasks=1"));
    assert!(output.contains("dropped_timers=1"));
    assert!(output.contains("dropped_completions=1"));
}

#[test]
fn test_install_on_idle_loop_is_quiet() {
    let logs = CapturedLogs::default();
    logs.capture(Level::WARN, || runtime::install(LoopConfig::default()))
        .unwrap();

    assert!(logs.contents().is_empty());
}

#[test]
fn test_run_logs_when_waiting_on_completions() {
    let operation: Operation<u32> = Operation::new();
    let completion = operation.remote_completion();
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        completion.succeed(7);
    });

    let logs = CapturedLogs::default();
    logs.capture(Level::DEBUG, runtime::run).unwrap();
    worker.join().unwrap();

    assert_eq!(operation.result(), Some(7));
    assert!(logs
        .contents()
        .contains("event loop waiting for remote completions outstanding=1"));
}

#[test]
fn test_completion_released_on_loop_thread_does_not_block_run() {
    let operation: Operation<u32> = Operation::new();
    let completion = operation.remote_completion();
    drop(completion);

    runtime::run().unwrap();

    assert_eq!(
        operation.error().unwrap().message(),
        "completion dropped before it was completed"
    );
}

#[test]
fn test_run_stats_count_turns_and_timers() {
    let timer = runtime::delay(Duration::from_millis(3)).map(|()| "done");
    let stats = runtime::run().unwrap();

    assert_eq!(timer.result(), Some("done"));
    assert_eq!(stats.timers_fired, 1);
    // Timer task, then the deferred map reaction.
    assert_eq!(stats.turns, 2);
}

#[test]
fn test_run_stats_serialize() {
    let stats = RunStats {
        turns: 3,
        timers_fired: 1,
        remote_completions: 0,
    };
    let json = serde_json::to_value(stats).unwrap();
    assert_eq!(json["turns"], 3);
}
