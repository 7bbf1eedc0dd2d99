//! Compatibility bridge for the Rust `log` crate.
//!
//! [`FluentLogAdapter`] implements `log::Log` and forwards each record to a
//! collector through a [`FluentSender`]. Module-path targets such as
//! `app::db` become dotted labels (`app.db`), so with a tag prefix of `rust`
//! the record is tagged `rust.app.db`.

use std::borrow::Cow;

use log::{LevelFilter, Metadata, Record, SetLoggerError};
use serde::Serialize;

use crate::sender::FluentSender;

/// Records whose target starts with this prefix come from the sender itself.
const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");
/// Label used when a record carries an empty target.
const FALLBACK_LABEL: &str = "log";

#[derive(Serialize)]
struct LogEvent<'a> {
    level: &'static str,
    message: String,
    target: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    module_path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<u32>,
}

/// Adapter implementing the Rust `log::Log` trait.
pub struct FluentLogAdapter {
    sender: FluentSender,
    level: LevelFilter,
}

fn normalise_target(target: &str) -> Cow<'_, str> {
    if target.is_empty() {
        Cow::Borrowed(FALLBACK_LABEL)
    } else if target.contains("::") {
        Cow::Owned(target.replace("::", "."))
    } else {
        Cow::Borrowed(target)
    }
}

fn is_own_target(target: &str) -> bool {
    target
        .strip_prefix(OWN_TARGET)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

impl FluentLogAdapter {
    /// Forward records at `level` or more severe through `sender`.
    pub fn new(sender: FluentSender, level: LevelFilter) -> Self {
        Self { sender, level }
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    pub fn sender(&self) -> &FluentSender {
        &self.sender
    }
}

impl log::Log for FluentLogAdapter {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level && !is_own_target(metadata.target())
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let label = normalise_target(record.target());
        let event = LogEvent {
            level: record.level().as_str(),
            message: record.args().to_string(),
            target: record.target(),
            module_path: record.module_path(),
            file: record.file(),
            line: record.line(),
        };
        // Failures already reach the sender's error subscribers; logging them
        // here would re-enter this adapter.
        let _ = self.sender.emit(Some(label.as_ref()), &event);
    }

    fn flush(&self) {
        self.sender.flush();
    }
}

/// Install `adapter` as the global Rust logger.
///
/// Fails when a different global logger has already been set. The adapter is
/// leaked, so its sender stays open for the rest of the process.
pub fn install_log_adapter(adapter: FluentLogAdapter) -> Result<(), SetLoggerError> {
    let level = adapter.level;
    log::set_logger(Box::leak(Box::new(adapter)))?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    //! Unit tests for the `log` crate bridge.

    use std::time::Duration;

    use log::Log;
    use rstest::rstest;

    use super::*;
    use crate::test_utils::collector::{AckMode, FakeCollector};

    fn adapter_for(collector: &FakeCollector, level: LevelFilter) -> FluentLogAdapter {
        let sender = FluentSender::builder()
            .with_tag_prefix("rust")
            .with_tcp("127.0.0.1", collector.port())
            .with_reconnect_interval_ms(0)
            .build()
            .expect("sender builds");
        FluentLogAdapter::new(sender, level)
    }

    #[rstest]
    #[case("app::db", "app.db")]
    #[case("plain", "plain")]
    #[case("", "log")]
    fn targets_become_dotted_labels(#[case] target: &str, #[case] expected: &str) {
        assert_eq!(normalise_target(target), expected);
    }

    #[rstest]
    #[case("fluent_forward", true)]
    #[case("fluent_forward::sender::worker", true)]
    #[case("fluent_forwarder", false)]
    #[case("app::fluent_forward", false)]
    fn recognises_own_targets(#[case] target: &str, #[case] expected: bool) {
        assert_eq!(is_own_target(target), expected);
    }

    #[rstest]
    fn adapter_forwards_records_with_metadata() {
        let collector = FakeCollector::tcp(AckMode::Correct).expect("collector starts");
        let adapter = adapter_for(&collector, LevelFilter::Info);

        let record = Record::builder()
            .args(format_args!("hello"))
            .level(log::Level::Info)
            .target("bridge::test")
            .module_path(Some("bridge::test"))
            .file(Some("lib.rs"))
            .line(Some(42))
            .build();
        adapter.log(&record);
        adapter.flush();

        let received = collector
            .recv_timeout(Duration::from_secs(5))
            .expect("record forwarded");
        assert_eq!(received.tag, "rust.bridge.test");
        assert_eq!(received.record["level"], "INFO");
        assert_eq!(received.record["message"], "hello");
        assert_eq!(received.record["target"], "bridge::test");
        assert_eq!(received.record["module_path"], "bridge::test");
        assert_eq!(received.record["file"], "lib.rs");
        assert_eq!(received.record["line"], 42);
    }

    #[rstest]
    fn adapter_respects_level_and_own_targets() {
        let collector = FakeCollector::tcp(AckMode::Correct).expect("collector starts");
        let adapter = adapter_for(&collector, LevelFilter::Warn);

        for (level, target) in [
            (log::Level::Info, "bridge"),
            (log::Level::Error, "fluent_forward::sender"),
            (log::Level::Warn, "bridge"),
        ] {
            adapter.log(
                &Record::builder()
                    .args(format_args!("{level}"))
                    .level(level)
                    .target(target)
                    .build(),
            );
        }
        adapter.flush();

        let received = collector
            .recv_timeout(Duration::from_secs(5))
            .expect("warn record forwarded");
        assert_eq!(received.record["level"], "WARN");
        assert!(
            collector.recv_timeout(Duration::from_millis(200)).is_none(),
            "only WARN should pass"
        );
    }
}
