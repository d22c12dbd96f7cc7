//! A minimal `logfmt` formatter for `tracing-subscriber`.
//!
//! Emits `key=value` pairs space-separated, one line per event, e.g.:
//! `level=info msg="committed version" namespace=posts version=42`
#![warn(missing_docs)]

use std::fmt;
use std::io::Write;

use observability_deps::tracing::field::{Field, Visit};
use observability_deps::tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// A [`FormatEvent`] implementation that writes logfmt-style lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFmtFormatter;

impl<S, N> FormatEvent<S, N> for LogFmtFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        write!(writer, "level={} ", level_str(*meta.level()))?;

        let mut visitor = LogFmtVisitor {
            writer: &mut writer,
            result: Ok(()),
        };
        event.record(&mut visitor);
        visitor.result?;

        write!(writer, " target={}", meta.target())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, " span={}", span.name())?;
            }
        }

        writeln!(writer)
    }
}

fn level_str(level: Level) -> &'static str {
    match level {
        Level::ERROR => "error",
        Level::WARN => "warn",
        Level::INFO => "info",
        Level::DEBUG => "debug",
        Level::TRACE => "trace",
    }
}

struct LogFmtVisitor<'a, 'w> {
    writer: &'a mut Writer<'w>,
    result: fmt::Result,
}

impl<'a, 'w> Visit for LogFmtVisitor<'a, 'w> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if self.result.is_err() {
            return;
        }
        self.result = if field.name() == "message" {
            write!(self.writer, "msg={value:?}")
        } else if needs_quoting(value) {
            write!(self.writer, " {}={value:?}", field.name())
        } else {
            write!(self.writer, " {}={value}", field.name())
        };
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if self.result.is_err() {
            return;
        }
        self.result = if field.name() == "message" {
            write!(self.writer, "msg={value:?}")
        } else {
            write!(self.writer, " {}={value:?}", field.name())
        };
    }
}

fn needs_quoting(s: &str) -> bool {
    s.is_empty() || s.chars().any(|c| c.is_whitespace() || c == '"')
}

/// Convenience: write `line` followed by a newline to `out`. Used by callers wiring a raw
/// writer (e.g. tests asserting on captured output) rather than going through `tracing`.
pub fn write_line(out: &mut impl Write, line: &str) -> std::io::Result<()> {
    writeln!(out, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_rules() {
        assert!(needs_quoting(""));
        assert!(needs_quoting("has space"));
        assert!(needs_quoting("has\"quote"));
        assert!(!needs_quoting("plain"));
    }

    #[test]
    fn level_strings() {
        assert_eq!(level_str(Level::INFO), "info");
        assert_eq!(level_str(Level::ERROR), "error");
    }
}
