//! Logging facade: a `tracing` subscriber with ANSI coloring gated on
//! records at error severity or worse, matching the hierarchical
//! `logging.getLogger` routing the engine used to bring worker records
//! back to the parent.

use std::io::IsTerminal;

use owo_colors::OwoColorize;
use tracing::Level;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::FormatEvent;
use tracing_subscriber::fmt::FormatFields;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// `-v` raises the default filter from `info` to `debug`; repeating it
/// further raises it to `trace`. `format` is the CLI's `-f/--format`
/// value: `Some("color")`/`Some("plain")` force the formatter; `None`
/// auto-detects from whether stdout is a terminal.
pub fn init(verbosity: u8, format: Option<&str>) {
    let default_level = match verbosity {
        0 => "sandworm=info",
        1 => "sandworm=debug",
        _ => "sandworm=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let color = match format {
        Some("color") => true,
        Some("plain") => false,
        _ => std::io::stdout().is_terminal(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(SeverityFormat { color })
        .init();
}

struct SeverityFormat {
    color: bool,
}

impl<S, N> FormatEvent<S, N> for SeverityFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let level = *event.metadata().level();
        let label = level.as_str();

        if self.color && level == Level::ERROR {
            write!(writer, "[{}] ", label.red().bold())?;
        } else {
            write!(writer, "[{}] ", label)?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
