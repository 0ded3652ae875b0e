use std::fmt;

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Event formatter that prefixes every diagnostic line with `socket_retarder: `.
///
/// The host application owns stderr; the prefix is the contract that lets its
/// operators grep our lines out. Each event is rendered into one buffered
/// line, so concurrent threads never interleave mid-message.
struct PrefixedFormat;

impl<S, N> FormatEvent<S, N> for PrefixedFormat
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
        write!(writer, "socket_retarder: [{}] {}: ", meta.level(), meta.target())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Map the `SOCKET_RETARDER_DEBUG` verbosity to a tracing level.
fn level_for(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Install the global subscriber writing to stderr.
///
/// The host process may already have installed one (we are a guest inside an
/// arbitrary application), in which case ours loses quietly.
pub fn init(verbosity: u8) {
    let subscriber = tracing_subscriber::fmt()
        .event_format(PrefixedFormat)
        .with_writer(std::io::stderr)
        .with_max_level(level_for(verbosity))
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
