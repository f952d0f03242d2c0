// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Diagnostic line format of the forwarder.
//!
//! ```text
//! LOG_FWD | LEVEL | [span{fields}: ]message fields
//! ```
//!
//! Diagnostics go to stderr so they never mix with the echoed input on stdout.

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

pub const LOG_PREFIX: &str = "LOG_FWD";

/// Targets too chatty to be useful at any level
const QUIET_TARGETS: &str = "h2=off,hyper=off,hyper_util=off,rustls=off";

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(&mut writer, "{LOG_PREFIX} | {} | ", event.metadata().level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Filter for the given level (`info`, `debug`, ...) with noisy dependency
/// targets switched off. Falls back to `info` if the level does not parse.
#[must_use]
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(format!("{QUIET_TARGETS},{}", level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new(format!("{QUIET_TARGETS},info")))
}
