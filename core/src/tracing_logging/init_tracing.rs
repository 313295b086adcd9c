/*
 *   Copyright (c) 2026 R3BL LLC
 *   All rights reserved.
 *
 *   Licensed under the Apache License, Version 2.0 (the "License");
 *   you may not use this file except in compliance with the License.
 *   You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 *   Unless required by applicable law or agreed to in writing, software
 *   distributed under the License is distributed on an "AS IS" BASIS,
 *   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *   See the License for the specific language governing permissions and
 *   limitations under the License.
 */

//! Builds [`tracing_subscriber`] layers from a [`TracingConfig`]. Install with
//! [`TracingConfig::install_global`] or [`TracingConfig::install_thread_local`].

use tracing_core::LevelFilter;
use tracing_subscriber::{registry::LookupSpan, Layer};

use super::{tracing_config::TracingConfig, DisplayPreference, WriterConfig};

/// Avoid gnarly type annotations by using a macro to create the `fmt` layer. Note that
/// [tracing_subscriber::fmt::format::Pretty] and
/// [tracing_subscriber::fmt::format::Compact] are mutually exclusive.
macro_rules! create_fmt {
    () => {
        tracing_subscriber::fmt::layer()
            .compact()
            .without_time()
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(true)
    };
}

/// Type alias for a boxed layer.
pub type DynLayer<S> = dyn Layer<S> + Send + Sync + 'static;

/// Returns the layers described by `tracing_config`. Doesn't install them -- call
/// [TracingConfig::install_global] or [TracingConfig::install_thread_local] for that.
pub fn try_create_layers(
    tracing_config: TracingConfig,
) -> miette::Result<Vec<Box<DynLayer<tracing_subscriber::Registry>>>> {
    let mut layers: Vec<Box<DynLayer<tracing_subscriber::Registry>>> = vec![];

    // Needed so layers that don't carry their own filter (e.g. an OpenTelemetry
    // layer) still respect the configured level.
    layers.push(Box::new(tracing_config.get_level_filter()));

    if let Some(layer) = try_create_display_layer(tracing_config.get_level_filter(), tracing_config.get_writer_config())? {
        layers.push(layer);
    }
    if let Some(layer) = try_create_file_layer(tracing_config.get_level_filter(), tracing_config.get_writer_config())? {
        layers.push(layer);
    }

    Ok(layers)
}

/// This erases the concrete type of the writer, and returns a boxed layer.
pub fn try_create_display_layer<S>(
    level_filter: LevelFilter,
    writer_config: WriterConfig,
) -> miette::Result<Option<Box<DynLayer<S>>>>
where
    S: tracing_core::Subscriber,
    for<'a> S: LookupSpan<'a>,
{
    let fmt_layer = create_fmt!();

    Ok(match writer_config {
        WriterConfig::DisplayAndFile(display_pref, _) | WriterConfig::Display(display_pref) => match display_pref {
            DisplayPreference::Stdout => Some(Box::new(fmt_layer.with_writer(std::io::stdout).with_filter(level_filter))),
            DisplayPreference::Stderr => Some(Box::new(fmt_layer.with_writer(std::io::stderr).with_filter(level_filter))),
        },
        _ => None,
    })
}

/// This erases the concrete type of the writer, and returns a boxed layer.
pub fn try_create_file_layer<S>(
    level_filter: LevelFilter,
    writer_config: WriterConfig,
) -> miette::Result<Option<Box<DynLayer<S>>>>
where
    S: tracing_core::Subscriber,
    for<'a> S: LookupSpan<'a>,
{
    let fmt_layer = create_fmt!();

    Ok(match writer_config {
        WriterConfig::DisplayAndFile(_, tracing_log_file_path_and_prefix) | WriterConfig::File(tracing_log_file_path_and_prefix) => {
            let file = super::rolling_file_appender_impl::try_create(tracing_log_file_path_and_prefix.as_str())?;
            Some(Box::new(fmt_layer.with_writer(file).with_filter(level_filter)))
        }
        _ => None,
    })
}
