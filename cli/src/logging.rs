// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Subscriber setup shared by the binaries: level from `RUST_LOG` or the
//! config, output to stderr or the configured file.

use call_api::config::LogConfig;
use color_eyre::eyre::WrapErr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub fn init(log: &LogConfig) -> color_eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log.level.as_deref().unwrap_or("info")))
        .wrap_err("invalid log level")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match &log.file_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .wrap_err_with(|| format!("cannot open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Arc::new(file)).init();
        }
        None => builder.init(),
    }
    Ok(())
}
