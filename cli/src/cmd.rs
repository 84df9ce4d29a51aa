// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Run a single command straight against the SIP proxy, no gateway in
//! between; handy for poking at a setup from the shell.

mod logging;

use call_api::{CmdEvent, Command, Config, Proxy};
use clap::Parser as ClapParser;
use color_eyre::eyre::eyre;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Run one calling command directly on the configured SIP proxy and print
/// its progress events.
#[derive(Debug, ClapParser)]
#[command(name = "call-api-cmd", version)]
struct Opts {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// The command to run, e.g. `CallEnd`.
    method: String,

    /// Command parameters as `name=value` pairs, e.g. `callid=abc`.
    params: Vec<String>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let opts = Opts::parse();
    let config = Config::load(opts.config.as_deref(), "call-api")?;
    logging::init(&config.log)?;

    let mut params = serde_json::Map::new();
    for pair in &opts.params {
        let Some((name, value)) = pair.split_once('=') else {
            return Err(eyre!("parameter '{pair}' is not a name=value pair"));
        };
        params.insert(name.to_owned(), Value::String(value.to_owned()));
    }

    let proxy = Proxy::new(&config).await?;
    let mut command = Command::new(&opts.method, None, Arc::new(proxy))?;
    let mut events = command.take_events();
    command.run(params)?;

    while let Some(event) = events.recv().await {
        if let CmdEvent::Error(e) = event {
            return Err(eyre!("{e}"));
        }
        println!("{event}");
    }
    Ok(())
}
