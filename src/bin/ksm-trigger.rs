// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Watches the sandbox run directory and kicks the KSM throttler for
//! every new sandbox.

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use log::error;
use log::warn;
use tokio::runtime::Builder;
use tokio::sync::mpsc;

use ksm_throttler::client;
use ksm_throttler::logging;
use ksm_throttler::socket;
use ksm_throttler::watch;

#[derive(Parser)]
#[command(name = "ksm-trigger", version, about = "Kicks the KSM throttler when sandboxes appear")]
struct Args {
    /// KSM throttler socket URI
    #[arg(long)]
    uri: Option<String>,

    /// Sandbox root directory to watch
    #[arg(long, default_value = watch::DEFAULT_VC_ROOT)]
    root: PathBuf,

    /// Log messages above the specified level: debug, info, warn, error,
    /// fatal or panic
    #[arg(long, default_value = "warn")]
    log: String,
}

fn run() -> Result<()> {
    let args = Args::parse();

    logging::init(&args.log)?;

    let uri = socket::socket_path(args.uri.as_deref())
        .context("could not get the service socket URI")?;

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to set up tokio runtime")?;

    // The sender task drains kicks on its own so a slow RPC never stalls
    // the watch loop.
    let (kicks_tx, mut kicks) = mpsc::channel(watch::KICK_QUEUE_DEPTH);
    runtime.spawn(async move {
        while kicks.recv().await.is_some() {
            if let Err(e) = client::kick(&uri).await {
                warn!("could not kick the throttler: {}", e);
            }
        }
    });

    watch::monitor_pods(&args.root, &kicks_tx).context("could not monitor sandboxes")?;
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        error!("{:#}", e);
        eprintln!("ksm-trigger: {:#}", e);
        std::process::exit(1);
    }
}
