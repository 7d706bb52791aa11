// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The KSM throttler daemon.

use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use log::error;
use log::info;
use tokio::runtime::Builder;
use tokio::signal;
use tokio::signal::unix;
use tokio::signal::unix::SignalKind;
use tokio::sync::mpsc;

use ksm_throttler::ksm;
use ksm_throttler::logging;
use ksm_throttler::service;
use ksm_throttler::socket;
use ksm_throttler::throttle::Throttler;

#[derive(Parser)]
#[command(name = "ksm-throttler", version, about = "Throttles KSM scanning on sandbox creation")]
struct Args {
    /// KSM throttler socket URI
    #[arg(long)]
    uri: Option<String>,

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

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

    // If signal handling is broken we want the process to die anyway, so
    // unwrap is deliberate in both handlers.
    let tx = shutdown_tx.clone();
    runtime.spawn(async move {
        signal::ctrl_c().await.unwrap();
        let _ = tx.send(()).await;
    });
    let tx = shutdown_tx;
    runtime.spawn(async move {
        unix::signal(SignalKind::terminate()).unwrap().recv().await;
        let _ = tx.send(()).await;
    });

    let result = runtime.block_on(async {
        let listener = socket::bind(&uri)?;
        let ksm = ksm::probe(ksm::DEFAULT_KSM_ROOT)?;
        let throttler = Throttler::start(ksm, ksm::KsmMode::Auto)?;

        info!("KSM throttling service listening at {}", uri.display());
        service::serve(listener, throttler.clone(), shutdown_rx).await;

        // Put the knobs back the way we found them; the listener drop
        // unlinks the socket.
        throttler.shutdown().await;
        Ok::<(), ksm_throttler::Error>(())
    });

    // Grace period for in-flight kick connections.
    runtime.shutdown_timeout(Duration::from_secs(1));

    result.context("could not run the KSM throttling service")?;
    info!("KSM throttling service stopped");
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        error!("{:#}", e);
        eprintln!("ksm-throttler: {:#}", e);
        std::process::exit(1);
    }
}
