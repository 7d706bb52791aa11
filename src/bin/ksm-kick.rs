// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! One-shot kick for the KSM throttler, mostly useful for testing a
//! deployed daemon by hand.

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use tokio::runtime::Builder;

use ksm_throttler::client;
use ksm_throttler::socket;

#[derive(Parser)]
#[command(name = "ksm-kick", version, about = "Sends one kick to the KSM throttler")]
struct Args {
    /// KSM throttler socket URI
    #[arg(long)]
    uri: Option<String>,
}

fn run() -> Result<()> {
    let args = Args::parse();

    let uri = socket::socket_path(args.uri.as_deref())
        .context("could not get the service socket URI")?;

    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to set up tokio runtime")?;

    runtime
        .block_on(client::kick(&uri))
        .with_context(|| format!("could not kick the throttler at {}", uri.display()))
}

fn main() {
    if let Err(e) = run() {
        eprintln!("ksm-kick: {:#}", e);
        std::process::exit(1);
    }
}
