// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The kick service: accepts throttler clients and dispatches kicks.

use std::time::Duration;

use log::debug;
use log::error;
use log::info;
use log::warn;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::Error;
use crate::error::Result;
use crate::socket::ScopedUnixListener;
use crate::throttle::Throttler;
use crate::wire;
use crate::wire::Frame;

// A client that cannot deliver one frame within this window is dropped,
// matching the client-side dial deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Accept and serve kick connections until `shutdown` fires. Each
/// connection is handled on its own task; handlers only enqueue into the
/// engine, so in-flight kicks never block each other.
pub async fn serve(
    listener: ScopedUnixListener,
    throttler: Throttler,
    mut shutdown: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("kick service shutting down");
                return;
            }

            conn = listener.accept() => match conn {
                Ok((stream, _addr)) => {
                    let throttler = throttler.clone();
                    tokio::spawn(async move {
                        let outcome = timeout(
                            REQUEST_TIMEOUT,
                            handle_connection(stream, &throttler),
                        )
                        .await
                        .unwrap_or_else(|_| {
                            Err(Error::Protocol("request deadline exceeded".to_string()))
                        });
                        if let Err(e) = outcome {
                            warn!("kick connection failed: {}", e);
                        }
                    });
                }
                Err(e) => error!("failed to accept kick connection: {}", e),
            },
        }
    }
}

async fn handle_connection(mut stream: UnixStream, throttler: &Throttler) -> Result<()> {
    let request = wire::read_frame(&mut stream).await?;
    if request.method != wire::METHOD_KICK {
        return Err(Error::Protocol(format!(
            "unknown method {}",
            request.method
        )));
    }

    debug!("kick received");
    let reply = match throttler.kick() {
        Ok(()) => Frame::reply_ok(wire::METHOD_KICK),
        Err(Error::KsmMissing) => Frame::reply_error(wire::METHOD_KICK, wire::CODE_KSM_MISSING),
        Err(e) => return Err(e),
    };

    wire::write_frame(&mut stream, &reply).await
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::Mutex;

    use tempfile::tempdir;

    use crate::client;
    use crate::ksm::KsmControl;
    use crate::ksm::KsmMode;
    use crate::socket;

    #[derive(Clone, Default)]
    struct FakeKsm {
        applied: Arc<Mutex<Vec<KsmMode>>>,
    }

    impl KsmControl for FakeKsm {
        fn start(&mut self, _mode: KsmMode) -> Result<()> {
            Ok(())
        }

        fn apply(&self, mode: KsmMode) -> Result<()> {
            self.applied.lock().unwrap().push(mode);
            Ok(())
        }

        fn restore(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn kick_rpc_reaches_the_engine() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ksm.sock");

        let fake = FakeKsm::default();
        let throttler = Throttler::start(fake.clone(), KsmMode::Auto).unwrap();
        let listener = socket::bind(&path).unwrap();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let server = tokio::spawn(serve(listener, throttler.clone(), shutdown_rx));

        client::kick(&path).await.unwrap();

        // The engine applies the kick asynchronously.
        for _ in 0..100 {
            if fake.applied.lock().unwrap().contains(&KsmMode::Aggressive) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(fake.applied.lock().unwrap().contains(&KsmMode::Aggressive));

        shutdown_tx.send(()).await.unwrap();
        server.await.unwrap();
        // Shutdown removed the socket file.
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn stopped_engine_reports_ksm_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ksm.sock");

        let throttler = Throttler::start(FakeKsm::default(), KsmMode::Auto).unwrap();
        throttler.shutdown().await;

        let listener = socket::bind(&path).unwrap();
        let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(serve(listener, throttler, shutdown_rx));

        assert!(matches!(
            client::kick(&path).await,
            Err(Error::KsmMissing)
        ));
    }

    #[tokio::test]
    async fn concurrent_kicks_all_get_replies() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ksm.sock");

        let throttler = Throttler::start(FakeKsm::default(), KsmMode::Auto).unwrap();
        let listener = socket::bind(&path).unwrap();
        let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(serve(listener, throttler, shutdown_rx));

        let mut calls = Vec::new();
        for _ in 0..8 {
            let path = path.clone();
            calls.push(tokio::spawn(async move { client::kick(&path).await }));
        }
        for call in calls {
            call.await.unwrap().unwrap();
        }
    }
}
