// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Client side of the kick transport.

use std::io;
use std::path::Path;
use std::time::Duration;

use log::debug;
use tokio::net::UnixStream;
use tokio::time::timeout;

use crate::error::Error;
use crate::error::Result;
use crate::wire;
use crate::wire::Frame;

// Covers connection establishment and the reply, like the original
// throttler clients' 5s dial timeout.
const KICK_TIMEOUT: Duration = Duration::from_secs(5);

/// Send a single kick to the throttler listening at `uri` and wait for
/// the reply. The connection is short-lived: connect, kick, close.
pub async fn kick(uri: &Path) -> Result<()> {
    debug!("kicking throttler at {}", uri.display());

    timeout(KICK_TIMEOUT, async {
        let mut stream = UnixStream::connect(uri).await?;
        wire::write_frame(&mut stream, &Frame::kick_request()).await?;
        wire::read_frame(&mut stream).await?.into_reply()
    })
    .await
    .unwrap_or_else(|_| {
        Err(Error::Transport(io::Error::new(
            io::ErrorKind::TimedOut,
            "kick deadline exceeded",
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[tokio::test]
    async fn kick_without_a_daemon_is_a_transport_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nobody-home.sock");

        assert!(matches!(
            kick(&path).await,
            Err(Error::Transport(_))
        ));
    }
}
