// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The KSM sysfs root or one of its knob files is missing or unusable.
    #[error("KSM is unavailable: {0}")]
    KsmUnavailable(#[source] io::Error),

    /// No live throttle engine to deliver a kick to.
    #[error("missing KSM throttle instance")]
    KsmMissing,

    #[error("socket path too long: {} bytes (max {})", .0, crate::socket::SOCKET_PATH_MAX)]
    SocketPathTooLong(usize),

    #[error("failed to set up listener at {}: {}", path.display(), source)]
    ListenerSetup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Malformed or unexpected data on the kick socket.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("invalid watch directory {}", .0.display())]
    InvalidWatchDir(PathBuf),

    #[error("directory watch failed: {0}")]
    Watch(#[from] notify::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
