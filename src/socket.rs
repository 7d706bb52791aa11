// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Throttler socket path policy and listener lifecycle.

use std::fs;
use std::io;
use std::ops::Deref;
use std::os::unix::fs::DirBuilderExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;

use log::error;
use tokio::net::UnixListener;

use crate::error::Error;
use crate::error::Result;

/// Default throttler socket. A packager can relocate it at build time to
/// match the distribution's runtime directory.
pub const DEFAULT_SOCKET_PATH: &str = match option_env!("KSM_THROTTLER_SOCKET") {
    Some(path) => path,
    None => "/var/run/kata-ksm-throttler/ksm.sock",
};

/// Linux caps `sun_path` at 108 bytes including the terminating NUL, see
/// unix(7).
pub const SOCKET_PATH_MAX: usize = 107;

const SOCKET_DIR_MODE: u32 = 0o750;
const SOCKET_MODE: u32 = 0o660;

/// Resolve the socket path from the `--uri` flag, falling back to the
/// built-in default. Oversize paths are rejected before anything touches
/// the filesystem.
pub fn socket_path(arg: Option<&str>) -> Result<PathBuf> {
    let uri = match arg {
        Some(uri) if !uri.is_empty() => uri,
        _ => DEFAULT_SOCKET_PATH,
    };

    if uri.len() > SOCKET_PATH_MAX {
        return Err(Error::SocketPathTooLong(uri.len()));
    }

    Ok(PathBuf::from(uri))
}

/// Scopes a UnixListener such that on Drop, the socket file is deleted.
pub struct ScopedUnixListener(UnixListener);

impl Deref for ScopedUnixListener {
    type Target = UnixListener;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for ScopedUnixListener {
    fn drop(&mut self) {
        if let Ok(addr) = self.0.local_addr() {
            if let Some(path) = addr.as_pathname() {
                if let Err(e) = fs::remove_file(path) {
                    if e.kind() != io::ErrorKind::NotFound {
                        error!("failed to remove socket at {}: {}", path.display(), e);
                    }
                }
            }
        }
    }
}

fn setup_error(path: &Path, source: io::Error) -> Error {
    Error::ListenerSetup {
        path: path.to_path_buf(),
        source,
    }
}

/// Bind the throttler listener: create the parent directory mode 0750,
/// drop any stale socket file, bind, and chmod the socket to 0660.
///
/// Must be called from within a tokio runtime.
pub fn bind(path: &Path) -> Result<ScopedUnixListener> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            fs::DirBuilder::new()
                .recursive(true)
                .mode(SOCKET_DIR_MODE)
                .create(dir)
                .map_err(|e| setup_error(path, e))?;
            // DirBuilder modes pass through the umask; pin the mode down.
            fs::set_permissions(dir, fs::Permissions::from_mode(SOCKET_DIR_MODE))
                .map_err(|e| setup_error(path, e))?;
        }
    }

    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(setup_error(path, e)),
    }

    let listener = UnixListener::bind(path).map_err(|e| setup_error(path, e))?;
    fs::set_permissions(path, fs::Permissions::from_mode(SOCKET_MODE))
        .map_err(|e| setup_error(path, e))?;

    Ok(ScopedUnixListener(listener))
}
