// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Sandbox directory monitoring for the throttler trigger.
//!
//! The trigger waits for the sandbox run directory to appear, then kicks
//! the throttler for every new sandbox created under it. Kicks are
//! queued to a separate sender task so a slow RPC never stalls event
//! draining.

use std::path::Path;
use std::path::PathBuf;
use std::sync::mpsc as sync_mpsc;

use log::debug;
use log::info;
use log::warn;
use notify::Event;
use notify::EventKind;
use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::Error;
use crate::error::Result;

pub const DEFAULT_VC_ROOT: &str = "/var/run/virtcontainers";

/// Name of the per-sandbox directory under the sandbox root.
pub const PODS_DIR: &str = "sbs";

/// Kicks buffered ahead of the RPC sender before new ones coalesce.
pub const KICK_QUEUE_DEPTH: usize = 64;

fn new_watcher(events: sync_mpsc::Sender<notify::Result<Event>>) -> Result<RecommendedWatcher> {
    let watcher = notify::recommended_watcher(move |event| {
        // A send failure means the receiving loop is gone and the
        // watcher is about to be dropped with it.
        let _ = events.send(event);
    })?;
    Ok(watcher)
}

fn is_create(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_))
}

/// Block until `dir` exists. The watch on the parent directory is in
/// place before the existence check, so a directory that appears
/// concurrently is never missed.
pub fn wait_for_directory(dir: &Path) -> Result<()> {
    if !dir.is_absolute() {
        return Err(Error::InvalidWatchDir(dir.to_path_buf()));
    }
    let parent = match dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => return Err(Error::InvalidWatchDir(dir.to_path_buf())),
    };

    let (events_tx, events) = sync_mpsc::channel();
    let mut watcher = new_watcher(events_tx)?;
    watcher.watch(parent, RecursiveMode::NonRecursive)?;

    if dir.exists() {
        return Ok(());
    }

    debug!("waiting for directory {}", dir.display());

    for event in events {
        let event = event?;
        if is_create(&event) && event.paths.iter().any(|path| path == dir) {
            debug!("directory {} created", dir.display());
            return Ok(());
        }
    }

    Err(notify::Error::generic("directory event stream ended").into())
}

/// Watch the sandbox root and enqueue one kick per new sandbox. Returns
/// only on watch failure.
pub fn monitor_pods(vc_root: &Path, kicks: &mpsc::Sender<()>) -> Result<()> {
    if !vc_root.exists() {
        wait_for_directory(vc_root)?;
    }

    let pods_path: PathBuf = vc_root.join(PODS_DIR);
    if !pods_path.exists() {
        wait_for_directory(&pods_path)?;
        // The pods directory appearing means the first sandbox is
        // already coming up.
        send_kick(kicks);
    }

    let (events_tx, events) = sync_mpsc::channel();
    let mut watcher = new_watcher(events_tx)?;
    watcher.watch(&pods_path, RecursiveMode::NonRecursive)?;

    info!("monitoring sandbox events under {}", pods_path.display());

    for event in events {
        let event = event?;
        if !is_create(&event) {
            continue;
        }
        if !event
            .paths
            .iter()
            .any(|path| path.parent() == Some(pods_path.as_path()))
        {
            continue;
        }

        debug!("sandbox created, kicking the throttler");
        send_kick(kicks);
    }

    Err(notify::Error::generic("sandbox event stream ended").into())
}

fn send_kick(kicks: &mpsc::Sender<()>) {
    match kicks.try_send(()) {
        Ok(()) => {}
        // A full queue already holds enough kicks to keep the engine
        // aggressive.
        Err(TrySendError::Full(())) => debug!("kick queue full, coalescing"),
        Err(TrySendError::Closed(())) => warn!("kick sender is gone"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use std::thread;
    use std::time::Duration;

    use tempfile::tempdir;

    #[test]
    fn wait_returns_for_a_preexisting_directory() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("present");
        fs::create_dir(&target).unwrap();

        wait_for_directory(&target).unwrap();
    }

    #[test]
    fn wait_returns_when_the_directory_appears() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("later");

        let create_target = target.clone();
        let creator = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            fs::create_dir(&create_target).unwrap();
        });

        wait_for_directory(&target).unwrap();
        creator.join().unwrap();
    }

    #[test]
    fn relative_directories_are_rejected() {
        assert!(matches!(
            wait_for_directory(Path::new("relative/dir")),
            Err(Error::InvalidWatchDir(_))
        ));
    }

    #[test]
    fn first_pod_and_new_sandboxes_kick() {
        let dir = tempdir().unwrap();
        let vc_root = dir.path().join("virtcontainers");
        fs::create_dir(&vc_root).unwrap();

        let (kicks_tx, mut kicks) = mpsc::channel(KICK_QUEUE_DEPTH);
        let monitor_root = vc_root.clone();
        thread::spawn(move || {
            let _ = monitor_pods(&monitor_root, &kicks_tx);
        });

        // Give the monitor time to arm the watch on the root.
        thread::sleep(Duration::from_millis(200));

        let pods = vc_root.join(PODS_DIR);
        fs::create_dir(&pods).unwrap();

        // First-pod condition: the pods directory itself kicks.
        kicks.blocking_recv().unwrap();

        thread::sleep(Duration::from_millis(200));
        fs::create_dir(pods.join("sandbox-1")).unwrap();
        kicks.blocking_recv().unwrap();

        fs::create_dir(pods.join("sandbox-2")).unwrap();
        kicks.blocking_recv().unwrap();
    }
}
