// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Control surface for the kernel's KSM sysfs knobs.
//!
//! The knobs live under `/sys/kernel/mm/ksm/` and are whole-file ASCII
//! integers. The settings found at startup are captured once and written
//! back verbatim on restore.

use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use log::debug;

use crate::error::Error;
use crate::error::Result;

pub const DEFAULT_KSM_ROOT: &str = "/sys/kernel/mm/ksm/";

const RUN_FILE: &str = "run";
const PAGES_TO_SCAN_FILE: &str = "pages_to_scan";
const SLEEP_MILLISECS_FILE: &str = "sleep_millisecs";

const KSM_RUN_ENABLED: u64 = 1;

// Transient sysfs write failures are retried this many times before the
// knob is reported unavailable.
const WRITE_ATTEMPTS: u32 = 3;

/// KSM scan aggressiveness. `Auto` is a startup parameter that leaves the
/// scan parameters alone; the engine only ever rests in the other modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KsmMode {
    Initial,
    Auto,
    Aggressive,
    Standard,
    Slow,
}

/// Scan parameters written for one mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KsmParameters {
    pub pages_to_scan: u64,
    pub sleep_millisecs: u64,
}

pub const AGGRESSIVE_PARAMETERS: KsmParameters = KsmParameters {
    pages_to_scan: 1000,
    sleep_millisecs: 50,
};

pub const STANDARD_PARAMETERS: KsmParameters = KsmParameters {
    pages_to_scan: 200,
    sleep_millisecs: 1000,
};

pub const SLOW_PARAMETERS: KsmParameters = KsmParameters {
    pages_to_scan: 50,
    sleep_millisecs: 2000,
};

impl KsmMode {
    /// Fixed parameters for the mode. `Initial` and `Auto` have none:
    /// `Initial` reuses the snapshot, `Auto` writes nothing.
    fn parameters(self) -> Option<KsmParameters> {
        match self {
            KsmMode::Aggressive => Some(AGGRESSIVE_PARAMETERS),
            KsmMode::Standard => Some(STANDARD_PARAMETERS),
            KsmMode::Slow => Some(SLOW_PARAMETERS),
            KsmMode::Initial | KsmMode::Auto => None,
        }
    }
}

/// Knob values captured at startup and restored on shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KsmSettings {
    pub run: u64,
    pub pages_to_scan: u64,
    pub sleep_millisecs: u64,
}

/// Write access to the KSM knobs as the throttle engine drives them.
/// Implemented by [`Ksm`]; tests substitute a recording fake.
pub trait KsmControl: Send + 'static {
    fn start(&mut self, mode: KsmMode) -> Result<()>;
    fn apply(&self, mode: KsmMode) -> Result<()>;
    fn restore(&self) -> Result<()>;
}

/// KSM sysfs root plus the settings snapshot taken by [`Ksm::start`].
pub struct Ksm {
    root: PathBuf,
    snapshot: Option<KsmSettings>,
}

impl Ksm {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            snapshot: None,
        }
    }

    /// Probe the three knob files for readability. Never writes.
    pub fn available(&self) -> bool {
        [RUN_FILE, PAGES_TO_SCAN_FILE, SLEEP_MILLISECS_FILE]
            .iter()
            .all(|knob| fs::File::open(self.root.join(knob)).is_ok())
    }

    pub fn snapshot(&self) -> Option<&KsmSettings> {
        self.snapshot.as_ref()
    }

    fn read_knob(&self, knob: &str) -> Result<u64> {
        let path = self.root.join(knob);
        let content = fs::read_to_string(&path).map_err(Error::KsmUnavailable)?;
        content.trim().parse().map_err(|e| {
            Error::KsmUnavailable(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed {}: {}", path.display(), e),
            ))
        })
    }

    fn write_knob(&self, knob: &str, value: u64) -> Result<()> {
        let path = self.root.join(knob);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match fs::write(&path, value.to_string()) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted && attempt < WRITE_ATTEMPTS => {
                    debug!("retrying interrupted write to {}", path.display());
                }
                Err(e) => return Err(Error::KsmUnavailable(e)),
            }
        }
    }
}

impl KsmControl for Ksm {
    /// Capture the settings snapshot, apply `mode` and enable scanning.
    ///
    /// The knobs are read in a fixed order (run, pages_to_scan,
    /// sleep_millisecs). The snapshot is taken exactly once; a second
    /// call keeps the first snapshot.
    fn start(&mut self, mode: KsmMode) -> Result<()> {
        if self.snapshot.is_none() {
            self.snapshot = Some(KsmSettings {
                run: self.read_knob(RUN_FILE)?,
                pages_to_scan: self.read_knob(PAGES_TO_SCAN_FILE)?,
                sleep_millisecs: self.read_knob(SLEEP_MILLISECS_FILE)?,
            });
        }

        self.apply(mode)?;
        self.write_knob(RUN_FILE, KSM_RUN_ENABLED)
    }

    /// Write the scan parameters for `mode`, leaving `run` untouched.
    fn apply(&self, mode: KsmMode) -> Result<()> {
        let parameters = match mode {
            KsmMode::Auto => return Ok(()),
            KsmMode::Initial => {
                let snapshot = self.snapshot.ok_or(Error::KsmMissing)?;
                KsmParameters {
                    pages_to_scan: snapshot.pages_to_scan,
                    sleep_millisecs: snapshot.sleep_millisecs,
                }
            }
            mode => mode.parameters().ok_or(Error::KsmMissing)?,
        };

        self.write_knob(PAGES_TO_SCAN_FILE, parameters.pages_to_scan)?;
        self.write_knob(SLEEP_MILLISECS_FILE, parameters.sleep_millisecs)
    }

    /// Write the full snapshot back, including `run`. Idempotent.
    fn restore(&self) -> Result<()> {
        let snapshot = self.snapshot.ok_or(Error::KsmMissing)?;
        self.write_knob(PAGES_TO_SCAN_FILE, snapshot.pages_to_scan)?;
        self.write_knob(SLEEP_MILLISECS_FILE, snapshot.sleep_millisecs)?;
        self.write_knob(RUN_FILE, snapshot.run)
    }
}

/// Bind `root`, verifying the knob files are present. The settings
/// snapshot is taken later, by [`KsmControl::start`].
pub fn probe<P: AsRef<Path>>(root: P) -> Result<Ksm> {
    let ksm = Ksm::new(root.as_ref());
    if !ksm.available() {
        return Err(Error::KsmUnavailable(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no KSM knobs under {}", root.as_ref().display()),
        )));
    }
    Ok(ksm)
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    fn write_mock_root(root: &Path, run: u64, pages: u64, sleep: u64) {
        fs::write(root.join(RUN_FILE), run.to_string()).unwrap();
        fs::write(root.join(PAGES_TO_SCAN_FILE), pages.to_string()).unwrap();
        fs::write(root.join(SLEEP_MILLISECS_FILE), sleep.to_string()).unwrap();
    }

    fn read_mock_knob(root: &Path, knob: &str) -> u64 {
        fs::read_to_string(root.join(knob))
            .unwrap()
            .trim()
            .parse()
            .unwrap()
    }

    fn start_ksm(root: &Path, mode: KsmMode) -> Result<Ksm> {
        let mut ksm = probe(root)?;
        ksm.start(mode)?;
        Ok(ksm)
    }

    #[test]
    fn start_captures_snapshot_and_enables_run() {
        let dir = tempdir().unwrap();
        write_mock_root(dir.path(), 0, 100, 20);

        let ksm = start_ksm(dir.path(), KsmMode::Auto).unwrap();
        assert_eq!(
            ksm.snapshot(),
            Some(&KsmSettings {
                run: 0,
                pages_to_scan: 100,
                sleep_millisecs: 20,
            })
        );
        assert_eq!(read_mock_knob(dir.path(), RUN_FILE), 1);
        // Auto leaves the scan parameters alone.
        assert_eq!(read_mock_knob(dir.path(), PAGES_TO_SCAN_FILE), 100);
        assert_eq!(read_mock_knob(dir.path(), SLEEP_MILLISECS_FILE), 20);
    }

    #[test]
    fn start_with_mode_applies_parameters() {
        let dir = tempdir().unwrap();
        write_mock_root(dir.path(), 0, 100, 20);

        start_ksm(dir.path(), KsmMode::Aggressive).unwrap();
        assert_eq!(read_mock_knob(dir.path(), RUN_FILE), 1);
        assert_eq!(read_mock_knob(dir.path(), PAGES_TO_SCAN_FILE), 1000);
        assert_eq!(read_mock_knob(dir.path(), SLEEP_MILLISECS_FILE), 50);
    }

    #[test]
    fn apply_initial_rewrites_snapshot_parameters() {
        let dir = tempdir().unwrap();
        write_mock_root(dir.path(), 0, 100, 20);

        let ksm = start_ksm(dir.path(), KsmMode::Aggressive).unwrap();
        ksm.apply(KsmMode::Initial).unwrap();
        assert_eq!(read_mock_knob(dir.path(), PAGES_TO_SCAN_FILE), 100);
        assert_eq!(read_mock_knob(dir.path(), SLEEP_MILLISECS_FILE), 20);
        // run stays enabled until restore.
        assert_eq!(read_mock_knob(dir.path(), RUN_FILE), 1);
    }

    #[test]
    fn restore_writes_back_the_full_snapshot() {
        let dir = tempdir().unwrap();
        write_mock_root(dir.path(), 0, 100, 20);

        let ksm = start_ksm(dir.path(), KsmMode::Aggressive).unwrap();
        ksm.restore().unwrap();
        assert_eq!(read_mock_knob(dir.path(), RUN_FILE), 0);
        assert_eq!(read_mock_knob(dir.path(), PAGES_TO_SCAN_FILE), 100);
        assert_eq!(read_mock_knob(dir.path(), SLEEP_MILLISECS_FILE), 20);

        // Restoring again is a no-op on already-restored values.
        ksm.restore().unwrap();
        assert_eq!(read_mock_knob(dir.path(), RUN_FILE), 0);
    }

    #[test]
    fn snapshot_is_captured_only_once() {
        let dir = tempdir().unwrap();
        write_mock_root(dir.path(), 0, 100, 20);

        let mut ksm = start_ksm(dir.path(), KsmMode::Aggressive).unwrap();
        // The knobs now hold aggressive values; a second start must not
        // overwrite the original snapshot with them.
        ksm.start(KsmMode::Auto).unwrap();
        assert_eq!(ksm.snapshot().unwrap().pages_to_scan, 100);
    }

    #[test]
    fn unavailable_root_is_rejected() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("ksm");

        let ksm = Ksm::new(&missing);
        assert!(!ksm.available());
        assert!(matches!(
            start_ksm(&missing, KsmMode::Auto),
            Err(Error::KsmUnavailable(_))
        ));
    }

    #[test]
    fn partial_root_is_unavailable() {
        let dir = tempdir().unwrap();
        write_mock_root(dir.path(), 0, 100, 20);
        fs::remove_file(dir.path().join(SLEEP_MILLISECS_FILE)).unwrap();

        assert!(!Ksm::new(dir.path()).available());
    }
}
