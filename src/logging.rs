// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Syslog setup shared by the throttler binaries.

use anyhow::anyhow;
use anyhow::Result;
use log::LevelFilter;

/// Map a `--log` flag value onto a level filter. The accepted names
/// match the original daemon: `fatal` and `panic` only exist to keep old
/// command lines working and log at the error level.
pub fn parse_level(level: &str) -> Result<LevelFilter> {
    match level {
        "debug" => Ok(LevelFilter::Debug),
        "info" => Ok(LevelFilter::Info),
        "warn" | "warning" => Ok(LevelFilter::Warn),
        "error" | "fatal" | "panic" => Ok(LevelFilter::Error),
        _ => Err(anyhow!("invalid log level \"{}\"", level)),
    }
}

/// Initialize syslog at the given level.
pub fn init(level: &str) -> Result<()> {
    let filter = parse_level(level)?;
    syslog::init_unix(syslog::Facility::LOG_DAEMON, filter)
        .map_err(|e| anyhow!("failed to initialize syslog: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_parse() {
        assert_eq!(parse_level("debug").unwrap(), LevelFilter::Debug);
        assert_eq!(parse_level("info").unwrap(), LevelFilter::Info);
        assert_eq!(parse_level("warn").unwrap(), LevelFilter::Warn);
        assert_eq!(parse_level("warning").unwrap(), LevelFilter::Warn);
        assert_eq!(parse_level("error").unwrap(), LevelFilter::Error);
        assert_eq!(parse_level("fatal").unwrap(), LevelFilter::Error);
        assert_eq!(parse_level("panic").unwrap(), LevelFilter::Error);
    }

    #[test]
    fn unknown_levels_are_rejected() {
        assert!(parse_level("verbose").is_err());
        assert!(parse_level("").is_err());
    }
}
