// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! KSM throttling for hosts running VM-based containers.
//!
//! Kernel Samepage Merging deduplicates the most memory shortly after a
//! new sandbox starts, when its pages still mirror the boot image. This
//! crate drives the KSM sysfs knobs accordingly: a "kick" puts the
//! scanner into an aggressive setting, and a fixed decay schedule steps
//! it back down to the values captured at startup. Kicks are delivered
//! over a unix socket by a trigger that watches the sandbox run
//! directory.

pub mod client;
pub mod error;
pub mod ksm;
pub mod logging;
pub mod service;
pub mod socket;
pub mod throttle;
pub mod watch;
pub mod wire;

pub use error::Error;
pub use error::Result;
