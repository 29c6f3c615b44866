// SPDX-License-Identifier: MIT OR Apache-2.0
//! Two-pass scan orchestration.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod progress;
mod scanner;
mod watchdog;

pub use config::{ConfigError, ScanConfig};
pub use progress::{LogProgress, ProgressSink, ScanProgress};
pub use scanner::{ScanError, ScanOutcome, Scanner};
pub use watchdog::Watchdog;
