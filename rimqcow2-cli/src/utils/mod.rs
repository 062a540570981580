// SPDX-License-Identifier: MIT

pub mod log;

pub use log::{log_level, set_log_level, LogLevel};
