// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hostname detection for the syslog header

use std::env;
use tracing::warn;

pub const UNKNOWN_HOSTNAME: &str = "unknown-host";

/// Get the hostname stamped on every record
///
/// Tries, in order:
/// 1. `LOG_FWD_HOSTNAME` environment variable
/// 2. `HOSTNAME` environment variable
/// 3. System hostname via `gethostname(2)`
/// 4. `unknown-host`
#[must_use]
pub fn get_hostname() -> String {
    for var in ["LOG_FWD_HOSTNAME", "HOSTNAME"] {
        if let Ok(hostname) = env::var(var) {
            if !hostname.trim().is_empty() {
                return hostname.trim().to_string();
            }
        }
    }

    match nix::unistd::gethostname() {
        Ok(hostname) => {
            if let Some(hostname) = hostname.to_str().filter(|h| !h.is_empty()) {
                return hostname.to_string();
            }
        }
        Err(e) => warn!("Could not determine hostname: {}", e),
    }

    UNKNOWN_HOSTNAME.to_string()
}
