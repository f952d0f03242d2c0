// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::ClientBuilder;
use rustls::ClientConfig;
use std::time::Duration;

/// Creates a reqwest client builder on top of a preconfigured rustls config,
/// so the HTTPS client trusts exactly what [`crate::load_client_config`]
/// decided.
pub fn create_reqwest_client_builder(tls_config: ClientConfig) -> ClientBuilder {
    reqwest::Client::builder()
        .use_preconfigured_tls(tls_config)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .pool_max_idle_per_host(20)
}
