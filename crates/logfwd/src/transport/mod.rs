// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire strategies used by the delivery pipeline.

pub mod http;
pub mod stream;

use crate::config::{Config, TransportKind};
use crate::error::TransportError;
use async_trait::async_trait;
use rustls::ClientConfig;
use tokio_util::sync::CancellationToken;

pub use http::HttpTransport;
pub use stream::{Connector, StreamTransport, TlsConnector};

/// A way of getting records to the collector.
///
/// Every await inside an implementation is bounded by the per-request
/// timeout and raced against `cancel`.
#[async_trait]
pub trait Transport: Send {
    /// Where records go, for diagnostics
    fn destination(&self) -> &str;

    /// Makes sure the transport can send. A persistent transport connects
    /// here and, on failure, waits out its reconnect backoff before
    /// returning `false`.
    async fn ensure_connected(&mut self, cancel: &CancellationToken) -> bool;

    /// Sends `records` as one unit. Either all of them are accepted or the
    /// call fails.
    async fn send(
        &mut self,
        records: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), TransportError>;

    /// Releases any open connection.
    async fn close(&mut self) {}
}

/// Builds the transport selected by `config`.
pub fn build_transport(
    config: &Config,
    tls_config: ClientConfig,
) -> Result<Box<dyn Transport>, TransportError> {
    match config.transport {
        TransportKind::Http => Ok(Box::new(HttpTransport::new(config, tls_config)?)),
        TransportKind::Stream => {
            let connector = TlsConnector::new(tls_config, &config.host)?;
            Ok(Box::new(StreamTransport::new(
                connector,
                format!("{}:{}", config.host, config.port),
                config.request_timeout,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_transport_per_kind() {
        let tls_config = logfwd_tls::load_client_config(None, true).unwrap();
        let mut config = Config {
            host: "logs.example.com".to_string(),
            port: 6514,
            auth_token: Some("token".to_string()),
            ..Default::default()
        };

        let transport = build_transport(&config, tls_config.clone()).unwrap();
        assert_eq!(transport.destination(), "https://logs.example.com:6514");

        config.transport = TransportKind::Stream;
        let transport = build_transport(&config, tls_config).unwrap();
        assert_eq!(transport.destination(), "logs.example.com:6514");
    }
}
