// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::Config;
use crate::error::TransportError;
use crate::record::LogEntry;
use crate::transport::Transport;
use async_trait::async_trait;
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use rustls::ClientConfig;
use std::io::Write;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const JSON_CONTENT_TYPE: &str = "application/json";
const GZIP_JSON_CONTENT_TYPE: &str = "application/json+gzip";

/// Sends records as JSON log entries, one independent HTTPS request per send.
///
/// With batching enabled the body is a JSON array of entries, otherwise a
/// single JSON object.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    request_timeout: Duration,
    batching: bool,
    compress: bool,
}

impl HttpTransport {
    pub fn new(config: &Config, tls_config: ClientConfig) -> Result<Self, TransportError> {
        let client = logfwd_tls::reqwest_adapter::create_reqwest_client_builder(tls_config)
            .timeout(config.http_timeout)
            .build()?;
        Self::with_client(client, config)
    }

    /// Uses an already built client, e.g. a plain one for tests.
    pub fn with_client(client: reqwest::Client, config: &Config) -> Result<Self, TransportError> {
        Ok(Self {
            client,
            url: config.endpoint_url(),
            headers: build_headers(config.auth_token.as_deref().unwrap_or_default(), config.compress)?,
            request_timeout: config.request_timeout,
            batching: config.enable_batching,
            compress: config.compress,
        })
    }

    fn encode(&self, records: &[String]) -> Result<Vec<u8>, TransportError> {
        let now = Utc::now();
        let entries: Vec<LogEntry> = records
            .iter()
            .map(|record| LogEntry::from_record(record, now))
            .collect();

        let json = match entries.as_slice() {
            [] => return Err(TransportError::Encode("no records to send".to_string())),
            [single] if !self.batching => serde_json::to_vec(single)?,
            _ => serde_json::to_vec(&entries)?,
        };

        if !self.compress {
            return Ok(json);
        }
        let compressed = compress(&json).map_err(|e| TransportError::Encode(e.to_string()))?;
        debug!(
            "HTTP | Compressed request payload from {} to {} bytes",
            json.len(),
            compressed.len()
        );
        Ok(compressed)
    }
}

fn build_headers(token: &str, compress: bool) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::new();
    let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| TransportError::Encode(format!("invalid authorization token: {e}")))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);

    if compress {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(GZIP_JSON_CONTENT_TYPE));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    } else {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    }
    Ok(headers)
}

/// Header dump with the credentials masked
fn describe_headers(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| {
            if name == AUTHORIZATION {
                format!("{name}: Bearer [REDACTED]")
            } else {
                format!("{name}: {}", value.to_str().unwrap_or("<binary>"))
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

#[async_trait]
impl Transport for HttpTransport {
    fn destination(&self) -> &str {
        &self.url
    }

    async fn ensure_connected(&mut self, _cancel: &CancellationToken) -> bool {
        true
    }

    async fn send(
        &mut self,
        records: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let body = self.encode(records)?;
        debug!("HTTP | Sending {} record(s) to {}", records.len(), self.url);
        debug!("HTTP | Request headers: {}", describe_headers(&self.headers));

        let request = self
            .client
            .post(&self.url)
            .timeout(self.request_timeout)
            .headers(self.headers.clone())
            .body(body);

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = request.send() => result?,
        };

        let status = response.status();
        let body = tokio::select! {
            () = cancel.cancelled() => String::new(),
            text = response.text() => text.unwrap_or_default(),
        };
        debug!("HTTP | Response status: {}, body: {}", status, body);

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
