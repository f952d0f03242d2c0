// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::backoff::ReconnectBackoff;
use crate::error::TransportError;
use crate::transport::Transport;
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Opens the byte stream a [`StreamTransport`] writes to
#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: AsyncWrite + Unpin + Send;

    async fn connect(&self, addr: &str) -> io::Result<Self::Stream>;
}

/// TLS over TCP, verified against the shared rustls configuration
#[derive(Clone)]
pub struct TlsConnector {
    connector: tokio_rustls::TlsConnector,
    server_name: ServerName<'static>,
}

impl TlsConnector {
    pub fn new(tls_config: ClientConfig, host: &str) -> Result<Self, TransportError> {
        let server_name =
            ServerName::try_from(host.to_string()).map_err(|e| TransportError::Connect {
                addr: host.to_string(),
                source: io::Error::new(io::ErrorKind::InvalidInput, e),
            })?;
        Ok(Self {
            connector: tokio_rustls::TlsConnector::from(Arc::new(tls_config)),
            server_name,
        })
    }
}

#[async_trait]
impl Connector for TlsConnector {
    type Stream = tokio_rustls::client::TlsStream<TcpStream>;

    async fn connect(&self, addr: &str) -> io::Result<Self::Stream> {
        let tcp = TcpStream::connect(addr).await?;
        tcp.set_nodelay(true)?;
        self.connector.connect(self.server_name.clone(), tcp).await
    }
}

/// Writes raw syslog records over one long-lived connection.
///
/// A failed write drops the connection; the next
/// [`ensure_connected`](Transport::ensure_connected) re-establishes it,
/// spacing attempts with a [`ReconnectBackoff`].
pub struct StreamTransport<C: Connector> {
    connector: C,
    addr: String,
    conn: Option<C::Stream>,
    backoff: ReconnectBackoff,
    timeout: Duration,
}

impl<C: Connector> StreamTransport<C> {
    pub fn new(connector: C, addr: String, timeout: Duration) -> Self {
        Self::with_backoff(connector, addr, timeout, ReconnectBackoff::default())
    }

    pub fn with_backoff(
        connector: C,
        addr: String,
        timeout: Duration,
        backoff: ReconnectBackoff,
    ) -> Self {
        Self {
            connector,
            addr,
            conn: None,
            backoff,
            timeout,
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }
}

async fn connect_with_timeout<C: Connector>(
    connector: &C,
    addr: &str,
    timeout: Duration,
) -> Result<C::Stream, TransportError> {
    match tokio::time::timeout(timeout, connector.connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(TransportError::Connect {
            addr: addr.to_string(),
            source,
        }),
        Err(_) => Err(TransportError::Timeout(timeout)),
    }
}

#[async_trait]
impl<C: Connector> Transport for StreamTransport<C> {
    fn destination(&self) -> &str {
        &self.addr
    }

    async fn ensure_connected(&mut self, cancel: &CancellationToken) -> bool {
        if self.conn.is_some() {
            return true;
        }

        info!("STREAM | Connecting to {}", self.addr);
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return false,
            result = connect_with_timeout(&self.connector, &self.addr, self.timeout) => result,
        };

        match result {
            Ok(stream) => {
                info!("STREAM | Connected to {}", self.addr);
                self.conn = Some(stream);
                self.backoff.reset();
                true
            }
            Err(e) => {
                let delay = self.backoff.next_delay();
                error!("STREAM | Connection failed: {}", e);
                warn!("STREAM | Retrying connection in {:?}", delay);
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(delay) => {}
                }
                false
            }
        }
    }

    async fn send(
        &mut self,
        records: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let Some(stream) = self.conn.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        let mut payload = String::with_capacity(records.iter().map(|r| r.len() + 1).sum());
        for record in records {
            payload.push_str(record);
            payload.push('\n');
        }

        let timeout = self.timeout;
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TransportError::Cancelled),
            written = tokio::time::timeout(timeout, async {
                stream.write_all(payload.as_bytes()).await?;
                stream.flush().await
            }) => match written {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(TransportError::Write(e)),
                Err(_) => Err(TransportError::Timeout(timeout)),
            },
        };

        match result {
            Ok(()) => {
                debug!("STREAM | Wrote {} bytes", payload.len());
                Ok(())
            }
            Err(e) => {
                warn!("STREAM | Closing connection to {} after failed write", self.addr);
                self.conn = None;
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.conn.take() {
            debug!("STREAM | Closing connection to {}", self.addr);
            let _ = tokio::time::timeout(self.timeout, stream.shutdown()).await;
        }
    }
}
