// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised by the disk-backed ring buffer
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("data of {len} bytes exceeds maximum buffer size of {max} bytes")]
    TooLarge { len: u64, max: u64 },

    #[error("buffer is closed")]
    Closed,

    #[error("buffer I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while validating the forwarder configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised by a transport while delivering records
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("error sending request: {0}")]
    Request(#[from] reqwest::Error),

    #[error("got non-success status code {status}: {body}")]
    Status { status: u16, body: String },

    #[error("error encoding payload: {0}")]
    Encode(String),

    #[error("error connecting to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("error writing to stream: {0}")]
    Write(#[source] std::io::Error),

    #[error("no open connection")]
    NotConnected,

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Encode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = BufferError::TooLarge { len: 200, max: 100 };
        assert_eq!(
            error.to_string(),
            "data of 200 bytes exceeds maximum buffer size of 100 bytes"
        );

        let error = TransportError::Status {
            status: 500,
            body: "boom".to_string(),
        };
        assert_eq!(error.to_string(), "got non-success status code 500: boom");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error: BufferError = io.into();
        assert!(matches!(error, BufferError::Io(_)));
    }
}
