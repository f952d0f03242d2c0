// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TLS trust configuration for the log forwarder.
//!
//! A single [`rustls::ClientConfig`] is built at start-up and shared by both
//! transports: the pooled HTTPS client (through [`reqwest_adapter`]) and the
//! long-lived TLS stream.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod reqwest_adapter;
mod verifier;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("error loading certificate bundle {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("certificate bundle {0} holds no usable certificate")]
    EmptyBundle(PathBuf),

    #[error("no valid certificates found in native root store")]
    NoNativeRoots,

    #[error("failed to build TLS configuration: {0}")]
    Config(#[from] rustls::Error),
}

/// Builds the client TLS configuration.
///
/// With `cert_path` the trust anchors come from that PEM bundle only,
/// otherwise from the platform store. `insecure` disables server certificate
/// verification altogether and takes precedence over both.
pub fn load_client_config(
    cert_path: Option<&Path>,
    insecure: bool,
) -> Result<ClientConfig, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])?;

    if insecure {
        warn!("TLS | Certificate verification is disabled");
        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier::AcceptAnyServerCert::new(
                provider,
            )))
            .with_no_client_auth());
    }

    let roots = match cert_path {
        Some(path) => load_bundle(path)?,
        None => load_native_roots()?,
    };
    debug!("TLS | Client config created with min version TLS 1.2");

    Ok(builder.with_root_certificates(roots).with_no_client_auth())
}

fn load_bundle(path: &Path) -> Result<RootCertStore, TlsError> {
    debug!("TLS | Loading certificate from {}", path.display());
    let pem = std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("TLS | Read {} bytes from certificate file", pem.len());

    let mut store = RootCertStore::empty();
    for cert in CertificateDer::pem_slice_iter(&pem) {
        match cert {
            Ok(cert) => {
                if let Err(err) = store.add(cert) {
                    debug!("TLS | Skipping certificate: {err}");
                }
            }
            Err(err) => debug!("TLS | Skipping malformed PEM section: {err:?}"),
        }
    }

    if store.is_empty() {
        return Err(TlsError::EmptyBundle(path.to_path_buf()));
    }
    Ok(store)
}

fn load_native_roots() -> Result<RootCertStore, TlsError> {
    debug!("TLS | Using system root certificates");
    let native_certs = rustls_native_certs::load_native_certs();
    for err in &native_certs.errors {
        debug!("TLS | Error loading native certificate: {err}");
    }

    let mut store = RootCertStore::empty();
    let (valid, invalid) = store.add_parsable_certificates(native_certs.certs);
    debug!("TLS | Loaded {valid} native roots ({invalid} skipped)");
    if valid == 0 {
        return Err(TlsError::NoNativeRoots);
    }
    Ok(store)
}
