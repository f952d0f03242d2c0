// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log forwarding agent.
//!
//! Lines read from an input stream are stored as syslog records in a
//! durable on-disk ring buffer ([`buffer`]) by the ingestion loop
//! ([`ingest`]), and drained to a remote collector by the delivery pipeline
//! ([`delivery`]) with retries, backoff and optional batching. The two loops
//! share the buffer, a coalescing wakeup signal ([`signal`]) and a
//! cancellation token.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod backoff;
pub mod buffer;
pub mod config;
pub mod delivery;
pub mod error;
pub mod hostname;
pub mod ingest;
pub mod logger;
pub mod queue;
pub mod record;
pub mod signal;
pub mod stats;
pub mod transport;
