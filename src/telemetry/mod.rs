// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tracing and metrics infrastructure.
//!
//! - **Tracing**: structured logging through `tracing`; the binary installs
//!   the subscriber with [`init_telemetry`], the library only emits events.
//! - **Metrics**: counters and latency histograms for session lifecycle and
//!   tool calls, collected into an explicitly shared [`Metrics`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use toolbridge::telemetry::{init_telemetry, Metrics, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::default())?;
//! let metrics = Arc::new(Metrics::new());
//! ```
//!
//! Lifecycle operations are recorded as `session.connect`,
//! `session.initialize` and `session.disconnect`; tool calls as
//! `provider.tool`.

mod init;
pub mod metrics;

pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{Histogram, Metrics, MetricsSnapshot, OperationMetrics, ToolMetrics};
