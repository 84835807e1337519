//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Lock-free metrics for the network core
//!
//! Every counter is kept locally for [`NetworkMetrics::snapshot`] and mirrored to the
//! `metrics` facade under the `mooring.` prefix for whatever recorder the embedding
//! process installs.

use metrics::{counter, gauge};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free network metrics
///
/// All metrics are stored as atomics and can be updated from any thread holding a
/// connection handle.
#[derive(Debug)]
pub struct NetworkMetrics {
    // Connection counts
    connections_accepted: AtomicU64,
    connections_opened: AtomicU64,
    connections_refused: AtomicU64,
    connections_released: AtomicU64,

    // Throughput
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    lines_delivered: AtomicU64,
    out_of_band_delivered: AtomicU64,
    output_lines_dropped: AtomicU64,

    // Errors
    io_failures: AtomicU64,
    handshake_failures: AtomicU64,

    // Event loop
    passes: AtomicU64,

    started_at: Instant,
}

impl Default for NetworkMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkMetrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self {
            connections_accepted: AtomicU64::new(0),
            connections_opened: AtomicU64::new(0),
            connections_refused: AtomicU64::new(0),
            connections_released: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            lines_delivered: AtomicU64::new(0),
            out_of_band_delivered: AtomicU64::new(0),
            output_lines_dropped: AtomicU64::new(0),
            io_failures: AtomicU64::new(0),
            handshake_failures: AtomicU64::new(0),
            passes: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    // Connection tracking

    /// Record an inbound connection handed to the application
    pub fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        counter!("mooring.connections.accepted").increment(1);
        gauge!("mooring.connections.active").increment(1.0);
    }

    /// Record an outbound connection
    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        counter!("mooring.connections.opened").increment(1);
        gauge!("mooring.connections.active").increment(1.0);
    }

    /// Record a connection accepted only to be refused
    pub fn connection_refused(&self) {
        self.connections_refused.fetch_add(1, Ordering::Relaxed);
        counter!("mooring.connections.refused").increment(1);
    }

    /// Record a connection record being torn down
    pub fn connection_released(&self, counted_active: bool) {
        self.connections_released.fetch_add(1, Ordering::Relaxed);
        counter!("mooring.connections.released").increment(1);
        if counted_active {
            gauge!("mooring.connections.active").decrement(1.0);
        }
    }

    /// Connections currently alive (accepted or opened, not yet released)
    pub fn active_connections(&self) -> u64 {
        let started = self.connections_accepted.load(Ordering::Relaxed)
            + self.connections_opened.load(Ordering::Relaxed)
            + self.connections_refused.load(Ordering::Relaxed);
        started.saturating_sub(self.connections_released.load(Ordering::Relaxed))
    }

    /// Number of connection records torn down so far
    pub fn connections_released(&self) -> u64 {
        self.connections_released.load(Ordering::Relaxed)
    }

    // Throughput tracking

    /// Record bytes read from peers
    pub fn bytes_read(&self, count: u64) {
        self.bytes_read.fetch_add(count, Ordering::Relaxed);
        counter!("mooring.bytes.read").increment(count);
    }

    /// Record bytes written to peers
    pub fn bytes_written(&self, count: u64) {
        self.bytes_written.fetch_add(count, Ordering::Relaxed);
        counter!("mooring.bytes.written").increment(count);
    }

    /// Record a delivery to the application
    pub fn delivered(&self, out_of_band: bool) {
        if out_of_band {
            self.out_of_band_delivered.fetch_add(1, Ordering::Relaxed);
            counter!("mooring.input.out_of_band").increment(1);
        } else {
            self.lines_delivered.fetch_add(1, Ordering::Relaxed);
            counter!("mooring.input.lines").increment(1);
        }
    }

    /// Record output lines lost to overflow
    pub fn output_dropped(&self, lines: u64) {
        self.output_lines_dropped.fetch_add(lines, Ordering::Relaxed);
        counter!("mooring.output.dropped").increment(lines);
    }

    // Error tracking

    /// Record a fatal read or write
    pub fn io_failure(&self) {
        self.io_failures.fetch_add(1, Ordering::Relaxed);
        counter!("mooring.errors.io").increment(1);
    }

    /// Record a failed TLS handshake
    pub fn handshake_failure(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
        counter!("mooring.errors.handshake").increment(1);
    }

    /// Record one event loop pass
    pub fn pass(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        counter!("mooring.passes").increment(1);
    }

    // Snapshot

    /// Get a point-in-time view of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_refused: self.connections_refused.load(Ordering::Relaxed),
            connections_released: self.connections_released.load(Ordering::Relaxed),
            active_connections: self.active_connections(),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            lines_delivered: self.lines_delivered.load(Ordering::Relaxed),
            out_of_band_delivered: self.out_of_band_delivered.load(Ordering::Relaxed),
            output_lines_dropped: self.output_lines_dropped.load(Ordering::Relaxed),
            io_failures: self.io_failures.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
            passes: self.passes.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

/// A snapshot of network metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Inbound connections handed to the application
    pub connections_accepted: u64,
    /// Outbound connections opened
    pub connections_opened: u64,
    /// Connections accepted only to be refused
    pub connections_refused: u64,
    /// Connection records torn down
    pub connections_released: u64,
    /// Connection records alive
    pub active_connections: u64,
    /// Bytes read from peers
    pub bytes_read: u64,
    /// Bytes written to peers
    pub bytes_written: u64,
    /// Lines delivered to the application
    pub lines_delivered: u64,
    /// Out-of-band messages delivered to the application
    pub out_of_band_delivered: u64,
    /// Output lines lost to overflow
    pub output_lines_dropped: u64,
    /// Fatal reads and writes
    pub io_failures: u64,
    /// Failed TLS handshakes
    pub handshake_failures: u64,
    /// Event loop passes
    pub passes: u64,
    /// Time since the network was created
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Calculate bytes per second (written)
    pub fn bytes_written_per_sec(&self) -> f64 {
        if self.uptime.is_zero() {
            return 0.0;
        }
        self.bytes_written as f64 / self.uptime.as_secs_f64()
    }

    /// Calculate bytes per second (read)
    pub fn bytes_read_per_sec(&self) -> f64 {
        if self.uptime.is_zero() {
            return 0.0;
        }
        self.bytes_read as f64 / self.uptime.as_secs_f64()
    }

    /// Calculate total error count
    pub fn total_errors(&self) -> u64 {
        self.io_failures + self.handshake_failures
    }
}
