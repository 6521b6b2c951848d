//! Per-worker counters, batched flush, and the three stats emission formats (spec §4.6, §6).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::classifier::{RejectReason, SignatureTag};

/// Stack-resident per-iteration accumulator. Flushed into a worker's [`Statistics`] block with
/// plain `+=` writes every K iterations (spec §4.4 step 6); never touched by any other thread.
#[derive(Debug, Clone, Copy)]
pub struct StatsBatch {
    pub received: u64,
    pub reflected: u64,
    pub dropped: u64,
    pub bytes_received: u64,
    pub bytes_reflected: u64,
    pub sig_probeot: u64,
    pub sig_dataot: u64,
    pub sig_latency: u64,
    pub sig_unknown: u64,
    pub err_mac: u64,
    pub err_etype: u64,
    pub err_proto: u64,
    pub err_sig: u64,
    pub err_short: u64,
    pub err_tx: u64,
    pub err_nomem: u64,
    pub latency_count: u64,
    pub latency_min_ns: u64,
    pub latency_max_ns: u64,
    pub latency_sum_ns: u64,
    /// Iterations where `recv` returned nothing. Accounted per spec §7 ("quiet, not logged") but
    /// not part of the stable JSON/CSV key set, so it lives outside `StatsSnapshot`.
    pub poll_timeouts: u64,
}

impl Default for StatsBatch {
    fn default() -> Self {
        StatsBatch {
            received: 0,
            reflected: 0,
            dropped: 0,
            bytes_received: 0,
            bytes_reflected: 0,
            sig_probeot: 0,
            sig_dataot: 0,
            sig_latency: 0,
            sig_unknown: 0,
            err_mac: 0,
            err_etype: 0,
            err_proto: 0,
            err_sig: 0,
            err_short: 0,
            err_tx: 0,
            err_nomem: 0,
            latency_count: 0,
            latency_min_ns: u64::MAX,
            latency_max_ns: 0,
            latency_sum_ns: 0,
            poll_timeouts: 0,
        }
    }
}

impl StatsBatch {
    pub fn record_reject(&mut self, reason: RejectReason, len: usize) {
        self.received += 1;
        self.bytes_received += len as u64;
        self.dropped += 1;
        match reason {
            RejectReason::TooShort => self.err_short += 1,
            RejectReason::BadMac => self.err_mac += 1,
            RejectReason::BadEtherType => self.err_etype += 1,
            RejectReason::BadProtocol => self.err_proto += 1,
            RejectReason::BadSignature => self.err_sig += 1,
        }
    }

    pub fn record_accept(&mut self, tag: SignatureTag, len: usize) {
        self.received += 1;
        self.bytes_received += len as u64;
        match tag {
            SignatureTag::ProbeOt => self.sig_probeot += 1,
            SignatureTag::DataOt => self.sig_dataot += 1,
            SignatureTag::Latency => self.sig_latency += 1,
            SignatureTag::Rfc2544 | SignatureTag::Y1564 => self.sig_unknown += 1,
        }
    }

    pub fn record_sent(&mut self, count: u64, bytes: u64) {
        self.reflected += count;
        self.bytes_reflected += bytes;
    }

    pub fn record_tx_failed(&mut self, count: u64) {
        self.err_tx += count;
    }

    pub fn record_no_memory(&mut self) {
        self.err_nomem += 1;
    }

    pub fn record_poll_timeout(&mut self) {
        self.poll_timeouts += 1;
    }

    pub fn record_latency(&mut self, ns: u64) {
        self.latency_count += 1;
        self.latency_sum_ns += ns;
        self.latency_min_ns = self.latency_min_ns.min(ns);
        self.latency_max_ns = self.latency_max_ns.max(ns);
    }

    /// Flush into the shared block with plain, non-atomic-RMW adds, then reset to zero.
    pub fn flush_into(&mut self, shared: &Statistics) {
        shared.add(self);
        *self = StatsBatch::default();
    }
}

/// A worker's published counters. Written only by the owning worker (via [`StatsBatch::flush_into`]);
/// read by the Controller during aggregation without synchronization beyond `Relaxed` loads — counts
/// may be momentarily stale but never regress, matching the single-writer/best-effort-reader contract.
#[derive(Debug, Default)]
pub struct Statistics {
    received: AtomicU64,
    reflected: AtomicU64,
    dropped: AtomicU64,
    bytes_received: AtomicU64,
    bytes_reflected: AtomicU64,
    sig_probeot: AtomicU64,
    sig_dataot: AtomicU64,
    sig_latency: AtomicU64,
    sig_unknown: AtomicU64,
    err_mac: AtomicU64,
    err_etype: AtomicU64,
    err_proto: AtomicU64,
    err_sig: AtomicU64,
    err_short: AtomicU64,
    err_tx: AtomicU64,
    err_nomem: AtomicU64,
    latency_count: AtomicU64,
    latency_min_ns: AtomicU64,
    latency_max_ns: AtomicU64,
    latency_sum_ns: AtomicU64,
    poll_timeouts: AtomicU64,
}

impl Statistics {
    pub fn new() -> Self {
        let stats = Statistics::default();
        stats.latency_min_ns.store(u64::MAX, Ordering::Relaxed);
        stats
    }

    fn add(&self, batch: &StatsBatch) {
        self.received.fetch_add(batch.received, Ordering::Relaxed);
        self.reflected.fetch_add(batch.reflected, Ordering::Relaxed);
        self.dropped.fetch_add(batch.dropped, Ordering::Relaxed);
        self.bytes_received.fetch_add(batch.bytes_received, Ordering::Relaxed);
        self.bytes_reflected.fetch_add(batch.bytes_reflected, Ordering::Relaxed);
        self.sig_probeot.fetch_add(batch.sig_probeot, Ordering::Relaxed);
        self.sig_dataot.fetch_add(batch.sig_dataot, Ordering::Relaxed);
        self.sig_latency.fetch_add(batch.sig_latency, Ordering::Relaxed);
        self.sig_unknown.fetch_add(batch.sig_unknown, Ordering::Relaxed);
        self.err_mac.fetch_add(batch.err_mac, Ordering::Relaxed);
        self.err_etype.fetch_add(batch.err_etype, Ordering::Relaxed);
        self.err_proto.fetch_add(batch.err_proto, Ordering::Relaxed);
        self.err_sig.fetch_add(batch.err_sig, Ordering::Relaxed);
        self.err_short.fetch_add(batch.err_short, Ordering::Relaxed);
        self.err_tx.fetch_add(batch.err_tx, Ordering::Relaxed);
        self.err_nomem.fetch_add(batch.err_nomem, Ordering::Relaxed);
        if batch.latency_count > 0 {
            self.latency_count.fetch_add(batch.latency_count, Ordering::Relaxed);
            self.latency_sum_ns.fetch_add(batch.latency_sum_ns, Ordering::Relaxed);
            self.latency_min_ns.fetch_min(batch.latency_min_ns, Ordering::Relaxed);
            self.latency_max_ns.fetch_max(batch.latency_max_ns, Ordering::Relaxed);
        }
        self.poll_timeouts.fetch_add(batch.poll_timeouts, Ordering::Relaxed);
    }

    /// Iterations across the run where `recv` returned nothing. Diagnostic only; not part of the
    /// stable JSON/CSV key set.
    pub fn poll_timeouts(&self) -> u64 {
        self.poll_timeouts.load(Ordering::Relaxed)
    }

    /// Best-effort snapshot: every field is an independent `Relaxed` load, so the values may not
    /// correspond to the exact same instant, but none of them can ever decrease between reads.
    pub fn snapshot(&self) -> StatsSnapshot {
        let latency_min_ns = self.latency_min_ns.load(Ordering::Relaxed);
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            reflected: self.reflected.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_reflected: self.bytes_reflected.load(Ordering::Relaxed),
            sig_probeot: self.sig_probeot.load(Ordering::Relaxed),
            sig_dataot: self.sig_dataot.load(Ordering::Relaxed),
            sig_latency: self.sig_latency.load(Ordering::Relaxed),
            sig_unknown: self.sig_unknown.load(Ordering::Relaxed),
            err_mac: self.err_mac.load(Ordering::Relaxed),
            err_etype: self.err_etype.load(Ordering::Relaxed),
            err_proto: self.err_proto.load(Ordering::Relaxed),
            err_sig: self.err_sig.load(Ordering::Relaxed),
            err_short: self.err_short.load(Ordering::Relaxed),
            err_tx: self.err_tx.load(Ordering::Relaxed),
            err_nomem: self.err_nomem.load(Ordering::Relaxed),
            latency_count: self.latency_count.load(Ordering::Relaxed),
            latency_min_ns: if latency_min_ns == u64::MAX { 0 } else { latency_min_ns },
            latency_max_ns: self.latency_max_ns.load(Ordering::Relaxed),
            latency_sum_ns: self.latency_sum_ns.load(Ordering::Relaxed),
        }
    }
}

/// A plain-data sum of one or more [`Statistics`] blocks, ready for rate computation and emission.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatsSnapshot {
    pub received: u64,
    pub reflected: u64,
    pub dropped: u64,
    pub bytes_received: u64,
    pub bytes_reflected: u64,
    pub sig_probeot: u64,
    pub sig_dataot: u64,
    pub sig_latency: u64,
    pub sig_unknown: u64,
    pub err_mac: u64,
    pub err_etype: u64,
    pub err_proto: u64,
    pub err_sig: u64,
    pub err_short: u64,
    pub err_tx: u64,
    pub err_nomem: u64,
    pub latency_count: u64,
    pub latency_min_ns: u64,
    pub latency_max_ns: u64,
    pub latency_sum_ns: u64,
}

impl StatsSnapshot {
    pub fn merge(mut self, other: &StatsSnapshot) -> Self {
        self.received += other.received;
        self.reflected += other.reflected;
        self.dropped += other.dropped;
        self.bytes_received += other.bytes_received;
        self.bytes_reflected += other.bytes_reflected;
        self.sig_probeot += other.sig_probeot;
        self.sig_dataot += other.sig_dataot;
        self.sig_latency += other.sig_latency;
        self.sig_unknown += other.sig_unknown;
        self.err_mac += other.err_mac;
        self.err_etype += other.err_etype;
        self.err_proto += other.err_proto;
        self.err_sig += other.err_sig;
        self.err_short += other.err_short;
        self.err_tx += other.err_tx;
        self.err_nomem += other.err_nomem;
        self.latency_count += other.latency_count;
        self.latency_min_ns = if self.latency_count == 0 {
            other.latency_min_ns
        } else {
            self.latency_min_ns.min(other.latency_min_ns)
        };
        self.latency_max_ns = self.latency_max_ns.max(other.latency_max_ns);
        self.latency_sum_ns += other.latency_sum_ns;
        self
    }

    fn latency_avg_ns(&self) -> u64 {
        if self.latency_count == 0 {
            0
        } else {
            self.latency_sum_ns / self.latency_count
        }
    }

    /// Packets/bytes per second since the cumulative start of the run, zero if `elapsed` is zero.
    pub fn performance(&self, elapsed: Duration) -> Performance {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return Performance { pps: 0.0, mbps: 0.0 };
        }
        Performance {
            pps: self.received as f64 / secs,
            mbps: (self.bytes_received as f64 * 8.0) / secs / 1_000_000.0,
        }
    }

    pub fn to_json(&self, elapsed: Duration) -> StatsJson {
        let perf = self.performance(elapsed);
        let avg_ns = self.latency_avg_ns();
        StatsJson {
            packets: Packets {
                received: self.received,
                reflected: self.reflected,
                dropped: self.dropped,
            },
            bytes: Bytes {
                received: self.bytes_received,
                reflected: self.bytes_reflected,
            },
            signatures: Signatures {
                probeot: self.sig_probeot,
                dataot: self.sig_dataot,
                latency: self.sig_latency,
                unknown: self.sig_unknown,
            },
            errors: Errors {
                invalid_mac: self.err_mac,
                invalid_ethertype: self.err_etype,
                invalid_protocol: self.err_proto,
                invalid_signature: self.err_sig,
                too_short: self.err_short,
                tx_failed: self.err_tx,
                no_memory: self.err_nomem,
            },
            latency: Latency {
                count: self.latency_count,
                min_ns: self.latency_min_ns,
                max_ns: self.latency_max_ns,
                avg_ns,
                min_us: self.latency_min_ns / 1000,
                max_us: self.latency_max_ns / 1000,
                avg_us: avg_ns / 1000,
            },
            performance: perf,
        }
    }

    pub fn to_csv_row(&self, elapsed: Duration) -> String {
        let perf = self.performance(elapsed);
        let avg_us = self.latency_avg_ns() / 1000;
        format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{:.2},{:.2}",
            self.received,
            self.reflected,
            self.dropped,
            self.bytes_received,
            self.bytes_reflected,
            self.sig_probeot,
            self.sig_dataot,
            self.sig_latency,
            self.sig_unknown,
            self.err_mac,
            self.err_etype,
            self.err_proto,
            self.err_sig,
            self.err_short,
            self.err_tx,
            self.err_nomem,
            self.latency_count,
            self.latency_min_ns / 1000,
            self.latency_max_ns / 1000,
            avg_us,
            perf.pps,
            perf.mbps,
        )
    }

    /// The fixed column header matching [`Self::to_csv_row`]'s order.
    pub const CSV_HEADER: &'static str = "pkts_rx,pkts_tx,pkts_drop,bytes_rx,bytes_tx,sig_probeot,sig_dataot,sig_latency,sig_unknown,err_mac,err_etype,err_proto,err_sig,err_short,err_tx,err_nomem,lat_count,lat_min_us,lat_max_us,lat_avg_us,pps,mbps";

    pub fn to_text_line(&self, elapsed: Duration) -> String {
        let perf = self.performance(elapsed);
        format!(
            "rx={} tx={} drop={} bytes_rx={} pps={:.0} mbps={:.2} lat_avg_us={:.1}",
            self.received,
            self.reflected,
            self.dropped,
            self.bytes_received,
            perf.pps,
            perf.mbps,
            self.latency_avg_ns() as f64 / 1000.0,
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Performance {
    pub pps: f64,
    pub mbps: f64,
}

#[derive(Debug, Serialize)]
pub struct StatsJson {
    pub packets: Packets,
    pub bytes: Bytes,
    pub signatures: Signatures,
    pub errors: Errors,
    pub latency: Latency,
    pub performance: Performance,
}

#[derive(Debug, Serialize)]
pub struct Packets {
    pub received: u64,
    pub reflected: u64,
    pub dropped: u64,
}

#[derive(Debug, Serialize)]
pub struct Bytes {
    pub received: u64,
    pub reflected: u64,
}

#[derive(Debug, Serialize)]
pub struct Signatures {
    pub probeot: u64,
    pub dataot: u64,
    pub latency: u64,
    pub unknown: u64,
}

#[derive(Debug, Serialize)]
pub struct Errors {
    pub invalid_mac: u64,
    pub invalid_ethertype: u64,
    pub invalid_protocol: u64,
    pub invalid_signature: u64,
    pub too_short: u64,
    pub tx_failed: u64,
    pub no_memory: u64,
}

#[derive(Debug, Serialize)]
pub struct Latency {
    pub count: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub avg_ns: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub avg_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_is_monotonic_and_resets_the_batch() {
        let stats = Statistics::new();
        let mut batch = StatsBatch::default();
        batch.record_accept(SignatureTag::Latency, 70);
        batch.record_sent(1, 70);
        batch.flush_into(&stats);

        assert_eq!(batch.received, 0);

        let before = stats.snapshot();
        let mut batch = StatsBatch::default();
        batch.record_reject(RejectReason::BadMac, 40);
        batch.flush_into(&stats);
        let after = stats.snapshot();

        assert!(after.received >= before.received);
        assert!(after.dropped > before.dropped);
    }

    #[test]
    fn zero_elapsed_yields_zero_rates() {
        let snapshot = StatsSnapshot {
            received: 1000,
            bytes_received: 64000,
            ..StatsSnapshot::default()
        };
        let perf = snapshot.performance(Duration::ZERO);
        assert_eq!(perf.pps, 0.0);
        assert_eq!(perf.mbps, 0.0);
    }

    #[test]
    fn latency_merge_tracks_min_max_across_workers() {
        let mut a = StatsSnapshot::default();
        a.latency_count = 1;
        a.latency_min_ns = 100;
        a.latency_max_ns = 100;
        a.latency_sum_ns = 100;

        let mut b = StatsSnapshot::default();
        b.latency_count = 1;
        b.latency_min_ns = 50;
        b.latency_max_ns = 500;
        b.latency_sum_ns = 500;

        let merged = a.merge(&b);
        assert_eq!(merged.latency_min_ns, 50);
        assert_eq!(merged.latency_max_ns, 500);
        assert_eq!(merged.latency_count, 2);
    }

    #[test]
    fn csv_row_matches_header_column_count() {
        let snapshot = StatsSnapshot::default();
        let header_cols = StatsSnapshot::CSV_HEADER.split(',').count();
        let row_cols = snapshot.to_csv_row(Duration::from_secs(1)).split(',').count();
        assert_eq!(header_cols, row_cols);
    }
}
