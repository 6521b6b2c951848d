//! The per-queue worker loop (spec §4.4).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::classifier::{Classifier, Decision, Policy};
use crate::config::ReflectorConfig;
use crate::driver::{Driver, FrameDescriptor};
use crate::rewriter::Rewriter;
use crate::stats::{Statistics, StatsBatch};

/// How many descriptors a single `recv`/`send` round trip may carry.
pub const BATCH_SIZE: u32 = 64;

/// Local stat batches are flushed into the shared [`Statistics`] block every this-many iterations.
pub const FLUSH_INTERVAL: u32 = 8;

/// Per-worker identity and the handles it needs to run independently of the Controller.
pub struct WorkerContext {
    pub worker_id: usize,
    pub queue_id: u32,
    pub cpu_id: i32,
    pub stats: Arc<Statistics>,
    pub running: Arc<AtomicBool>,
}

/// Runs the receive/classify/rewrite/transmit loop until `ctx.running` is cleared.
///
/// Driven entirely through the [`Driver`] trait: the same loop runs over the zero-copy and
/// copying transports.
pub fn run(ctx: &WorkerContext, config: &ReflectorConfig, mut driver: Box<dyn Driver>) {
    let policy = Policy::from(config);
    let mut batch = StatsBatch::default();
    let mut iteration: u32 = 0;

    loop {
        let rx = driver.recv(BATCH_SIZE.min(config.batch_size));

        if rx.is_empty() {
            // Rx poll timeout: quiet and accounted, never logged (spec §7).
            batch.record_poll_timeout();
        }

        let mut tx: Vec<FrameDescriptor> = Vec::with_capacity(rx.len());
        let mut release: Vec<FrameDescriptor> = Vec::with_capacity(rx.len());

        for desc in rx {
            let frame = driver.frame_mut(&desc);
            let len = frame.len();
            let decision = Classifier::classify(frame, &policy);

            match decision {
                Decision::Accept(tag) => {
                    Rewriter::rewrite(frame, config.reflect_mode, config.software_checksum);
                    batch.record_accept(tag, len);
                    if config.latency {
                        if let Some(rx_ts) = desc.rx_timestamp_ns {
                            if let Some(now) = wall_clock_ns() {
                                batch.record_latency(now.saturating_sub(rx_ts));
                            }
                        }
                    }
                    tx.push(desc);
                }
                Decision::Reject(reason) => {
                    batch.record_reject(reason, len);
                    release.push(desc);
                }
            }
        }

        let requested = tx.len();
        let sent_bytes: u64 = tx.iter().map(|d| u64::from(d.length)).sum();
        let sent = driver.send(&tx) as usize;
        batch.record_sent(sent as u64, sent_bytes);

        if sent < requested {
            let unsent = &tx[sent..];
            batch.record_tx_failed(unsent.len() as u64);
            release.extend_from_slice(unsent);
        }

        driver.release(&release);

        iteration += 1;
        if iteration >= FLUSH_INTERVAL {
            debug!(worker = ctx.worker_id, "flushing stats batch");
            batch.flush_into(&ctx.stats);
            iteration = 0;
        }

        if !ctx.running.load(Ordering::Acquire) {
            batch.flush_into(&ctx.stats);
            break;
        }
    }
}

/// Current `CLOCK_REALTIME` reading, in nanoseconds since the epoch, for latency accounting.
///
/// Must share a clock domain with the Rx timestamp a driver attaches to a descriptor (the
/// copying driver's is read via `SO_TIMESTAMPNS`, itself `CLOCK_REALTIME`-based), or the
/// subtraction in the caller is meaningless.
fn wall_clock_ns() -> Option<u64> {
    let mut ts = std::mem::MaybeUninit::<libc::timespec>::uninit();
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, ts.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    let ts = unsafe { ts.assume_init() };
    Some(ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeDriver {
        queued: Vec<(FrameDescriptor, Vec<u8>)>,
        sent: Vec<FrameDescriptor>,
        released: Vec<FrameDescriptor>,
    }

    impl Driver for FakeDriver {
        fn recv(&mut self, max: u32) -> Vec<FrameDescriptor> {
            let n = (max as usize).min(self.queued.len());
            self.queued.drain(..n).map(|(d, _)| d).collect()
        }

        fn frame_mut(&mut self, desc: &FrameDescriptor) -> &mut [u8] {
            // Test double: not exercised by the loop-shape tests below.
            let _ = desc;
            unimplemented!()
        }

        fn send(&mut self, descs: &[FrameDescriptor]) -> u32 {
            self.sent.extend_from_slice(descs);
            descs.len() as u32
        }

        fn release(&mut self, descs: &[FrameDescriptor]) {
            self.released.extend_from_slice(descs);
        }

        fn poll_completions(&mut self) {}
    }

    #[test]
    fn flush_interval_matches_spec_default() {
        assert_eq!(FLUSH_INTERVAL, 8);
        assert_eq!(BATCH_SIZE, 64);
    }

    #[test]
    fn empty_driver_recv_never_panics_the_loop_body() {
        let mut driver = FakeDriver {
            queued: Vec::new(),
            sent: Vec::new(),
            released: Vec::new(),
        };
        let rx = driver.recv(BATCH_SIZE);
        assert!(rx.is_empty());
    }
}
