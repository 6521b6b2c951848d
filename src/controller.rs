//! The Reflector Controller (spec §4.5): process lifecycle, worker supervision, stats aggregation.

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::ReflectorConfig;
use crate::driver::{CopyingDriver, Driver, ZeroCopyDriver};
use crate::error::ReflectorError;
use crate::platform;
use crate::privilege;
use crate::stats::{StatsSnapshot, Statistics};
use crate::worker::{self, WorkerContext};

/// Lifecycle stage, advanced one-way: `Uninit -> Initialized -> Running -> Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Uninit,
    Initialized,
    Running,
    Stopping,
    Stopped,
}

struct WorkerHandle {
    running: Arc<AtomicBool>,
    stats: Arc<Statistics>,
    thread: JoinHandle<()>,
}

/// Owns the worker threads and their shared statistics blocks for one run of the reflector.
///
/// A single controller instance is used once: `init`, `start`, `stop` each move the state machine
/// forward and panic if called out of order, matching spec.md's "re-use requires a fresh context".
pub struct ReflectorController {
    config: ReflectorConfig,
    state: State,
    workers: Vec<WorkerHandle>,
    started_at: Option<Instant>,
}

impl ReflectorController {
    /// Build a controller from CLI-assembled configuration. Touches nothing yet.
    pub fn new(config: ReflectorConfig) -> Self {
        ReflectorController {
            config,
            state: State::Uninit,
            workers: Vec::new(),
            started_at: None,
        }
    }

    /// Resolve the interface, its local MAC, and probe NIC capability.
    pub fn init(&mut self) -> Result<(), ReflectorError> {
        assert_eq!(self.state, State::Uninit, "init() called more than once");

        let name = CString::new(self.config.interface.as_str())
            .map_err(|_| ReflectorError::InterfaceNotFound(self.config.interface.clone()))?;
        if unsafe { libc::if_nametoindex(name.as_ptr()) } == 0 {
            return Err(ReflectorError::InterfaceNotFound(self.config.interface.clone()));
        }

        self.config.local_mac = platform::local_mac(&self.config.interface)
            .map_err(|errno| ReflectorError::MacResolutionFailed(self.config.interface.clone(), errno))?;

        let capability = platform::probe(&self.config.interface);
        if !capability.zero_copy_capable {
            warn!(
                interface = %self.config.interface,
                reason = %capability.advisory(),
                "zero-copy driver unavailable for this interface"
            );
        }
        info!(
            interface = %self.config.interface,
            queues = capability.rx_queues,
            driver = %capability.driver_name,
            "reflector initialized"
        );

        self.state = State::Initialized;
        Ok(())
    }

    /// Bind one driver per NIC receive queue (falling back to a single copying driver for every
    /// worker on first-worker failure), spawn a pinned thread per worker, then drop privileges.
    pub fn start(&mut self) -> Result<(), ReflectorError> {
        assert_eq!(self.state, State::Initialized, "start() requires a successful init()");

        let capability = platform::probe(&self.config.interface);
        let queue_count = if capability.zero_copy_capable {
            capability.rx_queues.max(1)
        } else {
            1
        };

        let mut drivers: Vec<Box<dyn Driver>> = Vec::with_capacity(queue_count as usize);
        let mut use_copying = !capability.zero_copy_capable;

        if !use_copying {
            for queue_id in 0..queue_count {
                match ZeroCopyDriver::open(&self.config, queue_id) {
                    Ok(driver) => drivers.push(Box::new(driver)),
                    Err(err) => {
                        warn!(
                            queue_id,
                            error = %err,
                            "zero-copy driver init failed, retrying every worker on the copying driver"
                        );
                        use_copying = true;
                        drivers.clear();
                        break;
                    }
                }
            }
        }

        if use_copying {
            drivers.push(Box::new(CopyingDriver::open(&self.config)?));
        }

        let mut workers = Vec::with_capacity(drivers.len());
        for (worker_id, driver) in drivers.into_iter().enumerate() {
            let running = Arc::new(AtomicBool::new(true));
            let stats = Arc::new(Statistics::new());
            let ctx = WorkerContext {
                worker_id,
                queue_id: worker_id as u32,
                // 1-based: the round-robin policy must never emit the "leave scheduled freely"
                // sentinel (spec §4.4: zero or negative `cpu_id`) for a real worker.
                cpu_id: worker_id as i32 + 1,
                stats: Arc::clone(&stats),
                running: Arc::clone(&running),
            };
            let config = self.config.clone();

            let thread = std::thread::Builder::new()
                .name(format!("reflect-w{worker_id}"))
                .spawn(move || {
                    pin_to_cpu(ctx.cpu_id);
                    worker::run(&ctx, &config, driver);
                })
                .map_err(|err| ReflectorError::ThreadSpawnFailed(worker_id, err))?;

            workers.push(WorkerHandle { running, stats, thread });
        }

        // Every socket is bound by now; only the data-plane syscalls below this point need the
        // capability that justified running as root in the first place.
        privilege::drop_privileges();

        self.workers = workers;
        self.started_at = Some(Instant::now());
        self.state = State::Running;
        Ok(())
    }

    /// Clear every worker's running flag and join them (spec §4.5 `stop`). Bounded by each
    /// worker's own Rx poll timeout plus one loop iteration.
    pub fn stop(&mut self) {
        assert_eq!(self.state, State::Running, "stop() requires the controller to be Running");
        self.state = State::Stopping;

        for worker in &self.workers {
            worker.running.store(false, Ordering::Release);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.thread.join();
        }

        self.state = State::Stopped;
    }

    /// Sum every worker's published counters. Unsynchronized, best-effort reads; safe to call at
    /// any point after `start()`, including while workers are still running.
    pub fn aggregate_stats(&self) -> StatsSnapshot {
        self.workers
            .iter()
            .map(|worker| worker.stats.snapshot())
            .fold(StatsSnapshot::default(), |acc, snap| acc.merge(&snap))
    }

    /// Wall time since `start()`, or zero if not yet started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }
}

/// Pin the calling thread to `cpu_id`. A zero or negative `cpu_id` means "leave scheduled
/// freely" (spec §4.4) and is a no-op here.
fn pin_to_cpu(cpu_id: i32) {
    if cpu_id <= 0 {
        return;
    }

    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu_id as usize, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
    }
}
