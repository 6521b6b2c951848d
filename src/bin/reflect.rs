//! `reflect`: CLI parsing -> Controller lifecycle -> stats dashboard -> signal-driven shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;

use reflector::cli::Cli;
use reflector::config::StatsFormat;
use reflector::stats::StatsSnapshot;
use reflector::ReflectorController;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_shutdown_signal(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Release);
}

fn main() {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    init_logging(verbose);

    let config = cli.into_config().unwrap_or_else(|err| {
        eprintln!("reflect: {err}");
        std::process::exit(err.exit_code());
    });

    let interval = config.stats.interval;
    let format = config.stats.format;

    let mut controller = ReflectorController::new(config);

    if let Err(err) = controller.init() {
        eprintln!("reflect: {err}");
        std::process::exit(err.exit_code());
    }
    if let Err(err) = controller.start() {
        eprintln!("reflect: {err}");
        std::process::exit(err.exit_code());
    }

    install_signal_handlers();

    while !SHUTDOWN.load(Ordering::Acquire) {
        sleep_responsive(interval);
        if SHUTDOWN.load(Ordering::Acquire) {
            break;
        }
        emit(&controller.aggregate_stats(), controller.elapsed(), format);
    }

    controller.stop();

    if format == StatsFormat::Text {
        println!();
    }
    emit(&controller.aggregate_stats(), controller.elapsed(), format);
}

/// Sleeps up to `total`, in short slices, so a pending shutdown is noticed well before the full
/// stats interval elapses.
fn sleep_responsive(total: Duration) {
    const STEP: Duration = Duration::from_millis(100);
    let mut remaining = total;
    while remaining > Duration::ZERO && !SHUTDOWN.load(Ordering::Acquire) {
        let slice = remaining.min(STEP);
        std::thread::sleep(slice);
        remaining -= slice;
    }
}

fn emit(snapshot: &StatsSnapshot, elapsed: Duration, format: StatsFormat) {
    use std::io::Write;

    match format {
        StatsFormat::Text => print!("\r{}", snapshot.to_text_line(elapsed)),
        StatsFormat::Json => match serde_json::to_string(&snapshot.to_json(elapsed)) {
            Ok(json) => println!("{json}"),
            Err(err) => eprintln!("reflect: failed to serialize stats: {err}"),
        },
        StatsFormat::Csv => {
            static HEADER_PRINTED: std::sync::Once = std::sync::Once::new();
            HEADER_PRINTED.call_once(|| println!("{}", StatsSnapshot::CSV_HEADER));
            println!("{}", snapshot.to_csv_row(elapsed));
        }
    }
    let _ = std::io::stdout().flush();
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

/// SIGINT/SIGTERM just flip a flag the main loop polls; nothing allocation-heavy or
/// non-async-signal-safe runs inside the handler itself.
fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, handle_shutdown_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_shutdown_signal as libc::sighandler_t);
    }
}
