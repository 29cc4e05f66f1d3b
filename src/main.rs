use clap::Parser;
use log::{error, info, warn};
use std::future;
use std::panic::{self, PanicHookInfo};
use tokio::signal::{self, unix::SignalKind};
use walnut_listener::RetryPolicy;
use walnut_listener::app::{Options, RunError, run_with_io};
use walnut_listener::scanner::RealScanner;
use walnut_listener::session::bluer::BluerTransport;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    // RUST_LOG takes precedence over the default level
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_secs()
        .target(env_logger::Target::Stderr)
        .init();
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {e}");
            future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal::unix::signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {e}");
                future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}

/// Open the Bluetooth transport and run until the scanner stops or a
/// shutdown signal arrives.
async fn run(options: Options) -> Result<(), RunError> {
    let transport = BluerTransport::new(RetryPolicy::default()).await?;

    info!(
        "Listening for Walnut devices, polling battery at most every {:?}",
        options.poll_interval
    );
    let mut stdout = std::io::stdout();
    run_with_io(options, &RealScanner, &transport, &mut stdout, shutdown_signal()).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd, Telegraf execd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_logging(options.verbose);

    match run(options).await {
        Ok(_) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            error!("{why}");
            std::process::exit(EXIT_ERROR);
        }
    }
}
