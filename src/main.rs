use std::path::PathBuf;

use clap::Parser;
use tokio::sync::watch;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use wasmhash_harness::config::{Algorithm, Engine, HarnessConfig};
use wasmhash_harness::controller::HarnessController;
use wasmhash_harness::manifest::Manifest;
use wasmhash_harness::session::Session;

#[derive(Parser)]
#[command(
    name = "wasmhash",
    about = "Browser-driven verification harness for WASM media-hashing engines",
    version
)]
struct Args {
    /// Browser engine to drive
    #[arg(value_enum, ignore_case = true)]
    engine: Engine,

    /// Hashing algorithm family to verify
    #[arg(value_enum, ignore_case = true)]
    algorithm: Algorithm,

    /// Path to the CSV manifest (id,path,expected[,max_distance])
    manifest: PathBuf,

    /// Browser download directory. Required for tmk (the hash artifact
    /// arrives as a browser download); ignored for pdqmd5.
    download_dir: Option<PathBuf>,

    /// URL of the page hosting the WASM hashing module
    site_url: Option<String>,

    /// Run with a visible browser window instead of headless
    #[arg(long)]
    headed: bool,

    /// Floor on the per-case compute wait, in seconds
    #[arg(long, env = "WASMHASH_COMPUTE_TIMEOUT_SECS")]
    compute_timeout_secs: Option<u64>,

    /// Bound on waiting for the downloaded artifact, in seconds
    #[arg(long, env = "WASMHASH_DOWNLOAD_TIMEOUT_SECS")]
    download_timeout_secs: Option<u64>,

    /// Interval between completion re-checks, in milliseconds
    #[arg(long, env = "WASMHASH_POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    /// Emit the report as JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Suppress progress and informational output.
    ///
    /// Errors are still printed to stderr; the report itself is
    /// unaffected. Use this flag when piping output to other tools.
    #[arg(long, short = 'q')]
    quiet: bool,

    /// Log filter (trace, debug, info, warn, error)
    #[arg(long, env = "WASMHASH_LOG")]
    log: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Init once — must happen before any tracing calls.
    let default_level = if args.quiet { "warn" } else { "info" };
    let filter = args.log.clone().unwrap_or_else(|| default_level.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .compact()
        .init();

    std::process::exit(run(args).await);
}

/// Exit codes: 0 all cases passed, 1 at least one failed, 2 fatal
/// configuration / manifest / session error before or instead of a
/// report.
async fn run(args: Args) -> i32 {
    let mut config = HarnessConfig::new(args.engine, args.algorithm, args.manifest);
    config.download_dir = args.download_dir;
    config.headless = !args.headed;
    if let Some(url) = args.site_url {
        config.site_url = url;
    }
    if let Some(secs) = args.compute_timeout_secs {
        config.compute_timeout_secs = secs;
    }
    if let Some(secs) = args.download_timeout_secs {
        config.download_timeout_secs = secs;
    }
    if let Some(ms) = args.poll_interval_ms {
        config.poll_interval_ms = ms;
    }

    if let Err(e) = config.validate() {
        eprintln!("configuration error: {e}");
        return 2;
    }

    let manifest = match Manifest::load(&config.manifest_path, config.algorithm) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("manifest error: {e}");
            return 2;
        }
    };
    if manifest.is_empty() {
        warn!(
            skipped = manifest.skipped_rows(),
            "manifest contains no usable cases"
        );
    }

    // Ctrl-c flips the cancellation flag; the controller aborts the
    // in-flight case and still emits the partial report.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received — aborting after the current case is recorded");
            let _ = cancel_tx.send(true);
        }
    });

    let session = match Session::open(&config).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("session error: {e}");
            return 2;
        }
    };

    // The session must come down on every path out of the run.
    let controller = HarnessController::new(&session, &config, cancel_rx);
    let result = controller.run(&manifest).await;
    session.close().await;

    match result {
        Ok(report) => {
            if args.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(text) => println!("{text}"),
                    Err(e) => {
                        eprintln!("could not serialize report: {e}");
                        return 1;
                    }
                }
            } else {
                print!("{}", report.render_table());
            }
            report.exit_code()
        }
        Err(e) => {
            eprintln!("run aborted: {e}");
            2
        }
    }
}
