//! Service Smoke CLI
//!
//! Launches a packaged service through a host executable and checks that it
//! starts and shuts down cleanly.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use service_smoke::{ProcessRunner, SmokeConfig, SmokeTest, Validate};

/// Command-line arguments for a smoke run.
#[derive(Parser, Debug)]
#[command(
    name = "service-smoke",
    about = "Verify a packaged service launches and shuts down cleanly"
)]
struct Args {
    /// Host executable that loads the service build.
    #[arg(long, env = "SERVICE_SMOKE_HOST")]
    host: PathBuf,

    /// Directory holding the provider fixtures; the build is looked up next to it.
    #[arg(long, default_value = ".")]
    test_root: PathBuf,

    /// TOML file with harness configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Build output subdirectory, relative to the test root's parent.
    /// Takes precedence over `BP_OUTPUT_DIR`.
    #[arg(long)]
    output_dir: Option<String>,

    /// Stdout line that marks the service as ready.
    #[arg(long, default_value = "ready")]
    ready_marker: String,

    /// Print the run report as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match SmokeConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Invalid configuration: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => SmokeConfig::default(),
    }
    .with_env_override()
    .with_output_dir_override(args.output_dir.clone());

    let runner = ProcessRunner::new(&args.host)
        .with_ready_marker(&args.ready_marker)
        .with_timeouts_from(&config);

    let mut validation = config.validate();
    validation.merge(runner.validate());

    match validation.into_result() {
        Ok(warnings) => {
            for warning in warnings {
                tracing::warn!(warning = %warning, "configuration warning");
            }
        }
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let mut test = match SmokeTest::configure(&args.test_root, &config) {
        Ok(test) => test,
        Err(e) => {
            eprintln!("Setup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = test.test_load_service(&runner).await;
    test.teardown();

    if args.json {
        if let Some(report) = test.report() {
            match serde_json::to_string_pretty(report) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("failed to serialize report: {}", e),
            }
        }
    }

    match outcome {
        Ok(report) => {
            if !args.json {
                println!("PASS {} ({:?})", report.service.display(), report.duration);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("FAIL: {}", e);
            ExitCode::FAILURE
        }
    }
}
