//! Preemption demo driver
//!
//! Runs the controller against the built-in crossroads scenario and prints a
//! run summary.

use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use signal_preempt::simulation::scenario;
use signal_preempt::{PreemptionConfig, PreemptionRuntime};

/// Driver configuration
struct Args {
    /// JSON controller configuration
    config: Option<PathBuf>,
    /// Step limit overriding the configuration
    steps: Option<u64>,
    /// Log filter directive
    log_level: String,
    /// Restore overridden junctions when the run stops
    release_on_shutdown: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: None,
            steps: None,
            log_level: "info".to_string(),
            release_on_shutdown: false,
        }
    }
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    eprintln!("error: --config requires a value");
                    std::process::exit(1);
                }
            }
            "--steps" | "-s" => {
                if i + 1 < args.len() {
                    let steps: u64 = args[i + 1].parse().unwrap_or_else(|_| {
                        eprintln!("error: invalid step count: {}", args[i + 1]);
                        std::process::exit(1);
                    });
                    parsed.steps = Some(steps);
                    i += 2;
                } else {
                    eprintln!("error: --steps requires a value");
                    std::process::exit(1);
                }
            }
            "--log-level" | "-l" => {
                if i + 1 < args.len() {
                    parsed.log_level.clone_from(&args[i + 1]);
                    i += 2;
                } else {
                    eprintln!("error: --log-level requires a value");
                    std::process::exit(1);
                }
            }
            "--release-on-shutdown" => {
                parsed.release_on_shutdown = true;
                i += 1;
            }
            "--help" | "-h" => {
                println!("preempt-sim - emergency vehicle signal preemption demo");
                println!();
                println!("USAGE:");
                println!("    preempt-sim [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -c, --config <FILE>       JSON controller configuration");
                println!("    -s, --steps <N>           Stop after N simulation steps");
                println!("    -l, --log-level <LEVEL>   Log filter [default: info]");
                println!("        --release-on-shutdown Restore overridden junctions when the run stops");
                println!("    -h, --help                Print help information");
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
    }

    parsed
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    let args = parse_args();
    init_logging(&args.log_level);

    let mut config = match &args.config {
        Some(path) => match PreemptionConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!(path = %path.display(), error = %e, "cannot load configuration");
                return ExitCode::FAILURE;
            }
        },
        None => PreemptionConfig::default(),
    };
    if args.steps.is_some() {
        config.max_steps = args.steps;
    }
    if args.release_on_shutdown {
        config.release_on_shutdown = true;
    }
    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        return ExitCode::FAILURE;
    }

    info!(
        detection_radius = config.detection_radius,
        classes = config.classes.len(),
        release_on_shutdown = config.release_on_shutdown,
        "starting preemption run"
    );

    let mut sim = scenario::crossroads();
    let mut runtime = PreemptionRuntime::new(&config);
    match runtime.run(&mut sim) {
        Ok(summary) => {
            println!("{summary}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
