mod args;
mod pipeline;

use clap::Parser;
use log::{info, warn, LevelFilter};
use snafu::ErrorCompat;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = args::Args::parse();
    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if args.verbose {
        logger.filter_level(LevelFilter::Debug);
    }
    logger.init();

    match pipeline::run(&args) {
        Ok(report) if report.is_success() => {
            info!("Finished: {}", report);
            ExitCode::SUCCESS
        }
        Ok(report) => {
            warn!("Finished with failures: {}", report);
            for failure in report.failures.iter() {
                eprintln!("failed: {}", failure);
            }
            ExitCode::from(1)
        }
        Err(e) => {
            warn!("Error occured {:?}", e);
            eprintln!("An error occured {}", e);
            if let Some(bt) = ErrorCompat::backtrace(&e) {
                eprintln!("trace: {}", bt);
            } else {
                eprintln!("No trace found");
            }
            ExitCode::from(2)
        }
    }
}
