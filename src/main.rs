use clap::Parser;

use depthview::cli::{CliArgs, run};
use depthview::logger;

fn main() -> std::process::ExitCode {
    let args = CliArgs::parse();

    // Overwrites the previous session log.
    logger::init(if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    });

    run(args)
}
