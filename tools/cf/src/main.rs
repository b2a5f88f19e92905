//! `cf`: CellFlow 命令行前端.

use clap::Parser;
use std::process::ExitCode;

mod cli;
mod prompt;
mod report;
mod runner;

fn main() -> ExitCode {
    let args = cli::Cli::parse();
    utils::init_logger(args.verbose);

    let jobs = args.jobs.unwrap_or_else(utils::cpus);
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build_global()
    {
        log::warn!("cannot configure {jobs} worker threads: {e}");
    }

    match runner::run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
