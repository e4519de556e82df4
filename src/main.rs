mod cli;

use crate::cli::{run_cli, Cli};
use chrono::Utc;
use clap::Parser;
use color_eyre::Result;
use dotenvy::dotenv;
use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

fn main() -> Result<()> {
    color_eyre::install()?;
    // load environment variables from .env file, if present
    dotenv().ok();

    let cli = Cli::parse();
    setup_cli_logging(cli.verbose);

    if let Err(e) = run_cli(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn setup_cli_logging(verbose: bool) {
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };

    // Logs go to stderr so command output on stdout stays clean
    Builder::from_default_env()
        .format(|buf, record| {
            let ts = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(buf, "[{}] {} [{}] {}", ts, record.level(), record.target(), record.args())
        })
        .filter(None, level)
        .parse_default_env()
        .init();
}
