#[macro_use]
extern crate log;

use std::fs::OpenOptions;

use anyhow::Error;
use clap::Parser;
use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config as LogConfig, ConfigBuilder, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};

use crate::cli::Cli;
use crate::program::Program;

mod cli;
mod e6;
mod program;

/// Name of the log file written next to the binary.
const LOG_NAME: &str = "e6tools.log";

fn main() -> Result<(), Error> {
    initialize_logger();

    let cli = Cli::parse();
    let program = Program::new()?;
    program.run(cli.command)
}

/// Initializes terminal logging at Info plus a full-verbosity file log
/// filtered to this crate. Logging never blocks startup: if the file cannot
/// be opened, the terminal logger runs alone.
fn initialize_logger() {
    let mut file_config = ConfigBuilder::new();
    file_config.add_filter_allow_str("e6tools");

    let term_logger = || {
        TermLogger::new(
            LevelFilter::Info,
            LogConfig::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )
    };

    let loggers: Vec<Box<dyn SharedLogger>> = match OpenOptions::new()
        .create(true)
        .append(true)
        .open(LOG_NAME)
    {
        Ok(file) => vec![
            term_logger(),
            WriteLogger::new(LevelFilter::max(), file_config.build(), file),
        ],
        Err(err) => {
            eprintln!("Failed to open {LOG_NAME}: {err}. Logging to terminal only.");
            vec![term_logger()]
        }
    };

    if CombinedLogger::init(loggers).is_err() {
        eprintln!("Failed to initialize logger; continuing without log output.");
    }
}
