use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use clap::Parser;

/// Highest verbosity; also the level at which arguments and configuration are dumped.
pub const DEBUG: u8 = 7;

#[derive(Parser, Debug)]
#[command(name = "netstream")]
#[command(version, about = "Replicate one input byte stream to many outputs", long_about = None)]
pub struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "netstream.conf")]
    pub config: PathBuf,

    /// Run as a daemon
    #[arg(short, long)]
    pub daemonize: bool,

    /// Verbosity from 0 (quiet) to 7 (debug); without a value 4
    #[arg(
        short,
        long,
        num_args = 0..=1,
        default_value_t = 3,
        default_missing_value = "4"
    )]
    verbose: u8,

    /// Only check that every endpoint can be opened, transfer nothing
    #[arg(short, long)]
    pub test_only: bool,
}

impl Args {
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(DEBUG)
    }
}

impl Display for Args {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Command line arguments:")?;
        writeln!(f, "\tconfig file: {}", self.config.display())?;
        writeln!(f, "\tdaemonize: {}", self.daemonize)?;
        writeln!(f, "\tverbosity: {}", self.verbosity())?;
        write!(f, "\tonly test: {}", self.test_only)
    }
}

/// Map syslog-style verbosity onto the `log` filter.
pub fn level_filter(verbosity: u8) -> log::LevelFilter {
    match verbosity {
        0 => log::LevelFilter::Off,
        1..=3 => log::LevelFilter::Error,
        4 => log::LevelFilter::Warn,
        5 | 6 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    }
}
