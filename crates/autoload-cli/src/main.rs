#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "autoload")]
#[command(author, version, about = "Inspect dynamic module resolution", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Resolve a module identity against registered modules and paths
    Resolve {
        /// Identity to resolve, e.g. "Lib@1.2.0.0" or "Lib@1.2#token"
        identity: String,

        /// Module file to load and register (repeatable)
        #[arg(long = "module", value_name = "FILE")]
        modules: Vec<PathBuf>,

        /// Extra probing directory for every registered module (repeatable)
        #[arg(long = "probe", value_name = "DIR")]
        probes: Vec<PathBuf>,

        /// Bare probing directory, not tied to a module (repeatable)
        #[arg(long = "path", value_name = "DIR")]
        paths: Vec<PathBuf>,

        /// Identity of the module asking for the dependency
        #[arg(long, value_name = "IDENTITY")]
        requester: Option<String>,

        /// Loader configuration file (JSON)
        #[arg(long, value_name = "FILE", env = "AUTOLOAD_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Print the redirect policy that accompanies a module file
    Policy {
        /// The module file
        module_file: PathBuf,

        /// Loader configuration file (JSON)
        #[arg(long, value_name = "FILE", env = "AUTOLOAD_CONFIG")]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // JSON output owns stdout; logs always go to stderr.
    logging::init(cli.verbose, cli.json);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(),
        Some(Commands::Resolve {
            identity,
            modules,
            probes,
            paths,
            requester,
            config,
        }) => commands::resolve::run(
            &commands::resolve::ResolveArgs {
                identity,
                modules,
                probes,
                paths,
                requester,
                config,
            },
            cli.json,
        ),
        Some(Commands::Policy {
            module_file,
            config,
        }) => commands::policy::run(&module_file, config.as_deref(), cli.json),
    }
}
