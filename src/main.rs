//! xfidelity CLI entry point.

use clap::Parser;
use xfidelity::cli::{self, Cli, EXIT_ERROR};

fn main() {
    let cli = Cli::parse();
    cli::init_logging(cli.verbose);

    let exit_code = match tokio::runtime::Runtime::new() {
        Ok(runtime) => match runtime.block_on(cli::run(&cli)) {
            Ok(code) => code,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                EXIT_ERROR
            }
        },
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            EXIT_ERROR
        }
    };

    std::process::exit(exit_code);
}
