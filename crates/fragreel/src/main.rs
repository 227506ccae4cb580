mod catalog;
mod cli;
mod config;
mod paths;
mod run;

use anyhow::Result;
use cli::Command;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Some(Command::List) => run::list(&cli.run),
        Some(Command::Check(args)) => run::check(&cli.run, &args.shader),
        None => run::run(cli.run),
    }
}
