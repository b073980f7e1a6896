//! A set of tools for pagedb.

mod bench;
mod inspect;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Bench(bench::Args),
    Inspect(inspect::Args),
}

fn main() -> bench::Result<()> {
    env_logger::init();
    let args = Args::parse();
    match args.cmd {
        Commands::Bench(args) => bench::run(args)?,
        Commands::Inspect(args) => inspect::run(args)?,
    }
    Ok(())
}
