mod analysis;
mod backend;
mod cli;
mod commands;
mod convert;
mod corpus;
mod embedding;
mod eval;
mod fusion;
mod model;
mod semantic;
mod trec;
mod util;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::ConvertCorpus(args) => commands::convert::run_corpus(args),
        Commands::ConvertQueries(args) => commands::convert::run_queries(args),
        Commands::ConvertQrels(args) => commands::convert::run_qrels(args),
        Commands::Encode(args) => commands::encode::run(args),
        Commands::Index(args) => commands::index::run(args),
        Commands::Embed(args) => commands::embed::run(args),
        Commands::Search(args) => commands::search::run(args),
        Commands::Eval(args) => commands::eval::run(args),
        Commands::Status(args) => commands::status::run(args),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
