use std::process::ExitCode;

use clap::Parser;
use imsim::cli::SubCommandExtend;
use imsim::config::{Opts, SubCommand};
use imsim::error::SearchError;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let opts = Opts::parse();

    let result = match &opts.subcmd {
        SubCommand::Search(config) => config.run(&opts).await,
        SubCommand::Export(config) => config.run(&opts).await,
        SubCommand::Clean(config) => config.run(&opts).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let code = e.downcast_ref::<SearchError>().map_or(1, SearchError::exit_code);
            ExitCode::from(code)
        }
    }
}
