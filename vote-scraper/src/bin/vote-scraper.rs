mod cli;

use color_eyre::Report;
use structopt::StructOpt;

fn main() -> Result<(), Report> {
    color_eyre::install()?;
    vote_scraper::logging::setup_logging();
    cli::Cli::from_args().exec()
}
