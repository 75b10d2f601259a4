mod scrape;
mod vote;

use color_eyre::Report;
use std::path::PathBuf;
use structopt::StructOpt;
use vote_scraper::config::ScraperConfig;

#[derive(StructOpt)]
#[structopt(rename_all = "kebab-case")]
pub struct Cli {
    /// YAML configuration file. Every setting has a default.
    #[structopt(long, short)]
    config: Option<PathBuf>,

    /// factomd host, overrides the configuration file
    #[structopt(long)]
    host: Option<String>,

    /// factomd port, overrides the configuration file
    #[structopt(long)]
    port: Option<u16>,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
#[structopt(rename_all = "kebab-case")]
pub enum Command {
    /// Follow the ledger, computing results as votes close
    Scrape(scrape::Scrape),
    /// Rebuild a single vote from its chains and print it
    Vote(vote::FindVote),
}

impl Cli {
    pub fn exec(self) -> Result<(), Report> {
        let mut config = match &self.config {
            Some(path) => ScraperConfig::load(path)?,
            None => ScraperConfig::default(),
        };
        if let Some(host) = self.host {
            config.factomd.host = host;
        }
        if let Some(port) = self.port {
            config.factomd.port = port;
        }

        match self.command {
            Command::Scrape(scrape) => scrape.exec(config),
            Command::Vote(vote) => vote.exec(config),
        }
    }
}
