use color_eyre::Report;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;
use tracing::info;
use vote_scraper::config::ScraperConfig;
use vote_scraper::driver::{CatchUp, Shutdown};
use vote_scraper::ledger::factomd::FactomdClient;
use vote_scraper::repository::memory::InMemoryRepository;
use vote_scraper::repository::Repository;
use vote_scraper::watcher::VoteWatcher;

#[derive(StructOpt)]
#[structopt(rename_all = "kebab-case")]
pub struct Scrape {
    /// Stop once this height is processed instead of following the head
    #[structopt(long)]
    stop_at: Option<u32>,

    /// Write the computed results as JSON once stopped
    #[structopt(long, requires = "stop-at")]
    output: Option<PathBuf>,

    /// Accept vote registrations from any chain
    #[structopt(long)]
    any_registration_chain: bool,
}

impl Scrape {
    pub fn exec(self, mut config: ScraperConfig) -> Result<(), Report> {
        if self.any_registration_chain {
            config.watcher.registration_chain = None;
        }
        info!(url = %config.factomd.url(), "scraping votes");

        let client = Arc::new(FactomdClient::new(&config.factomd)?);
        let repository = Arc::new(InMemoryRepository::new());
        let watcher = VoteWatcher::new(repository.clone(), client.clone(), config.watcher);
        let mut driver = CatchUp::new(
            client,
            watcher,
            config.catch_up,
            config.retry.policy(),
            Shutdown::new(),
        );

        match self.stop_at {
            Some(height) => {
                driver.catch_up_to(height)?;
            }
            None => driver.run()?,
        }

        if let Some(path) = self.output {
            let results = repository.fetch_results()?;
            info!(results = results.len(), path = %path.display(), "writing results");
            serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), &results)?;
        }
        Ok(())
    }
}
