use color_eyre::Report;
use std::path::{Path, PathBuf};
use structopt::StructOpt;
use vote_lib::results::VoteStats;
use vote_lib::ChainId;
use vote_scraper::config::ScraperConfig;
use vote_scraper::controller::Controller;
use vote_scraper::ledger::factomd::FactomdClient;

#[derive(StructOpt)]
#[structopt(rename_all = "kebab-case")]
pub struct FindVote {
    /// Vote chain id, hex encoded
    chain: ChainId,

    /// Also write the per-option statistics to this csv file
    #[structopt(long)]
    csv: Option<PathBuf>,
}

fn write_option_stats(stats: &VoteStats, path: &Path) -> Result<(), Report> {
    let header = [
        "Option",
        "Count",
        "Weight",
        "Support",
        "Weighted support",
        "Winner",
    ];
    let mut csv_writer = csv::Writer::from_path(path)?;
    csv_writer.write_record(&header)?;

    let winners = stats.winners().collect::<Vec<_>>();
    for option in stats.option_stats.values() {
        let record = [
            option.option.clone(),
            option.tally.count.to_string(),
            option.tally.weight.to_string(),
            option.support.to_string(),
            option.weighted_support.to_string(),
            winners.contains(&option.option.as_str()).to_string(),
        ];
        csv_writer.write_record(&record)?;
    }
    csv_writer.flush()?;
    Ok(())
}

impl FindVote {
    pub fn exec(self, config: ScraperConfig) -> Result<(), Report> {
        let client = FactomdClient::new(&config.factomd)?;
        let report = Controller::new(&client, &client).find_vote(&self.chain)?;
        println!("{}", serde_json::to_string_pretty(&report)?);

        if let Some(path) = self.csv {
            write_option_stats(&report.result, &path)?;
        }
        Ok(())
    }
}
