//! audit - seed sample security events, summarise risk, purge history

use anyhow::Result;
use clap::{Parser, Subcommand};

use sitewatch::audit::{seed, RiskReport};
use sitewatch::{DetectionStore, SqliteDetectionStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the detection database.
    #[arg(long, env = "SITEWATCH_DB_PATH", default_value = "sitewatch.db")]
    db: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store the sample security events.
    Seed,
    /// Print label frequency and average risk as JSON.
    Report,
    /// Delete every stored record.
    Purge,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let mut store = SqliteDetectionStore::open(&args.db)?;

    match args.command {
        Command::Seed => {
            let seeded = seed(&mut store, sitewatch::now_s()?)?;
            for (record, event) in &seeded {
                println!(
                    "#{} risk {}/5 [{}] {}",
                    record.id, event.risk_level, event.zone, event.summary
                );
            }
            println!("seeded {} event(s) into {}", seeded.len(), args.db);
        }
        Command::Report => {
            let report = RiskReport::load(&mut store)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Purge => {
            let removed = store.delete_all()?;
            log::info!("purged {} record(s) from {}", removed, args.db);
            println!("purged {} record(s)", removed);
        }
    }
    Ok(())
}
