mod calendar;
mod config;
mod crawl;
mod extract;
mod fetch;
mod ledger;
mod store;
mod sync;

use anyhow::Result;
use chrono::Utc;
use std::path::Path;

use calendar::{CalendarDirectory, HttpCalendarService};

fn usage() -> ! {
    eprintln!("Usage: fpb_calendar <config.json> <command>");
    eprintln!("Commands:");
    eprintln!("  crawl [start_id] [end_id]   bulk-scrape team pages");
    eprintln!("  sync <team-url-or-id>       scrape one team and reconcile its calendar");
    eprintln!("  sync-all                    reconcile every mapped team calendar");
    eprintln!("  teams                       list stored teams for the current season");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        usage();
    }

    let config = config::load(&args[1])?;

    match args[2].as_str() {
        "crawl" => {
            let start_id = match args.get(3) {
                Some(raw) => raw.parse()?,
                None => 1,
            };
            let end_id = args.get(4).map(|raw| raw.parse()).transpose()?;
            crawl::run(&config, start_id, end_id).await?;
        }
        "sync" => {
            let Some(team) = args.get(3) else {
                usage();
            };
            let service =
                HttpCalendarService::new(&config.calendar_api_base, &config.calendar_token)?;
            sync::sync_team(&config, &service, team).await?;
        }
        "sync-all" => {
            let service =
                HttpCalendarService::new(&config.calendar_api_base, &config.calendar_token)?;
            let directory = CalendarDirectory::new(
                Path::new(&config.data_dir).join("calendars.json"),
                &config.time_zone,
            );

            // One team at a time; per-team syncs must not interleave.
            for url in directory.mapped_urls()? {
                if let Err(e) = sync::sync_team(&config, &service, &url).await {
                    eprintln!("Sync error for {url}: {e}");
                }
            }
        }
        "teams" => {
            let store = store::Store::open(Path::new(&config.data_dir))?;
            let teams =
                store.load_teams(Utc::now().date_naive(), config.season_cutoff_month)?;
            for team in teams {
                println!(
                    "{}\t{} ({} {})\t{}\t{}",
                    team.id, team.name, team.age_group, team.gender, team.season, team.url
                );
            }
        }
        _ => usage(),
    }

    Ok(())
}
