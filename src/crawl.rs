use anyhow::Result;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep, sleep_until};

use crate::config::Config;
use crate::extract::{self, TeamData};
use crate::fetch;
use crate::ledger::CrawlLedger;
use crate::store::Store;

const BATCH_SIZE: usize = 50;
const MAX_RETRIES: u32 = 3;
const WORKERS: usize = 4;
const FETCH_DELAY: Duration = Duration::from_secs(1);
// Consecutive ids whose trailing window is all "successful and empty" before
// an unbounded run decides the id space is exhausted.
const EMPTY_STREAK_THRESHOLD: u32 = 20;
const TRAILING_WINDOW: usize = 5;

enum Outcome {
    Team(TeamData),
    Failed,
}

struct IdOutcome {
    id: u64,
    outcome: Outcome,
}

#[derive(Serialize)]
struct Summary {
    total_teams_processed: usize,
    first_successful_id: Option<u64>,
    last_successful_id: Option<u64>,
    timestamp: String,
}

// Spaces individual fetches a fixed delay apart no matter how many workers
// are in flight.
struct Throttle {
    next: Mutex<Instant>,
    delay: Duration,
}

impl Throttle {
    fn new(delay: Duration) -> Throttle {
        Throttle {
            next: Mutex::new(Instant::now()),
            delay,
        }
    }

    async fn wait(&self) {
        let mut next = self.next.lock().await;
        sleep_until(*next).await;
        *next = Instant::now() + self.delay;
    }
}

// Batch results feed a trailing window of per-id outcomes; each fully
// empty window bumps the streak, anything else resets it.
struct StopHeuristic {
    window: VecDeque<bool>,
    streak: u32,
}

impl StopHeuristic {
    fn new() -> StopHeuristic {
        StopHeuristic {
            window: VecDeque::with_capacity(TRAILING_WINDOW),
            streak: 0,
        }
    }

    fn observe(&mut self, successful_and_empty: bool) {
        if self.window.len() == TRAILING_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(successful_and_empty);

        if self.window.len() == TRAILING_WINDOW && self.window.iter().all(|e| *e) {
            self.streak += 1;
        } else {
            self.streak = 0;
        }
    }

    fn should_stop(&self) -> bool {
        self.streak >= EMPTY_STREAK_THRESHOLD
    }
}

pub async fn run(config: &Config, start_id: u64, end_id: Option<u64>) -> Result<()> {
    let data_dir = Path::new(&config.data_dir);
    let store = Store::open(data_dir)?;
    let mut ledger = CrawlLedger::load(data_dir, store.scraped_ids()?)?;

    let client = fetch::build_client()?;
    let throttle = Arc::new(Throttle::new(FETCH_DELAY));

    println!(
        "Starting bulk scrape from ID {start_id}{}",
        end_id.map(|e| format!(" to {e}")).unwrap_or_default()
    );

    let mut current_id = start_id;
    let mut heuristic = StopHeuristic::new();

    loop {
        if let Some(end) = end_id {
            if current_id > end {
                println!("Reached specified end ID: {end}");
                break;
            }
        }

        let batch = ledger.next_batch(current_id, BATCH_SIZE, end_id);
        let range_end = current_id + BATCH_SIZE as u64 - 1;

        if batch.is_empty() {
            // Whole range already known. Bounded runs are done; unbounded
            // ones move past it.
            if end_id.is_some() {
                break;
            }
            current_id = range_end + 1;
            continue;
        }

        println!(
            "Processing batch: IDs {} to {}",
            batch.first().copied().unwrap_or(current_id),
            batch.last().copied().unwrap_or(range_end)
        );

        let results = process_batch(&client, &throttle, &config.base_url, &batch).await;

        // Ledger and store writes happen here, after every worker in the
        // batch has finished. This is the sole synchronization point.
        for result in &results {
            apply_outcome(&store, &mut ledger, result)?;
        }
        ledger.save()?;

        for result in &results {
            let successful_and_empty = matches!(
                &result.outcome,
                Outcome::Team(data) if data.team_name.is_empty()
            );
            heuristic.observe(successful_and_empty);
        }

        if heuristic.streak > 0 {
            println!(
                "Found {} consecutive empty ids, might be at the end",
                heuristic.streak
            );
        }

        if end_id.is_none() && heuristic.should_stop() {
            println!("Empty-id streak reached {EMPTY_STREAK_THRESHOLD}, stopping");
            break;
        }

        current_id = range_end + 1;
    }

    write_summary(data_dir, &ledger)?;
    println!("Scraping completed. Last processed ID: {}", current_id - 1);

    Ok(())
}

async fn process_batch(
    client: &Client,
    throttle: &Arc<Throttle>,
    base_url: &str,
    batch: &[u64],
) -> Vec<IdOutcome> {
    let semaphore = Arc::new(Semaphore::new(WORKERS));
    let mut set = JoinSet::new();

    for &id in batch {
        let client = client.clone();
        let throttle = throttle.clone();
        let base_url = base_url.to_string();
        let semaphore = semaphore.clone();

        set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("worker semaphore closed");
            process_team(&client, &throttle, &base_url, id).await
        });
    }

    let mut results = Vec::with_capacity(batch.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => eprintln!("Crawl worker panicked: {e}"),
        }
    }

    results.sort_by_key(|r| r.id);
    results
}

// Bounded retry loop with linearly growing delay. An id that exhausts its
// retries stays unresolved so a future run probes it again.
async fn process_team(
    client: &Client,
    throttle: &Throttle,
    base_url: &str,
    id: u64,
) -> IdOutcome {
    let url = fetch::team_page_url(id, base_url);
    let mut retries = 0;

    loop {
        println!("Scraping team ID: {id}");
        throttle.wait().await;

        let attempt = match fetch::fetch_page(client, &url).await {
            Ok(html) => extract::extract_team_data(&html, &url, true),
            Err(e) => Err(e),
        };

        match attempt {
            Ok(data) => {
                return IdOutcome {
                    id,
                    outcome: Outcome::Team(data),
                };
            }
            Err(e) => {
                retries += 1;
                if retries <= MAX_RETRIES {
                    eprintln!("Retry {retries}/{MAX_RETRIES} for team {id}: {e}");
                    sleep(FETCH_DELAY * retries).await;
                } else {
                    eprintln!("Failed to scrape team {id} after {MAX_RETRIES} retries: {e}");
                    return IdOutcome {
                        id,
                        outcome: Outcome::Failed,
                    };
                }
            }
        }
    }
}

fn apply_outcome(store: &Store, ledger: &mut CrawlLedger, result: &IdOutcome) -> Result<()> {
    match &result.outcome {
        Outcome::Team(data) if data.team_name.is_empty() => {
            println!("Empty team found for ID {}", result.id);
            ledger.mark_empty(result.id);
        }
        Outcome::Team(data) => {
            store.append_team(result.id, data)?;
            store.append_fixtures(data)?;
            ledger.mark_scraped(result.id);
        }
        Outcome::Failed => {}
    }
    Ok(())
}

fn write_summary(data_dir: &Path, ledger: &CrawlLedger) -> Result<()> {
    let (first, last) = ledger.scraped_bounds();
    let summary = Summary {
        total_teams_processed: ledger.scraped_count(),
        first_successful_id: first,
        last_successful_id: last,
        timestamp: Utc::now().to_rfc3339(),
    };

    fs::write(
        data_dir.join("summary.json"),
        serde_json::to_string_pretty(&summary)?,
    )?;
    println!(
        "Summary generated. Total teams processed: {}",
        summary.total_teams_processed
    );

    Ok(())
}
