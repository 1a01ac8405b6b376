use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const EMPTY_IDS_FILE: &str = "empty_ids.json";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger format error: {0}")]
    Format(#[from] serde_json::Error),
}

// Persisted record of probed team ids. "Scraped" is derived from the team
// store; "empty" is its own JSON array, rewritten in full on save. An id sits
// in at most one set and is never probed again once placed.
pub struct CrawlLedger {
    path: PathBuf,
    scraped: HashSet<u64>,
    empty: HashSet<u64>,
}

impl CrawlLedger {
    pub fn load(data_dir: &Path, scraped: HashSet<u64>) -> Result<CrawlLedger, LedgerError> {
        let path = data_dir.join(EMPTY_IDS_FILE);

        let empty = if path.exists() {
            let text = fs::read_to_string(&path)?;
            let ids: Vec<u64> = serde_json::from_str(&text)?;
            ids.into_iter().collect()
        } else {
            HashSet::new()
        };

        Ok(CrawlLedger {
            path,
            scraped,
            empty,
        })
    }

    // Up to `batch_size` consecutive ids from `from_id` (capped at `to_id`
    // when bounded), minus ids already known either way. May come back
    // shorter than `batch_size`, or empty when the whole range is known.
    pub fn next_batch(&self, from_id: u64, batch_size: usize, to_id: Option<u64>) -> Vec<u64> {
        let mut end = from_id + batch_size as u64 - 1;
        if let Some(to_id) = to_id {
            end = end.min(to_id);
        }

        (from_id..=end).filter(|id| !self.is_known(*id)).collect()
    }

    pub fn is_known(&self, id: u64) -> bool {
        self.scraped.contains(&id) || self.empty.contains(&id)
    }

    pub fn mark_scraped(&mut self, id: u64) {
        self.empty.remove(&id);
        self.scraped.insert(id);
    }

    pub fn mark_empty(&mut self, id: u64) {
        self.scraped.remove(&id);
        self.empty.insert(id);
    }

    pub fn scraped_count(&self) -> usize {
        self.scraped.len()
    }

    pub fn scraped_bounds(&self) -> (Option<u64>, Option<u64>) {
        (
            self.scraped.iter().min().copied(),
            self.scraped.iter().max().copied(),
        )
    }

    pub fn save(&self) -> Result<(), LedgerError> {
        let mut ids: Vec<u64> = self.empty.iter().copied().collect();
        ids.sort_unstable();
        fs::write(&self.path, serde_json::to_string_pretty(&ids)?)?;
        Ok(())
    }
}
