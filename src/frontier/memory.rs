use super::{Frontier, FrontierError, FrontierResult};
use crate::url::CrawlUrl;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// A process-local FIFO frontier
///
/// URLs are handed out strictly in insertion order, each at most once. There
/// is no retry: a failed URL keeps its recorded outcome but is never offered
/// again.
#[derive(Debug, Default)]
pub struct MemoryFrontier {
    inner: Mutex<Queue>,
}

#[derive(Debug, Default)]
struct Queue {
    entries: Vec<CrawlUrl>,
    index: HashMap<String, usize>,
    next: usize,
}

impl Queue {
    fn push(&mut self, url: CrawlUrl) {
        self.index
            .insert(url.unique_id().to_string(), self.entries.len());
        self.entries.push(url);
    }
}

impl MemoryFrontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of URLs ever stored
    pub fn len(&self) -> usize {
        self.inner.lock().map(|q| q.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the latest stored record for a URL
    pub fn get(&self, url: &CrawlUrl) -> Option<CrawlUrl> {
        let queue = self.inner.lock().ok()?;
        queue
            .index
            .get(url.unique_id())
            .and_then(|&i| queue.entries.get(i).cloned())
    }
}

#[async_trait]
impl Frontier for MemoryFrontier {
    async fn insert_if_not_exists(&self, url: &CrawlUrl) -> FrontierResult<()> {
        let mut queue = self.inner.lock().map_err(|_| FrontierError::Poisoned)?;
        if !queue.index.contains_key(url.unique_id()) {
            queue.push(url.clone());
        }
        Ok(())
    }

    async fn upsert(&self, url: &CrawlUrl) -> FrontierResult<()> {
        let mut queue = self.inner.lock().map_err(|_| FrontierError::Poisoned)?;
        match queue.index.get(url.unique_id()).copied() {
            Some(i) => queue.entries[i] = url.clone(),
            None => queue.push(url.clone()),
        }
        Ok(())
    }

    async fn next_url(&self) -> FrontierResult<CrawlUrl> {
        let mut queue = self.inner.lock().map_err(|_| FrontierError::Poisoned)?;
        let url = queue
            .entries
            .get(queue.next)
            .cloned()
            .ok_or(FrontierError::Exhausted)?;
        queue.next += 1;
        Ok(url)
    }
}
