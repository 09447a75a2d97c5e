//! Batch consolidation of fetched pages into the record sink
//!
//! Results are collected per URL and reconciled against the sink in batches:
//! existing records get their changed fields overwritten, unknown URLs are
//! bulk-inserted. URL matching is exact, so URLs differing only in case end
//! up as separate records.

use crate::crawler::job::Job;
use crate::storage::{FieldMap, RecordSink, StoredRecord};
use crate::CrawlError;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Item on the result queue
#[derive(Debug)]
pub enum ResultMessage {
    /// A job carrying extracted data
    Page(Job),
    /// No more results will follow
    Done,
}

/// Counters for one consolidation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidationStats {
    pub received: usize,
    pub flushes: usize,
    pub updated: usize,
    pub inserted: usize,
}

/// Batches results and upserts them into a [`RecordSink`]
pub struct Consolidator<S> {
    sink: Arc<Mutex<S>>,
    batch_size: usize,
    batch: HashMap<String, FieldMap>,
    stats: ConsolidationStats,
}

impl<S: RecordSink> Consolidator<S> {
    pub fn new(sink: Arc<Mutex<S>>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            sink,
            batch_size,
            batch: HashMap::with_capacity(batch_size),
            stats: ConsolidationStats::default(),
        }
    }

    /// Number of URLs waiting for the next flush
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    pub fn stats(&self) -> ConsolidationStats {
        self.stats
    }

    /// Adds a result, flushing once the batch is full
    ///
    /// A URL already in the batch is merged field by field, later values winning.
    pub fn add(&mut self, url: String, fields: FieldMap) -> Result<(), CrawlError> {
        self.stats.received += 1;
        self.batch.entry(url).or_default().extend(fields);

        if self.batch.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Reconciles the batch with the sink and clears it
    ///
    /// An empty batch is a no-op. On failure the batch is left as it was.
    pub fn flush(&mut self) -> Result<(), CrawlError> {
        if self.batch.is_empty() {
            return Ok(());
        }

        let mut sink = self.sink.lock().unwrap();

        let urls: Vec<&str> = self.batch.keys().map(String::as_str).collect();
        let existing = sink.find_by_urls(&urls).map_err(sink_unavailable)?;

        let mut matched: HashSet<String> = HashSet::with_capacity(existing.len());
        let mut updated = 0usize;
        for record in existing {
            let Some(fields) = self.batch.get(&record.url) else {
                tracing::warn!(url = %record.url, "Stored record does not match any batch URL exactly, check URL casing");
                continue;
            };

            let changed: FieldMap = fields
                .iter()
                .filter(|(field, value)| record.fields.get(*field) != Some(*value))
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect();

            if !changed.is_empty() {
                sink.update_fields(&record.url, &changed)
                    .map_err(sink_unavailable)?;
            }
            updated += 1;
            matched.insert(record.url);
        }

        let new_records: Vec<StoredRecord> = self
            .batch
            .iter()
            .filter(|(url, _)| !matched.contains(*url))
            .map(|(url, fields)| StoredRecord::new(url.clone(), fields.clone()))
            .collect();

        if !new_records.is_empty() {
            sink.bulk_insert(&new_records).map_err(sink_unavailable)?;
        }
        drop(sink);

        tracing::info!(
            batch = self.batch.len(),
            updated,
            inserted = new_records.len(),
            "Batch flushed"
        );

        self.stats.flushes += 1;
        self.stats.updated += updated;
        self.stats.inserted += new_records.len();
        self.batch.clear();
        Ok(())
    }

    /// Consumes the result queue until the sentinel, then flushes the remainder
    pub async fn run(
        mut self,
        mut results: mpsc::Receiver<ResultMessage>,
    ) -> Result<ConsolidationStats, CrawlError> {
        while let Some(message) = results.recv().await {
            match message {
                ResultMessage::Page(job) => {
                    let fields = job.data.unwrap_or_default();
                    self.add(job.url, fields)?;
                }
                ResultMessage::Done => break,
            }
        }

        self.flush()?;
        Ok(self.stats)
    }
}

fn sink_unavailable(err: crate::storage::StorageError) -> CrawlError {
    CrawlError::SinkUnavailable(err.to_string())
}
