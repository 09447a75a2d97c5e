//! Sitemap expansion
//!
//! Sitemaps are the only source of page URLs. Index documents are followed
//! breadth-first; every sitemap URL is downloaded at most once per crawl, so
//! self-referencing or cyclic indices terminate.

mod parser;

pub use parser::{read_entries, SitemapEntry};

use crate::crawler::body::BodyDecoder;
use crate::CrawlError;
use reqwest::Client;
use std::collections::{HashSet, VecDeque};
use std::io::BufReader;
use std::time::Duration;

/// Expands sitemap locations into a flat, deduplicated list of page URLs
pub struct SitemapExpander {
    client: Client,
    timeout: Duration,
}

impl SitemapExpander {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Expands `roots` and every nested sitemap they reference
    ///
    /// `seen` is the loop guard: sitemaps already in it are skipped and every
    /// sitemap downloaded here is added to it. Page URLs are returned in
    /// first-seen order without duplicates.
    pub async fn expand(
        &self,
        roots: &[String],
        seen: &mut HashSet<String>,
    ) -> Result<Vec<String>, CrawlError> {
        let mut pending: VecDeque<String> = VecDeque::new();
        for root in roots {
            if seen.insert(root.clone()) {
                pending.push_back(root.clone());
            }
        }

        let mut pages: Vec<String> = Vec::new();
        let mut known_pages: HashSet<String> = HashSet::new();
        let mut documents = 0usize;

        while let Some(sitemap) = pending.pop_front() {
            let entries = self.fetch_entries(&sitemap).await?;
            documents += 1;

            let mut nested = 0usize;
            let mut added = 0usize;
            for entry in entries {
                match entry {
                    SitemapEntry::Sitemap(loc) => {
                        if seen.insert(loc.clone()) {
                            pending.push_back(loc);
                            nested += 1;
                        }
                    }
                    SitemapEntry::Page(loc) => {
                        if known_pages.insert(loc.clone()) {
                            pages.push(loc);
                            added += 1;
                        }
                    }
                }
            }

            tracing::debug!(
                sitemap = %sitemap,
                nested_sitemaps = nested,
                new_pages = added,
                "Sitemap expanded"
            );
        }

        tracing::info!(
            sitemaps = documents,
            pages = pages.len(),
            "Sitemap expansion complete"
        );

        Ok(pages)
    }

    /// Downloads one sitemap and reads its entries off the spooled body
    async fn fetch_entries(&self, url: &str) -> Result<Vec<SitemapEntry>, CrawlError> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CrawlError::transport(url, e))?;

        let decoder = BodyDecoder::for_response(&response);
        let file = decoder.spool(response).await?;

        let (entries, result) = tokio::task::spawn_blocking(move || {
            let mut entries = Vec::new();
            let result = read_entries(BufReader::new(file), |entry| entries.push(entry));
            (entries, result)
        })
        .await?;

        if let Err(e) = result {
            // Keep whatever was read before the document broke off
            tracing::warn!(
                sitemap = %url,
                entries = entries.len(),
                error = %e,
                "Malformed sitemap, using entries read so far"
            );
        }

        Ok(entries)
    }
}
