//! Crawler module for fetching, extracting and storing pages
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with head-only truncation and content-type gating
//! - XPath field extraction
//! - The bounded worker pool and its per-job deadlines
//! - Batch consolidation into the record sink
//! - Per-domain control and multi-domain orchestration

pub mod body;
mod consolidator;
mod controller;
mod extract;
mod fetcher;
mod job;
mod orchestrator;
mod scheduler;

pub use consolidator::{ConsolidationStats, Consolidator, ResultMessage};
pub use controller::{CrawlReport, DomainController};
pub use extract::{extract_detached, extract_fields, MAX_NESTING_DEPTH};
pub use fetcher::{build_http_client, normalize_url, HttpPageFetcher, PageFetch};
pub use job::{can_use_head, ExtractionRules, Job};
pub use orchestrator::{Orchestrator, PassSummary};
pub use scheduler::{concurrency_for, JobDeadline, PoolState, PoolStats, WorkerPool};

pub use crate::storage::FieldMap;
