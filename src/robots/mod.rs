//! Robots.txt handling module
//!
//! This module fetches a domain's robots.txt once per crawl and turns it into
//! a [`PolicyVerdict`]: whether the crawl identity may enter the site, the
//! crawl-delay hint and the declared sitemaps.

mod parser;

pub use parser::{product_token, ParsedRobots};

use crate::CrawlError;
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Outcome of reading a domain's robots policy
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyVerdict {
    /// The crawl identity may not fetch `/`
    pub banned: bool,
    /// Explicit Crawl-delay directive for the crawl identity
    pub crawl_delay: Option<Duration>,
    /// Sitemap locations declared by the policy
    pub sitemaps: Vec<String>,
}

impl PolicyVerdict {
    fn from_robots(robots: &ParsedRobots, domain: &str, user_agent: &str) -> Self {
        Self {
            banned: robots.is_banned(domain, user_agent),
            crawl_delay: robots.crawl_delay(user_agent),
            sitemaps: robots.sitemaps(),
        }
    }
}

/// Location of a domain's robots.txt
pub fn robots_url(domain: &str) -> String {
    format!("http://{}/robots.txt", domain)
}

/// Fetches and interprets robots.txt files
pub struct PolicyFetcher {
    client: Client,
    user_agent: String,
}

impl PolicyFetcher {
    pub fn new(client: Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
        }
    }

    /// Fetches the robots policy for a domain
    ///
    /// A single attempt is made. Status handling:
    ///
    /// | Response | Policy |
    /// |----------|--------|
    /// | 2xx | parsed body |
    /// | 401, 403 | everything disallowed |
    /// | other 4xx | everything allowed |
    /// | 5xx | everything disallowed |
    ///
    /// Network failures, timeouts and redirect overflows are returned as
    /// `CrawlError::Transport`.
    pub async fn fetch(&self, domain: &str) -> Result<PolicyVerdict, CrawlError> {
        let url = robots_url(domain);
        tracing::debug!(domain = %domain, url = %url, "Fetching robots policy");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CrawlError::transport(&url, e))?;

        let status = response.status();
        let robots = if status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| CrawlError::transport(&url, e))?;
            ParsedRobots::from_content(&body)
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            ParsedRobots::disallow_all()
        } else if status.is_client_error() {
            ParsedRobots::allow_all()
        } else if status.is_server_error() {
            ParsedRobots::disallow_all()
        } else {
            return Err(CrawlError::Transport {
                url,
                message: format!("unexpected HTTP status {}", status),
            });
        };

        let verdict = PolicyVerdict::from_robots(&robots, domain, &self.user_agent);
        tracing::info!(
            domain = %domain,
            status = status.as_u16(),
            banned = verdict.banned,
            crawl_delay = ?verdict.crawl_delay,
            sitemaps = verdict.sitemaps.len(),
            "Robots policy fetched"
        );

        Ok(verdict)
    }
}
