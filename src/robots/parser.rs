//! Robots.txt parser implementation
//!
//! This module wraps the robotstxt crate for access checks and reads the
//! non-standard directives (Crawl-delay, Sitemap) that the matcher ignores.

use robotstxt::DefaultMatcher;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Rules {
    AllowAll,
    DisallowAll,
    Content(String),
}

/// Parsed robots.txt data
#[derive(Debug, Clone)]
pub struct ParsedRobots {
    rules: Rules,
}

impl ParsedRobots {
    /// Creates a new ParsedRobots from raw robots.txt content
    pub fn from_content(content: &str) -> Self {
        Self {
            rules: Rules::Content(content.to_string()),
        }
    }

    /// A permissive policy, used when the server has no robots.txt
    pub fn allow_all() -> Self {
        Self {
            rules: Rules::AllowAll,
        }
    }

    /// A policy that forbids everything, used for auth and server failures
    pub fn disallow_all() -> Self {
        Self {
            rules: Rules::DisallowAll,
        }
    }

    /// Checks if a URL is allowed for the given user agent
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to check
    /// * `user_agent` - The full user agent string; only its product token is matched
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        match &self.rules {
            Rules::AllowAll => true,
            Rules::DisallowAll => false,
            Rules::Content(content) if content.trim().is_empty() => true,
            Rules::Content(content) => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(content, product_token(user_agent), url)
            }
        }
    }

    /// Whether the crawl identity is kept out of the site root
    pub fn is_banned(&self, domain: &str, user_agent: &str) -> bool {
        !self.is_allowed(&format!("http://{}/", domain), user_agent)
    }

    /// Gets the crawl delay for a specific user agent
    ///
    /// A delay in a group naming the agent wins over one in the `*` group.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        let content = match &self.rules {
            Rules::Content(content) => content,
            _ => return None,
        };

        let agent = product_token(user_agent).to_lowercase();
        let mut group: Vec<String> = Vec::new();
        let mut in_agent_lines = false;
        let mut for_agent: Option<f64> = None;
        let mut for_wildcard: Option<f64> = None;

        for (key, value) in directives(content) {
            match key.as_str() {
                "user-agent" => {
                    // Consecutive User-agent lines share one group
                    if !in_agent_lines {
                        group.clear();
                    }
                    in_agent_lines = true;
                    group.push(value.to_lowercase());
                }
                "crawl-delay" => {
                    in_agent_lines = false;
                    let Ok(delay) = value.parse::<f64>() else {
                        continue;
                    };
                    if !delay.is_finite() || delay < 0.0 {
                        continue;
                    }
                    if group.iter().any(|ua| !agent.is_empty() && *ua == agent) {
                        for_agent.get_or_insert(delay);
                    } else if group.iter().any(|ua| ua == "*") {
                        for_wildcard.get_or_insert(delay);
                    }
                }
                _ => in_agent_lines = false,
            }
        }

        for_agent.or(for_wildcard).map(Duration::from_secs_f64)
    }

    /// Sitemap locations declared anywhere in the file
    pub fn sitemaps(&self) -> Vec<String> {
        let content = match &self.rules {
            Rules::Content(content) => content,
            _ => return Vec::new(),
        };

        let mut sitemaps: Vec<String> = Vec::new();
        for (key, value) in directives(content) {
            if key == "sitemap" && !value.is_empty() && !sitemaps.iter().any(|s| s == value) {
                sitemaps.push(value.to_string());
            }
        }
        sitemaps
    }
}

/// The product token of a user agent, e.g. `ScreepBot` for `ScreepBot/1.0 (+info)`
pub fn product_token(user_agent: &str) -> &str {
    user_agent
        .trim()
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or("")
}

/// Yields (lowercased key, trimmed value) for each directive line
fn directives(content: &str) -> impl Iterator<Item = (String, &str)> {
    content.lines().filter_map(|line| {
        let line = line.split('#').next().unwrap_or("").trim();
        let (key, value) = line.split_once(':')?;
        Some((key.trim().to_lowercase(), value.trim()))
    })
}
