use crate::storage::FieldMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Field name -> XPath expression
pub type ExtractionRules = FieldMap;

/// A single page to fetch and extract
///
/// Jobs compare and hash by URL only.
#[derive(Debug, Clone)]
pub struct Job {
    pub url: String,
    pub rules: Arc<ExtractionRules>,
    pub head_only: bool,
    /// Extracted fields, attached once the fetch succeeds
    pub data: Option<FieldMap>,
}

impl Job {
    pub fn new(url: impl Into<String>, rules: Arc<ExtractionRules>, head_only: bool) -> Self {
        Self {
            url: url.into(),
            rules,
            head_only,
            data: None,
        }
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Job {}

impl Hash for Job {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

/// Whether every rule only looks at the document head
///
/// Such domains can stop downloading a page once its body starts.
pub fn can_use_head(rules: &ExtractionRules) -> bool {
    rules
        .values()
        .all(|expr| expr.contains("head") || expr.contains("meta"))
}
