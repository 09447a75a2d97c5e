//! XPath field extraction
//!
//! Pages are parsed leniently with `scraper` (html5ever), then mirrored into
//! an `sxd_document` tree so the stored XPath expressions can be evaluated on
//! real-world markup that is not well-formed XML.

use crate::crawler::job::ExtractionRules;
use crate::storage::FieldMap;
use crate::CrawlError;
use scraper::{ElementRef, Html, Node};
use sxd_document::dom::{Document, Element};
use sxd_document::Package;
use sxd_xpath::{Context, Factory, Value};
use std::sync::Arc;

/// Deepest element nesting mirrored for evaluation
pub const MAX_NESTING_DEPTH: usize = 512;

/// Applies every rule to `html`
///
/// A rule that matches nothing yields an empty string. Any invalid
/// expression, or markup nested deeper than [`MAX_NESTING_DEPTH`], fails the
/// whole page; no partial map is returned.
pub fn extract_fields(url: &str, html: &str, rules: &ExtractionRules) -> Result<FieldMap, CrawlError> {
    let page = Html::parse_document(html);
    let package = Package::new();
    let document = package.as_document();

    let root = mirror_document(url, &document, page.root_element())?;
    document.root().append_child(root);

    let factory = Factory::new();
    let context = Context::new();
    let mut fields = FieldMap::new();

    for (field, expression) in rules {
        let xpath = factory
            .build(expression)
            .map_err(|e| extraction_error(url, field, e))?
            .ok_or_else(|| extraction_error(url, field, "empty expression"))?;

        let value = xpath
            .evaluate(&context, document.root())
            .map_err(|e| extraction_error(url, field, e))?;

        fields.insert(field.clone(), render(value));
    }

    Ok(fields)
}

/// Runs [`extract_fields`] on the blocking pool
///
/// Dropping the returned future detaches the work, so a caller racing it
/// against a deadline gets control back as soon as the deadline fires.
pub async fn extract_detached(
    url: String,
    html: String,
    rules: Arc<ExtractionRules>,
) -> Result<FieldMap, CrawlError> {
    tokio::task::spawn_blocking(move || extract_fields(&url, &html, &rules)).await?
}

/// Copies the parsed page into `document` without recursion
fn mirror_document<'d>(
    url: &str,
    document: &Document<'d>,
    source: ElementRef<'_>,
) -> Result<Element<'d>, CrawlError> {
    let root = mirror_element(document, source);
    let mut pending = vec![(source, root, 1usize)];

    while let Some((source, target, depth)) = pending.pop() {
        for child in source.children() {
            match child.value() {
                Node::Element(_) => {
                    let Some(child_ref) = ElementRef::wrap(child) else {
                        continue;
                    };
                    if depth >= MAX_NESTING_DEPTH {
                        return Err(CrawlError::Extraction {
                            url: url.to_string(),
                            message: format!("markup nested deeper than {} elements", MAX_NESTING_DEPTH),
                        });
                    }
                    let element = mirror_element(document, child_ref);
                    target.append_child(element);
                    pending.push((child_ref, element, depth + 1));
                }
                Node::Text(text) => {
                    target.append_child(document.create_text(&text.text));
                }
                _ => {}
            }
        }
    }

    Ok(root)
}

fn mirror_element<'d>(document: &Document<'d>, source: ElementRef<'_>) -> Element<'d> {
    let element = document.create_element(source.value().name());
    for (name, value) in source.value().attrs() {
        element.set_attribute_value(name, value);
    }
    element
}

fn render(value: Value<'_>) -> String {
    match value {
        Value::Nodeset(nodes) => nodes
            .document_order_first()
            .map(|node| node.string_value())
            .unwrap_or_default(),
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Boolean(b) => b.to_string(),
    }
}

fn extraction_error(url: &str, field: &str, err: impl std::fmt::Display) -> CrawlError {
    CrawlError::Extraction {
        url: url.to_string(),
        message: format!("rule '{}': {}", field, err),
    }
}
