//! Streaming sitemap reader
//!
//! Entries are produced one at a time from a pull parser; nothing but the
//! current `<loc>` text is retained between events.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::BufRead;

/// One entry of a sitemap document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapEntry {
    /// `<sitemap><loc>` of a sitemap index
    Sitemap(String),
    /// `<url><loc>` of a page
    Page(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Sitemap,
    Page,
}

/// Reads sitemap entries from `source`, calling `on_entry` for each
///
/// Tags are matched by local name, so both namespaced and bare documents
/// are accepted. Returns the number of entries read.
pub fn read_entries<R, F>(source: R, mut on_entry: F) -> Result<usize, quick_xml::Error>
where
    R: BufRead,
    F: FnMut(SitemapEntry),
{
    let mut reader = Reader::from_reader(source);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut kind: Option<EntryKind> = None;
    let mut depth = 0usize;
    let mut entry_depth = 0usize;
    let mut in_loc = false;
    let mut loc = String::new();
    let mut count = 0;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                depth += 1;
                match (e.local_name().as_ref(), kind) {
                    (b"sitemap", None) => {
                        kind = Some(EntryKind::Sitemap);
                        entry_depth = depth;
                    }
                    (b"url", None) => {
                        kind = Some(EntryKind::Page);
                        entry_depth = depth;
                    }
                    // Only the entry's own <loc>, not e.g. <image:loc>
                    (b"loc", Some(_)) if depth == entry_depth + 1 => {
                        in_loc = true;
                        loc.clear();
                    }
                    _ => {}
                }
            }
            Event::Text(ref e) if in_loc => {
                let text = e
                    .unescape()
                    .map(|t| t.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(e).into_owned());
                loc.push_str(&text);
            }
            Event::CData(ref e) if in_loc => {
                loc.push_str(&String::from_utf8_lossy(e));
            }
            Event::End(_) => {
                if in_loc {
                    in_loc = false;
                } else if let Some(entry_kind) = kind.filter(|_| depth == entry_depth) {
                    let location = loc.trim().to_string();
                    if !location.is_empty() {
                        on_entry(match entry_kind {
                            EntryKind::Sitemap => SitemapEntry::Sitemap(location),
                            EntryKind::Page => SitemapEntry::Page(location),
                        });
                        count += 1;
                    }
                    kind = None;
                    loc.clear();
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(xml: &str) -> Vec<SitemapEntry> {
        let mut entries = Vec::new();
        read_entries(xml.as_bytes(), |e| entries.push(e)).unwrap();
        entries
    }

    #[test]
    fn test_url_set() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <url><loc>http://example.com/a</loc><lastmod>2024-01-01</lastmod></url>
              <url>
                <loc>
                  http://example.com/b
                </loc>
              </url>
            </urlset>"#;

        assert_eq!(
            collect(xml),
            vec![
                SitemapEntry::Page("http://example.com/a".to_string()),
                SitemapEntry::Page("http://example.com/b".to_string()),
            ]
        );
    }

    #[test]
    fn test_sitemap_index() {
        let xml = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <sitemap><loc>http://example.com/one.xml</loc></sitemap>
              <sitemap><loc>http://example.com/two.xml.gz</loc></sitemap>
            </sitemapindex>"#;

        assert_eq!(
            collect(xml),
            vec![
                SitemapEntry::Sitemap("http://example.com/one.xml".to_string()),
                SitemapEntry::Sitemap("http://example.com/two.xml.gz".to_string()),
            ]
        );
    }

    #[test]
    fn test_prefixed_namespace_and_escapes() {
        let xml = r#"<sm:urlset xmlns:sm="http://www.sitemaps.org/schemas/sitemap/0.9">
              <sm:url><sm:loc>http://example.com/?a=1&amp;b=2</sm:loc></sm:url>
            </sm:urlset>"#;

        assert_eq!(
            collect(xml),
            vec![SitemapEntry::Page("http://example.com/?a=1&b=2".to_string())]
        );
    }

    #[test]
    fn test_loc_outside_entry_is_ignored() {
        let xml = r#"<urlset><loc>http://example.com/stray</loc><url><loc></loc></url></urlset>"#;
        assert!(collect(xml).is_empty());
    }

    #[test]
    fn test_image_locs_do_not_leak() {
        let xml = r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9"
                             xmlns:image="http://www.google.com/schemas/sitemap-image/1.1">
              <url>
                <loc>http://example.com/page</loc>
                <image:image><image:loc>http://example.com/pic.jpg</image:loc></image:image>
              </url>
            </urlset>"#;

        assert_eq!(
            collect(xml),
            vec![SitemapEntry::Page("http://example.com/page".to_string())]
        );
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        let xml = "<urlset><url><loc>http://example.com/a</loc></url></sitemap>";
        assert!(read_entries(xml.as_bytes(), |_| {}).is_err());
    }
}
