//! Feed document normalization.
//!
//! Turns one relay response body (an RSS 2.0 `<item>` list or a generic Atom
//! `<entry>` list) into normalized [`NewsItem`]s. Parsing is tolerant per
//! item: a malformed entry is dropped without aborting the rest of the
//! document, and a document that breaks mid-stream yields the items
//! collected up to that point.
//!
//! Text fields are cleaned in three steps: XML entity unescaping and CDATA
//! unwrapping (done by the event reader), HTML fragment stripping, and
//! whitespace collapsing. Dates are parsed into a raw [`DateTime<Utc>`] and
//! a display string is derived from it, never the other way around.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use tracing::{debug, warn};

use crate::models::{NewsItem, Source};

/// Which child of the current item a text event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Description,
    ContentEncoded,
    DatePublished,
    DateUpdated,
    Link,
    Other,
}

#[derive(Default)]
struct Draft {
    title: String,
    description: String,
    content_encoded: String,
    link: String,
    date_published: String,
    date_updated: String,
}

impl Draft {
    fn buffer_mut(&mut self, field: Field) -> Option<&mut String> {
        match field {
            Field::Title => Some(&mut self.title),
            Field::Description => Some(&mut self.description),
            Field::ContentEncoded => Some(&mut self.content_encoded),
            Field::DatePublished => Some(&mut self.date_published),
            Field::DateUpdated => Some(&mut self.date_updated),
            Field::Link => Some(&mut self.link),
            Field::Other => None,
        }
    }

    fn into_item(self, source: &Source) -> Option<NewsItem> {
        let title = strip_markup(&self.title);
        let link = self.link.trim().to_string();
        // An entry carrying neither a headline nor a destination is noise.
        if title.is_empty() && link.is_empty() {
            return None;
        }

        let description = {
            let summary = strip_markup(&self.description);
            if summary.is_empty() {
                strip_markup(&self.content_encoded)
            } else {
                summary
            }
        };

        let published = parse_date(&self.date_published)
            .or_else(|| parse_date(&self.date_updated))
            .or_else(|| date_from_url(&link));

        Some(NewsItem {
            title,
            description,
            link,
            published,
            published_display: display_date(published),
            source: source.name.clone(),
            category: Some(source.category.clone()),
            original_title: None,
            original_description: None,
        })
    }
}

fn field_for(local_name: &[u8]) -> Field {
    match local_name {
        b"title" => Field::Title,
        b"description" | b"summary" => Field::Description,
        b"encoded" | b"content" => Field::ContentEncoded,
        b"pubDate" | b"published" | b"date" => Field::DatePublished,
        b"updated" => Field::DateUpdated,
        b"link" => Field::Link,
        _ => Field::Other,
    }
}

/// Parse a feed document into normalized items for `source`.
///
/// Handles RSS `<item>` and Atom `<entry>` element lists. Entries missing
/// both title and link are skipped. Returns whatever was collected when the
/// document turns out to be malformed mid-stream.
pub fn parse_feed(xml: &str, source: &Source) -> Vec<NewsItem> {
    let mut reader = Reader::from_str(xml);

    let mut items = Vec::new();
    let mut draft: Option<Draft> = None;
    let mut field = Field::Other;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name_buf = e.local_name().as_ref().to_vec();
                if name_buf == b"item" || name_buf == b"entry" {
                    draft = Some(Draft::default());
                    field = Field::Other;
                } else if draft.is_some() {
                    field = field_for(&name_buf);
                }
            }
            Ok(Event::Empty(e)) => {
                // Atom carries the link as <link href="..."/>.
                if let Some(d) = draft.as_mut()
                    && e.local_name().as_ref() == b"link"
                    && d.link.is_empty()
                {
                    let rel = e
                        .try_get_attribute("rel")
                        .ok()
                        .flatten()
                        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()));
                    let is_alternate = rel.as_deref().is_none_or(|r| r == "alternate");
                    if is_alternate
                        && let Ok(Some(href)) = e.try_get_attribute("href")
                        && let Ok(value) = href.unescape_value()
                    {
                        d.link = value.into_owned();
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(d) = draft.as_mut()
                    && let Some(buf) = d.buffer_mut(field)
                {
                    buf.push_str(&e.decode().unwrap_or_default());
                }
            }
            Ok(Event::GeneralRef(e)) => {
                // Entity references in text arrive as separate events.
                if let Some(d) = draft.as_mut()
                    && let Some(buf) = d.buffer_mut(field)
                    && let Some(resolved) = resolve_general_ref(e.as_ref())
                {
                    buf.push_str(&resolved);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(d) = draft.as_mut()
                    && let Some(buf) = d.buffer_mut(field)
                {
                    buf.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::End(e)) => {
                let name_buf = e.local_name().as_ref().to_vec();
                if name_buf == b"item" || name_buf == b"entry" {
                    if let Some(d) = draft.take()
                        && let Some(item) = d.into_item(source)
                    {
                        items.push(item);
                    }
                } else if field == field_for(&name_buf) {
                    field = Field::Other;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!(source = %source.name, error = %e, "malformed feed document; keeping items parsed so far");
                break;
            }
            _ => {}
        }
    }

    debug!(source = %source.name, count = items.len(), "parsed feed");
    items
}

/// Resolve one general entity reference (the bytes between `&` and `;`):
/// the five predefined XML entities plus numeric character references.
pub(crate) fn resolve_general_ref(raw: &[u8]) -> Option<String> {
    match raw {
        b"amp" => Some("&".to_string()),
        b"lt" => Some("<".to_string()),
        b"gt" => Some(">".to_string()),
        b"quot" => Some("\"".to_string()),
        b"apos" => Some("'".to_string()),
        _ => {
            let s = std::str::from_utf8(raw).ok()?;
            let code = if let Some(hex) = s.strip_prefix("#x").or_else(|| s.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()?
            } else if let Some(dec) = s.strip_prefix('#') {
                dec.parse().ok()?
            } else {
                return None;
            };
            char::from_u32(code).map(String::from)
        }
    }
}

/// Strip HTML markup from a text field and collapse whitespace.
///
/// The input has already been XML-unescaped, so what remains is either plain
/// text or an HTML fragment (common in `<description>` payloads).
pub fn strip_markup(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if !trimmed.contains('<') && !trimmed.contains('&') {
        return trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    }
    let fragment = scraper::Html::parse_fragment(trimmed);
    fragment
        .root_element()
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a feed timestamp into UTC.
///
/// Providers disagree on formats; RFC 2822 (RSS) and RFC 3339 (Atom) cover
/// almost everything, with a couple of lenient fallbacks for the rest.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    None
}

static URL_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(\d{4})[/-](\d{1,2})[/-](\d{1,2})(?:/|$)").unwrap());

/// Recover a publish date from URL path segments like `/2026/08/05/slug`.
///
/// Last resort when the entry carries no parseable date element; noon UTC is
/// used since the path encodes no time of day.
pub fn date_from_url(link: &str) -> Option<DateTime<Utc>> {
    let caps = URL_DATE.captures(link)?;
    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    let month: u32 = caps.get(2)?.as_str().parse().ok()?;
    let day: u32 = caps.get(3)?.as_str().parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.and_hms_opt(12, 0, 0)?.and_utc())
}

/// Render the display form of a publish timestamp.
pub fn display_date(published: Option<DateTime<Utc>>) -> String {
    published
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn source() -> Source {
        Source::new("Test Wire", "https://example.com/rss.xml", "World")
    }

    const RSS_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Channel Title Is Not An Item</title>
    <item>
      <title>First &amp; Foremost</title>
      <link>https://example.com/1</link>
      <description><![CDATA[<p>Lead <b>paragraph</b> here.</p>]]></description>
      <pubDate>Mon, 03 Aug 2026 10:30:00 +0000</pubDate>
    </item>
    <item>
      <title>Second Story</title>
      <link>https://example.com/2</link>
      <description>Plain summary</description>
      <pubDate>not-a-real-date</pubDate>
    </item>
    <item>
      <description>No title and no link, dropped</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_rss_items() {
        let items = parse_feed(RSS_SAMPLE, &source());
        assert_eq!(items.len(), 2, "entry with neither title nor link is skipped");

        assert_eq!(items[0].title, "First & Foremost");
        assert_eq!(items[0].description, "Lead paragraph here.");
        assert_eq!(items[0].link, "https://example.com/1");
        assert_eq!(
            items[0].published,
            Some(Utc.with_ymd_and_hms(2026, 8, 3, 10, 30, 0).unwrap())
        );
        assert_eq!(items[0].published_display, "2026-08-03 10:30 UTC");
        assert_eq!(items[0].source, "Test Wire");
        assert_eq!(items[0].category.as_deref(), Some("World"));

        assert!(items[1].published.is_none(), "unparseable date degrades to None");
        assert_eq!(items[1].published_display, "");
    }

    #[test]
    fn test_parse_atom_entries() {
        let xml = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Feed Title</title>
  <updated>2026-08-01T00:00:00Z</updated>
  <entry>
    <title>Atom Entry</title>
    <link rel="alternate" href="https://example.com/atom/1"/>
    <summary>Atom summary text</summary>
    <published>2026-08-02T08:00:00Z</published>
    <updated>2026-08-02T09:00:00Z</updated>
  </entry>
</feed>"#;
        let items = parse_feed(xml, &source());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].link, "https://example.com/atom/1");
        assert_eq!(
            items[0].published,
            Some(Utc.with_ymd_and_hms(2026, 8, 2, 8, 0, 0).unwrap()),
            "published wins over updated"
        );
    }

    #[test]
    fn test_atom_self_link_not_taken() {
        let xml = r#"<feed><entry>
            <title>Entry</title>
            <link rel="self" href="https://example.com/feed.xml"/>
            <link rel="alternate" href="https://example.com/story"/>
        </entry></feed>"#;
        let items = parse_feed(&xml, &source());
        assert_eq!(items[0].link, "https://example.com/story");
    }

    #[test]
    fn test_date_recovered_from_url_path() {
        let xml = r#"<rss><channel><item>
            <title>Dated By Path</title>
            <link>https://example.com/2026/08/05/story-slug</link>
        </item></channel></rss>"#;
        let items = parse_feed(xml, &source());
        assert_eq!(
            items[0].published,
            Some(Utc.with_ymd_and_hms(2026, 8, 5, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_truncated_document_keeps_parsed_items() {
        let truncated = r#"<rss><channel>
            <item><title>Complete</title><link>https://example.com/a</link></item>
            <item><title>Cut off</title><li"#;
        let items = parse_feed(truncated, &source());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Complete");
    }

    #[test]
    fn test_resolve_general_ref() {
        assert_eq!(resolve_general_ref(b"amp").as_deref(), Some("&"));
        assert_eq!(resolve_general_ref(b"lt").as_deref(), Some("<"));
        assert_eq!(resolve_general_ref(b"#8217").as_deref(), Some("\u{2019}"));
        assert_eq!(resolve_general_ref(b"#x2019").as_deref(), Some("\u{2019}"));
        assert_eq!(resolve_general_ref(b"nosuchentity"), None);
    }

    #[test]
    fn test_strip_markup() {
        assert_eq!(strip_markup("<p>Hello <b>world</b>!</p>"), "Hello world!");
        assert_eq!(strip_markup("already   plain\n text"), "already plain text");
        assert_eq!(strip_markup("A &amp; B"), "A & B");
        assert_eq!(strip_markup("  "), "");
    }

    #[test]
    fn test_parse_date_formats() {
        assert!(parse_date("Tue, 04 Aug 2026 12:00:00 GMT").is_some());
        assert!(parse_date("2026-08-04T12:00:00+02:00").is_some());
        assert!(parse_date("2026-08-04 12:00:00").is_some());
        assert!(parse_date("2026-08-04").is_some());
        assert!(parse_date("next Tuesday").is_none());
        assert!(parse_date("").is_none());
    }

    #[test]
    fn test_display_date_round_trips_through_chrono() {
        let dt = Utc.with_ymd_and_hms(2026, 1, 15, 23, 5, 0).unwrap();
        assert_eq!(display_date(Some(dt)), "2026-01-15 23:05 UTC");
        assert_eq!(display_date(None), "");
    }
}
