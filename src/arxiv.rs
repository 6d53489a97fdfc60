//! Paper-search provider client.
//!
//! One configured source is not an RSS endpoint at all: it queries the arXiv
//! search API, which speaks its own Atom dialect with `<author>` and
//! `<category>` substructure per entry. This module owns that whole path:
//! building the query from a fixed topic allowlist, fetching it directly
//! (no relay chain; the API allows cross-origin reads), and folding authors
//! and subject tags into the normalized record.
//!
//! Subject tags are mapped onto the application's category taxonomy with a
//! fixed lookup; unknown tags land in the default category.

use std::error::Error;

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{info, instrument, warn};

use crate::feed::{display_date, parse_date, strip_markup};
use crate::models::{NewsItem, Source};
use crate::relay::{ATTEMPT_TIMEOUT, RelayTransport};

const API_ENDPOINT: &str = "https://export.arxiv.org/api/query";

/// Topic categories included in the query, newest submissions first.
const TOPIC_ALLOWLIST: &[&str] = &["cs.AI", "cs.LG", "cs.CL", "cs.CV", "stat.ML"];

/// Upper bound on entries per query.
const MAX_RESULTS: usize = 25;

/// Fallback when a subject tag is not in the taxonomy table.
const DEFAULT_CATEGORY: &str = "Science";

/// Map a provider subject tag onto the application taxonomy.
pub fn map_subject_tag(term: &str) -> &'static str {
    let group = term.split('.').next().unwrap_or(term);
    match group {
        "cs" | "stat" | "eess" => "Technology",
        "econ" | "q-fin" => "Business",
        "math" | "physics" | "astro-ph" | "quant-ph" | "cond-mat" | "q-bio" => "Science",
        _ => DEFAULT_CATEGORY,
    }
}

/// Build the search query URL for the fixed topic allowlist.
pub fn query_url() -> String {
    let search = TOPIC_ALLOWLIST
        .iter()
        .map(|cat| format!("cat:{cat}"))
        .collect::<Vec<_>>()
        .join(" OR ");
    format!(
        "{API_ENDPOINT}?search_query={}&sortBy=submittedDate&sortOrder=descending&max_results={MAX_RESULTS}",
        urlencoding::encode(&search)
    )
}

/// Fetch the latest papers and normalize them into [`NewsItem`]s.
///
/// # Errors
///
/// Propagates transport failures and non-success statuses; the source
/// fetcher funnels those into an empty per-source result like any other
/// provider failure.
#[instrument(level = "info", skip_all, fields(source = %source.name))]
pub async fn fetch_papers<T: RelayTransport>(
    transport: &T,
    source: &Source,
) -> Result<Vec<NewsItem>, Box<dyn Error + Send + Sync>> {
    let url = query_url();
    let (status, body) = transport.get(&url, ATTEMPT_TIMEOUT).await?;
    if !(200..300).contains(&status) {
        return Err(format!("paper-search API returned HTTP {status}").into());
    }
    let papers = parse_papers(&body, source);
    info!(count = papers.len(), "fetched paper-search entries");
    Ok(papers)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Summary,
    AuthorName,
    Id,
    Published,
    Updated,
    Other,
}

#[derive(Default)]
struct PaperDraft {
    title: String,
    summary: String,
    authors: Vec<String>,
    terms: Vec<String>,
    link: String,
    id: String,
    published: String,
    updated: String,
}

impl PaperDraft {
    fn append(&mut self, field: Field, text: &str) {
        match field {
            Field::Title => self.title.push_str(text),
            Field::Summary => self.summary.push_str(text),
            Field::AuthorName => {
                if let Some(last) = self.authors.last_mut() {
                    last.push_str(text);
                }
            }
            Field::Id => self.id.push_str(text),
            Field::Published => self.published.push_str(text),
            Field::Updated => self.updated.push_str(text),
            Field::Other => {}
        }
    }

    fn into_item(self, source: &Source) -> Option<NewsItem> {
        let title = strip_markup(&self.title);
        let link = if self.link.is_empty() { self.id.trim().to_string() } else { self.link };
        if title.is_empty() && link.is_empty() {
            return None;
        }

        // Authors and subject tags fold into the description.
        let summary = strip_markup(&self.summary);
        let authors: Vec<&str> = self
            .authors
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .collect();
        let mut description = String::new();
        if !authors.is_empty() {
            description.push_str("By ");
            description.push_str(&authors.join(", "));
            description.push_str(". ");
        }
        description.push_str(&summary);
        if !self.terms.is_empty() {
            description.push_str(" [");
            description.push_str(&self.terms.join(", "));
            description.push(']');
        }

        let category = self
            .terms
            .first()
            .map(|t| map_subject_tag(t))
            .unwrap_or(DEFAULT_CATEGORY);
        let published = parse_date(&self.published).or_else(|| parse_date(&self.updated));

        Some(NewsItem {
            title,
            description: description.trim().to_string(),
            link,
            published,
            published_display: display_date(published),
            source: source.name.clone(),
            category: Some(category.to_string()),
            original_title: None,
            original_description: None,
        })
    }
}

/// Parse the provider's Atom dialect.
///
/// Tolerant like the generic feed parser: a document that breaks mid-stream
/// yields the entries collected so far.
pub fn parse_papers(xml: &str, source: &Source) -> Vec<NewsItem> {
    let mut reader = Reader::from_str(xml);

    let mut papers = Vec::new();
    let mut draft: Option<PaperDraft> = None;
    let mut field = Field::Other;
    let mut in_author = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"entry" => {
                    draft = Some(PaperDraft::default());
                    field = Field::Other;
                    in_author = false;
                }
                b"author" if draft.is_some() => {
                    in_author = true;
                    if let Some(d) = draft.as_mut() {
                        d.authors.push(String::new());
                    }
                }
                b"name" if in_author => field = Field::AuthorName,
                b"title" if draft.is_some() => field = Field::Title,
                b"summary" if draft.is_some() => field = Field::Summary,
                b"id" if draft.is_some() => field = Field::Id,
                b"published" if draft.is_some() => field = Field::Published,
                b"updated" if draft.is_some() => field = Field::Updated,
                _ => field = Field::Other,
            },
            Ok(Event::Empty(e)) => {
                let Some(d) = draft.as_mut() else { continue };
                match e.local_name().as_ref() {
                    b"category" => {
                        if let Ok(Some(term)) = e.try_get_attribute("term")
                            && let Ok(value) = term.unescape_value()
                        {
                            d.terms.push(value.into_owned());
                        }
                    }
                    b"link" => {
                        let rel = e
                            .try_get_attribute("rel")
                            .ok()
                            .flatten()
                            .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()));
                        if rel.as_deref().is_none_or(|r| r == "alternate")
                            && d.link.is_empty()
                            && let Ok(Some(href)) = e.try_get_attribute("href")
                            && let Ok(value) = href.unescape_value()
                        {
                            d.link = value.into_owned();
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                let Some(d) = draft.as_mut() else { continue };
                let text = e.decode().unwrap_or_default();
                d.append(field, &text);
            }
            Ok(Event::GeneralRef(e)) => {
                let Some(d) = draft.as_mut() else { continue };
                if let Some(resolved) = crate::feed::resolve_general_ref(e.as_ref()) {
                    d.append(field, &resolved);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"entry" => {
                    if let Some(d) = draft.take()
                        && let Some(paper) = d.into_item(source)
                    {
                        papers.push(paper);
                    }
                }
                b"author" => in_author = false,
                _ => field = Field::Other,
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!(error = %e, "malformed paper-search document; keeping entries parsed so far");
                break;
            }
            _ => {}
        }
    }

    papers
}
