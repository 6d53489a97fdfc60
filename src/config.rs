//! Source-list configuration.
//!
//! The source list is loaded exactly once at startup: either the compiled-in
//! defaults below or a YAML file of the same shape passed on the command
//! line. Exactly one default entry uses the paper-search sentinel instead of
//! a feed URL.
//!
//! ```yaml
//! sources:
//!   - name: BBC World
//!     url: https://feeds.bbci.co.uk/news/world/rss.xml
//!     category: World
//! ```

use std::error::Error;

use tracing::info;

use crate::models::{PAPER_SEARCH_SENTINEL, Source};

/// Compiled-in default source list.
pub fn default_sources() -> Vec<Source> {
    vec![
        Source::new("BBC World", "https://feeds.bbci.co.uk/news/world/rss.xml", "World"),
        Source::new("NPR News", "https://feeds.npr.org/1001/rss.xml", "World"),
        Source::new("Guardian World", "https://www.theguardian.com/world/rss", "World"),
        Source::new(
            "MIT Technology Review",
            "https://www.technologyreview.com/feed/",
            "Technology",
        ),
        Source::new(
            "NASA Breaking News",
            "https://www.nasa.gov/rss/dyn/breaking_news.rss",
            "Science",
        ),
        Source::new(
            "CNBC Top News",
            "https://www.cnbc.com/id/100003114/device/rss/rss.html",
            "Business",
        ),
        Source::new("ESPN", "https://www.espn.com/espn/rss/news", "Sports"),
        Source::new("arXiv", PAPER_SEARCH_SENTINEL, "Science"),
    ]
}

#[derive(serde::Deserialize)]
struct SourceList {
    sources: Vec<Source>,
}

/// Parse a YAML source list, rejecting entries whose URL is neither the
/// paper-search sentinel nor a valid http(s) endpoint.
pub fn parse_sources(yaml: &str) -> Result<Vec<Source>, Box<dyn Error + Send + Sync>> {
    let list: SourceList = serde_yaml::from_str(yaml)?;
    if list.sources.is_empty() {
        return Err("source list is empty".into());
    }
    for source in &list.sources {
        if source.is_paper_search() {
            continue;
        }
        let parsed = url::Url::parse(&source.url)
            .map_err(|e| format!("source {:?} has an unparseable url: {e}", source.name))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(format!("source {:?} is not an http(s) endpoint", source.name).into());
        }
    }
    Ok(list.sources)
}

/// Load the source list from `path`, or the defaults when none is given.
pub fn load_sources(path: Option<&str>) -> Result<Vec<Source>, Box<dyn Error + Send + Sync>> {
    match path {
        None => Ok(default_sources()),
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            let sources = parse_sources(&text)?;
            info!(path, count = sources.len(), "loaded source list");
            Ok(sources)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_category_once_loaded() {
        let sources = default_sources();
        assert!(!sources.is_empty());
        let sentinels = sources.iter().filter(|s| s.is_paper_search()).count();
        assert_eq!(sentinels, 1, "exactly one paper-search provider");
        for source in &sources {
            assert!(!source.name.is_empty());
            assert!(!source.category.is_empty());
        }
    }

    #[test]
    fn test_parse_sources_yaml() {
        let yaml = r#"
sources:
  - name: Example Wire
    url: https://example.com/rss.xml
    category: World
  - name: Papers
    url: paper-search
    category: Science
"#;
        let sources = parse_sources(yaml).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].name, "Example Wire");
        assert!(sources[1].is_paper_search());
    }

    #[test]
    fn test_parse_sources_rejects_empty_list() {
        assert!(parse_sources("sources: []").is_err());
    }

    #[test]
    fn test_parse_sources_rejects_malformed_yaml() {
        assert!(parse_sources("not: [valid").is_err());
    }

    #[test]
    fn test_parse_sources_rejects_non_http_urls() {
        let yaml = r#"
sources:
  - name: Broken
    url: ftp://example.com/feed
    category: World
"#;
        assert!(parse_sources(yaml).is_err());
    }

    #[test]
    fn test_load_sources_defaults_when_no_path() {
        let sources = load_sources(None).unwrap();
        assert_eq!(sources.len(), default_sources().len());
    }
}
