//! Fetching one target URL through a public relay endpoint.
//!
//! Feed providers do not allow cross-origin requests, so every fetch goes
//! through one of several public reverse-proxy relays. Relays differ in two
//! ways that matter here:
//!
//! - the request URL template (where the target URL is embedded), and
//! - the response envelope: some return the upstream body as raw text,
//!   others wrap it in a JSON object with a `contents` field.
//!
//! Both travel together in a [`Relay`] descriptor so that adding or
//! reordering relays can never mismatch a template with the wrong envelope
//! handling.
//!
//! # Architecture
//!
//! The module uses a trait-based design for flexibility:
//! - [`RelayTransport`]: Core trait for issuing one bounded-timeout HTTP GET
//! - [`HttpTransport`]: Production implementation over a shared `reqwest` client
//!
//! Callers distinguish rate-limit signals from other failures via
//! [`RelayError::RateLimited`], which lets the fallback chain skip to the
//! next relay immediately instead of entering a generic retry path.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, instrument, warn};

/// Default bound on one relay attempt. Load-bearing: the aggregation cycle
/// waits for every source to settle, so an unbounded attempt would stall
/// the whole snapshot.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(4);

/// How a relay wraps the upstream response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    /// Body is the upstream document as-is.
    RawText,
    /// Body is a JSON object `{"contents": "..."}` holding the document.
    JsonContents,
}

/// One relay endpoint: request-URL template plus response envelope.
#[derive(Debug, Clone)]
pub struct Relay {
    /// Short name used in logs.
    pub name: &'static str,
    /// Request template containing a `{url}` placeholder for the
    /// percent-encoded target.
    pub template: &'static str,
    /// Response format of this relay.
    pub envelope: Envelope,
}

impl Relay {
    /// Build the relay request URL for `target`.
    pub fn request_url(&self, target: &str) -> String {
        self.template.replace("{url}", &urlencoding::encode(target))
    }
}

/// The ordered fallback chain. First entry is tried first; order is part of
/// the contract (a later relay is only reached when an earlier one failed).
pub fn default_relays() -> Vec<Relay> {
    vec![
        Relay {
            name: "allorigins",
            template: "https://api.allorigins.win/get?url={url}",
            envelope: Envelope::JsonContents,
        },
        Relay {
            name: "corsproxy",
            template: "https://corsproxy.io/?url={url}",
            envelope: Envelope::RawText,
        },
        Relay {
            name: "codetabs",
            template: "https://api.codetabs.com/v1/proxy?quest={url}",
            envelope: Envelope::RawText,
        },
    ]
}

/// Failure classes a relay attempt can produce.
///
/// `RateLimited` is deliberately distinct: the caller skips to the next
/// relay without delay, while backoff is applied only at the cycle level.
#[derive(Debug)]
pub enum RelayError {
    /// The relay answered HTTP 429.
    RateLimited { relay: String },
    /// Any other non-success HTTP status.
    Status { relay: String, status: u16 },
    /// The attempt exceeded its timeout and was aborted.
    Timeout { relay: String },
    /// Connection-level failure (DNS, TLS, reset, ...).
    Network(String),
    /// The response envelope could not be decoded.
    Envelope(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited { relay } => write!(f, "relay {relay} rate limited (429)"),
            Self::Status { relay, status } => write!(f, "relay {relay} returned HTTP {status}"),
            Self::Timeout { relay } => write!(f, "relay {relay} timed out"),
            Self::Network(msg) => write!(f, "network error: {msg}"),
            Self::Envelope(msg) => write!(f, "bad relay envelope: {msg}"),
        }
    }
}

impl Error for RelayError {}

impl RelayError {
    /// True when the fallback chain should move on without any delay.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Trait for issuing one HTTP GET with a bounded timeout.
///
/// Implementors return the status code and body text; interpreting the
/// status and envelope stays in [`fetch_through_relay`] so tests can script
/// responses without a network.
pub trait RelayTransport {
    fn get(
        &self,
        url: &str,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<(u16, String), RelayError>> + Send;
}

/// Production transport over a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl RelayTransport for HttpTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<(u16, String), RelayError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RelayError::Timeout {
                        relay: url.to_string(),
                    }
                } else {
                    RelayError::Network(e.to_string())
                }
            })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| RelayError::Network(e.to_string()))?;
        Ok((status, body))
    }
}

#[derive(Deserialize)]
struct JsonEnvelope {
    contents: String,
}

/// Fetch `target` through `relay`, returning the upstream document body.
///
/// # Errors
///
/// - [`RelayError::RateLimited`] on HTTP 429, so the caller can skip to the
///   next relay immediately
/// - [`RelayError::Status`] on any other non-2xx status
/// - [`RelayError::Timeout`] / [`RelayError::Network`] on transport failure
/// - [`RelayError::Envelope`] when a JSON-wrapped response does not decode
///
/// No state is touched beyond the network call; caching happens upstream.
#[instrument(level = "debug", skip_all, fields(relay = relay.name, %target))]
pub async fn fetch_through_relay<T: RelayTransport>(
    transport: &T,
    relay: &Relay,
    target: &str,
    timeout: Duration,
) -> Result<String, RelayError> {
    let request_url = relay.request_url(target);
    let (status, body) = transport.get(&request_url, timeout).await?;

    if status == 429 {
        warn!(relay = relay.name, "rate limited");
        return Err(RelayError::RateLimited {
            relay: relay.name.to_string(),
        });
    }
    if !(200..300).contains(&status) {
        return Err(RelayError::Status {
            relay: relay.name.to_string(),
            status,
        });
    }

    let document = match relay.envelope {
        Envelope::RawText => body,
        Envelope::JsonContents => {
            let wrapped: JsonEnvelope = serde_json::from_str(&body)
                .map_err(|e| RelayError::Envelope(format!("{} ({e})", relay.name)))?;
            wrapped.contents
        }
    };
    debug!(relay = relay.name, bytes = document.len(), "relay fetch ok");
    Ok(document)
}
