//! Opportunistic LLM advisor with a one-way availability latch.
//!
//! The oracle is consulted for two things only: prior-release candidates
//! when an upgrade fails, and a one-sentence summary of opaque installer
//! errors. Replies are parsed leniently and the agent keeps working when
//! the oracle is slow, wrong, or gone.

use std::env;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

/// Outcome of one oracle round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleReply {
    Text(String),
    /// The provider reported quota exhaustion; trips the circuit breaker.
    QuotaExhausted,
    /// Any other failure. The call is wasted but the oracle stays usable.
    Failed,
}

/// Text-in / text-out advisor.
pub trait Oracle {
    fn generate(&self, prompt: &str) -> OracleReply;
}

/// Gemini `generateContent` client.
pub struct GeminiOracle {
    client: reqwest::blocking::Client,
    model: String,
    key: String,
}

impl GeminiOracle {
    /// Build a client from `GEMINI_API_KEY`; `None` when the key is unset.
    pub fn from_env(model: &str) -> Option<Self> {
        let key = env::var("GEMINI_API_KEY").ok()?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .ok()?;
        Some(GeminiOracle {
            client,
            model: model.to_owned(),
            key,
        })
    }
}

impl Oracle for GeminiOracle {
    fn generate(&self, prompt: &str) -> OracleReply {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.key
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });
        let response = match self.client.post(&url).json(&body).send() {
            Ok(response) => response,
            Err(err) => {
                log::debug!("oracle request failed: {err}");
                return OracleReply::Failed;
            }
        };
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return OracleReply::QuotaExhausted;
        }
        if !response.status().is_success() {
            log::debug!("oracle returned {}", response.status());
            return OracleReply::Failed;
        }
        let payload: serde_json::Value = match response.json() {
            Ok(payload) => payload,
            Err(err) => {
                log::debug!("unreadable oracle payload: {err}");
                return OracleReply::Failed;
            }
        };
        match extract_reply_text(&payload) {
            Some(text) => OracleReply::Text(text),
            None => OracleReply::Failed,
        }
    }
}

fn extract_reply_text(payload: &serde_json::Value) -> Option<String> {
    let parts = payload
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(|text| text.as_str()))
        .collect();
    (!text.is_empty()).then_some(text)
}

/// One-way latch around an optional oracle: available until the first quota
/// exhaustion, never back. From then on every query returns empty without
/// further I/O.
pub struct OracleHandle<'o> {
    oracle: Option<&'o dyn Oracle>,
    available: bool,
}

impl<'o> OracleHandle<'o> {
    pub fn new(oracle: Option<&'o dyn Oracle>) -> Self {
        OracleHandle {
            available: oracle.is_some(),
            oracle,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    fn trip_breaker(&mut self) {
        log::warn!("oracle quota exhausted; continuing without it");
        self.available = false;
    }

    /// Up to `limit` releases of `package` older than `failed`, newest
    /// first. Malformed replies count as no suggestions.
    pub fn version_candidates(
        &mut self,
        package: &str,
        failed: &str,
        limit: usize,
    ) -> Vec<String> {
        if !self.available {
            return Vec::new();
        }
        let Some(oracle) = self.oracle else {
            return Vec::new();
        };
        let prompt = format!(
            "Give a JSON list of the {limit} most recent previous release versions of the \
             Python package '{package}', starting from the version just before '{failed}'. \
             The list must be in descending order. Respond ONLY with the list."
        );
        match oracle.generate(&prompt) {
            OracleReply::Text(reply) => parse_version_list(&reply),
            OracleReply::QuotaExhausted => {
                self.trip_breaker();
                Vec::new()
            }
            OracleReply::Failed => Vec::new(),
        }
    }

    /// One-sentence root cause of an installer error, or `None` when the
    /// oracle cannot be consulted at all.
    pub fn summarize_error(&mut self, error_log: &str) -> Option<String> {
        if !self.available {
            return None;
        }
        let oracle = self.oracle?;
        let prompt = format!(
            "The following is a Python pip install error log. Summarize the root cause of \
             the conflict in a single, concise sentence. Error log: --- {error_log} ---"
        );
        match oracle.generate(&prompt) {
            OracleReply::Text(text) => Some(text.trim().replace('\n', " ")),
            OracleReply::QuotaExhausted => {
                self.trip_breaker();
                None
            }
            OracleReply::Failed => Some("Failed to get summary from LLM.".to_owned()),
        }
    }
}

static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[(.*?)\]").expect("valid regex"));

/// Extract the first bracketed literal from a reply and split it into
/// version strings. Any structural deviation yields the empty list.
pub fn parse_version_list(reply: &str) -> Vec<String> {
    let Some(cap) = BRACKETED.captures(reply) else {
        return Vec::new();
    };
    cap[1]
        .split(',')
        .map(|item| {
            item.trim()
                .trim_matches(|c| c == '"' || c == '\'')
                .trim()
                .to_owned()
        })
        .filter(|item| !item.is_empty())
        .collect()
}
