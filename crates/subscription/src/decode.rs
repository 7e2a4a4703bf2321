//! Subscription blob decoding
//!
//! A subscription is base64 text that decodes to one record per line:
//!
//! ```text
//! ss://base64(method:password)@host:port#url-encoded-label
//! ```
//!
//! Providers pad subscriptions with informational records (quota remaining,
//! renewal date, new website) that look like relays but are not. Those are
//! filtered by label through an `IgnoreList`.

use std::collections::HashSet;
use std::sync::LazyLock;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use percent_encoding::percent_decode_str;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;
use crate::error::Result;

/// Labels of informational records that providers embed in subscriptions.
pub const DEFAULT_IGNORE: &[&str] = &["套餐到期", "剩余流量", "距离下次重置剩余", "新网址"];

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);

/// Standard alphabet, padding optional.
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);

/// URL-safe alphabet, padding optional. Some providers encode userinfo this way.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

static SS_RECORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ss://([A-Za-z0-9+/=_-]+)@([^@#\s]+:\d{1,5})#(.*)$")
        .expect("ss record pattern is valid")
});

/// Label patterns whose records are dropped during decoding.
#[derive(Debug, Clone)]
pub struct IgnoreList {
    patterns: Vec<Regex>,
}

impl IgnoreList {
    /// Compile an ignore list from regex sources.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// An ignore list that keeps every record.
    pub fn none() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Whether a label matches any pattern.
    pub fn is_ignored(&self, label: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(label))
    }
}

impl Default for IgnoreList {
    fn default() -> Self {
        Self::new(DEFAULT_IGNORE).expect("default ignore patterns are valid")
    }
}

/// Decode a base64 subscription into deduplicated endpoints.
///
/// Whitespace inside the blob (line-wrapped base64) is ignored. Lines that
/// aren't `ss://` records, or whose userinfo doesn't decode to
/// `method:password`, are skipped. Duplicates by identity keep their first
/// occurrence; output order follows the subscription.
pub fn decode(blob: &str, ignore: &IgnoreList) -> Result<Vec<Endpoint>> {
    let compact: String = blob.chars().filter(|c| !c.is_whitespace()).collect();
    let text = String::from_utf8(STANDARD_LENIENT.decode(compact)?)?;

    let mut seen = HashSet::new();
    let mut endpoints = Vec::new();
    let mut ignored = 0usize;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some(caps) = SS_RECORD.captures(line) else {
            debug!(line_len = line.len(), "skipping non-ss record");
            continue;
        };

        let Some((method, password)) = decode_userinfo(&caps[1]) else {
            warn!(server_addr = &caps[2], "skipping record with undecodable userinfo");
            continue;
        };
        let name = decode_label(&caps[3]);

        if ignore.is_ignored(&name) {
            debug!(name = %name, "skipping ignored record");
            ignored += 1;
            continue;
        }

        let endpoint = Endpoint::new(&caps[2], method, password, name);
        if seen.insert(endpoint.clone()) {
            endpoints.push(endpoint);
        } else {
            debug!(name = %endpoint.name, "skipping duplicate endpoint");
        }
    }

    info!(endpoints = endpoints.len(), ignored, "decoded subscription");
    Ok(endpoints)
}

/// Decode `base64(method:password)`, splitting on the first colon.
fn decode_userinfo(encoded: &str) -> Option<(String, String)> {
    let bytes = STANDARD_LENIENT
        .decode(encoded)
        .or_else(|_| URL_SAFE_LENIENT.decode(encoded))
        .ok()?;
    let text = String::from_utf8(bytes).ok()?;
    let (method, password) = text.split_once(':')?;
    if method.is_empty() {
        return None;
    }
    Some((method.to_string(), password.to_string()))
}

/// Form-URL decoding: `+` is a space, then percent escapes.
fn decode_label(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}
