//! Share Codec: reversible, URL-safe tokens for a `SourceBundle`.
//!
//! A token is the unpadded URL-safe base64 of the bundle's UTF-8 JSON
//! (`{"html":..,"css":..,"js":..}`), so it can sit in a query string as-is and
//! carries any Unicode text the editors produce.

use crate::{Error, Result, SourceBundle};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use std::fmt;

/// Query parameter that carries the token in share URLs
pub const SHARE_PARAM: &str = "code";

/// Opaque share token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShareToken(String);

impl ShareToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ShareToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShareToken {
    fn from(s: &str) -> Self {
        ShareToken(s.to_string())
    }
}

/// Encode a bundle into a share token.
pub fn encode(bundle: &SourceBundle) -> ShareToken {
    // Serializing three strings cannot fail.
    let json = serde_json::to_vec(bundle).unwrap_or_default();
    ShareToken(URL_SAFE_NO_PAD.encode(json))
}

/// Decode a share token back into a bundle.
///
/// Also accepts legacy tokens: standard base64 wrapping a percent-encoded JSON
/// string. Missing fields decode as empty panes.
pub fn decode(token: &str) -> Result<SourceBundle> {
    let token = token.trim();
    if token.is_empty() {
        return Err(Error::Decode("empty token".into()));
    }

    let unpadded = token.trim_end_matches('=');
    if let Ok(bytes) = URL_SAFE_NO_PAD.decode(unpadded) {
        if let Ok(bundle) = serde_json::from_slice::<SourceBundle>(&bytes) {
            return Ok(bundle);
        }
    }

    decode_legacy(token)
}

fn decode_legacy(token: &str) -> Result<SourceBundle> {
    let bytes = STANDARD
        .decode(token)
        .map_err(|e| Error::Decode(format!("invalid base64: {}", e)))?;
    let escaped = String::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid text: {}", e)))?;
    // encodeURIComponent output has no raw '&', '=' or '+', so it parses as a single key.
    let json = url::form_urlencoded::parse(escaped.as_bytes())
        .next()
        .map(|(k, _)| k.into_owned())
        .unwrap_or_default();
    serde_json::from_str::<SourceBundle>(&json).map_err(|e| Error::Decode(format!("invalid payload: {}", e)))
}

/// Build `<origin><path>?code=<token>` from the page URL, replacing any
/// existing token and keeping other query parameters.
pub fn share_url(base: &str, token: &ShareToken) -> Result<String> {
    let mut url = url::Url::parse(base).map_err(|e| Error::Other(format!("invalid base URL {}: {}", base, e)))?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != SHARE_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.set_fragment(None);
    {
        let mut q = url.query_pairs_mut();
        q.clear();
        for (k, v) in &kept {
            q.append_pair(k, v);
        }
        q.append_pair(SHARE_PARAM, token.as_str());
    }
    Ok(url.to_string())
}

/// Pull the share token out of a page URL, if it has one.
pub fn token_from_url(page: &str) -> Option<ShareToken> {
    let url = url::Url::parse(page).ok()?;
    let value = url
        .query_pairs()
        .find(|(k, _)| k == SHARE_PARAM)
        .map(|(_, v)| v.into_owned())?;
    Some(ShareToken(value))
}
