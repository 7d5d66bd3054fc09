//! Parsing of administrative session references.
//!
//! Operators paste whatever they have at hand: a bare session id, or the
//! checkout URL the buyer was sent to. Both resolve to the same session id;
//! anything else is rejected before storage is touched.

use common::SessionId;
use url::Url;

use crate::error::{LifecycleError, Result};

const SESSION_PREFIX: &str = "cs_";
const MIN_SUFFIX_LEN: usize = 8;

/// A resolved reference to a checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionReference {
    /// The input was the identifier itself.
    Raw(SessionId),
    /// The identifier was found inside a checkout URL.
    Url { url: Url, session_id: SessionId },
}

impl SessionReference {
    /// Resolves `input` to a session reference.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(malformed("reference is empty"));
        }

        let lowered = input.to_ascii_lowercase();
        if lowered.starts_with("http://") || lowered.starts_with("https://") {
            return Self::parse_url(input);
        }

        if is_session_id(input) {
            return Ok(SessionReference::Raw(SessionId::new(input)));
        }

        Err(malformed(format!(
            "'{input}' is neither a checkout session id ({SESSION_PREFIX}...) nor a checkout URL"
        )))
    }

    fn parse_url(input: &str) -> Result<Self> {
        let url = Url::parse(input).map_err(|err| malformed(format!("invalid URL: {err}")))?;

        let from_path = url
            .path_segments()
            .and_then(|mut segments| segments.find(|segment| is_session_id(segment)))
            .map(str::to_string);
        let from_fragment = || {
            url.fragment().and_then(|fragment| {
                fragment
                    .split(['/', '&', '=', '?'])
                    .find(|token| is_session_id(token))
                    .map(str::to_string)
            })
        };

        match from_path.or_else(from_fragment) {
            Some(id) => Ok(SessionReference::Url {
                session_id: SessionId::new(id),
                url,
            }),
            None => Err(malformed(format!(
                "no checkout session id found in URL '{input}'"
            ))),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        match self {
            SessionReference::Raw(session_id) => session_id,
            SessionReference::Url { session_id, .. } => session_id,
        }
    }

    pub fn into_session_id(self) -> SessionId {
        match self {
            SessionReference::Raw(session_id) => session_id,
            SessionReference::Url { session_id, .. } => session_id,
        }
    }
}

fn is_session_id(candidate: &str) -> bool {
    candidate.strip_prefix(SESSION_PREFIX).is_some_and(|suffix| {
        suffix.len() >= MIN_SUFFIX_LEN
            && suffix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

fn malformed(message: impl Into<String>) -> LifecycleError {
    LifecycleError::MalformedReference(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_raw_identifier() {
        let reference = SessionReference::parse("  cs_test_a1B2c3D4  ").unwrap();
        assert_eq!(reference, SessionReference::Raw(SessionId::new("cs_test_a1B2c3D4")));
    }

    #[test]
    fn extracts_identifier_from_checkout_url() {
        let reference = SessionReference::parse(
            "https://checkout.example.com/c/pay/cs_live_a1B2c3D4e5#fidkdWxOYHwnPyd1blpxYHZxWjA0",
        )
        .unwrap();
        assert_eq!(reference.session_id().as_str(), "cs_live_a1B2c3D4e5");
        assert!(matches!(reference, SessionReference::Url { .. }));
    }

    #[test]
    fn extracts_identifier_from_fragment() {
        let reference = SessionReference::parse(
            "https://dashboard.example.com/payments#session=cs_test_00000000",
        )
        .unwrap();
        assert_eq!(reference.into_session_id(), SessionId::new("cs_test_00000000"));
    }

    #[test]
    fn rejects_identifier_that_is_too_short() {
        let err = SessionReference::parse("cs_1234").unwrap_err();
        assert!(matches!(err, LifecycleError::MalformedReference(_)));
    }

    #[test]
    fn rejects_identifier_with_foreign_characters() {
        assert!(SessionReference::parse("cs_test_abc-defgh").is_err());
        assert!(SessionReference::parse("pi_3MtwBwLkdIwHu7ix").is_err());
    }

    #[test]
    fn rejects_url_without_identifier() {
        let err = SessionReference::parse("https://checkout.example.com/c/pay/").unwrap_err();
        assert!(err.to_string().contains("no checkout session id"));
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        assert!(SessionReference::parse("ftp://host/cs_test_a1B2c3D4").is_err());
        assert!(SessionReference::parse("https://").is_err());
        assert!(SessionReference::parse("").is_err());
    }
}
