//! Error types shared by the eventcast server components.

use thiserror::Error;

/// Errors raised while rewriting an upstream HLS playlist.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaylistError {
    /// Upstream body does not start with `#EXTM3U`.
    #[error("Upstream body is not an HLS playlist")]
    NotAPlaylist,

    /// The playlist's own URL could not be parsed, so relative URIs cannot be resolved.
    #[error("Invalid playlist URL: {0}")]
    InvalidUrl(String),
}

/// Errors reported by a provider adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Credentials are missing, invalid or expired.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Network error talking to the provider.
    #[error("Provider request failed: {0}")]
    Fetch(String),

    /// Provider answered with something we could not understand.
    #[error("Failed to parse provider response: {0}")]
    Parse(String),

    /// No adapter is registered under this name.
    #[error("Unknown provider: {0}")]
    Unknown(String),

    /// The adapter exists but is switched off.
    #[error("Provider is disabled: {0}")]
    Disabled(String),
}

/// Errors surfaced by the stream session engine.
///
/// Every variant ends up as a 404 at the HTTP boundary; the variant decides
/// the diagnostic header and whether the channel session is invalidated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Nothing is scheduled, or the session/part does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Provider credentials were rejected while launching a session.
    #[error("Upstream authentication failed: {0}")]
    UpstreamAuth(String),

    /// Network, HTTP status or timeout error fetching upstream content.
    #[error("Upstream fetch failed: {0}")]
    UpstreamFetch(String),

    /// Upstream answered with something that is not a usable playlist.
    #[error("Malformed upstream playlist: {0}")]
    MalformedPlaylist(#[from] PlaylistError),

    /// Event store lookup failed.
    #[error("Event store error: {0}")]
    Store(String),
}

impl StreamError {
    /// Short failure domain, sent to clients in the `X-Tuner-Error` header.
    pub fn domain(&self) -> &'static str {
        match self {
            StreamError::NotFound(_) => "not-found",
            StreamError::UpstreamAuth(_) => "upstream-auth",
            StreamError::UpstreamFetch(_) => "upstream-fetch",
            StreamError::MalformedPlaylist(_) => "upstream-playlist",
            StreamError::Store(_) => "event-store",
        }
    }
}

impl From<ProviderError> for StreamError {
    fn from(value: ProviderError) -> Self {
        match value {
            ProviderError::Auth(msg) => StreamError::UpstreamAuth(msg),
            ProviderError::Fetch(msg) | ProviderError::Parse(msg) => StreamError::UpstreamFetch(msg),
            ProviderError::Unknown(name) => StreamError::NotFound(format!("no adapter for provider {}", name)),
            ProviderError::Disabled(name) => StreamError::NotFound(format!("provider {} is disabled", name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_mapping() {
        let err: StreamError = ProviderError::Auth("expired".into()).into();
        assert_eq!(err.domain(), "upstream-auth");

        let err: StreamError = ProviderError::Disabled("gotham".into()).into();
        assert!(matches!(err, StreamError::NotFound(_)));
    }

    #[test]
    fn test_playlist_error_domain() {
        let err = StreamError::from(PlaylistError::NotAPlaylist);
        assert_eq!(err.domain(), "upstream-playlist");
    }
}
