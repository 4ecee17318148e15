//! Channel configuration and stream URL derivation.

use thiserror::Error;
use url::Url;

use crate::{BackoffPolicy, SessionKey};

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid base URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Missing {0} identifier")]
    MissingIdentifier(&'static str),
}

/// Configuration for one session channel.
///
/// The base URL replaces any ambient page origin: its scheme picks the
/// security level and its host (and port) the server.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Origin of the backend, e.g. `https://example.com`.
    pub base_url: Url,
    /// Project identifier.
    pub project: String,
    /// Session identifier.
    pub session: String,
    /// Whether a socket carries exactly one session's traffic.
    pub session_scoped: bool,
    /// Reconnection schedule.
    pub backoff: BackoffPolicy,
}

impl ChannelConfig {
    /// Create a configuration with default backoff and session scoping.
    #[must_use]
    pub fn new(base_url: Url, project: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            base_url,
            project: project.into(),
            session: session.into(),
            session_scoped: true,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Parse the base URL and create a configuration.
    ///
    /// # Errors
    /// Returns error if the URL cannot be parsed.
    pub fn parse(
        base_url: &str,
        project: impl Into<String>,
        session: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(Url::parse(base_url)?, project, session))
    }

    /// Override session scoping.
    #[must_use]
    pub fn with_session_scoped(mut self, session_scoped: bool) -> Self {
        self.session_scoped = session_scoped;
        self
    }

    /// Override the backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Store key addressed by this channel.
    #[must_use]
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.project.clone(), self.session.clone())
    }

    /// Derive the streaming endpoint.
    ///
    /// `https`/`wss` map to `wss`, `http`/`ws` to `ws`. The path becomes
    /// `/api/projects/{project}/sessions/{session}/ws`.
    ///
    /// # Errors
    /// Returns error on an unsupported scheme or an empty identifier.
    pub fn stream_url(&self) -> Result<Url, ConfigError> {
        if self.project.is_empty() {
            return Err(ConfigError::MissingIdentifier("project"));
        }
        if self.session.is_empty() {
            return Err(ConfigError::MissingIdentifier("session"));
        }

        let scheme = match self.base_url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };

        let mut url = self.base_url.clone();
        url.set_scheme(scheme)
            .map_err(|()| ConfigError::UnsupportedScheme(self.base_url.scheme().to_string()))?;
        url.set_path(&format!(
            "/api/projects/{}/sessions/{}/ws",
            self.project, self.session
        ));
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }
}
