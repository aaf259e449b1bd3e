//! Bot token authentication.

use reqwest::RequestBuilder;

/// Bot credential sent as `Authorization: Bot <token>`.
///
/// The [`Debug`] impl redacts the token to keep it out of log output.
#[derive(Clone)]
pub struct BotToken(String);

impl BotToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token, for the streaming connection's identify payload.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("Bot {}", self.0)
    }

    /// Attach the authorization header to a request.
    #[must_use]
    pub fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header(reqwest::header::AUTHORIZATION, self.authorization_header())
    }
}

impl std::fmt::Debug for BotToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BotToken").field(&"[REDACTED]").finish()
    }
}
