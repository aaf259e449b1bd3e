//! Platform REST client (reqwest-based).

use crate::auth::BotToken;
use crate::error::{PlatformError, PlatformResult};
use crate::models::{
    ApiChannel, ApiErrorBody, ApiMember, ApiRole, CreateMessage, CurrentUser, GatewayBotInfo,
    MessageCreated,
};
use crate::retry::RetryPolicy;
use reqwest::{Client, StatusCode};
use rolesync_core::{ChannelId, GroupId, MemberId, RoleId};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Platform REST client.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct PlatformClient {
    /// Base URL of the REST API, without trailing slash.
    base_url: String,
    token: BotToken,
    http_client: Client,
    /// Applied to role mutations only.
    mutation_retry: RetryPolicy,
}

impl PlatformClient {
    pub fn new(base_url: &str, token: BotToken, timeout: Duration) -> PlatformResult<Self> {
        url::Url::parse(base_url)
            .map_err(|e| PlatformError::InvalidConfig(format!("Invalid base URL '{base_url}': {e}")))?;

        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("DiscordBot (rolesync, ", env!("CARGO_PKG_VERSION"), ")"))
            .build()
            .map_err(|e| {
                PlatformError::InvalidConfig(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self::with_http_client(base_url, token, http_client))
    }

    /// Create a client with a pre-built `reqwest::Client` (for testing).
    #[must_use]
    pub fn with_http_client(base_url: &str, token: BotToken, http_client: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            http_client,
            mutation_retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_mutation_retry(mut self, policy: RetryPolicy) -> Self {
        self.mutation_retry = policy;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn token(&self) -> &BotToken {
        &self.token
    }

    // ── Session ───────────────────────────────────────────────────────

    /// Validate the token by fetching the bot's own user.
    pub async fn current_user(&self) -> PlatformResult<CurrentUser> {
        self.get(&format!("{}/users/@me", self.base_url)).await
    }

    /// Streaming connection URL and recommended shard count.
    pub async fn gateway_bot(&self) -> PlatformResult<GatewayBotInfo> {
        self.get(&format!("{}/gateway/bot", self.base_url)).await
    }

    // ── Members ───────────────────────────────────────────────────────

    /// One page of the bulk member listing, single attempt.
    pub async fn list_members_page(
        &self,
        group_id: &GroupId,
        limit: u32,
        after: &str,
    ) -> PlatformResult<Vec<ApiMember>> {
        let url = format!("{}/guilds/{}/members", self.base_url, group_id);
        debug!(group_id = %group_id, limit, after, "Listing members page");
        let builder = self
            .http_client
            .get(&url)
            .query(&[("limit", limit.to_string()), ("after", after.to_string())]);
        let response = self.token.apply(builder).send().await?;
        self.handle_response(response).await
    }

    /// Grant a role. Succeeds when the member already has it.
    pub async fn add_member_role(
        &self,
        group_id: &GroupId,
        member_id: &MemberId,
        role_id: &RoleId,
    ) -> PlatformResult<()> {
        let url = self.member_role_url(group_id, member_id, role_id);
        self.mutation_retry
            .execute("add_member_role", || self.send_empty(self.http_client.put(&url)))
            .await
    }

    /// Revoke a role. Succeeds when the member already lacks it.
    pub async fn remove_member_role(
        &self,
        group_id: &GroupId,
        member_id: &MemberId,
        role_id: &RoleId,
    ) -> PlatformResult<()> {
        let url = self.member_role_url(group_id, member_id, role_id);
        self.mutation_retry
            .execute("remove_member_role", || {
                self.send_empty(self.http_client.delete(&url))
            })
            .await
    }

    fn member_role_url(&self, group_id: &GroupId, member_id: &MemberId, role_id: &RoleId) -> String {
        format!(
            "{}/guilds/{}/members/{}/roles/{}",
            self.base_url, group_id, member_id, role_id
        )
    }

    // ── Group structure ───────────────────────────────────────────────

    pub async fn guild_roles(&self, group_id: &GroupId) -> PlatformResult<Vec<ApiRole>> {
        self.get(&format!("{}/guilds/{}/roles", self.base_url, group_id))
            .await
    }

    pub async fn guild_channels(&self, group_id: &GroupId) -> PlatformResult<Vec<ApiChannel>> {
        self.get(&format!("{}/guilds/{}/channels", self.base_url, group_id))
            .await
    }

    // ── Messages ──────────────────────────────────────────────────────

    /// Post a message. Never retried.
    pub async fn create_message(
        &self,
        channel_id: &ChannelId,
        message: &CreateMessage,
    ) -> PlatformResult<MessageCreated> {
        self.post(
            &format!("{}/channels/{}/messages", self.base_url, channel_id),
            message,
        )
        .await
    }

    // ── Internal HTTP Methods ─────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, url: &str) -> PlatformResult<T> {
        debug!("GET {}", url);
        let builder = self.token.apply(self.http_client.get(url));
        let response = builder.send().await?;
        self.handle_response(response).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> PlatformResult<T> {
        debug!("POST {}", url);
        let builder = self.token.apply(self.http_client.post(url));
        let response = builder.json(body).send().await?;
        self.handle_response(response).await
    }

    async fn send_empty(&self, builder: reqwest::RequestBuilder) -> PlatformResult<()> {
        let response = self.token.apply(builder).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            self.handle_error_response(response).await
        }
    }

    // ── Response Handling ─────────────────────────────────────────────

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> PlatformResult<T> {
        if response.status().is_success() {
            let body = response.text().await?;
            serde_json::from_str(&body)
                .map_err(|e| PlatformError::ParseError(format!("Failed to parse response: {e}")))
        } else {
            self.handle_error_response(response).await
        }
    }

    async fn handle_error_response<T>(&self, response: reqwest::Response) -> PlatformResult<T> {
        let status = response.status();

        let retry_after_header = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok());

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        let parsed: Option<ApiErrorBody> = serde_json::from_str(&body).ok();
        let code = parsed.as_ref().and_then(|b| b.code);
        let message = parsed
            .as_ref()
            .map(|b| b.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| body.clone());

        match status {
            StatusCode::NOT_FOUND => Err(PlatformError::NotFound(message)),
            StatusCode::FORBIDDEN => Err(PlatformError::forbidden(code, message)),
            StatusCode::UNAUTHORIZED => Err(PlatformError::AuthError(format!(
                "Authentication failed (401): {message}"
            ))),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = parsed
                    .as_ref()
                    .and_then(|b| b.retry_after)
                    .or(retry_after_header)
                    .filter(|secs| secs.is_finite() && *secs >= 0.0)
                    .map(Duration::from_secs_f64);
                warn!(retry_after = ?retry_after, "Platform rate limited request");
                Err(PlatformError::RateLimited { retry_after })
            }
            _ => {
                let detail = if message.is_empty() {
                    format!("HTTP {status}")
                } else {
                    message
                };
                Err(PlatformError::ApiError {
                    status: status.as_u16(),
                    code,
                    detail,
                })
            }
        }
    }
}
