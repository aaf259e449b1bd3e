//! Remote platform client.
//!
//! - [`client::PlatformClient`]: typed REST calls (members, roles, channels, messages)
//! - [`roster::RosterClient`]: paginated bulk member fetch producing attribute maps
//! - [`retry::RetryPolicy`]: rate-limit aware retry used for role mutations

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod retry;
pub mod roster;

pub use auth::BotToken;
pub use client::PlatformClient;
pub use error::{PlatformError, PlatformResult};
pub use retry::RetryPolicy;
pub use roster::{
    AttributeFetch, MemberFetch, MemberSource, RosterClient, RosterConfig, RosterFetch,
};

/// Default REST base URL of the platform API.
pub const DEFAULT_API_BASE_URL: &str = "https://discord.com/api/v10";
