//! Reddit API collaborator
//!
//! Sessions only see the [`RemoteSource`] trait; [`RedditClient`] is the
//! HTTP implementation. Every call returns either data or a [`RemoteError`],
//! and a well-formed `{error}` payload (`RemoteError::Api`) is kept apart
//! from transport failures.

mod client;

pub use client::{
    classify_payload, Listing, RedditClient, RedditConfig, RemoteError, RemoteResult, TokenGrant,
};

use async_trait::async_trait;
use serde_json::Value;

/// Remote data the session layer consumes
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Profile of the token's owner (`/api/v1/me`)
    async fn me(&self, access_token: &str) -> RemoteResult<Value>;

    /// The user's reddit.com preferences
    async fn preferences(&self, access_token: &str) -> RemoteResult<Value>;

    /// One page of subscribed subreddits
    async fn my_subreddits(&self, access_token: &str, after: Option<&str>) -> RemoteResult<Listing>;

    /// The user's multireddits
    async fn my_multis(&self, access_token: &str) -> RemoteResult<Vec<Value>>;

    /// Exchange a refresh token for a new access token
    async fn refresh_token(&self, refresh_token: &str) -> RemoteResult<TokenGrant>;
}
