//! Reddit REST API Client
//!
//! HTTP client for the OAuth endpoints the session layer needs.

use super::RemoteSource;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Reddit REST API client
pub struct RedditClient {
    client: Client,
    config: RedditConfig,
}

/// Configuration for the Reddit client
#[derive(Debug, Clone)]
pub struct RedditConfig {
    /// Base URL for authenticated API calls
    pub api_url: String,
    /// OAuth token endpoint
    pub token_url: String,
    /// Installed-app client id (no secret)
    pub client_id: String,
    pub user_agent: String,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            api_url: "https://oauth.reddit.com".to_string(),
            token_url: "https://www.reddit.com/api/v1/access_token".to_string(),
            client_id: String::new(),
            user_agent: format!("photon-session/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_ms: 10_000,
        }
    }
}

impl RedditClient {
    /// Create a new client with the given configuration
    pub fn new(config: RedditConfig) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self { client, config })
    }

    /// Get the current configuration
    pub fn config(&self) -> &RedditConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn get_json(
        &self,
        path: &str,
        access_token: &str,
        query: &[(&str, String)],
    ) -> RemoteResult<Value> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(access_token)
            .query(&[("raw_json", "1")])
            .query(query)
            .send()
            .await
            .map_err(map_transport)?;

        read_payload(response).await
    }
}

#[async_trait]
impl RemoteSource for RedditClient {
    async fn me(&self, access_token: &str) -> RemoteResult<Value> {
        self.get_json("/api/v1/me", access_token, &[]).await
    }

    async fn preferences(&self, access_token: &str) -> RemoteResult<Value> {
        self.get_json("/api/v1/me/prefs", access_token, &[]).await
    }

    async fn my_subreddits(&self, access_token: &str, after: Option<&str>) -> RemoteResult<Listing> {
        let mut query = vec![("limit", "100".to_string())];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }

        let payload = self
            .get_json("/subreddits/mine/subscriber", access_token, &query)
            .await?;
        Listing::from_payload(payload)
    }

    async fn my_multis(&self, access_token: &str) -> RemoteResult<Vec<Value>> {
        let payload = self.get_json("/api/multi/mine", access_token, &[]).await?;
        match payload {
            Value::Array(multis) => Ok(multis),
            other => Err(RemoteError::Malformed(format!(
                "expected multireddit array, got {}",
                json_kind(&other)
            ))),
        }
    }

    async fn refresh_token(&self, refresh_token: &str) -> RemoteResult<TokenGrant> {
        let response = self
            .client
            .post(&self.config.token_url)
            .basic_auth(&self.config.client_id, Some(""))
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .await
            .map_err(map_transport)?;

        let payload = read_payload(response).await?;
        serde_json::from_value(payload).map_err(|e| RemoteError::Malformed(e.to_string()))
    }
}

async fn read_payload(response: reqwest::Response) -> RemoteResult<Value> {
    let status = response.status();
    let text = response.text().await.map_err(map_transport)?;

    match serde_json::from_str::<Value>(&text) {
        Ok(body) => classify_payload(status, body),
        Err(_) if !status.is_success() => Err(RemoteError::Api {
            status: status.as_u16(),
            error: status.to_string(),
            message: text,
        }),
        Err(e) => Err(RemoteError::Malformed(e.to_string())),
    }
}

/// Separate well-formed `{error}` payloads from real data.
///
/// Reddit reports failures both through the status code and through an
/// `error` field in an otherwise successful response.
pub fn classify_payload(status: StatusCode, body: Value) -> RemoteResult<Value> {
    if let Some(error) = body.get("error") {
        let error = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        return Err(RemoteError::Api {
            status: status.as_u16(),
            error,
            message,
        });
    }

    if !status.is_success() {
        return Err(RemoteError::Api {
            status: status.as_u16(),
            error: status.to_string(),
            message: String::new(),
        });
    }

    Ok(body)
}

fn map_transport(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else if e.is_connect() {
        RemoteError::Unavailable
    } else {
        RemoteError::Request(e)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================
// Request/Response DTOs
// ============================================

/// One page of a Reddit listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Listing {
    /// Things (`{kind, data}`) on this page
    pub children: Vec<Value>,
    /// Cursor for the next page
    pub after: Option<String>,
}

impl Listing {
    /// Parse a `{kind: "Listing", data: {children, after}}` payload
    pub fn from_payload(payload: Value) -> RemoteResult<Self> {
        #[derive(Deserialize)]
        struct ListingData {
            #[serde(default)]
            children: Vec<Value>,
            after: Option<String>,
        }

        #[derive(Deserialize)]
        struct ListingEnvelope {
            data: ListingData,
        }

        let envelope: ListingEnvelope =
            serde_json::from_value(payload).map_err(|e| RemoteError::Malformed(e.to_string()))?;

        Ok(Self {
            children: envelope.data.children,
            after: envelope.data.after,
        })
    }
}

/// Result of an OAuth token refresh
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Only present when the server rotates refresh tokens
    pub refresh_token: Option<String>,
    /// Lifetime in seconds
    pub expires_in: u64,
    #[serde(default)]
    pub scope: String,
}

// ============================================
// Errors
// ============================================

/// Errors that can occur when talking to the Reddit API
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Reddit unavailable")]
    Unavailable,

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Request timeout")]
    Timeout,

    /// A well-formed error payload from the API
    #[error("API error {status}: {error} {message}")]
    Api {
        status: u16,
        error: String,
        message: String,
    },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Not logged in")]
    NotLoggedIn,
}

impl RemoteError {
    /// True for errors reported by the API itself rather than the transport
    pub fn is_api_error(&self) -> bool {
        matches!(self, RemoteError::Api { .. })
    }
}

/// Result type alias for remote operations
pub type RemoteResult<T> = Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = RedditConfig::default();
        assert_eq!(config.api_url, "https://oauth.reddit.com");
        assert!(config.user_agent.starts_with("photon-session/"));
    }

    #[test]
    fn test_url_joining() {
        let client = RedditClient::new(RedditConfig {
            api_url: "http://localhost:9000/".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(client.url("/api/v1/me"), "http://localhost:9000/api/v1/me");
    }

    #[test]
    fn test_error_payload_is_api_error() {
        let result = classify_payload(
            StatusCode::OK,
            json!({"message": "Unauthorized", "error": 401}),
        );

        match result {
            Err(RemoteError::Api { status, error, message }) => {
                assert_eq!(status, 200);
                assert_eq!(error, "401");
                assert_eq!(message, "Unauthorized");
            }
            other => panic!("expected api error, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_status_without_error_field() {
        let err = classify_payload(StatusCode::SERVICE_UNAVAILABLE, json!({})).unwrap_err();
        assert!(err.is_api_error());
    }

    #[test]
    fn test_data_payload_passes_through() {
        let body = json!({"name": "alice", "inbox_count": 2});
        assert_eq!(classify_payload(StatusCode::OK, body.clone()).unwrap(), body);
    }

    #[test]
    fn test_transport_errors_are_not_api_errors() {
        assert!(!RemoteError::Timeout.is_api_error());
        assert!(!RemoteError::Unavailable.is_api_error());
    }

    #[test]
    fn test_listing_from_payload() {
        let listing = Listing::from_payload(json!({
            "kind": "Listing",
            "data": {
                "after": "t5_abc",
                "children": [{"kind": "t5", "data": {"display_name": "rust"}}]
            }
        }))
        .unwrap();

        assert_eq!(listing.after.as_deref(), Some("t5_abc"));
        assert_eq!(listing.children.len(), 1);

        let err = Listing::from_payload(json!([1, 2])).unwrap_err();
        assert!(matches!(err, RemoteError::Malformed(_)));
    }

    #[test]
    fn test_token_grant_parsing() {
        let grant: TokenGrant = serde_json::from_value(json!({
            "access_token": "new-access",
            "token_type": "bearer",
            "expires_in": 86400,
            "scope": "identity read"
        }))
        .unwrap();

        assert_eq!(grant.access_token, "new-access");
        assert_eq!(grant.refresh_token, None);
        assert_eq!(grant.expires_in, 86400);
    }
}
