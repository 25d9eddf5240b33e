//! API key authentication and the user directory.
//!
//! Every endpoint requires a key, presented either in the `x-api-key`
//! header or an `apiKey` cookie (the cookie exists for `EventSource`,
//! which cannot set request headers). Keys map to users through an
//! in-memory directory; keys never appear in any wire payload.

use std::sync::Arc;

use axum::extract::FromRef;
use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, StatusCode, request::Parts};
use axum::response::{IntoResponse, Response};
use boardsync_proto::entity::User;
use uuid::Uuid;

/// One directory entry: a user and the key that authenticates them.
struct DirectoryEntry {
    user: User,
    api_key: String,
}

/// In-memory user directory keyed by API key.
pub struct UserDirectory {
    entries: Vec<DirectoryEntry>,
}

impl UserDirectory {
    /// Builds a directory from `(user, api_key)` pairs.
    #[must_use]
    pub fn new(users: Vec<(User, String)>) -> Self {
        Self {
            entries: users
                .into_iter()
                .map(|(user, api_key)| DirectoryEntry { user, api_key })
                .collect(),
        }
    }

    /// Demo directory with three users and well-known keys.
    #[must_use]
    pub fn demo() -> Self {
        let demo_user = |name: &str, key: &str| {
            (
                User {
                    id: Uuid::new_v4(),
                    name: name.to_string(),
                },
                key.to_string(),
            )
        };
        Self::new(vec![
            demo_user("Alice", "key-alice"),
            demo_user("Bob", "key-bob"),
            demo_user("Carol", "key-carol"),
        ])
    }

    /// Resolves an API key to its user.
    #[must_use]
    pub fn find_by_api_key(&self, api_key: &str) -> Option<User> {
        self.entries
            .iter()
            .find(|e| e.api_key == api_key)
            .map(|e| e.user.clone())
    }

    /// Looks a user up by id.
    #[must_use]
    pub fn find(&self, id: Uuid) -> Option<User> {
        self.entries
            .iter()
            .find(|e| e.user.id == id)
            .map(|e| e.user.clone())
    }

    /// Every user, without credentials.
    #[must_use]
    pub fn all(&self) -> Vec<User> {
        self.entries.iter().map(|e| e.user.clone()).collect()
    }
}

/// Extracts the API key from request headers.
///
/// The `x-api-key` header wins; an `apiKey` cookie is the fallback.
#[must_use]
pub fn api_key_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-api-key")
        && let Ok(key) = value.to_str()
        && !key.is_empty()
    {
        return Some(key.to_string());
    }
    let cookies = headers.get("cookie")?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == "apiKey" && !value.is_empty()).then(|| value.to_string())
    })
}

/// Authentication failure, rendered as a 401 response.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No key was presented.
    #[error("API key is missing")]
    MissingKey,

    /// The key matched no user.
    #[error("invalid API key")]
    InvalidKey,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = axum::Json(serde_json::json!({
            "statusCode": 401,
            "message": self.to_string(),
        }));
        (StatusCode::UNAUTHORIZED, body).into_response()
    }
}

/// Extractor that authenticates the request and yields the caller.
pub struct AuthedUser(pub User);

impl<S> FromRequestParts<S> for AuthedUser
where
    Arc<UserDirectory>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let directory = Arc::<UserDirectory>::from_ref(state);
        let api_key = api_key_from_headers(&parts.headers).ok_or(AuthError::MissingKey)?;
        directory
            .find_by_api_key(&api_key)
            .map(Self)
            .ok_or(AuthError::InvalidKey)
    }
}
