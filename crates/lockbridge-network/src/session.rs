//! Cloud session: the shared access/refresh token pair.
//!
//! One [`SessionClient`] is shared by every device under a bridge. It owns the
//! token pair and is the only place tokens are replaced. State transitions:
//!
//! ```text
//! Unauthenticated ──authenticate──> Authenticating ──ok──> Authenticated
//!        ^                               │                   │      ^
//!        └─────────── failure ───────────┘              refresh   ok
//!        ^                                                   v      │
//!        └─────────────────── failure ──────────────────── Refreshing
//! ```
//!
//! Refreshes are collapsed: callers pass the access token they saw rejected,
//! and a caller whose token was already replaced by a concurrent refresh just
//! picks up the new pair without another call.

use crate::transport::{AnyTransport, CloudRequest, CloudTransport, HttpMethod};
use lockbridge_core::constants::PATH_OAUTH_TOKEN;
use lockbridge_core::{Error, Result};
use md5::{Digest, Md5};
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

/// Lifecycle of the shared session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Refreshing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => write!(f, "unauthenticated"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Refreshing => write!(f, "refreshing"),
        }
    }
}

#[derive(Clone)]
struct TokenPair {
    access_token: String,
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    errcode: Option<i64>,
    errmsg: Option<String>,
}

/// Owner of the cloud credentials.
pub struct SessionClient {
    transport: AnyTransport,
    client_id: String,
    client_secret: String,
    tokens: RwLock<Option<TokenPair>>,
    state: watch::Sender<SessionState>,
    // Held for the whole of an authenticate or refresh exchange.
    exchange: Mutex<()>,
    refresh_count: AtomicU64,
}

impl fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionClient")
            .field("client_id", &self.client_id)
            .field("state", &self.state())
            .field("refresh_count", &self.refresh_count())
            .finish_non_exhaustive()
    }
}

impl SessionClient {
    pub fn new(
        transport: impl Into<AnyTransport>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Unauthenticated);
        Self {
            transport: transport.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            tokens: RwLock::new(None),
            state,
            exchange: Mutex::new(()),
            refresh_count: AtomicU64::new(0),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch session state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// The current access token, if a session exists.
    pub fn access_token(&self) -> Option<String> {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|t| t.access_token.clone())
    }

    /// Number of refresh exchanges performed so far.
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::SeqCst)
    }

    /// Log in with the account's username and password.
    ///
    /// The password is sent as its lowercase hex MD5 digest.
    ///
    /// # Errors
    /// Returns `Error::Authentication` if the exchange fails or the response
    /// lacks either token. The session is left unauthenticated.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<()> {
        let _exchange = self.exchange.lock().await;
        self.state.send_replace(SessionState::Authenticating);
        info!(client_id = %self.client_id, "Authenticating with cloud service");

        let request = CloudRequest::new(HttpMethod::Post, PATH_OAUTH_TOKEN)
            .param("client_id", &self.client_id)
            .param("client_secret", &self.client_secret)
            .param("username", username)
            .param("password", hash_password(password))
            .param("grant_type", "password");

        match self.exchange_tokens(&request).await {
            Ok(pair) => {
                self.store(pair);
                info!("Authenticated");
                Ok(())
            }
            Err(e) => {
                self.clear();
                warn!(error = %e, "Authentication failed");
                Err(e)
            }
        }
    }

    /// Refresh the token pair now.
    ///
    /// Concurrent callers collapse into one exchange; see
    /// [`refresh_if_stale`](Self::refresh_if_stale).
    ///
    /// # Errors
    /// Returns `Error::Authentication` if no session is held or the refresh
    /// fails. A failed refresh is terminal: the session is cleared.
    pub async fn refresh(&self) -> Result<()> {
        let seen = self
            .access_token()
            .ok_or_else(|| Error::authentication("no refresh token held"))?;
        self.refresh_if_stale(&seen).await
    }

    /// Refresh only if the held access token is still `rejected`.
    ///
    /// A caller whose rejected token has already been replaced by another
    /// refresh returns immediately and uses the new pair.
    ///
    /// # Errors
    /// Returns `Error::Authentication` if no session is held or the refresh
    /// fails.
    pub async fn refresh_if_stale(&self, rejected: &str) -> Result<()> {
        let _exchange = self.exchange.lock().await;

        let refresh_token = {
            let tokens = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
            match tokens.as_ref() {
                None => return Err(Error::authentication("no refresh token held")),
                Some(pair) if pair.access_token != rejected => {
                    debug!("Token already refreshed by another caller");
                    return Ok(());
                }
                Some(pair) => pair.refresh_token.clone(),
            }
        };

        self.state.send_replace(SessionState::Refreshing);
        self.refresh_count.fetch_add(1, Ordering::SeqCst);
        debug!("Refreshing access token");

        let request = CloudRequest::new(HttpMethod::Post, PATH_OAUTH_TOKEN)
            .param("client_id", &self.client_id)
            .param("client_secret", &self.client_secret)
            .param("grant_type", "refresh_token")
            .param("refresh_token", refresh_token);

        match self.exchange_tokens(&request).await {
            Ok(pair) => {
                self.store(pair);
                info!(refreshes = self.refresh_count(), "Access token refreshed");
                Ok(())
            }
            Err(e) => {
                self.clear();
                warn!(error = %e, "Token refresh failed, session dropped");
                Err(e)
            }
        }
    }

    async fn exchange_tokens(&self, request: &CloudRequest) -> Result<TokenPair> {
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| Error::authentication(format!("token exchange failed: {e}")))?;

        if !(200..300).contains(&response.status) {
            return Err(Error::authentication(format!(
                "token endpoint returned status {}",
                response.status
            )));
        }

        let body: TokenResponse = serde_json::from_str(&response.body)
            .map_err(|e| Error::authentication(format!("malformed token response: {e}")))?;

        if let Some(code) = body.errcode
            && code != 0
        {
            return Err(Error::authentication(format!(
                "errcode {code}: {}",
                body.errmsg.unwrap_or_default()
            )));
        }

        match (body.access_token, body.refresh_token) {
            (Some(access_token), Some(refresh_token))
                if !access_token.is_empty() && !refresh_token.is_empty() =>
            {
                Ok(TokenPair {
                    access_token,
                    refresh_token,
                })
            }
            _ => Err(Error::authentication(
                "token response is missing access_token or refresh_token",
            )),
        }
    }

    fn store(&self, pair: TokenPair) {
        *self.tokens.write().unwrap_or_else(PoisonError::into_inner) = Some(pair);
        self.state.send_replace(SessionState::Authenticated);
    }

    fn clear(&self) {
        *self.tokens.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.state.send_replace(SessionState::Unauthenticated);
    }
}

/// Lowercase hex MD5 digest of `password`.
pub fn hash_password(password: &str) -> String {
    Md5::digest(password.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockReply, MockTransport};
    use serde_json::json;
    use std::sync::Arc;

    fn tokens(access: &str, refresh: &str) -> MockReply {
        MockReply::ok(json!({
            "access_token": access,
            "refresh_token": refresh,
            "uid": 1,
            "expires_in": 7_776_000
        }))
    }

    #[test]
    fn test_hash_password() {
        assert_eq!(hash_password("p"), "83878c91171338902e0fe0fb97a8c47a");
        assert_eq!(hash_password(""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[tokio::test]
    async fn test_authenticate_stores_tokens() {
        let mock = MockTransport::new();
        mock.push(PATH_OAUTH_TOKEN, tokens("a1", "r1"));
        let session = SessionClient::new(mock.clone(), "cid", "secret");

        session.authenticate("u", "p").await.unwrap();

        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(session.access_token().as_deref(), Some("a1"));

        let call = &mock.calls()[0].request;
        assert_eq!(call.get("grant_type"), Some("password"));
        assert_eq!(call.get("username"), Some("u"));
        assert_eq!(call.get("password"), Some(hash_password("p").as_str()));
        assert_eq!(call.get("client_id"), Some("cid"));
    }

    #[tokio::test]
    async fn test_authenticate_missing_refresh_token() {
        let mock = MockTransport::new();
        mock.push(PATH_OAUTH_TOKEN, MockReply::ok(json!({"access_token": "a1"})));
        let session = SessionClient::new(mock, "cid", "secret");

        let result = session.authenticate("u", "p").await;
        assert!(matches!(result, Err(Error::Authentication(_))));
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert!(session.access_token().is_none());
    }

    #[tokio::test]
    async fn test_authenticate_transport_failure() {
        let mock = MockTransport::new();
        mock.push(PATH_OAUTH_TOKEN, MockReply::transport_error("dns"));
        let session = SessionClient::new(mock, "cid", "secret");

        assert!(matches!(
            session.authenticate("u", "p").await,
            Err(Error::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_authenticate_error_code() {
        let mock = MockTransport::new();
        mock.push(PATH_OAUTH_TOKEN, MockReply::error(10007, "invalid account or password"));
        let session = SessionClient::new(mock, "cid", "secret");

        let err = session.authenticate("u", "bad").await.unwrap_err();
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn test_refresh_without_session() {
        let session = SessionClient::new(MockTransport::new(), "cid", "secret");
        assert!(matches!(
            session.refresh().await,
            Err(Error::Authentication(_))
        ));
        assert_eq!(session.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_refresh_replaces_pair() {
        let mock = MockTransport::new();
        mock.push(PATH_OAUTH_TOKEN, tokens("a1", "r1"));
        mock.push(PATH_OAUTH_TOKEN, tokens("a2", "r2"));
        let session = SessionClient::new(mock.clone(), "cid", "secret");
        session.authenticate("u", "p").await.unwrap();

        session.refresh().await.unwrap();

        assert_eq!(session.access_token().as_deref(), Some("a2"));
        assert_eq!(session.refresh_count(), 1);
        let call = &mock.calls()[1].request;
        assert_eq!(call.get("grant_type"), Some("refresh_token"));
        assert_eq!(call.get("refresh_token"), Some("r1"));
    }

    #[tokio::test]
    async fn test_failed_refresh_is_terminal() {
        let mock = MockTransport::new();
        mock.push(PATH_OAUTH_TOKEN, tokens("a1", "r1"));
        mock.push(PATH_OAUTH_TOKEN, MockReply::ok(json!({"errmsg": "nope"})));
        let session = SessionClient::new(mock, "cid", "secret");
        session.authenticate("u", "p").await.unwrap();

        let mut watcher = session.subscribe();
        assert!(session.refresh().await.is_err());
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert!(watcher.has_changed().unwrap());
        assert_eq!(*watcher.borrow_and_update(), SessionState::Unauthenticated);
        assert!(session.refresh().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refreshes_collapse() {
        let mock = MockTransport::new();
        mock.push(PATH_OAUTH_TOKEN, tokens("a1", "r1"));
        mock.on(PATH_OAUTH_TOKEN, |_| {
            tokens("a2", "r2").with_delay(std::time::Duration::from_millis(50))
        });
        let session = Arc::new(SessionClient::new(mock.clone(), "cid", "secret"));
        session.authenticate("u", "p").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let session = Arc::clone(&session);
            handles.push(tokio::spawn(async move {
                session.refresh_if_stale("a1").await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(session.refresh_count(), 1);
        assert_eq!(mock.call_count(PATH_OAUTH_TOKEN), 2);
        assert_eq!(session.access_token().as_deref(), Some("a2"));
    }
}
