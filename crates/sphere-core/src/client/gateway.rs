//! Request gateway: credential injection plus refresh-and-replay.
//!
//! ```text
//! send(request)
//!   │
//!   ├─► attach Bearer <credential>
//!   │
//!   ├─► 401 and not yet replayed ──► refresh (coalesced) ──► replay once
//!   │
//!   ├─► 401 on the replay, or refresh failed ──► clear session, SessionExpired
//!   │
//!   └─► anything else ──► returned unchanged
//! ```

use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::request::{ApiRequest, Body};
use crate::auth::bearer;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::session::SessionStore;
use crate::types::{Envelope, MessageOnly, RefreshResponse};

/// Path of the credential refresh endpoint (refresh token travels as a cookie)
pub const REFRESH_PATH: &str = "/auth/refresh-token";

/// Single choke point for every call to the REST service.
pub struct Gateway {
    http: reqwest::Client,
    base_url: String,
    session: SessionStore,
    /// Held while a refresh is in flight so concurrent rejections share it.
    refresh_gate: Mutex<()>,
}

impl Gateway {
    pub fn new(config: &ClientConfig, session: SessionStore) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_url.clone(),
            session,
            refresh_gate: Mutex::new(()),
        })
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Send a request and decode the `data` field of the response envelope.
    pub async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let path = request.path.clone();
        let response = self.send(request).await?;
        let envelope: Envelope<T> = response.json().await.map_err(|e| {
            Error::Serialization(format!("Failed to parse response from {}: {}", path, e))
        })?;
        Ok(envelope.data)
    }

    /// Send a request whose payload is not needed; returns the server message.
    pub async fn execute(&self, request: ApiRequest) -> Result<Option<String>> {
        let response = self.send(request).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        let body: MessageOnly = serde_json::from_str(&text).unwrap_or_default();
        Ok(body.message)
    }

    /// Send a request through the refresh-and-replay pipeline.
    pub async fn send(&self, mut request: ApiRequest) -> Result<reqwest::Response> {
        loop {
            let credential = if request.authenticated {
                self.session.credential()
            } else {
                None
            };

            let response = self.dispatch(&request, credential.as_deref()).await?;
            if response.status() != StatusCode::UNAUTHORIZED {
                return check_status(response, &request.path).await;
            }

            // Without a credential there is nothing to refresh: the 401 is a
            // business answer (e.g. wrong password) for the caller to show.
            let Some(rejected) = credential else {
                return check_status(response, &request.path).await;
            };

            if request.is_replay() {
                warn!(path = %request.path, "Replayed request rejected, ending session");
                self.session.clear();
                return Err(Error::SessionExpired);
            }

            request.mark_replayed();
            self.refresh(&rejected).await?;
            debug!(path = %request.path, "Replaying request with refreshed credential");
        }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        credential: Option<&str>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!("API request: {} {}", request.method, url);

        let mut builder = self.http.request(request.method.clone(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = credential {
            builder = builder.header(AUTHORIZATION, bearer(token));
        }
        builder = match &request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(value),
            Body::Multipart(parts) => builder.multipart(Body::to_form(parts)?),
        };

        Ok(builder.send().await?)
    }

    /// Obtain a new credential after `rejected` was refused.
    ///
    /// Refreshes are serialised. A caller that waited for the gate and finds a
    /// credential different from the one it was refused with reuses it.
    async fn refresh(&self, rejected: &str) -> Result<()> {
        let _gate = self.refresh_gate.lock().await;

        match self.session.credential() {
            None => return Err(Error::SessionExpired),
            Some(current) if current != rejected => {
                debug!("Credential already refreshed by a concurrent call");
                return Ok(());
            }
            Some(_) => {}
        }

        match self.request_credential().await {
            Ok(token) => {
                if !self.session.replace_credential(token) {
                    return Err(Error::SessionExpired);
                }
                info!("Access credential refreshed");
                Ok(())
            }
            Err(e) => {
                warn!("Session has expired: {}", e);
                self.session.clear();
                Err(Error::SessionExpired)
            }
        }
    }

    async fn request_credential(&self) -> Result<String> {
        let url = format!("{}{}", self.base_url, REFRESH_PATH);
        debug!("API request: POST {}", url);

        let response = self.http.post(&url).send().await?;
        let response = check_status(response, REFRESH_PATH).await?;
        let envelope: Envelope<RefreshResponse> = response.json().await.map_err(|e| {
            Error::Serialization(format!("Failed to parse refresh response: {}", e))
        })?;
        Ok(envelope.data.access_token)
    }
}

/// Map a non-success response to the error taxonomy.
async fn check_status(response: reqwest::Response, path: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(Error::NotFound(path.to_string()));
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<MessageOnly>(&text)
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        });
    Err(Error::api(status.as_u16(), message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_user;
    use mockito::{Matcher, Server};
    use serde_json::json;
    use std::sync::Arc;

    fn gateway(server: &Server, session: &SessionStore) -> Gateway {
        let config = ClientConfig::new(server.url());
        Gateway::new(&config, session.clone()).unwrap()
    }

    fn logged_in(token: &str) -> SessionStore {
        let session = SessionStore::new();
        session.establish(test_user("u1", "ada"), token.to_string());
        session
    }

    #[tokio::test]
    async fn test_attaches_bearer_credential() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/users")
            .match_header("authorization", "Bearer tok1")
            .with_status(200)
            .with_body(r#"{"data": []}"#)
            .create_async()
            .await;

        let session = logged_in("tok1");
        let users: Vec<serde_json::Value> = gateway(&server, &session)
            .fetch(ApiRequest::get("/users"))
            .await
            .unwrap();
        assert!(users.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_public_request_has_no_credential() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/forgot-password")
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .with_body(r#"{"message": "Reset link sent"}"#)
            .create_async()
            .await;

        let session = logged_in("tok1");
        let message = gateway(&server, &session)
            .execute(ApiRequest::post("/auth/forgot-password").public())
            .await
            .unwrap();
        assert_eq!(message.as_deref(), Some("Reset link sent"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_expired_credential_refreshes_and_replays_once() {
        let mut server = Server::new_async().await;
        let rejected = server
            .mock("GET", "/posts")
            .match_header("authorization", "Bearer tok1")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", REFRESH_PATH)
            .with_status(200)
            .with_body(r#"{"data": {"accessToken": "tok2"}}"#)
            .expect(1)
            .create_async()
            .await;
        let replay = server
            .mock("GET", "/posts")
            .match_header("authorization", "Bearer tok2")
            .with_status(200)
            .with_body(r#"{"data": ["ok"]}"#)
            .expect(1)
            .create_async()
            .await;

        let session = logged_in("tok1");
        let result: Vec<String> = gateway(&server, &session)
            .fetch(ApiRequest::get("/posts"))
            .await
            .unwrap();

        assert_eq!(result, vec!["ok".to_string()]);
        assert_eq!(session.credential().as_deref(), Some("tok2"));
        assert!(session.is_authenticated());
        rejected.assert_async().await;
        refresh.assert_async().await;
        replay.assert_async().await;
    }

    #[tokio::test]
    async fn test_second_rejection_clears_session_without_second_refresh() {
        let mut server = Server::new_async().await;
        let calls = server
            .mock("GET", "/posts")
            .with_status(401)
            .expect(2)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", REFRESH_PATH)
            .with_status(200)
            .with_body(r#"{"data": {"accessToken": "tok2"}}"#)
            .expect(1)
            .create_async()
            .await;

        let session = logged_in("tok1");
        let result: Result<serde_json::Value> =
            gateway(&server, &session).fetch(ApiRequest::get("/posts")).await;

        assert!(matches!(result, Err(Error::SessionExpired)));
        assert!(!session.is_authenticated());
        calls.assert_async().await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_failure_clears_session() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/chats/conversations")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", REFRESH_PATH)
            .with_status(401)
            .with_body(r#"{"message": "Refresh token expired"}"#)
            .expect(1)
            .create_async()
            .await;

        let session = logged_in("tok1");
        let result: Result<serde_json::Value> = gateway(&server, &session)
            .fetch(ApiRequest::get("/chats/conversations"))
            .await;

        assert!(matches!(result, Err(Error::SessionExpired)));
        assert!(session.credential().is_none());
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_other_errors_pass_through_without_refresh() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/register")
            .with_status(400)
            .with_body(r#"{"message": "Username already taken"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/users/ghost")
            .with_status(404)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", REFRESH_PATH)
            .expect(0)
            .create_async()
            .await;

        let session = logged_in("tok1");
        let gw = gateway(&server, &session);

        let err = gw
            .execute(ApiRequest::post("/auth/register").public())
            .await
            .unwrap_err();
        match err {
            Error::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Username already taken");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let err = gw
            .fetch::<serde_json::Value>(ApiRequest::get("/users/ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        assert_eq!(session.credential().as_deref(), Some("tok1"));
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_unauthenticated_rejection_is_a_business_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/login")
            .with_status(401)
            .with_body(r#"{"message": "Invalid email or password"}"#)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", REFRESH_PATH)
            .expect(0)
            .create_async()
            .await;

        let session = SessionStore::new();
        let request = ApiRequest::post("/auth/login")
            .public()
            .json(&json!({"email": "a@b.c", "password": "x"}))
            .unwrap();
        let err = gateway(&server, &session).execute(request).await.unwrap_err();

        assert_eq!(err.to_string(), "Invalid email or password");
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_logout_while_waiting_for_refresh_skips_refresh() {
        let mut server = Server::new_async().await;
        let rejected = server
            .mock("GET", "/posts")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", REFRESH_PATH)
            .expect(0)
            .create_async()
            .await;

        let session = logged_in("tok1");
        let gw = Arc::new(gateway(&server, &session));

        // Another refresh is in flight.
        let gate = gw.refresh_gate.lock().await;
        let call = tokio::spawn({
            let gw = Arc::clone(&gw);
            async move { gw.fetch::<serde_json::Value>(ApiRequest::get("/posts")).await }
        });
        while !rejected.matched_async().await {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        session.clear();
        drop(gate);

        let result = call.await.unwrap();
        assert!(matches!(result, Err(Error::SessionExpired)));
        assert!(!session.is_authenticated());
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_logout_during_refresh_discards_new_credential() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/posts")
            .match_header("authorization", "Bearer tok1")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;

        let session = logged_in("tok1");
        let refresh = server
            .mock("POST", REFRESH_PATH)
            .with_status(200)
            .with_body_from_request({
                let session = session.clone();
                move |_| {
                    session.clear();
                    br#"{"data": {"accessToken": "tok2"}}"#.to_vec()
                }
            })
            .expect(1)
            .create_async()
            .await;
        let replay = server
            .mock("GET", "/posts")
            .match_header("authorization", "Bearer tok2")
            .expect(0)
            .create_async()
            .await;

        let result: Result<serde_json::Value> =
            gateway(&server, &session).fetch(ApiRequest::get("/posts")).await;

        assert!(matches!(result, Err(Error::SessionExpired)));
        assert!(session.credential().is_none());
        refresh.assert_async().await;
        replay.assert_async().await;
    }

    #[tokio::test]
    async fn test_concurrent_rejections_share_one_refresh() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", Matcher::Regex(r"^/posts/p\d$".to_string()))
            .match_header("authorization", "Bearer tok1")
            .with_status(401)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", REFRESH_PATH)
            .with_status(200)
            .with_body(r#"{"data": {"accessToken": "tok2"}}"#)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("GET", Matcher::Regex(r"^/posts/p\d$".to_string()))
            .match_header("authorization", "Bearer tok2")
            .with_status(200)
            .with_body(r#"{"data": "ok"}"#)
            .create_async()
            .await;

        let session = logged_in("tok1");
        let gw = Arc::new(gateway(&server, &session));

        let handles: Vec<_> = (1..=4)
            .map(|i| {
                let gw = Arc::clone(&gw);
                tokio::spawn(async move {
                    gw.fetch::<String>(ApiRequest::get(format!("/posts/p{}", i)))
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "ok");
        }
        assert_eq!(session.credential().as_deref(), Some("tok2"));
        refresh.assert_async().await;
    }
}
