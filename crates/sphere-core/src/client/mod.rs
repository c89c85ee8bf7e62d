//! API client for the SocialSphere REST service.
//!
//! Every call goes through the [`Gateway`], which attaches the session
//! credential and recovers once from an expired one.
//!
//! # Usage
//!
//! ```rust,no_run
//! use sphere_core::client::ApiClient;
//! use sphere_core::config::ClientConfig;
//! use sphere_core::session::SessionStore;
//! use sphere_core::types::FeedType;
//!
//! #[tokio::main]
//! async fn main() -> sphere_core::Result<()> {
//!     let config = ClientConfig::new("http://localhost:5000/api/v1");
//!     let client = ApiClient::new(&config, SessionStore::new())?;
//!     client.login("ada@example.com", "secret").await?;
//!     let posts = client.list_posts(FeedType::Public).await?;
//!     println!("{} posts", posts.len());
//!     Ok(())
//! }
//! ```

mod gateway;
mod request;

pub use gateway::{Gateway, REFRESH_PATH};
pub use request::{ApiRequest, Body, FormPart, PartValue, segment};

use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::decode_identity;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::session::SessionStore;
use crate::types::*;

/// API client for the REST service. Cheap to clone.
#[derive(Clone)]
pub struct ApiClient {
    gateway: Arc<Gateway>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, session: SessionStore) -> Result<Self> {
        Ok(Self {
            gateway: Arc::new(Gateway::new(config, session)?),
        })
    }

    pub fn session(&self) -> &SessionStore {
        self.gateway.session()
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Auth Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Log in with email and password and establish the session.
    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let request = ApiRequest::post("/auth/login")
            .public()
            .json(&LoginRequest { email, password })?;
        let resp: LoginResponse = self.gateway.fetch(request).await?;
        self.session().establish(resp.user.clone(), resp.access_token);
        Ok(resp.user)
    }

    /// Establish the session from a bare access token (login-success redirect).
    pub fn login_with_token(&self, token: &str) -> Result<User> {
        let user = decode_identity(token)?;
        self.session().establish(user.clone(), token.trim().to_string());
        Ok(user)
    }

    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<Option<String>> {
        let request = ApiRequest::post("/auth/register").public().json(&RegisterRequest {
            username,
            email,
            password,
        })?;
        self.gateway.execute(request).await
    }

    /// End the session. The server call is best effort; the local session is
    /// cleared regardless.
    pub async fn logout(&self) {
        if self.session().is_authenticated() {
            if let Err(e) = self.gateway.execute(ApiRequest::post("/auth/logout")).await {
                warn!("Server logout failed: {}", e);
            }
        }
        self.session().clear();
        info!("Logged out");
    }

    pub async fn forgot_password(&self, email: &str) -> Result<Option<String>> {
        let request = ApiRequest::post("/auth/forgot-password")
            .public()
            .json(&serde_json::json!({ "email": email }))?;
        self.gateway.execute(request).await
    }

    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        password_confirm: &str,
    ) -> Result<Option<String>> {
        let request = ApiRequest::post(format!("/auth/reset-password/{}", segment(token)))
            .public()
            .json(&ResetPasswordRequest {
                new_password,
                password_confirm,
            })?;
        self.gateway.execute(request).await
    }

    pub async fn verify_email(&self, token: &str) -> Result<Option<String>> {
        let request = ApiRequest::get("/auth/verify-email").query("token", token);
        self.gateway.execute(request).await
    }

    pub async fn resend_verification(&self) -> Result<Option<String>> {
        let request = ApiRequest::post("/auth/resend-verification").json(&serde_json::json!({}))?;
        self.gateway.execute(request).await
    }

    pub async fn add_phone(&self, phone_number: &str) -> Result<Option<String>> {
        let request = ApiRequest::post("/users/me/phone")
            .json(&serde_json::json!({ "phoneNumber": phone_number }))?;
        self.gateway.execute(request).await
    }

    /// Confirm the phone number with the one-time code.
    pub async fn verify_phone(&self, otp: &str) -> Result<Option<String>> {
        let request =
            ApiRequest::post("/users/me/phone/verify").json(&serde_json::json!({ "otp": otp }))?;
        let message = self.gateway.execute(request).await?;
        self.session().update_identity(UserPatch {
            is_phone_verified: Some(true),
            ..Default::default()
        });
        Ok(message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // User Operations
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn list_users(&self) -> Result<Vec<UserSummary>> {
        self.gateway.fetch(ApiRequest::get("/users")).await
    }

    /// Get a profile by username
    pub async fn get_profile(&self, username: &str) -> Result<Option<Profile>> {
        match self.gateway.fetch(ApiRequest::get(format!("/users/{}", segment(username)))).await {
            Ok(profile) => Ok(Some(profile)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Follow or unfollow (the service toggles).
    pub async fn toggle_follow(&self, user_id: &str) -> Result<()> {
        self.gateway
            .execute(ApiRequest::post(format!("/users/{}/follow", segment(user_id))))
            .await?;
        Ok(())
    }

    /// Upload a new avatar and merge the returned user into the identity.
    pub async fn update_avatar(&self, avatar: MediaUpload) -> Result<UserPatch> {
        let request = ApiRequest::put("/users/me/avatar").file_part("avatar", avatar);
        let patch: UserPatch = self.gateway.fetch(request).await?;
        self.session().update_identity(patch.clone());
        Ok(patch)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Post Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// List posts for a feed, dropping posts whose author no longer exists.
    pub async fn list_posts(&self, feed: FeedType) -> Result<Vec<Post>> {
        let posts: Vec<Post> = self.gateway.fetch(ApiRequest::get(feed.path())).await?;
        Ok(without_ghosts(posts))
    }

    pub async fn user_posts(&self, user_id: &str) -> Result<Vec<Post>> {
        let posts: Vec<Post> = self
            .gateway
            .fetch(ApiRequest::get(format!("/posts/user/{}", segment(user_id))))
            .await?;
        Ok(without_ghosts(posts))
    }

    pub async fn create_post(&self, content: &str, media: Option<MediaUpload>) -> Result<()> {
        let mut request = ApiRequest::post("/posts").text_part("content", content);
        if let Some(media) = media {
            request = request.file_part("media", media);
        }
        self.gateway.execute(request).await?;
        Ok(())
    }

    /// Like or unlike (the service toggles).
    pub async fn toggle_like(&self, post_id: &str) -> Result<()> {
        self.gateway
            .execute(ApiRequest::post(format!("/posts/{}/like", segment(post_id))))
            .await?;
        Ok(())
    }

    /// Add a comment; returns the post's full comment list.
    pub async fn add_comment(&self, post_id: &str, text: &str) -> Result<Vec<Comment>> {
        let request = ApiRequest::post(format!("/posts/{}/comments", segment(post_id)))
            .json(&serde_json::json!({ "text": text }))?;
        let post: CommentedPost = self.gateway.fetch(request).await?;
        Ok(post.comments)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Chat Operations
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn conversations(&self) -> Result<Vec<UserSummary>> {
        self.gateway.fetch(ApiRequest::get("/chats/conversations")).await
    }

    pub async fn chat_history(&self, peer_id: &str) -> Result<Vec<ChatMessage>> {
        self.gateway
            .fetch(ApiRequest::get(format!("/chats/{}", segment(peer_id))))
            .await
    }
}

fn without_ghosts(posts: Vec<Post>) -> Vec<Post> {
    posts.into_iter().filter(|p| p.author.is_some()).collect()
}
