//! Post interactions with optimistic local state.

use tracing::debug;

use super::optimistic::{Optimistic, toggle_membership};
use crate::client::ApiClient;
use crate::error::{Error, Result};
use crate::types::{Comment, Post};

/// A post as shown to the current user, with locally tracked likes and
/// comments.
#[derive(Debug, Clone)]
pub struct PostView {
    post: Post,
}

impl PostView {
    pub fn new(post: Post) -> Self {
        Self { post }
    }

    pub fn post(&self) -> &Post {
        &self.post
    }

    pub fn into_post(self) -> Post {
        self.post
    }

    pub fn like_count(&self) -> usize {
        self.post.likes.len()
    }

    pub fn is_liked_by(&self, user_id: &str) -> bool {
        self.post.likes.iter().any(|id| id == user_id)
    }

    pub fn comments(&self) -> &[Comment] {
        &self.post.comments
    }

    /// Like or unlike as the current user. The likes list flips immediately
    /// and is restored if the service rejects the change.
    pub async fn toggle_like(&mut self, client: &ApiClient) -> Result<bool> {
        let me = client
            .session()
            .identity()
            .ok_or(Error::NotAuthenticated)?
            .id;

        let mut liked = false;
        let pending = Optimistic::begin(&mut self.post.likes, |likes| {
            liked = toggle_membership(likes, &me);
        });
        let outcome = client.toggle_like(&self.post.id).await;
        if outcome.is_err() {
            debug!(post = %self.post.id, "Reverting like");
        }
        pending.settle(&mut self.post.likes, outcome)?;
        Ok(liked)
    }

    /// Post a comment; the comment list is replaced by the service's copy.
    pub async fn add_comment(&mut self, client: &ApiClient, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Invalid("comment text is empty".into()));
        }
        self.post.comments = client.add_comment(&self.post.id, text).await?;
        Ok(())
    }
}

/// Follow or unfollow `target` against the session's following list.
///
/// Returns whether the user now follows `target`.
pub async fn toggle_follow(client: &ApiClient, target: &str) -> Result<bool> {
    let identity = client.session().identity().ok_or(Error::NotAuthenticated)?;
    if identity.id == target {
        return Err(Error::Invalid("cannot follow yourself".into()));
    }

    let mut following = identity.following;
    let mut now_following = false;
    let pending = Optimistic::begin(&mut following, |list| {
        now_following = toggle_membership(list, target);
    });
    client.session().update_following(following.clone());

    match client.toggle_follow(target).await {
        Ok(()) => {
            pending.commit();
            Ok(now_following)
        }
        Err(e) => {
            debug!(user = %target, "Reverting follow");
            pending.rollback(&mut following);
            client.session().update_following(following);
            Err(e)
        }
    }
}
