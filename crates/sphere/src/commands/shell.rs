//! Interactive shell: one authenticated session with the live channel attached.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Local, Utc};
use colored::Colorize;
use dialoguer::{Input, Password};
use sphere_core::channel::{
    ChannelEvent, ChannelRef, ChannelState, EventKind, LiveChannel, Subscription, WsConnector,
};
use sphere_core::feed::{
    Conversation, Listener, NotificationQueue, OnlineSet, PostView, open_conversation,
    send_chat_message, toggle_follow,
};
use sphere_core::types::{Author, ChatMessage, FeedType, MediaUpload, Post, UserSummary};
use sphere_core::{ApiClient, Error as CoreError};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::{client, print_ack, with_spinner};
use crate::config::Config;

const HELP: &str = "\
Posts
  feed [public|following|trending|reels]   list a feed
  post <text> [--media <path>]             create a post
  like <post>                              like or unlike (number or id)
  comment <post> <text>                    add a comment
  comments <post>                          show comments
People
  users                                    list users
  follow <user>                            follow or unfollow (number, name or id)
  follow @<post>                           follow or unfollow a post's author
  profile [username]                       show a profile and its posts
  avatar <path>                            upload a new avatar
Chat
  chats                                    list conversations
  open <user>                              open a conversation
  send <text>                              message the open conversation
  online                                   who is online
Account
  notifications                            show and mark notifications read
  phone <number> / verify-phone <otp>      phone verification
  resend-verification                      resend the email verification link
  whoami / logout / quit";

/// A parsed shell line.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ShellCommand {
    Feed(FeedType),
    Post { text: String, media: Option<PathBuf> },
    Like(String),
    Comment { post: String, text: String },
    Comments(String),
    Users,
    Follow(String),
    Profile(Option<String>),
    Avatar(PathBuf),
    Chats,
    Open(String),
    Send(String),
    Online,
    Notifications,
    Phone(String),
    VerifyPhone(String),
    ResendVerification,
    Whoami,
    Logout,
    Help,
    Quit,
}

impl ShellCommand {
    /// Parse one input line. `Ok(None)` for a blank line, `Err` carries usage.
    pub(crate) fn parse(line: &str) -> std::result::Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            return Ok(None);
        };
        let rest: Vec<&str> = words.collect();

        let arg = |name: &str| {
            rest.first()
                .map(|s| s.to_string())
                .ok_or_else(|| format!("usage: {} <{}>", cmd, name))
        };
        let text = |name: &str| {
            if rest.is_empty() {
                Err(format!("usage: {} <{}>", cmd, name))
            } else {
                Ok(rest.join(" "))
            }
        };

        let command = match cmd {
            "feed" => ShellCommand::Feed(
                rest.first()
                    .map(|s| s.parse::<FeedType>())
                    .transpose()?
                    .unwrap_or_default(),
            ),
            "post" => {
                let mut media = None;
                let mut words = Vec::new();
                let mut iter = rest.iter();
                while let Some(word) = iter.next() {
                    if *word == "--media" {
                        let path = iter.next().ok_or("usage: post <text> [--media <path>]")?;
                        media = Some(PathBuf::from(*path));
                    } else {
                        words.push(*word);
                    }
                }
                if words.is_empty() && media.is_none() {
                    return Err("usage: post <text> [--media <path>]".into());
                }
                ShellCommand::Post {
                    text: words.join(" "),
                    media,
                }
            }
            "like" => ShellCommand::Like(arg("post")?),
            "comment" => {
                if rest.len() < 2 {
                    return Err("usage: comment <post> <text>".into());
                }
                ShellCommand::Comment {
                    post: rest[0].to_string(),
                    text: rest[1..].join(" "),
                }
            }
            "comments" => ShellCommand::Comments(arg("post")?),
            "users" => ShellCommand::Users,
            "follow" => ShellCommand::Follow(arg("user")?),
            "profile" => ShellCommand::Profile(rest.first().map(|s| s.to_string())),
            "avatar" => ShellCommand::Avatar(PathBuf::from(arg("path")?)),
            "chats" => ShellCommand::Chats,
            "open" => ShellCommand::Open(arg("user")?),
            "send" => ShellCommand::Send(text("text")?),
            "online" => ShellCommand::Online,
            "notifications" => ShellCommand::Notifications,
            "phone" => ShellCommand::Phone(arg("number")?),
            "verify-phone" => ShellCommand::VerifyPhone(arg("otp")?),
            "resend-verification" => ShellCommand::ResendVerification,
            "whoami" => ShellCommand::Whoami,
            "logout" => ShellCommand::Logout,
            "help" | "?" => ShellCommand::Help,
            "quit" | "exit" => ShellCommand::Quit,
            other => return Err(format!("unknown command: {} (try 'help')", other)),
        };
        Ok(Some(command))
    }
}

enum Flow {
    Continue,
    Quit,
}

struct Shell {
    client: ApiClient,
    channel: Option<Arc<LiveChannel>>,
    presence: Listener<OnlineSet>,
    inbox: Listener<NotificationQueue>,
    chat: Listener<Conversation>,
    /// Printing hooks on the current connection.
    alerts: Vec<Subscription>,
    /// Last listed posts, addressable by number.
    posts: Vec<PostView>,
    /// Last listed users or conversations, addressable by number.
    people: Vec<UserSummary>,
}

/// Log in, start the live channel and run the shell until quit or logout.
pub async fn execute(email: Option<String>, token: Option<String>, config: &Config) -> Result<()> {
    let client = client(config)?;

    let user = match token {
        Some(token) => client
            .login_with_token(&token)
            .context("Login token was not accepted")?,
        None => {
            let email = match email {
                Some(email) => email,
                None => Input::<String>::new().with_prompt("Email").interact_text()?,
            };
            let password = Password::new().with_prompt("Password").interact()?;
            with_spinner("Logging in...", client.login(&email, &password)).await?
        }
    };

    println!("{} Logged in as {}", "✓".green(), user.username.bold());
    if !user.is_email_verified {
        println!(
            "{} Email not verified. Use {} for a new link.",
            "!".yellow(),
            "resend-verification".cyan()
        );
    }

    let (channel, mut state, watcher) = if config.channel.enabled {
        let url = config.client_config().channel_url()?;
        let channel = LiveChannel::new(Arc::new(WsConnector::new()), url);
        let state = channel.watch_state();
        let watcher = channel.watch_session(client.session().subscribe());
        (Some(channel), Some(state), Some(watcher))
    } else {
        (None, None, None)
    };

    let mut shell = Shell {
        client,
        channel,
        presence: Listener::default(),
        inbox: Listener::default(),
        chat: Listener::default(),
        alerts: Vec::new(),
        posts: Vec::new(),
        people: Vec::new(),
    };
    println!("Type {} for commands.", "help".cyan());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        shell.prompt();
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match ShellCommand::parse(&line) {
                    Ok(None) => {}
                    Ok(Some(command)) => match shell.run(command).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Quit) => break,
                        Err(e) => report(&e),
                    },
                    Err(usage) => println!("{} {}", "✗".red(), usage),
                }
            }
            Some(next) = next_state(&mut state) => shell.on_channel_state(next).await,
        }

        if !shell.client.session().is_authenticated() {
            println!("Session ended. Run {} to log in again.", "sphere shell".cyan());
            break;
        }
    }

    if let Some(channel) = &shell.channel {
        channel.shutdown().await;
    }
    if let Some(watcher) = watcher {
        watcher.abort();
    }
    Ok(())
}

async fn next_state(state: &mut Option<watch::Receiver<ChannelState>>) -> Option<ChannelState> {
    match state {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

fn report(e: &anyhow::Error) {
    match e.downcast_ref::<CoreError>() {
        Some(CoreError::SessionExpired) => {
            println!("{} Session expired. Please log in again.", "✗".red())
        }
        _ => println!("{} {:#}", "✗".red(), e),
    }
}

impl Shell {
    fn prompt(&self) {
        let unread = self.inbox.read(|q| q.unread());
        if unread > 0 {
            print!("{} {} ", "sphere".cyan(), format!("({})>", unread).yellow());
        } else {
            print!("{} ", "sphere>".cyan());
        }
        let _ = std::io::stdout().flush();
    }

    async fn current_channel(&self) -> Option<ChannelRef> {
        match &self.channel {
            Some(channel) => channel.current().await,
            None => None,
        }
    }

    async fn on_channel_state(&mut self, state: ChannelState) {
        match state {
            ChannelState::Connected => match self.attach().await {
                Ok(()) => println!("\n{} Live updates on", "●".green()),
                Err(e) => warn!("Failed to attach listeners: {}", e),
            },
            ChannelState::Disconnected => {
                if !self.alerts.is_empty() {
                    self.alerts.clear();
                    println!("\n{} Live updates off", "●".red());
                }
            }
            ChannelState::Connecting => debug!("Live channel connecting"),
        }
    }

    /// Attach feature listeners and printing hooks to the current connection.
    async fn attach(&mut self) -> Result<()> {
        let Some(handle) = self.current_channel().await else {
            return Ok(());
        };
        self.presence.attach(&handle)?;
        self.inbox.attach(&handle)?;
        self.chat.attach(&handle)?;

        self.alerts = vec![
            handle.subscribe(EventKind::NewNotification, "shell", |event| {
                if let ChannelEvent::Notification(n) = event {
                    println!("\n{} {}", "🔔".yellow(), n.message);
                }
            })?,
            handle.subscribe(EventKind::ReceiveMessage, "shell", |event| {
                if let ChannelEvent::Message(m) = event {
                    println!("\n{} {}: {}", "✉".cyan(), m.sender.username.bold(), m.content);
                }
            })?,
        ];
        Ok(())
    }

    async fn run(&mut self, command: ShellCommand) -> Result<Flow> {
        match command {
            ShellCommand::Feed(feed) => {
                let message = format!("Loading {} feed...", feed);
                let posts = with_spinner(&message, self.client.list_posts(feed)).await?;
                self.show_posts(posts);
            }
            ShellCommand::Post { text, media } => {
                let media = media
                    .map(|path| MediaUpload::from_path(&path))
                    .transpose()
                    .context("Failed to read media file")?;
                with_spinner("Posting...", self.client.create_post(&text, media)).await?;
                println!("{} Posted", "✓".green());
            }
            ShellCommand::Like(key) => {
                let idx = self.post_index(&key)?;
                let liked = self.posts[idx].toggle_like(&self.client).await?;
                let count = self.posts[idx].like_count();
                let verb = if liked { "Liked" } else { "Unliked" };
                println!("{} {} ({} likes)", "✓".green(), verb, count);
            }
            ShellCommand::Comment { post, text } => {
                let idx = self.post_index(&post)?;
                self.posts[idx].add_comment(&self.client, &text).await?;
                println!("{} Comment added ({} total)", "✓".green(), self.posts[idx].comments().len());
            }
            ShellCommand::Comments(key) => {
                let idx = self.post_index(&key)?;
                let comments = self.posts[idx].comments();
                if comments.is_empty() {
                    println!("No comments yet.");
                }
                for c in comments {
                    println!(
                        "  {} {} {}",
                        c.author.username.bold(),
                        local(&c.created_at, "%Y-%m-%d %H:%M").dimmed(),
                        c.text
                    );
                }
            }
            ShellCommand::Users => {
                let users = with_spinner("Loading users...", self.client.list_users()).await?;
                self.people = users;
                self.show_people();
            }
            ShellCommand::Follow(key) => {
                let id = self.user_id(&key)?;
                let following = toggle_follow(&self.client, &id).await?;
                let verb = if following { "Following" } else { "Unfollowed" };
                println!("{} {} {}", "✓".green(), verb, self.display_name(&id));
            }
            ShellCommand::Profile(name) => self.profile(name).await?,
            ShellCommand::Avatar(path) => {
                let upload = MediaUpload::from_path(&path).context("Failed to read avatar file")?;
                let patch = with_spinner("Uploading...", self.client.update_avatar(upload)).await?;
                print_ack(patch.profile_picture, "Avatar updated");
            }
            ShellCommand::Chats => {
                let people = with_spinner("Loading chats...", self.client.conversations()).await?;
                self.people = people;
                if self.people.is_empty() {
                    println!("No conversations yet. Use {} to start one.", "open <user>".cyan());
                }
                self.show_people();
            }
            ShellCommand::Open(key) => {
                let id = self.user_id(&key)?;
                let loaded = open_conversation(&self.client, &self.chat, &id).await;
                println!("{} {}", "Chat with".bold(), self.display_name(&id).bold());
                self.chat.read(|c| c.messages().iter().for_each(print_message));
                loaded?;
            }
            ShellCommand::Send(text) => {
                let handle = self
                    .current_channel()
                    .await
                    .ok_or_else(|| anyhow!("Live channel is not connected"))?;
                let sent = send_chat_message(&self.client, &handle, &self.chat, &text).await?;
                print_message(&sent);
            }
            ShellCommand::Online => {
                let online: Vec<String> = self.presence.read(|s| s.iter().map(String::from).collect());
                if online.is_empty() {
                    println!("Nobody else is online.");
                }
                for id in online {
                    println!("  {} {}", "●".green(), self.display_name(&id));
                }
            }
            ShellCommand::Notifications => {
                let items: Vec<_> = self.inbox.read(|q| q.iter().cloned().collect());
                if items.is_empty() {
                    println!("No notifications.");
                }
                for n in items {
                    println!(
                        "  {} {}",
                        local(&n.created_at, "%Y-%m-%d %H:%M").dimmed(),
                        n.message
                    );
                }
                self.inbox.update(|q| q.mark_read());
            }
            ShellCommand::Phone(number) => {
                print_ack(self.client.add_phone(&number).await?, "Code sent");
            }
            ShellCommand::VerifyPhone(otp) => {
                print_ack(self.client.verify_phone(&otp).await?, "Phone verified");
            }
            ShellCommand::ResendVerification => {
                print_ack(self.client.resend_verification().await?, "Verification email sent");
            }
            ShellCommand::Whoami => match self.client.session().identity() {
                Some(me) => {
                    println!("{} <{}>", me.username.bold(), me.email);
                    println!("  id:        {}", me.id);
                    println!("  email:     {}", verified(me.is_email_verified));
                    println!("  phone:     {}", verified(me.is_phone_verified.unwrap_or(false)));
                    println!("  following: {}", me.following.len());
                }
                None => println!("Not logged in."),
            },
            ShellCommand::Logout => {
                self.client.logout().await;
                println!("{} Logged out", "✓".green());
                return Ok(Flow::Quit);
            }
            ShellCommand::Help => println!("{}", HELP),
            ShellCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    async fn profile(&mut self, name: Option<String>) -> Result<()> {
        let name = match name {
            Some(name) => name,
            None => self
                .client
                .session()
                .identity()
                .map(|me| me.username)
                .ok_or(CoreError::NotAuthenticated)?,
        };
        let Some(profile) = self.client.get_profile(&name).await? else {
            println!("No user named {}", name.bold());
            return Ok(());
        };

        println!("{}", profile.username.bold());
        println!(
            "  {} following · {} followers",
            profile.following.as_ref().map_or(0, Vec::len),
            profile.followers.as_ref().map_or(0, Vec::len)
        );
        if let Some(picture) = &profile.profile_picture {
            println!("  {}", picture.dimmed());
        }
        let posts = self.client.user_posts(&profile.id).await?;
        self.show_posts(posts);
        Ok(())
    }

    fn show_posts(&mut self, posts: Vec<Post>) {
        let me = self.client.session().identity().map(|u| u.id);
        self.posts = posts.into_iter().map(PostView::new).collect();
        if self.posts.is_empty() {
            println!("No posts yet.");
        }
        for (i, view) in self.posts.iter().enumerate() {
            let post = view.post();
            let author = post.author.as_ref().map_or("?", |a| a.username.as_str());
            let heart = match &me {
                Some(me) if view.is_liked_by(me) => "♥".red(),
                _ => "♡".normal(),
            };
            println!(
                "{:>3}. {} {}  {} {}  💬 {}",
                i + 1,
                author.bold(),
                local(&post.created_at, "%Y-%m-%d %H:%M").dimmed(),
                heart,
                view.like_count(),
                view.comments().len()
            );
            if !post.content.is_empty() {
                println!("     {}", post.content);
            }
            if let Some(url) = &post.media_url {
                println!("     {}", url.dimmed());
            }
        }
    }

    fn show_people(&self) {
        let me = self.client.session().identity();
        for (i, person) in self.people.iter().enumerate() {
            let online = if self.presence.read(|s| s.is_online(&person.id)) {
                "●".green()
            } else {
                "○".dimmed()
            };
            let following = match &me {
                Some(me) if me.is_following(&person.id) => " (following)".dimmed().to_string(),
                _ => String::new(),
            };
            println!("{:>3}. {} {}{}", i + 1, online, person.username.bold(), following);
        }
    }

    fn post_index(&self, key: &str) -> Result<usize> {
        find_post(&self.posts, key)
            .ok_or_else(|| anyhow!("Unknown post {}; list posts with `feed` first", key))
    }

    fn user_id(&self, key: &str) -> Result<String> {
        resolve_user(&self.people, &self.posts, key)
    }

    fn display_name(&self, id: &str) -> String {
        self.people
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.username.clone())
            .or_else(|| {
                self.posts
                    .iter()
                    .filter_map(post_author)
                    .find(|a| a.id == id)
                    .map(|a| a.username.clone())
            })
            .unwrap_or_else(|| id.to_string())
    }
}

/// Resolve a post by list number (1-based) or id.
fn find_post(posts: &[PostView], key: &str) -> Option<usize> {
    if let Ok(n) = key.parse::<usize>() {
        if (1..=posts.len()).contains(&n) {
            return Some(n - 1);
        }
    }
    posts.iter().position(|p| p.post().id == key)
}

fn post_author(view: &PostView) -> Option<&Author> {
    view.post().author.as_ref()
}

/// `@<post>` names the author of a listed post; anything else is a user.
fn resolve_user(people: &[UserSummary], posts: &[PostView], key: &str) -> Result<String> {
    if let Some(post) = key.strip_prefix('@') {
        let idx = find_post(posts, post)
            .ok_or_else(|| anyhow!("Unknown post {}; list posts with `feed` first", post))?;
        return post_author(&posts[idx])
            .map(|author| author.id.clone())
            .ok_or_else(|| anyhow!("Post {} has no author", post));
    }
    Ok(find_user(people, key).unwrap_or_else(|| key.to_string()))
}

/// Resolve a user id by list number (1-based), username or id.
fn find_user(people: &[UserSummary], key: &str) -> Option<String> {
    if let Ok(n) = key.parse::<usize>() {
        if (1..=people.len()).contains(&n) {
            return Some(people[n - 1].id.clone());
        }
    }
    people
        .iter()
        .find(|p| p.username == key || p.id == key)
        .map(|p| p.id.clone())
}

fn print_message(m: &ChatMessage) {
    println!(
        "  {} {}: {}",
        local(&m.created_at, "%H:%M").dimmed(),
        m.sender.username.bold(),
        m.content
    );
}

fn local(at: &DateTime<Utc>, fmt: &str) -> String {
    at.with_timezone(&Local).format(fmt).to_string()
}

fn verified(yes: bool) -> colored::ColoredString {
    if yes {
        "verified".green()
    } else {
        "not verified".yellow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> ShellCommand {
        ShellCommand::parse(line).unwrap().unwrap()
    }

    #[test]
    fn test_blank_line() {
        assert_eq!(ShellCommand::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_feed_defaults_to_public() {
        assert_eq!(parse("feed"), ShellCommand::Feed(FeedType::Public));
        assert_eq!(parse("feed Trending"), ShellCommand::Feed(FeedType::Trending));
        assert!(ShellCommand::parse("feed sideways").is_err());
    }

    #[test]
    fn test_post_with_media() {
        assert_eq!(
            parse("post sunset at the pier --media /tmp/pier.jpg"),
            ShellCommand::Post {
                text: "sunset at the pier".into(),
                media: Some(PathBuf::from("/tmp/pier.jpg")),
            }
        );
        assert_eq!(
            parse("post hello"),
            ShellCommand::Post {
                text: "hello".into(),
                media: None,
            }
        );
        assert!(ShellCommand::parse("post").is_err());
        assert!(ShellCommand::parse("post hi --media").is_err());
    }

    #[test]
    fn test_comment_keeps_text() {
        assert_eq!(
            parse("comment 2 nice   shot"),
            ShellCommand::Comment {
                post: "2".into(),
                text: "nice shot".into(),
            }
        );
        assert!(ShellCommand::parse("comment 2").is_err());
    }

    #[test]
    fn test_arguments_required() {
        for line in ["like", "follow", "open", "send", "phone", "verify-phone", "avatar"] {
            assert!(ShellCommand::parse(line).is_err(), "{}", line);
        }
        assert_eq!(parse("send see you  soon"), ShellCommand::Send("see you soon".into()));
        assert_eq!(parse("profile"), ShellCommand::Profile(None));
    }

    #[test]
    fn test_unknown_command() {
        let err = ShellCommand::parse("dance").unwrap_err();
        assert!(err.contains("unknown command"));
    }

    fn person(id: &str, name: &str) -> UserSummary {
        UserSummary {
            id: id.into(),
            username: name.into(),
            profile_picture: None,
        }
    }

    #[test]
    fn test_find_user() {
        let people = vec![person("u1", "ada"), person("u2", "bob")];
        assert_eq!(find_user(&people, "2").as_deref(), Some("u2"));
        assert_eq!(find_user(&people, "ada").as_deref(), Some("u1"));
        assert_eq!(find_user(&people, "u2").as_deref(), Some("u2"));
        assert_eq!(find_user(&people, "3"), None);
        assert_eq!(find_user(&people, "carol"), None);
    }

    #[test]
    fn test_find_post() {
        let posts = vec![PostView::new(bare_post("p9"))];
        assert_eq!(find_post(&posts, "1"), Some(0));
        assert_eq!(find_post(&posts, "p9"), Some(0));
        assert_eq!(find_post(&posts, "0"), None);
        assert_eq!(find_post(&posts, "2"), None);
    }

    #[test]
    fn test_follow_post_author() {
        assert_eq!(parse("follow @2"), ShellCommand::Follow("@2".into()));

        let mut post = bare_post("p1");
        post.author = Some(Author {
            id: "u7".into(),
            username: "grace".into(),
            profile_picture: None,
        });
        let views = vec![PostView::new(post), PostView::new(bare_post("p2"))];
        let people = vec![person("u1", "ada")];

        assert_eq!(resolve_user(&people, &views, "@1").unwrap(), "u7");
        assert_eq!(resolve_user(&people, &views, "@p1").unwrap(), "u7");
        assert!(resolve_user(&people, &views, "@2").is_err());
        assert!(resolve_user(&people, &views, "@9").is_err());
        assert_eq!(resolve_user(&people, &views, "1").unwrap(), "u1");
        assert_eq!(resolve_user(&people, &views, "u42").unwrap(), "u42");
    }

    fn bare_post(id: &str) -> Post {
        Post {
            id: id.into(),
            content: "hello".into(),
            author: None,
            media_url: None,
            media_type: None,
            created_at: Utc::now(),
            likes: Vec::new(),
            comments: Vec::new(),
        }
    }
}
