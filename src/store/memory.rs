//! In-memory store: id-indexed tables behind one lock. Used when no database
//! is configured, and by the tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;

use crate::{
    error::{AppError, Result},
    models::{
        Comment, NewComment, NewPost, NewUser, Post, PostFilter, PostOrder, PostQuery,
        UpdateProfileRequest, User, VoteOutcome,
    },
    services::{
        score,
        thread::{self, PathScheme},
    },
    store::Store,
};

#[derive(Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    posts: BTreeMap<i64, Post>,
    comments: BTreeMap<i64, Comment>,
    post_votes: HashSet<(i64, i64)>,
    comment_votes: HashSet<(i64, i64)>,
    last_user_id: i64,
    last_post_id: i64,
    last_comment_id: i64,
}

impl Tables {
    fn matches(post: &Post, filter: &PostFilter) -> bool {
        if post.deleted {
            return false;
        }
        match filter {
            PostFilter::All => true,
            PostFilter::Source(base) => post.url_base.as_deref() == Some(base.as_str()),
            PostFilter::Author(author_id) => post.author_id == Some(*author_id),
        }
    }

    fn name_taken(&self, username: &str, email: &str, except: Option<i64>) -> bool {
        self.users.values().any(|u| {
            Some(u.id) != except && (u.username == username || u.email == email)
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the raw vote count of a post, bypassing vote records.
    #[cfg(test)]
    pub async fn set_post_score(&self, post_id: i64, score: i32) {
        if let Some(post) = self.tables.write().await.posts.get_mut(&post_id) {
            post.score = score;
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let mut tables = self.tables.write().await;
        if tables.name_taken(&user.username, &user.email, None) {
            return Err(AppError::Conflict(
                "Username or email already registered".to_string(),
            ));
        }

        tables.last_user_id += 1;
        let user = User {
            id: tables.last_user_id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            about_me: None,
            karma: 1,
            created_at: user.created_at,
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        Ok(self.tables.read().await.users.get(&user_id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn update_user_profile(
        &self,
        user_id: i64,
        update: UpdateProfileRequest,
    ) -> Result<User> {
        let mut tables = self.tables.write().await;
        let current = tables
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let username = update.username.unwrap_or(current.username);
        let email = update.email.unwrap_or(current.email);
        if tables.name_taken(&username, &email, Some(user_id)) {
            return Err(AppError::Conflict(
                "Username or email already registered".to_string(),
            ));
        }

        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        user.username = username;
        user.email = email;
        if update.about_me.is_some() {
            user.about_me = update.about_me;
        }
        Ok(user.clone())
    }

    async fn insert_post(&self, post: NewPost) -> Result<Post> {
        let mut tables = self.tables.write().await;
        tables.last_post_id += 1;
        let post = Post {
            id: tables.last_post_id,
            title: post.title,
            url: post.url,
            url_base: post.url_base,
            text: post.text,
            author_id: post.author_id,
            score: 0,
            pop_score: 0.0,
            deleted: false,
            created_at: post.created_at,
        };
        tables.posts.insert(post.id, post.clone());
        Ok(post)
    }

    async fn get_post(&self, post_id: i64) -> Result<Option<Post>> {
        Ok(self.tables.read().await.posts.get(&post_id).cloned())
    }

    async fn soft_delete_post(&self, post_id: i64) -> Result<()> {
        let mut tables = self.tables.write().await;
        let post = tables
            .posts
            .get_mut(&post_id)
            .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;
        post.deleted = true;
        Ok(())
    }

    async fn refresh_pop_scores(&self, now: DateTime<Utc>, gravity: f64) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let mut touched = 0;
        for post in tables.posts.values_mut().filter(|p| !p.deleted) {
            post.pop_score = score::popularity(post.score, post.created_at, now, gravity);
            touched += 1;
        }
        Ok(touched)
    }

    async fn list_posts(&self, query: PostQuery) -> Result<Vec<Post>> {
        let tables = self.tables.read().await;
        let mut posts: Vec<Post> = tables
            .posts
            .values()
            .filter(|p| Tables::matches(p, &query.filter))
            .cloned()
            .collect();

        match query.order {
            PostOrder::Popularity => posts.sort_by(|a, b| {
                b.pop_score
                    .total_cmp(&a.pop_score)
                    .then(b.created_at.cmp(&a.created_at))
                    .then(b.id.cmp(&a.id))
            }),
            PostOrder::Newest => {
                posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)))
            }
        }

        Ok(posts
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect())
    }

    async fn count_posts(&self, filter: PostFilter) -> Result<i64> {
        let tables = self.tables.read().await;
        Ok(tables
            .posts
            .values()
            .filter(|p| Tables::matches(p, &filter))
            .count() as i64)
    }

    async fn upvote_post(&self, user_id: i64, post_id: i64) -> Result<VoteOutcome> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let post = tables
            .posts
            .get_mut(&post_id)
            .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

        if !tables.post_votes.insert((user_id, post_id)) {
            return Ok(VoteOutcome::AlreadyVoted { score: post.score });
        }

        post.score += 1;
        if let Some(author) = post.author_id.and_then(|id| tables.users.get_mut(&id)) {
            author.karma += 1;
        }

        Ok(VoteOutcome::Counted { score: post.score })
    }

    async fn count_posts_since(&self, author_id: i64, since: DateTime<Utc>) -> Result<i64> {
        let tables = self.tables.read().await;
        Ok(tables
            .posts
            .values()
            .filter(|p| !p.deleted && p.author_id == Some(author_id) && p.created_at >= since)
            .count() as i64)
    }

    async fn insert_comment(&self, comment: NewComment, scheme: &PathScheme) -> Result<Comment> {
        let mut tables = self.tables.write().await;
        if !tables.posts.contains_key(&comment.post_id) {
            return Err(AppError::NotFound("Post not found".to_string()));
        }

        // Thread fields are read under the same lock that root upvotes take.
        let (parent_path, thread_timestamp, thread_score) = match comment.parent_id {
            Some(parent_id) => {
                let parent = tables
                    .comments
                    .get(&parent_id)
                    .filter(|p| p.post_id == comment.post_id)
                    .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;
                (
                    Some(parent.path.clone()),
                    parent.thread_timestamp,
                    parent.thread_score,
                )
            }
            None => (None, comment.created_at, 0),
        };

        let id = tables.last_comment_id + 1;
        // Computed before anything is stored: a failure leaves no trace.
        let path = scheme.child_path(parent_path.as_deref(), id)?;
        tables.last_comment_id = id;

        let comment = Comment {
            id,
            text: comment.text,
            author_id: comment.author_id,
            post_id: comment.post_id,
            parent_id: comment.parent_id,
            path,
            created_at: comment.created_at,
            thread_timestamp,
            score: 0,
            thread_score,
        };
        tables.comments.insert(id, comment.clone());
        Ok(comment)
    }

    async fn get_comment(&self, comment_id: i64) -> Result<Option<Comment>> {
        Ok(self.tables.read().await.comments.get(&comment_id).cloned())
    }

    async fn list_post_comments(&self, post_id: i64) -> Result<Vec<Comment>> {
        let tables = self.tables.read().await;
        let mut comments: Vec<Comment> = tables
            .comments
            .values()
            .filter(|c| c.post_id == post_id)
            .cloned()
            .collect();
        comments.sort_by(|a, b| {
            b.thread_score
                .cmp(&a.thread_score)
                .then_with(|| a.path.cmp(&b.path))
        });
        Ok(comments)
    }

    async fn count_post_comments(&self, post_id: i64) -> Result<i64> {
        let tables = self.tables.read().await;
        Ok(tables
            .comments
            .values()
            .filter(|c| c.post_id == post_id)
            .count() as i64)
    }

    async fn update_comment_text(&self, comment_id: i64, text: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let comment = tables
            .comments
            .get_mut(&comment_id)
            .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;
        comment.text = text.to_string();
        Ok(())
    }

    async fn upvote_comment(&self, user_id: i64, comment_id: i64) -> Result<VoteOutcome> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let comment = tables
            .comments
            .get_mut(&comment_id)
            .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;

        if !tables.comment_votes.insert((user_id, comment_id)) {
            return Ok(VoteOutcome::AlreadyVoted {
                score: comment.score,
            });
        }

        comment.score += 1;
        let score = comment.score;
        if comment.is_root() {
            let (post_id, root_path) = (comment.post_id, comment.path.clone());
            for node in tables
                .comments
                .values_mut()
                .filter(|c| c.post_id == post_id && thread::in_subtree(&root_path, &c.path))
            {
                node.thread_score = score;
            }
        }

        Ok(VoteOutcome::Counted { score })
    }

    async fn count_comments_since(&self, author_id: i64, since: DateTime<Utc>) -> Result<i64> {
        let tables = self.tables.read().await;
        Ok(tables
            .comments
            .values()
            .filter(|c| c.author_id == author_id && c.created_at >= since)
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn user(store: &MemoryStore, name: &str) -> User {
        store
            .create_user(NewUser {
                username: name.to_string(),
                email: format!("{}@example.com", name),
                password_hash: "x".to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    async fn post(store: &MemoryStore, author_id: i64) -> Post {
        store
            .insert_post(NewPost {
                title: "post".to_string(),
                url: None,
                url_base: None,
                text: None,
                author_id: Some(author_id),
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    async fn comment(
        store: &MemoryStore,
        author_id: i64,
        post_id: i64,
        parent_id: Option<i64>,
    ) -> Result<Comment> {
        store
            .insert_comment(
                NewComment {
                    text: "text".to_string(),
                    author_id,
                    post_id,
                    parent_id,
                    created_at: Utc::now(),
                },
                &PathScheme::default(),
            )
            .await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicate_votes_count_once() {
        let store = Arc::new(MemoryStore::new());
        let author = user(&store, "susan").await;
        let voter = user(&store, "john").await;
        let post = post(&store, author.id).await;
        let (voter_id, post_id) = (voter.id, post.id);

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.upvote_post(voter_id, post_id).await })
            })
            .collect();

        let mut counted = 0;
        for task in tasks {
            if task.await.unwrap().unwrap() == (VoteOutcome::Counted { score: 1 }) {
                counted += 1;
            }
        }

        assert_eq!(counted, 1);
        assert_eq!(store.get_post(post.id).await.unwrap().unwrap().score, 1);
        assert_eq!(store.get_user(author.id).await.unwrap().unwrap().karma, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_root_upvotes_converge() {
        let store = Arc::new(MemoryStore::new());
        let author = user(&store, "susan").await;
        let post = post(&store, author.id).await;
        let root = comment(&store, author.id, post.id, None).await.unwrap();
        let child = comment(&store, author.id, post.id, Some(root.id)).await.unwrap();
        comment(&store, author.id, post.id, Some(child.id)).await.unwrap();

        let mut voters = Vec::new();
        for i in 0..30 {
            voters.push(user(&store, &format!("voter{}", i)).await.id);
        }
        let tasks: Vec<_> = voters
            .iter()
            .map(|&voter| {
                let store = store.clone();
                let root_id = root.id;
                tokio::spawn(async move { store.upvote_comment(voter, root_id).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().unwrap().counted());
        }

        let thread = store.list_post_comments(post.id).await.unwrap();
        assert_eq!(thread.len(), 3);
        assert!(thread.iter().all(|c| c.thread_score == 30));
    }

    #[tokio::test]
    async fn comment_needs_existing_post_and_parent() {
        let store = MemoryStore::new();
        let author = user(&store, "susan").await;
        let first = post(&store, author.id).await;
        let second = post(&store, author.id).await;
        let root = comment(&store, author.id, first.id, None).await.unwrap();

        let err = comment(&store, author.id, 99, None).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = comment(&store, author.id, first.id, Some(99)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        // A parent from another post is not a valid parent.
        let err = comment(&store, author.id, second.id, Some(root.id))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        assert_eq!(store.count_post_comments(first.id).await.unwrap(), 1);
        assert_eq!(store.count_post_comments(second.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reply_copies_thread_fields_from_parent() {
        let store = MemoryStore::new();
        let author = user(&store, "susan").await;
        let post = post(&store, author.id).await;
        let root = comment(&store, author.id, post.id, None).await.unwrap();
        store.upvote_comment(author.id, root.id).await.unwrap();

        let reply = comment(&store, author.id, post.id, Some(root.id)).await.unwrap();
        assert_eq!(reply.path, format!("{}.000002", root.path));
        assert_eq!(reply.thread_score, 1);
        assert_eq!(reply.thread_timestamp, root.thread_timestamp);
    }
}
