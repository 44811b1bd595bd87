use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::{
    error::{AppError, Result},
    models::{
        Comment, NewComment, NewPost, NewUser, Post, PostFilter, PostOrder, PostQuery,
        UpdateProfileRequest, User, VoteOutcome,
    },
    services::{score, thread::PathScheme},
    store::Store,
};

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_unique_violation(e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            AppError::Conflict("Username or email already registered".to_string())
        }
        _ => AppError::Database(e),
    }
}

fn map_missing_post(e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::Database(db_err)
            if db_err.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) =>
        {
            AppError::NotFound("Post not found".to_string())
        }
        _ => AppError::Database(e),
    }
}

fn push_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &PostFilter) {
    query.push(" WHERE NOT deleted");
    match filter {
        PostFilter::All => {}
        PostFilter::Source(base) => {
            query.push(" AND url_base = ").push_bind(base.clone());
        }
        PostFilter::Author(author_id) => {
            query.push(" AND author_id = ").push_bind(*author_id);
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, password_hash, karma, created_at)
            VALUES ($1, $2, $3, 1, $4)
            RETURNING *
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .fetch_one(&self.db)
        .await
        .map_err(map_unique_violation)?;

        Ok(user)
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    async fn update_user_profile(
        &self,
        user_id: i64,
        update: UpdateProfileRequest,
    ) -> Result<User> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET username = COALESCE($1, username),
                email = COALESCE($2, email),
                about_me = COALESCE($3, about_me)
            WHERE id = $4
            RETURNING *
            "#,
        )
        .bind(&update.username)
        .bind(&update.email)
        .bind(&update.about_me)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await
        .map_err(map_unique_violation)?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    async fn insert_post(&self, post: NewPost) -> Result<Post> {
        let post = sqlx::query_as::<_, Post>(
            r#"
            INSERT INTO posts (title, url, url_base, text, author_id, score, pop_score, deleted, created_at)
            VALUES ($1, $2, $3, $4, $5, 0, 0, FALSE, $6)
            RETURNING *
            "#,
        )
        .bind(&post.title)
        .bind(&post.url)
        .bind(&post.url_base)
        .bind(&post.text)
        .bind(post.author_id)
        .bind(post.created_at)
        .fetch_one(&self.db)
        .await?;

        Ok(post)
    }

    async fn get_post(&self, post_id: i64) -> Result<Option<Post>> {
        let post = sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE id = $1")
            .bind(post_id)
            .fetch_optional(&self.db)
            .await?;

        Ok(post)
    }

    async fn soft_delete_post(&self, post_id: i64) -> Result<()> {
        let result = sqlx::query("UPDATE posts SET deleted = TRUE WHERE id = $1")
            .bind(post_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Post not found".to_string()));
        }
        Ok(())
    }

    async fn refresh_pop_scores(&self, now: DateTime<Utc>, gravity: f64) -> Result<u64> {
        let rows = sqlx::query("SELECT id, score, created_at FROM posts WHERE NOT deleted")
            .fetch_all(&self.db)
            .await?;

        if rows.is_empty() {
            return Ok(0);
        }

        let mut ids = Vec::with_capacity(rows.len());
        let mut pop_scores = Vec::with_capacity(rows.len());
        for row in rows {
            let created_at: DateTime<Utc> = row.get("created_at");
            ids.push(row.get::<i64, _>("id"));
            pop_scores.push(score::popularity(
                row.get("score"),
                created_at,
                now,
                gravity,
            ));
        }

        // One statement: readers see either the old or the new scores.
        let result = sqlx::query(
            r#"
            UPDATE posts AS p
            SET pop_score = s.pop_score
            FROM UNNEST($1::BIGINT[], $2::DOUBLE PRECISION[]) AS s(id, pop_score)
            WHERE p.id = s.id
            "#,
        )
        .bind(&ids)
        .bind(&pop_scores)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_posts(&self, query: PostQuery) -> Result<Vec<Post>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM posts");
        push_filter(&mut builder, &query.filter);
        builder.push(match query.order {
            PostOrder::Popularity => " ORDER BY pop_score DESC, created_at DESC, id DESC",
            PostOrder::Newest => " ORDER BY created_at DESC, id DESC",
        });
        builder
            .push(" LIMIT ")
            .push_bind(query.limit)
            .push(" OFFSET ")
            .push_bind(query.offset);

        let posts = builder.build_query_as::<Post>().fetch_all(&self.db).await?;
        Ok(posts)
    }

    async fn count_posts(&self, filter: PostFilter) -> Result<i64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS count FROM posts");
        push_filter(&mut builder, &filter);

        let row = builder.build().fetch_one(&self.db).await?;
        Ok(row.get::<i64, _>("count"))
    }

    async fn upvote_post(&self, user_id: i64, post_id: i64) -> Result<VoteOutcome> {
        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO post_votes (user_id, post_id, created_at)
            SELECT $1, id, NOW() FROM posts WHERE id = $2
            ON CONFLICT (user_id, post_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(post_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            let score: Option<i32> = sqlx::query_scalar("SELECT score FROM posts WHERE id = $1")
                .bind(post_id)
                .fetch_optional(&mut *tx)
                .await?;
            tx.rollback().await?;

            return match score {
                Some(score) => Ok(VoteOutcome::AlreadyVoted { score }),
                None => Err(AppError::NotFound("Post not found".to_string())),
            };
        }

        let row = sqlx::query(
            "UPDATE posts SET score = score + 1 WHERE id = $1 RETURNING score, author_id",
        )
        .bind(post_id)
        .fetch_one(&mut *tx)
        .await?;
        let score: i32 = row.get("score");
        let author_id: Option<i64> = row.get("author_id");

        if let Some(author_id) = author_id {
            sqlx::query("UPDATE users SET karma = karma + 1 WHERE id = $1")
                .bind(author_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(VoteOutcome::Counted { score })
    }

    async fn count_posts_since(&self, author_id: i64, since: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM posts WHERE author_id = $1 AND NOT deleted AND created_at >= $2",
        )
        .bind(author_id)
        .bind(since)
        .fetch_one(&self.db)
        .await?;

        Ok(count)
    }

    async fn insert_comment(&self, comment: NewComment, scheme: &PathScheme) -> Result<Comment> {
        let mut tx = self.db.begin().await?;

        let (parent_path, thread_timestamp, thread_score) = match comment.parent_id {
            Some(parent_id) => {
                let parent_path: String = sqlx::query_scalar(
                    "SELECT path FROM comments WHERE id = $1 AND post_id = $2",
                )
                .bind(parent_id)
                .bind(comment.post_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;

                // Share-lock the thread root. A root upvote holds the row
                // until its propagation commits, and waits for this insert
                // before propagating, so the reply is never left behind.
                let root = sqlx::query(
                    r#"
                    SELECT thread_timestamp, thread_score FROM comments
                    WHERE post_id = $1 AND path = $2
                    FOR SHARE
                    "#,
                )
                .bind(comment.post_id)
                .bind(scheme.root(&parent_path))
                .fetch_one(&mut *tx)
                .await?;

                let thread_timestamp: DateTime<Utc> = root.get("thread_timestamp");
                let thread_score: i32 = root.get("thread_score");
                (Some(parent_path), thread_timestamp, thread_score)
            }
            None => (None, comment.created_at, 0),
        };

        // Phase one: reserve the identity.
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO comments (
                text, author_id, post_id, parent_id, path,
                created_at, thread_timestamp, score, thread_score
            )
            VALUES ($1, $2, $3, $4, '', $5, $6, 0, $7)
            RETURNING id
            "#,
        )
        .bind(&comment.text)
        .bind(comment.author_id)
        .bind(comment.post_id)
        .bind(comment.parent_id)
        .bind(comment.created_at)
        .bind(thread_timestamp)
        .bind(thread_score)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_missing_post)?;

        // Phase two: derive and persist the path. Dropping `tx` on error
        // rolls the insert back.
        let path = scheme.child_path(parent_path.as_deref(), id)?;
        let comment = sqlx::query_as::<_, Comment>(
            "UPDATE comments SET path = $1 WHERE id = $2 RETURNING *",
        )
        .bind(&path)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(comment)
    }

    async fn get_comment(&self, comment_id: i64) -> Result<Option<Comment>> {
        let comment = sqlx::query_as::<_, Comment>("SELECT * FROM comments WHERE id = $1")
            .bind(comment_id)
            .fetch_optional(&self.db)
            .await?;

        Ok(comment)
    }

    async fn list_post_comments(&self, post_id: i64) -> Result<Vec<Comment>> {
        let comments = sqlx::query_as::<_, Comment>(
            r#"
            SELECT * FROM comments
            WHERE post_id = $1
            ORDER BY thread_score DESC, path ASC
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.db)
        .await?;

        Ok(comments)
    }

    async fn count_post_comments(&self, post_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE post_id = $1")
            .bind(post_id)
            .fetch_one(&self.db)
            .await?;

        Ok(count)
    }

    async fn update_comment_text(&self, comment_id: i64, text: &str) -> Result<()> {
        let result = sqlx::query("UPDATE comments SET text = $1 WHERE id = $2")
            .bind(text)
            .bind(comment_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Comment not found".to_string()));
        }
        Ok(())
    }

    async fn upvote_comment(&self, user_id: i64, comment_id: i64) -> Result<VoteOutcome> {
        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO comment_votes (user_id, comment_id, created_at)
            SELECT $1, id, NOW() FROM comments WHERE id = $2
            ON CONFLICT (user_id, comment_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(comment_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            let score: Option<i32> =
                sqlx::query_scalar("SELECT score FROM comments WHERE id = $1")
                    .bind(comment_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;

            return match score {
                Some(score) => Ok(VoteOutcome::AlreadyVoted { score }),
                None => Err(AppError::NotFound("Comment not found".to_string())),
            };
        }

        // The row lock taken here serializes concurrent upvotes on the same
        // root until commit, so the last propagation carries the last score.
        let row = sqlx::query(
            r#"
            UPDATE comments SET score = score + 1
            WHERE id = $1
            RETURNING score, parent_id, post_id, path
            "#,
        )
        .bind(comment_id)
        .fetch_one(&mut *tx)
        .await?;
        let score: i32 = row.get("score");
        let parent_id: Option<i64> = row.get("parent_id");

        if parent_id.is_none() {
            let post_id: i64 = row.get("post_id");
            let path: String = row.get("path");
            let updated = sqlx::query(
                r#"
                UPDATE comments SET thread_score = $1
                WHERE post_id = $2 AND path LIKE $3 || '%'
                "#,
            )
            .bind(score)
            .bind(post_id)
            .bind(&path)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            tracing::debug!(
                "Propagated thread score {} from comment {} to {} comments",
                score,
                comment_id,
                updated
            );
        }

        tx.commit().await?;

        Ok(VoteOutcome::Counted { score })
    }

    async fn count_comments_since(&self, author_id: i64, since: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM comments WHERE author_id = $1 AND created_at >= $2",
        )
        .bind(author_id)
        .bind(since)
        .fetch_one(&self.db)
        .await?;

        Ok(count)
    }
}
