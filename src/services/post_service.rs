use chrono::{DateTime, Utc};
use url::Url;
use validator::Validate;

use crate::{
    config::Config,
    error::{AppError, Result},
    models::{
        CreatePostRequest, NewPost, Post, PostFilter, PostOrder, PostPage, PostQuery,
        PostResponse, User, VoteOutcome,
    },
    services::{Submission, comment_service, rate_limit::RateLimiter, user_service},
    store::Store,
};

const PDF_SUFFIX: &str = " [pdf]";

/// Host label shown next to a link: the URL's authority, port included.
pub fn url_base(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

pub fn format_title(title: &str, url: Option<&str>) -> String {
    let title = title.trim();
    match url {
        Some(url) if url.to_ascii_lowercase().ends_with(".pdf") => {
            format!("{}{}", title, PDF_SUFFIX)
        }
        _ => title.to_string(),
    }
}

pub async fn refresh_popularity(
    store: &dyn Store,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<u64> {
    let refreshed = store
        .refresh_pop_scores(now, config.popularity_gravity)
        .await?;
    tracing::debug!("Refreshed popularity of {} posts", refreshed);
    Ok(refreshed)
}

async fn refresh_if_read_triggered(
    store: &dyn Store,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<()> {
    if config.refresh_on_read() {
        refresh_popularity(store, config, now).await?;
    }
    Ok(())
}

async fn paginate(
    store: &dyn Store,
    config: &Config,
    filter: PostFilter,
    order: PostOrder,
    pool: Option<i64>,
    page: u32,
) -> Result<PostPage> {
    if page == 0 {
        return Err(AppError::BadRequest("Pages start at 1".to_string()));
    }

    let per_page = i64::from(config.posts_per_page.max(1));
    let offset = i64::from(page - 1) * per_page;

    let available = store.count_posts(filter.clone()).await?;
    let total = pool.map_or(available, |pool| available.min(pool));

    if page > 1 && offset >= total {
        return Err(AppError::NotFound("Page not found".to_string()));
    }

    let posts = store
        .list_posts(PostQuery {
            filter,
            order,
            limit: per_page.min(total - offset).max(0),
            offset,
        })
        .await?;

    let has_next = offset + per_page < total;
    Ok(PostPage {
        posts,
        page,
        per_page: per_page as u32,
        has_next,
        next_page: has_next.then_some(page + 1),
        start_rank: (per_page as u32) * (page - 1) + 1,
    })
}

/// Live posts by popularity, cut to the configured pool.
pub async fn top_posts(
    store: &dyn Store,
    config: &Config,
    page: u32,
    now: DateTime<Utc>,
) -> Result<PostPage> {
    refresh_if_read_triggered(store, config, now).await?;
    paginate(
        store,
        config,
        PostFilter::All,
        PostOrder::Popularity,
        Some(i64::from(config.total_posts)),
        page,
    )
    .await
}

pub async fn newest_posts(
    store: &dyn Store,
    config: &Config,
    page: u32,
    now: DateTime<Utc>,
) -> Result<PostPage> {
    refresh_if_read_triggered(store, config, now).await?;
    paginate(store, config, PostFilter::All, PostOrder::Newest, None, page).await
}

pub async fn posts_from_source(
    store: &dyn Store,
    config: &Config,
    url_base: &str,
    page: u32,
    now: DateTime<Utc>,
) -> Result<PostPage> {
    refresh_if_read_triggered(store, config, now).await?;
    paginate(
        store,
        config,
        PostFilter::Source(url_base.to_string()),
        PostOrder::Newest,
        None,
        page,
    )
    .await
}

pub async fn user_submissions(
    store: &dyn Store,
    config: &Config,
    username: &str,
    page: u32,
    now: DateTime<Utc>,
) -> Result<PostPage> {
    let user = user_service::get_user_by_username(store, username).await?;
    refresh_if_read_triggered(store, config, now).await?;
    paginate(
        store,
        config,
        PostFilter::Author(user.id),
        PostOrder::Newest,
        None,
        page,
    )
    .await
}

/// Validates and stores a new post unless the author is over their daily
/// quota. Anonymous posts skip the quota.
pub async fn submit_post(
    store: &dyn Store,
    config: &Config,
    author_id: Option<i64>,
    request: &CreatePostRequest,
    now: DateTime<Utc>,
) -> Result<Submission<Post>> {
    request.validate()?;

    if let Some(author_id) = author_id {
        let limiter = RateLimiter::from_config(config);
        if !limiter.can_post(store, author_id, now).await? {
            tracing::info!("User {} reached the daily post limit", author_id);
            return Ok(Submission::Refused {
                limit: limiter.posts_per_day(),
            });
        }
    }

    let url = request
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty());
    let text = request
        .text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let post = store
        .insert_post(NewPost {
            title: format_title(&request.title, url),
            url: url.map(str::to_string),
            url_base: url.and_then(url_base),
            text: text.map(str::to_string),
            author_id,
            created_at: now,
        })
        .await?;

    tracing::info!("Post {} submitted", post.id);
    Ok(Submission::Created(post))
}

pub async fn get_post_page(
    store: &dyn Store,
    config: &Config,
    post_id: i64,
) -> Result<PostResponse> {
    let post = store
        .get_post(post_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

    let comment_count = store.count_post_comments(post_id).await?;
    let comments = comment_service::thread_for_post(store, config, post_id).await?;

    Ok(PostResponse {
        post,
        comment_count,
        comments,
    })
}

pub async fn upvote_post(store: &dyn Store, user_id: i64, post_id: i64) -> Result<VoteOutcome> {
    let outcome = store.upvote_post(user_id, post_id).await?;
    if !outcome.counted() {
        tracing::debug!("User {} already voted on post {}", user_id, post_id);
    }
    Ok(outcome)
}

/// Authors and admins may delete; anyone else is told the post does not exist.
pub async fn delete_post(
    store: &dyn Store,
    config: &Config,
    actor: &User,
    post_id: i64,
) -> Result<()> {
    let post = store
        .get_post(post_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

    let is_author = post.author_id == Some(actor.id);
    if !is_author && !user_service::is_admin(config, actor) {
        return Err(AppError::NotFound("Post not found".to_string()));
    }

    store.soft_delete_post(post_id).await?;
    tracing::info!("Post {} deleted by user {}", post_id, actor.id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::NewUser, store::MemoryStore};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn config() -> Config {
        Config {
            posts_per_page: 2,
            total_posts: 3,
            ..Config::default()
        }
    }

    async fn user(store: &MemoryStore, name: &str) -> User {
        store
            .create_user(NewUser {
                username: name.to_string(),
                email: format!("{}@example.com", name),
                password_hash: "x".to_string(),
                created_at: now(),
            })
            .await
            .unwrap()
    }

    fn request(title: &str, url: Option<&str>) -> CreatePostRequest {
        CreatePostRequest {
            title: title.to_string(),
            url: url.map(str::to_string),
            text: None,
        }
    }

    async fn submit(store: &MemoryStore, author: i64, title: &str, at: DateTime<Utc>) -> Post {
        match submit_post(store, &Config::default(), Some(author), &request(title, None), at)
            .await
            .unwrap()
        {
            Submission::Created(post) => post,
            Submission::Refused { .. } => panic!("unexpected refusal"),
        }
    }

    #[test]
    fn url_base_is_the_authority() {
        assert_eq!(
            url_base("http://flask.pocoo.org/docs/1.0/testing/").as_deref(),
            Some("flask.pocoo.org")
        );
        assert_eq!(
            url_base("http://localhost:8080/a").as_deref(),
            Some("localhost:8080")
        );
        assert_eq!(url_base("not a url"), None);
    }

    #[test]
    fn pdf_links_are_labelled() {
        assert_eq!(
            format_title("Paper", Some("https://example.org/x.pdf")),
            "Paper [pdf]"
        );
        assert_eq!(format_title("Paper", Some("https://example.org/x")), "Paper");
        assert_eq!(format_title("Paper", None), "Paper");
    }

    #[tokio::test]
    async fn submit_derives_host_label() {
        let store = MemoryStore::new();
        let author = user(&store, "susan").await;
        let outcome = submit_post(
            &store,
            &Config::default(),
            Some(author.id),
            &request("Testing", Some("http://flask.pocoo.org/docs/1.0/testing/")),
            now(),
        )
        .await
        .unwrap();

        let Submission::Created(post) = outcome else {
            panic!("post was refused");
        };
        assert_eq!(post.url_base.as_deref(), Some("flask.pocoo.org"));
        assert_eq!(post.score, 0);
        assert_eq!(post.author_id, Some(author.id));
    }

    #[tokio::test]
    async fn submit_is_refused_over_the_daily_limit() {
        let store = MemoryStore::new();
        let author = user(&store, "susan").await;
        let config = Config {
            user_posts_per_day: 1,
            ..Config::default()
        };

        for expected_created in [true, true, false] {
            let outcome = submit_post(&store, &config, Some(author.id), &request("t", None), now())
                .await
                .unwrap();
            assert_eq!(matches!(outcome, Submission::Created(_)), expected_created);
        }
    }

    #[tokio::test]
    async fn submit_rejects_invalid_input() {
        let store = MemoryStore::new();
        let err = submit_post(&store, &Config::default(), None, &request("", None), now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn upvote_bumps_score_and_karma_once() {
        let store = MemoryStore::new();
        let author = user(&store, "susan").await;
        let voter = user(&store, "john").await;
        let post = submit(&store, author.id, "p", now()).await;

        let first = upvote_post(&store, voter.id, post.id).await.unwrap();
        assert_eq!(first, VoteOutcome::Counted { score: 1 });

        let second = upvote_post(&store, voter.id, post.id).await.unwrap();
        assert_eq!(second, VoteOutcome::AlreadyVoted { score: 1 });

        let author = store.get_user(author.id).await.unwrap().unwrap();
        assert_eq!(author.karma, 2);
        assert_eq!(store.get_post(post.id).await.unwrap().unwrap().score, 1);
    }

    #[tokio::test]
    async fn upvote_unknown_post_is_not_found() {
        let store = MemoryStore::new();
        let voter = user(&store, "john").await;
        let err = upvote_post(&store, voter.id, 42).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn top_feed_orders_by_popularity_within_pool() {
        let store = MemoryStore::new();
        let author = user(&store, "susan").await;
        let config = config();

        let old_hit = submit(&store, author.id, "old hit", now() - Duration::hours(30)).await;
        let fresh = submit(&store, author.id, "fresh", now() - Duration::hours(1)).await;
        let popular = submit(&store, author.id, "popular", now() - Duration::hours(2)).await;
        let dud = submit(&store, author.id, "dud", now() - Duration::hours(3)).await;
        store.set_post_score(old_hit.id, 20).await;
        store.set_post_score(popular.id, 10).await;
        store.set_post_score(fresh.id, 1).await;

        let first = top_posts(&store, &config, 1, now()).await.unwrap();
        let ids: Vec<i64> = first.posts.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![popular.id, old_hit.id]);
        assert!(first.has_next);
        assert_eq!(first.next_page, Some(2));
        assert_eq!(first.start_rank, 1);

        // Pool of three: the dud never shows up.
        let second = top_posts(&store, &config, 2, now()).await.unwrap();
        let ids: Vec<i64> = second.posts.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![fresh.id]);
        assert!(!second.has_next);
        assert_eq!(second.start_rank, 3);
        assert!(!ids.contains(&dud.id));
    }

    #[tokio::test]
    async fn refresh_is_idempotent() {
        let store = MemoryStore::new();
        let author = user(&store, "susan").await;
        let post = submit(&store, author.id, "p", now() - Duration::hours(2)).await;
        let config = Config::default();

        refresh_popularity(&store, &config, now()).await.unwrap();
        let first = store.get_post(post.id).await.unwrap().unwrap().pop_score;
        refresh_popularity(&store, &config, now()).await.unwrap();
        let second = store.get_post(post.id).await.unwrap().unwrap().pop_score;

        assert_eq!(first, second);
        assert!((first + 1.0 / 4f64.powf(1.8)).abs() < 1e-12);
    }

    #[tokio::test]
    async fn newest_feed_skips_deleted_and_paginates() {
        let store = MemoryStore::new();
        let author = user(&store, "susan").await;
        let config = config();

        let a = submit(&store, author.id, "a", now() - Duration::hours(3)).await;
        let b = submit(&store, author.id, "b", now() - Duration::hours(2)).await;
        let c = submit(&store, author.id, "c", now() - Duration::hours(1)).await;
        store.soft_delete_post(b.id).await.unwrap();

        let page = newest_posts(&store, &config, 1, now()).await.unwrap();
        let ids: Vec<i64> = page.posts.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![c.id, a.id]);
        assert!(!page.has_next);

        let err = newest_posts(&store, &config, 2, now()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        let err = newest_posts(&store, &config, 0, now()).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn source_and_author_feeds_filter() {
        let store = MemoryStore::new();
        let susan = user(&store, "susan").await;
        let john = user(&store, "john").await;
        let config = Config::default();

        let linked = match submit_post(
            &store,
            &config,
            Some(susan.id),
            &request("link", Some("https://news.example.com/a")),
            now(),
        )
        .await
        .unwrap()
        {
            Submission::Created(post) => post,
            Submission::Refused { .. } => panic!("refused"),
        };
        let johns = submit(&store, john.id, "text", now()).await;

        let by_source = posts_from_source(&store, &config, "news.example.com", 1, now())
            .await
            .unwrap();
        assert_eq!(by_source.posts.len(), 1);
        assert_eq!(by_source.posts[0].id, linked.id);

        let by_john = user_submissions(&store, &config, "john", 1, now())
            .await
            .unwrap();
        assert_eq!(by_john.posts.len(), 1);
        assert_eq!(by_john.posts[0].id, johns.id);

        let err = user_submissions(&store, &config, "nobody", 1, now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn only_author_or_admin_may_delete() {
        let store = MemoryStore::new();
        let susan = user(&store, "susan").await;
        let john = user(&store, "john").await;
        let admin = user(&store, "admin").await;
        let config = Config {
            admin_emails: vec!["admin@example.com".to_string()],
            ..Config::default()
        };

        let post = submit(&store, susan.id, "p", now()).await;
        let err = delete_post(&store, &config, &john, post.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(!store.get_post(post.id).await.unwrap().unwrap().deleted);

        delete_post(&store, &config, &admin, post.id).await.unwrap();
        assert!(store.get_post(post.id).await.unwrap().unwrap().deleted);

        let other = submit(&store, susan.id, "q", now()).await;
        delete_post(&store, &config, &susan, other.id).await.unwrap();
        assert!(store.get_post(other.id).await.unwrap().unwrap().deleted);
    }
}
