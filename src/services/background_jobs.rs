use chrono::Utc;
use std::sync::Arc;
use tokio::time::{Duration, interval};

use crate::{config::Config, error::Result, services::post_service, store::Store};

#[derive(Clone)]
pub struct BackgroundJobsService {
    store: Arc<dyn Store>,
    config: Arc<Config>,
}

impl BackgroundJobsService {
    pub fn new(store: Arc<dyn Store>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    /// Start the periodic popularity refresh, if one is configured.
    pub fn start_all_jobs(&self) {
        if self.config.refresh_on_read() {
            tracing::info!("Popularity is refreshed on read, no background jobs started");
            return;
        }

        let jobs_service = self.clone();
        let period = Duration::from_secs(self.config.popularity_refresh_secs);

        tokio::spawn(async move {
            let mut interval = interval(period);
            loop {
                interval.tick().await;
                if let Err(e) = jobs_service.refresh_popularity().await {
                    tracing::error!("Failed to refresh popularity scores: {}", e);
                }
            }
        });

        tracing::info!(
            "Background jobs started, popularity refresh every {}s",
            self.config.popularity_refresh_secs
        );
    }

    async fn refresh_popularity(&self) -> Result<u64> {
        post_service::refresh_popularity(self.store.as_ref(), &self.config, Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{NewPost, PostFilter},
        store::MemoryStore,
    };

    #[tokio::test]
    async fn refresh_job_recomputes_scores() {
        let store = Arc::new(MemoryStore::new());
        let post = store
            .insert_post(NewPost {
                title: "t".to_string(),
                url: None,
                url_base: None,
                text: None,
                author_id: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let jobs = BackgroundJobsService::new(store.clone(), Arc::new(Config::default()));
        assert_eq!(jobs.refresh_popularity().await.unwrap(), 1);

        let refreshed = store.get_post(post.id).await.unwrap().unwrap();
        assert!(refreshed.pop_score < 0.0);
        assert_eq!(store.count_posts(PostFilter::All).await.unwrap(), 1);
    }
}
