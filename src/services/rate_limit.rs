//! Daily submission quotas.
//!
//! A user may keep writing while the number of items they created since
//! midnight is not over the limit. The check runs before the new item
//! exists, so `limit + 1` items fit in one day.

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, TimeZone, Utc};

use crate::{config::Config, error::Result, store::Store};

pub fn within_daily_limit(count: i64, limit: i64) -> bool {
    count <= limit
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimiter {
    posts_per_day: i64,
    comments_per_day: i64,
    offset: FixedOffset,
}

impl RateLimiter {
    pub fn new(posts_per_day: i64, comments_per_day: i64, offset: FixedOffset) -> Self {
        Self {
            posts_per_day,
            comments_per_day,
            offset,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let offset = FixedOffset::east_opt(config.rate_limit_utc_offset_minutes * 60)
            .unwrap_or_else(|| {
                tracing::warn!(
                    "Invalid rate limit UTC offset {} minutes, using UTC",
                    config.rate_limit_utc_offset_minutes
                );
                Utc.fix()
            });

        Self::new(
            config.user_posts_per_day,
            config.user_comments_per_day,
            offset,
        )
    }

    pub fn posts_per_day(&self) -> i64 {
        self.posts_per_day
    }

    pub fn comments_per_day(&self) -> i64 {
        self.comments_per_day
    }

    /// Midnight of `now`'s calendar day in the limiter's time zone.
    pub fn start_of_day(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local_midnight = now
            .with_timezone(&self.offset)
            .date_naive()
            .and_time(NaiveTime::MIN);
        let utc_midnight =
            local_midnight - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        Utc.from_utc_datetime(&utc_midnight)
    }

    pub async fn can_post(&self, store: &dyn Store, user_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let count = store
            .count_posts_since(user_id, self.start_of_day(now))
            .await?;
        Ok(within_daily_limit(count, self.posts_per_day))
    }

    pub async fn can_comment(
        &self,
        store: &dyn Store,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let count = store
            .count_comments_since(user_id, self.start_of_day(now))
            .await?;
        Ok(within_daily_limit(count, self.comments_per_day))
    }
}
