//! Scheduled publishing service.
//!
//! Publishes items whose release date has passed and unpublishes items whose
//! expire date has passed. Each date is cleared once acted upon so an item
//! is only processed once per schedule.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::content::ContentService;
use crate::error::ContentResult;

/// Counts of items processed by one scheduling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub released: usize,
    pub expired: usize,
}

/// Scheduled publishing handler.
#[derive(Clone)]
pub struct ScheduledPublishingService {
    content: ContentService,
}

impl ScheduledPublishingService {
    /// Create a new scheduled publishing service.
    pub fn new(content: ContentService) -> Self {
        Self { content }
    }

    /// Process scheduled releases and expirations as of `now`.
    pub async fn process(&self, now: DateTime<Utc>, user_id: i32) -> ContentResult<ScheduleReport> {
        let mut report = ScheduleReport::default();

        for mut content in self.content.get_content_for_release(now).await? {
            content.set_release_date(None);
            let status = self
                .content
                .save_and_publish(&mut content, user_id, true)
                .await?;
            if status.is_success() {
                report.released += 1;
            } else {
                warn!(
                    content_id = content.id(),
                    status = ?status,
                    "scheduled release could not publish content"
                );
            }
        }

        for mut content in self.content.get_content_for_expiration(now).await? {
            content.set_expire_date(None);
            if self.content.unpublish(&mut content, user_id).await? {
                report.expired += 1;
            } else {
                debug!(content_id = content.id(), "scheduled expiry cancelled");
            }
        }

        if report.released > 0 || report.expired > 0 {
            info!(
                released = report.released,
                expired = report.expired,
                "scheduled publishing processed"
            );
        }
        Ok(report)
    }
}

impl std::fmt::Debug for ScheduledPublishingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledPublishingService").finish()
    }
}
