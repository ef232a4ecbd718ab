use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::FieldValidator;
use crate::error::AppResult;

/// Lowest aggregate rating left in place by the custom action
pub const RATING_FLOOR: f64 = 4.0;

/// A trackable movie or show with its aggregate rating
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct WatchListItem {
    pub id: i64,
    pub title: String,
    pub storyline: String,
    /// Stream platform the title is available on
    pub platform_id: i64,
    pub active: bool,
    /// Decayed average of submitted ratings, 0 until the first review
    pub avg_rating: f64,
    /// Number of reviews recorded against this item
    pub number_rating: i32,
    pub created: DateTime<Utc>,
}

impl WatchListItem {
    /// Folds a new rating into the aggregate fields.
    ///
    /// The first rating is taken as-is; every later rating is averaged
    /// against the current aggregate only, so older ratings decay
    /// geometrically. This is not an arithmetic mean of all ratings.
    pub fn record_rating(&mut self, rating: i16) {
        let rating = f64::from(rating);
        self.avg_rating = if self.number_rating == 0 {
            rating
        } else {
            (self.avg_rating + rating) / 2.0
        };
        self.number_rating += 1;
    }

    /// Raises `avg_rating` to [`RATING_FLOOR`]; returns whether it changed
    pub fn apply_rating_floor(&mut self) -> bool {
        if self.avg_rating < RATING_FLOOR {
            self.avg_rating = RATING_FLOOR;
            true
        } else {
            false
        }
    }
}

/// Payload for creating or replacing a watch-list item
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchListInput {
    pub title: String,
    #[serde(default)]
    pub storyline: String,
    #[serde(alias = "platform")]
    pub platform_id: i64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl WatchListInput {
    pub fn validate(&self) -> AppResult<()> {
        let mut validator = FieldValidator::new();
        validator.not_blank(&self.title, "title");
        validator.max_chars(&self.title, "title", 50);
        validator.max_chars(&self.storyline, "storyline", 200);
        validator.finish()
    }
}

/// Exact-match filters for watch-list listings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchListFilter {
    pub title: Option<String>,
    pub platform: Option<i64>,
}

impl WatchListFilter {
    pub fn matches(&self, item: &WatchListItem) -> bool {
        self.title.as_ref().map_or(true, |t| &item.title == t)
            && self.platform.map_or(true, |p| item.platform_id == p)
    }
}
