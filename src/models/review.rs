use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FieldValidator, User};
use crate::error::AppResult;

/// Accepted review ratings
pub const RATING_RANGE: RangeInclusive<i32> = 1..=5;

const DESCRIPTION_MAX_CHARS: usize = 200;

/// A single user's rating of a watch-list item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Review {
    pub id: i64,
    pub review_user_id: i64,
    /// Username of the reviewer
    pub review_user: String,
    pub rating: i16,
    pub description: Option<String>,
    pub watchlist_id: i64,
    pub active: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Client payload for creating or updating a review
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReviewInput {
    pub rating: i32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl ReviewInput {
    pub fn new(rating: i32) -> Self {
        Self {
            rating,
            description: None,
            active: true,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        let mut validator = FieldValidator::new();
        validator.check(
            self.rating >= *RATING_RANGE.start(),
            "rating",
            format!(
                "Ensure this value is greater than or equal to {}.",
                RATING_RANGE.start()
            ),
        );
        validator.check(
            self.rating <= *RATING_RANGE.end(),
            "rating",
            format!(
                "Ensure this value is less than or equal to {}.",
                RATING_RANGE.end()
            ),
        );
        if let Some(description) = &self.description {
            validator.max_chars(description, "description", DESCRIPTION_MAX_CHARS);
        }
        validator.finish()
    }

    /// Rating narrowed to its storage type; only valid after [`Self::validate`]
    pub fn rating(&self) -> i16 {
        self.rating as i16
    }
}

/// A review ready to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewReview {
    pub review_user_id: i64,
    pub watchlist_id: i64,
    pub rating: i16,
    pub description: Option<String>,
    pub active: bool,
}

impl NewReview {
    pub fn from_input(watchlist_id: i64, user: &User, input: &ReviewInput) -> Self {
        Self {
            review_user_id: user.id,
            watchlist_id,
            rating: input.rating(),
            description: input.description.clone(),
            active: input.active,
        }
    }
}

/// Filters accepted by the per-item review listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewFilter {
    #[serde(rename = "review_user__username")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "super::lenient_bool")]
    pub active: Option<bool>,
}

impl ReviewFilter {
    pub fn matches(&self, review: &Review) -> bool {
        self.username
            .as_ref()
            .map_or(true, |u| &review.review_user == u)
            && self.active.map_or(true, |a| review.active == a)
    }
}

/// Query for the reviews written by one user
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserReviewQuery {
    pub username: Option<String>,
    /// Case-insensitive substring of the reviewer's username or email
    pub search: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn test_rating_bounds() {
        assert!(ReviewInput::new(1).validate().is_ok());
        assert!(ReviewInput::new(5).validate().is_ok());

        for rating in [0, 6, -3] {
            match ReviewInput::new(rating).validate() {
                Err(AppError::Validation(errors)) => assert!(errors.contains_key("rating")),
                other => panic!("rating {rating} accepted: {other:?}"),
            }
        }
    }

    #[test]
    fn test_description_length() {
        let mut input = ReviewInput::new(3);
        input.description = Some("a".repeat(201));
        match input.validate() {
            Err(AppError::Validation(errors)) => assert!(errors.contains_key("description")),
            other => panic!("long description accepted: {other:?}"),
        }
    }

    #[test]
    fn test_input_defaults_active() {
        let input: ReviewInput = serde_json::from_str(r#"{"rating": 4}"#).unwrap();
        assert!(input.active);
        assert_eq!(input.description, None);
    }

    #[test]
    fn test_filter_uses_django_style_name() {
        let filter: ReviewFilter =
            serde_json::from_str(r#"{"review_user__username": "ana", "active": false}"#).unwrap();
        assert_eq!(filter.username.as_deref(), Some("ana"));
        assert_eq!(filter.active, Some(false));
    }

    fn filter_from_query(query: &str) -> Result<ReviewFilter, String> {
        let uri: axum::http::Uri = format!("/watch/1/reviews?{}", query).parse().unwrap();
        axum::extract::Query::<ReviewFilter>::try_from_uri(&uri)
            .map(|axum::extract::Query(filter)| filter)
            .map_err(|e| e.body_text())
    }

    #[test]
    fn test_active_accepts_django_spellings() {
        for (raw, expected) in [
            ("true", true),
            ("True", true),
            ("1", true),
            ("false", false),
            ("False", false),
            ("0", false),
        ] {
            let filter = filter_from_query(&format!("active={}", raw)).unwrap();
            assert_eq!(filter.active, Some(expected), "active={raw}");
        }
    }

    #[test]
    fn test_active_absent_or_invalid() {
        assert_eq!(filter_from_query("review_user__username=ana").unwrap().active, None);
        assert!(filter_from_query("active=maybe").is_err());
    }
}
