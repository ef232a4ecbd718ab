use serde::{de, Deserialize, Deserializer, Serialize};

use crate::error::{AppError, AppResult, FieldErrors};

pub mod review;
pub mod stream_platform;
pub mod user;
pub mod watchlist;

pub use review::{NewReview, Review, ReviewFilter, ReviewInput, UserReviewQuery};
pub use stream_platform::{PlatformInput, StreamPlatform};
pub use user::User;
pub use watchlist::{WatchListFilter, WatchListInput, WatchListItem};

/// Largest page a client may request
pub const MAX_PAGE_SIZE: u32 = 100;

/// Collects per-field validation messages before failing a request
#[derive(Debug, Default)]
pub(crate) struct FieldValidator {
    errors: FieldErrors,
}

impl FieldValidator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records `message` against `field` unless `ok` holds
    pub(crate) fn check(&mut self, ok: bool, field: &str, message: impl Into<String>) {
        if !ok {
            self.errors
                .entry(field.to_string())
                .or_default()
                .push(message.into());
        }
    }

    pub(crate) fn max_chars(&mut self, value: &str, field: &str, max: usize) {
        self.check(
            value.chars().count() <= max,
            field,
            format!("Ensure this field has no more than {} characters.", max),
        );
    }

    pub(crate) fn not_blank(&mut self, value: &str, field: &str) {
        self.check(!value.trim().is_empty(), field, "This field may not be blank.");
    }

    pub(crate) fn finish(self) -> AppResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self.errors))
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolLike {
    Bool(bool),
    Text(String),
}

/// Optional boolean filter accepting `true`/`True`/`1` and `false`/`False`/`0`
pub(crate) fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<BoolLike>::deserialize(deserializer)? {
        None => Ok(None),
        Some(BoolLike::Bool(value)) => Ok(Some(value)),
        Some(BoolLike::Text(text)) => match text.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Some(true)),
            "false" | "0" => Ok(Some(false)),
            _ => Err(de::Error::custom(format!("'{}' is not a valid boolean", text))),
        },
    }
}

/// Raw `page` / `page_size` query parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// A validated page window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageParams {
    /// Resolves the query parameters against the configured default size
    pub fn resolve(&self, default_page_size: u32) -> AppResult<PageRequest> {
        let page = self.page.unwrap_or(1);
        if page == 0 {
            return Err(AppError::NotFound("Invalid page.".to_string()));
        }

        let page_size = self
            .page_size
            .unwrap_or(default_page_size)
            .clamp(1, MAX_PAGE_SIZE);

        Ok(PageRequest { page, page_size })
    }
}

impl PageRequest {
    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    /// Cuts the window out of an already-filtered sequence
    pub fn slice<T: Clone>(&self, items: &[T]) -> Vec<T> {
        items
            .iter()
            .skip(self.offset() as usize)
            .take(self.page_size as usize)
            .cloned()
            .collect()
    }
}

/// One page of results plus the total match count
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub count: u64,
    pub page: u32,
    pub page_size: u32,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(request: PageRequest, count: u64, results: Vec<T>) -> Self {
        Self {
            count,
            page: request.page,
            page_size: request.page_size,
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_defaults() {
        let params = PageParams::default();
        let request = params.resolve(10).unwrap();
        assert_eq!(request, PageRequest { page: 1, page_size: 10 });
        assert_eq!(request.offset(), 0);
    }

    #[test]
    fn test_page_size_is_capped() {
        let params = PageParams {
            page: Some(3),
            page_size: Some(1000),
        };
        let request = params.resolve(10).unwrap();
        assert_eq!(request.page_size, MAX_PAGE_SIZE);
        assert_eq!(request.offset(), 200);
    }

    #[test]
    fn test_page_zero_is_rejected() {
        let params = PageParams {
            page: Some(0),
            page_size: None,
        };
        assert!(matches!(params.resolve(10), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_slice_window() {
        let items: Vec<u32> = (1..=25).collect();
        let request = PageRequest { page: 3, page_size: 10 };
        assert_eq!(request.slice(&items), vec![21, 22, 23, 24, 25]);
    }

    #[test]
    fn test_validator_collects_messages() {
        let mut validator = FieldValidator::new();
        validator.not_blank("  ", "title");
        validator.max_chars("abcdef", "title", 3);
        validator.check(true, "rating", "never recorded");

        match validator.finish() {
            Err(AppError::Validation(errors)) => {
                assert_eq!(errors["title"].len(), 2);
                assert!(!errors.contains_key("rating"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
