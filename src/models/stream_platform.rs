use serde::{Deserialize, Serialize};

use super::FieldValidator;
use crate::error::AppResult;

/// Represents a streaming platform such as Netflix or Prime Video
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct StreamPlatform {
    pub id: i64,
    /// Display name (e.g., "Netflix")
    pub name: String,
    /// Short description of the platform
    pub about: String,
    pub website: String,
}

/// Payload for creating or replacing a platform
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlatformInput {
    pub name: String,
    #[serde(default)]
    pub about: String,
    pub website: String,
}

impl PlatformInput {
    pub fn validate(&self) -> AppResult<()> {
        let mut validator = FieldValidator::new();
        validator.not_blank(&self.name, "name");
        validator.max_chars(&self.name, "name", 30);
        validator.max_chars(&self.about, "about", 150);
        validator.max_chars(&self.website, "website", 100);
        validator.check(
            self.website.starts_with("http://") || self.website.starts_with("https://"),
            "website",
            "Enter a valid URL.",
        );
        validator.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_platform() {
        let input = PlatformInput {
            name: "Netflix".to_string(),
            about: "Streaming service".to_string(),
            website: "https://netflix.com".to_string(),
        };
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_invalid_website() {
        let input = PlatformInput {
            name: "Netflix".to_string(),
            about: String::new(),
            website: "netflix".to_string(),
        };
        assert!(input.validate().is_err());
    }
}
