use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::domain::entities::platform::{Platform, PlatformOptions};
use crate::domain::errors::SchedulerError;

/// Immutable snapshot of a post taken when it is scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPayload {
    pub post_id: String,
    pub caption: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    pub platforms: Vec<Platform>,
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platform_options: Vec<PlatformOptions>,
}

impl PostPayload {
    pub fn options_for(&self, platform: Platform) -> Option<&PlatformOptions> {
        self.platform_options
            .iter()
            .find(|options| options.platform() == platform)
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.post_id.trim().is_empty() {
            return Err(SchedulerError::Validation("Post ID is required".to_string()));
        }
        if self.caption.trim().is_empty() {
            return Err(SchedulerError::Validation("Caption is required".to_string()));
        }
        if self.platforms.is_empty() {
            return Err(SchedulerError::Validation(
                "Select at least one platform".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for platform in &self.platforms {
            if !seen.insert(*platform) {
                return Err(SchedulerError::Validation(format!(
                    "Platform {} listed more than once",
                    platform
                )));
            }
        }

        let mut with_options = HashSet::new();
        for options in &self.platform_options {
            let platform = options.platform();
            if !seen.contains(&platform) {
                return Err(SchedulerError::Validation(format!(
                    "Options given for {} which is not a target platform",
                    platform
                )));
            }
            if !with_options.insert(platform) {
                return Err(SchedulerError::Validation(format!(
                    "Options for {} given more than once",
                    platform
                )));
            }
        }

        if let Some(media) = &self.media {
            let url = reqwest::Url::parse(media)
                .map_err(|_| SchedulerError::Validation("Please enter a valid URL".to_string()))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(SchedulerError::Validation(
                    "Media must be an http(s) URL".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::platform::{InstagramOptions, TwitterOptions};

    fn payload() -> PostPayload {
        PostPayload {
            post_id: "post-1".to_string(),
            caption: "Launch day".to_string(),
            media: Some("https://example.com/launch.jpg".to_string()),
            platforms: vec![Platform::Instagram, Platform::Twitter],
            owner_id: "user123".to_string(),
            platform_options: vec![PlatformOptions::Instagram(InstagramOptions {
                hashtags: vec!["launch".to_string()],
                location: None,
            })],
        }
    }

    #[test]
    fn test_valid_payload() {
        assert!(payload().validate().is_ok());
    }

    #[test]
    fn test_empty_caption_rejected() {
        let mut p = payload();
        p.caption = "   ".to_string();
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_no_platforms_rejected() {
        let mut p = payload();
        p.platforms.clear();
        p.platform_options.clear();
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_duplicate_platform_rejected() {
        let mut p = payload();
        p.platforms.push(Platform::Twitter);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_options_for_untargeted_platform_rejected() {
        let mut p = payload();
        p.platforms = vec![Platform::Instagram];
        p.platform_options
            .push(PlatformOptions::Twitter(TwitterOptions::default()));
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_invalid_media_rejected() {
        let mut p = payload();
        p.media = Some("not a url".to_string());
        assert!(p.validate().is_err());

        p.media = Some("ftp://example.com/a.png".to_string());
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_options_lookup() {
        let p = payload();
        assert!(p.options_for(Platform::Instagram).is_some());
        assert!(p.options_for(Platform::Twitter).is_none());
    }
}
