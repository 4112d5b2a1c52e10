use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::SchedulerError;

/// Social networks a post can be published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    Twitter,
    Linkedin,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Instagram, Platform::Twitter, Platform::Linkedin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Instagram => "instagram",
            Platform::Twitter => "twitter",
            Platform::Linkedin => "linkedin",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "instagram" => Ok(Platform::Instagram),
            "twitter" => Ok(Platform::Twitter),
            "linkedin" => Ok(Platform::Linkedin),
            _ => Err(SchedulerError::UnknownPlatform(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InstagramOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hashtags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TwitterOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hashtags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_tweet_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkedinVisibility {
    Public,
    Connections,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LinkedinOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hashtags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<LinkedinVisibility>,
}

/// Per-platform publishing options. Each variant only carries what that
/// platform's publisher reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "platform", content = "options", rename_all = "lowercase")]
pub enum PlatformOptions {
    Instagram(InstagramOptions),
    Twitter(TwitterOptions),
    Linkedin(LinkedinOptions),
}

impl PlatformOptions {
    pub fn platform(&self) -> Platform {
        match self {
            PlatformOptions::Instagram(_) => Platform::Instagram,
            PlatformOptions::Twitter(_) => Platform::Twitter,
            PlatformOptions::Linkedin(_) => Platform::Linkedin,
        }
    }

    /// Parses the loose `{ "instagram": {...}, "twitter": {...} }` object accepted
    /// at submission time. Unknown platform keys and unknown fields are rejected.
    pub fn parse_map(value: &Value) -> Result<Vec<PlatformOptions>, SchedulerError> {
        let map = match value {
            Value::Null => return Ok(Vec::new()),
            Value::Object(map) => map,
            _ => {
                return Err(SchedulerError::Validation(
                    "platform-specific options must be an object keyed by platform".to_string(),
                ))
            }
        };

        let mut parsed = Vec::with_capacity(map.len());
        for (key, options) in map {
            if options.is_null() {
                continue;
            }
            let platform: Platform = key.parse()?;
            let invalid =
                |e: serde_json::Error| SchedulerError::Validation(format!("{platform} options: {e}"));
            let entry = match platform {
                Platform::Instagram => {
                    PlatformOptions::Instagram(serde_json::from_value(options.clone()).map_err(invalid)?)
                }
                Platform::Twitter => {
                    PlatformOptions::Twitter(serde_json::from_value(options.clone()).map_err(invalid)?)
                }
                Platform::Linkedin => {
                    PlatformOptions::Linkedin(serde_json::from_value(options.clone()).map_err(invalid)?)
                }
            };
            parsed.push(entry);
        }
        Ok(parsed)
    }
}
