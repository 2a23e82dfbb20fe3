// MediaCMS API response types.
// Defines structs for deserializing the REST API payloads the client consumes.

use serde::{Deserialize, Serialize};

/// Page of results as returned by list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T> Default for Paginated<T> {
    fn default() -> Self {
        Self {
            count: 0,
            next: None,
            previous: None,
            results: Vec::new(),
        }
    }
}

/// Credentials for password login. Either username or email is required.
#[derive(Debug, Clone, Default)]
pub struct LoginPayload {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: String,
    pub remember_me: bool,
}

impl LoginPayload {
    pub fn with_username(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: password.into(),
            ..Default::default()
        }
    }
}

/// Login and refresh responses. The token may come back as `token` or `key`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(alias = "key")]
    pub token: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "refreshToken", alias = "refresh_token")]
    pub refresh_token: Option<String>,
    /// Unix milliseconds.
    #[serde(rename = "tokenExpiry")]
    pub token_expiry: Option<i64>,
    /// Seconds from now.
    #[serde(rename = "expiresIn", alias = "expires_in")]
    pub expires_in: Option<i64>,
}

/// Authenticated user, as returned by `whoami`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub username: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub date_added: Option<String>,
    pub thumbnail_url: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub is_editor: bool,
    #[serde(default)]
    pub is_manager: bool,
    #[serde(default)]
    pub email_is_verified: bool,
}

/// Media entry in list responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub friendly_token: String,
    pub title: String,
    pub url: Option<String>,
    pub api_url: Option<String>,
    pub user: Option<String>,
    pub description: Option<String>,
    pub add_date: Option<String>,
    pub views: Option<u64>,
    pub media_type: Option<String>,
    pub state: Option<String>,
    pub duration: Option<f64>,
    pub thumbnail_url: Option<String>,
    pub author_name: Option<String>,
    pub encoding_status: Option<String>,
    pub likes: Option<u64>,
    pub dislikes: Option<u64>,
}

/// Full media record from the detail endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaDetail {
    #[serde(flatten)]
    pub item: MediaItem,
    pub original_media_url: Option<String>,
    pub video_height: Option<u32>,
    pub enable_comments: Option<bool>,
    pub is_public: Option<bool>,
}

/// Kind of search suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionType {
    #[default]
    Popular,
    Related,
    Corrected,
    Trending,
    #[serde(other)]
    Unknown,
}

impl SuggestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionType::Popular => "popular",
            SuggestionType::Related => "related",
            SuggestionType::Corrected => "corrected",
            SuggestionType::Trending => "trending",
            SuggestionType::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSuggestionItem {
    pub keyword: String,
    #[serde(default)]
    pub suggestion_type: SuggestionType,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub search_count: u64,
    #[serde(default)]
    pub click_count: u64,
}

/// Filters for the media list endpoint.
#[derive(Debug, Clone, Default)]
pub struct MediaListParams {
    pub page: Option<u32>,
    /// Listing mode such as `featured`, `latest` or `shared_with_me`.
    pub show: Option<String>,
    pub author: Option<String>,
}

/// A file to upload with optional metadata.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_login_response_key_alias() {
        let res: LoginResponse = serde_json::from_value(json!({"key": "abc"})).unwrap();
        assert_eq!(res.token.as_deref(), Some("abc"));

        let res: LoginResponse = serde_json::from_value(json!({
            "token": "t",
            "refreshToken": "r",
            "tokenExpiry": 1_900_000_000_000i64
        }))
        .unwrap();
        assert_eq!(res.refresh_token.as_deref(), Some("r"));
        assert_eq!(res.token_expiry, Some(1_900_000_000_000));
    }

    #[test]
    fn test_media_detail_flattens_item() {
        let detail: MediaDetail = serde_json::from_value(json!({
            "friendly_token": "Xy12",
            "title": "Sunset",
            "views": 10,
            "video_height": 720
        }))
        .unwrap();
        assert_eq!(detail.item.friendly_token, "Xy12");
        assert_eq!(detail.video_height, Some(720));
    }

    #[test]
    fn test_unknown_suggestion_type() {
        let item: SearchSuggestionItem =
            serde_json::from_value(json!({"keyword": "cats", "suggestion_type": "seasonal"}))
                .unwrap();
        assert_eq!(item.suggestion_type, SuggestionType::Unknown);
    }

    #[test]
    fn test_paginated_media() {
        let page: Paginated<MediaItem> = serde_json::from_value(json!({
            "count": 1,
            "next": null,
            "previous": null,
            "results": [{"friendly_token": "a", "title": "A"}]
        }))
        .unwrap();
        assert_eq!(page.results.len(), 1);
    }
}
