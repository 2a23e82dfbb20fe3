// MediaCMS API endpoint functions.
// Provides typed methods for the auth, media and search endpoints over the request pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::{ClientError, Result};
use crate::http::{ApiClient, FormPart, RequestDescriptor};

use super::types::{
    LoginPayload, LoginResponse, MediaDetail, MediaItem, MediaListParams, MediaUpload, Paginated,
    SearchSuggestionItem, SuggestionType, UserSummary,
};

const BASE: &str = "/v1";

fn endpoint(path: &str) -> String {
    format!("{}{}", BASE, path)
}

fn field_error(field: &str, message: &str) -> ClientError {
    let mut fields = BTreeMap::new();
    fields.insert(field.to_string(), vec![message.to_string()]);
    ClientError::ValidationFailed(fields)
}

impl LoginResponse {
    /// Absolute expiry from `tokenExpiry` (ms) or `expiresIn` (seconds).
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        match (self.token_expiry, self.expires_in) {
            (Some(ms), _) => DateTime::from_timestamp_millis(ms),
            (None, Some(secs)) => Some(Utc::now() + chrono::Duration::seconds(secs)),
            (None, None) => None,
        }
    }
}

impl ApiClient {
    /// Log in with a password and store the returned session.
    pub async fn login(&self, payload: &LoginPayload) -> Result<LoginResponse> {
        if payload.password.is_empty() {
            return Err(field_error("password", "Password is required"));
        }

        let mut parts = Vec::new();
        if let Some(username) = payload.username.as_deref().map(str::trim) {
            if !username.is_empty() {
                parts.push(FormPart::text("username", username));
            }
        }
        if let Some(email) = payload.email.as_deref().map(str::trim) {
            if !email.is_empty() {
                parts.push(FormPart::text("email", email));
            }
        }
        if parts.is_empty() {
            return Err(field_error("username", "Username or email is required"));
        }
        parts.push(FormPart::text("password", payload.password.clone()));

        let req = RequestDescriptor::post(endpoint("/login")).multipart(parts);
        let response: LoginResponse = self.request_json(req).await?;
        let token = response
            .token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ClientError::Decode("login failed: no token received".into()))?;

        self.session().store_login(
            token,
            response.refresh_token.as_deref(),
            response.expiry(),
            payload.remember_me,
        )?;
        // Cached reads belonged to the previous identity
        self.cache().clear();

        info!(user = ?response.username, "Logged in");
        Ok(response)
    }

    /// Exchange the stored refresh token for a new access token.
    pub async fn refresh(&self) -> Result<String> {
        self.refresh_token().await
    }

    /// Fetch the authenticated user.
    pub async fn whoami(&self) -> Result<UserSummary> {
        self.request_json(RequestDescriptor::get(endpoint("/whoami")).no_cache())
            .await
    }

    /// Forget the local session. The backend keeps no token state to revoke.
    pub fn logout(&self) -> Result<()> {
        self.session().clear()?;
        self.cache().clear();
        info!("Logged out");
        Ok(())
    }

    /// List media, optionally filtered.
    pub async fn list_media(&self, params: &MediaListParams) -> Result<Paginated<MediaItem>> {
        let req = RequestDescriptor::get(endpoint("/media"))
            .query_opt("page", params.page)
            .query_opt("show", params.show.as_deref())
            .query_opt("author", params.author.as_deref());
        self.request_json(req).await
    }

    /// Get one media item by its friendly token.
    pub async fn media(&self, friendly_token: &str) -> Result<MediaDetail> {
        if friendly_token.trim().is_empty() {
            return Err(field_error("friendly_token", "Friendly token is required"));
        }
        self.request_json(RequestDescriptor::get(endpoint(&format!(
            "/media/{}",
            friendly_token.trim()
        ))))
        .await
    }

    /// Search suggestions for a partial query.
    pub async fn search_suggestions(
        &self,
        query: &str,
        limit: u32,
        kind: SuggestionType,
    ) -> Result<Vec<SearchSuggestionItem>> {
        let req = RequestDescriptor::get(endpoint("/search/suggestions/"))
            .query("q", query)
            .query("limit", limit)
            .query("type", kind.as_str());
        self.request_json(req).await
    }

    /// Upload a media file with optional title and description.
    pub async fn upload_media(&self, upload: MediaUpload) -> Result<MediaDetail> {
        if upload.bytes.is_empty() {
            return Err(field_error("media_file", "The submitted file is empty"));
        }

        let mut parts = vec![FormPart::file("media_file", upload.file_name, upload.bytes)];
        if let Some(title) = upload.title.filter(|t| !t.is_empty()) {
            parts.push(FormPart::text("title", title));
        }
        if let Some(description) = upload.description.filter(|d| !d.is_empty()) {
            parts.push(FormPart::text("description", description));
        }

        self.request_json(RequestDescriptor::post(endpoint("/media")).multipart(parts))
            .await
    }
}
