//! Twitch Helix platform adapter.
//!
//! App-token (client-credentials) auth with a cached token; a 401 on any
//! Helix call refreshes the token once and retries. Only the three calls
//! the follower and monitor need are exposed.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{HuntError, Result};
use crate::types::ArchiveVideo;

const TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
const HELIX_BASE: &str = "https://api.twitch.tv/helix";

/// The narrow platform surface the core depends on.
#[async_trait]
pub trait TwitchApi: Send + Sync {
    async fn is_live(&self, streamer: &str) -> Result<bool>;
    async fn get_user_id(&self, streamer: &str) -> Result<String>;
    async fn get_latest_archive(&self, user_id: &str) -> Result<Option<ArchiveVideo>>;
}

#[derive(Debug)]
pub struct HelixClient {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    access_token: tokio::sync::Mutex<Option<String>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct HelixPage<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Deserialize)]
struct HelixUser {
    id: String,
}

#[derive(Deserialize)]
struct HelixStream {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    kind: Option<String>,
}

#[derive(Deserialize)]
struct HelixVideo {
    id: String,
    title: Option<String>,
    duration: Option<String>,
    created_at: Option<String>,
}

impl HelixClient {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Result<Self> {
        let client_id = client_id.into();
        let client_secret = client_secret.into();
        if client_id.trim().is_empty() {
            return Err(HuntError::Config("TWITCH_CLIENT_ID is required".into()));
        }
        if client_secret.trim().is_empty() {
            return Err(HuntError::Config("TWITCH_CLIENT_SECRET is required".into()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            client_id,
            client_secret,
            access_token: tokio::sync::Mutex::new(None),
        })
    }

    /// Build from `TWITCH_CLIENT_ID` / `TWITCH_CLIENT_SECRET`.
    pub fn from_env() -> Result<Self> {
        Self::new(
            std::env::var("TWITCH_CLIENT_ID").unwrap_or_default(),
            std::env::var("TWITCH_CLIENT_SECRET").unwrap_or_default(),
        )
    }

    async fn request_access_token(&self) -> Result<String> {
        let response = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|e| HuntError::Twitch(format!("token request failed: {e}")))?;

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| HuntError::Twitch(format!("token response malformed: {e}")))?;

        let token = body
            .access_token
            .ok_or_else(|| HuntError::Twitch("failed to acquire Twitch access token".into()))?;

        *self.access_token.lock().await = Some(token.clone());
        Ok(token)
    }

    async fn ensure_token(&self) -> Result<String> {
        if let Some(token) = self.access_token.lock().await.clone() {
            return Ok(token);
        }
        self.request_access_token().await
    }

    /// GET a Helix endpoint; refresh the app token once on 401.
    async fn helix_get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<HelixPage<T>> {
        let url = format!("{HELIX_BASE}/{path}");
        let mut token = self.ensure_token().await?;

        for attempt in 0..2 {
            let response = self
                .client
                .get(&url)
                .query(query)
                .header("Client-ID", &self.client_id)
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|e| HuntError::Twitch(format!("{path} request failed: {e}")))?;

            if response.status() == reqwest::StatusCode::UNAUTHORIZED && attempt == 0 {
                debug!("helix returned 401, refreshing app token");
                token = self.request_access_token().await?;
                continue;
            }

            if !response.status().is_success() {
                return Err(HuntError::Twitch(format!(
                    "{path} returned {}",
                    response.status()
                )));
            }

            return response
                .json()
                .await
                .map_err(|e| HuntError::Twitch(format!("{path} response malformed: {e}")));
        }

        Err(HuntError::Twitch(format!("{path} kept returning 401")))
    }
}

#[async_trait]
impl TwitchApi for HelixClient {
    async fn is_live(&self, streamer: &str) -> Result<bool> {
        let streamer = normalize_login(streamer)?;
        let page: HelixPage<HelixStream> = self
            .helix_get("streams", &[("user_login", streamer.as_str())])
            .await?;
        Ok(!page.data.is_empty())
    }

    async fn get_user_id(&self, streamer: &str) -> Result<String> {
        let streamer = normalize_login(streamer)?;
        let page: HelixPage<HelixUser> = self
            .helix_get("users", &[("login", streamer.as_str())])
            .await?;
        page.data
            .into_iter()
            .next()
            .map(|u| u.id)
            .ok_or_else(|| HuntError::Twitch(format!("no Twitch user for login {streamer}")))
    }

    async fn get_latest_archive(&self, user_id: &str) -> Result<Option<ArchiveVideo>> {
        let page: HelixPage<HelixVideo> = self
            .helix_get(
                "videos",
                &[("user_id", user_id), ("type", "archive"), ("first", "20")],
            )
            .await?;
        Ok(latest_archive(page.data))
    }
}

/// Trim and lowercase a login; empty logins are invalid input.
pub fn normalize_login(streamer: &str) -> Result<String> {
    let login = streamer.trim().to_lowercase();
    if login.is_empty() {
        return Err(HuntError::InvalidInput("streamer is required".into()));
    }
    Ok(login)
}

/// Pick the newest archive by `created_at` and shape it for the follower.
fn latest_archive(videos: Vec<HelixVideo>) -> Option<ArchiveVideo> {
    let newest = videos
        .into_iter()
        .max_by(|a, b| a.created_at.cmp(&b.created_at))?;

    let title = newest.title.unwrap_or_default();
    Some(ArchiveVideo {
        url: format!("https://www.twitch.tv/videos/{}", newest.id),
        duration_seconds: parse_duration_seconds(newest.duration.as_deref().unwrap_or("")),
        created_at: newest.created_at.unwrap_or_default(),
        id: newest.id,
        title,
    })
}

/// Parse Twitch's `"1h2m3s"` duration format. Unparseable input is zero
/// seconds, matching how Helix omits the field for very fresh archives.
pub fn parse_duration_seconds(duration: &str) -> u64 {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"^(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?$").unwrap());
    let Some(caps) = re.captures(duration.trim()) else {
        return 0;
    };
    let part = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0)
    };
    part(1) * 3600 + part(2) * 60 + part(3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_handles_all_twitch_shapes() {
        assert_eq!(parse_duration_seconds("1h2m3s"), 3723);
        assert_eq!(parse_duration_seconds("45m"), 2700);
        assert_eq!(parse_duration_seconds("59s"), 59);
        assert_eq!(parse_duration_seconds(""), 0);
        assert_eq!(parse_duration_seconds("garbage"), 0);
    }

    #[test]
    fn latest_archive_picks_newest_created_at() {
        let videos = vec![
            HelixVideo {
                id: "111".into(),
                title: Some("Older".into()),
                duration: Some("1h0m0s".into()),
                created_at: Some("2026-02-15T10:00:00Z".into()),
            },
            HelixVideo {
                id: "222".into(),
                title: Some("Newest".into()),
                duration: Some("2h3m4s".into()),
                created_at: Some("2026-02-15T12:00:00Z".into()),
            },
        ];

        let vod = latest_archive(videos).unwrap();
        assert_eq!(vod.id, "222");
        assert_eq!(vod.url, "https://www.twitch.tv/videos/222");
        assert_eq!(vod.duration_seconds, 7384);
    }

    #[test]
    fn latest_archive_of_nothing_is_none() {
        assert!(latest_archive(Vec::new()).is_none());
    }

    #[test]
    fn logins_are_normalized() {
        assert_eq!(normalize_login("  Alice ").unwrap(), "alice");
        assert!(normalize_login("   ").is_err());
    }

    #[test]
    fn missing_credentials_are_fatal() {
        assert!(matches!(
            HelixClient::new("", "secret").unwrap_err(),
            HuntError::Config(_)
        ));
        assert!(matches!(
            HelixClient::new("id", " ").unwrap_err(),
            HuntError::Config(_)
        ));
    }
}
