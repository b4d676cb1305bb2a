//! Music server HTTP client

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::models::*;
use super::{Backend, BackendError};

/// Most results a catalog search may return
const MAX_SEARCH_LIMIT: u32 = 50;

/// HTTP client for the music server REST API
#[derive(Clone)]
pub struct BackendClient {
    base_url: String,
    http_client: Client,
}

impl BackendClient {
    /// Create a new client
    ///
    /// `session_cookie` is sent verbatim as the `Cookie` header, e.g.
    /// `session=...` copied from a logged-in browser. Every request is
    /// abandoned after `timeout`.
    pub fn new(base_url: &str, session_cookie: Option<&str>, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(base_url)
            .with_context(|| format!("Invalid server URL: {}", base_url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("Server URL must be http or https: {}", base_url);
        }

        let mut headers = HeaderMap::new();
        if let Some(cookie) = session_cookie.filter(|c| !c.trim().is_empty()) {
            let value = HeaderValue::from_str(cookie.trim())
                .context("Session cookie contains invalid characters")?;
            headers.insert(COOKIE, value);
        }

        let http_client = Client::builder()
            .user_agent(concat!("tunefetch/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn build_url(&self, endpoint: &str) -> String {
        format!("{}/api/{}", self.base_url, endpoint)
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<ApiResponse<T>, BackendError> {
        debug!("GET {}", url);
        let response = self.http_client.get(url).send().await?.json().await?;
        Ok(response)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<ApiResponse<T>, BackendError> {
        debug!("POST {}", url);
        let response = self
            .http_client
            .post(url)
            .json(body)
            .send()
            .await?
            .json()
            .await?;
        Ok(response)
    }
}

/// Check response status and extract the payload
fn check_response<T>(response: ApiResponse<T>, what: &'static str) -> Result<T, BackendError> {
    if !response.success {
        return Err(BackendError::Rejected(
            response.error.unwrap_or_else(|| "Unknown server error".to_string()),
        ));
    }
    response.payload.ok_or(BackendError::Malformed(what))
}

#[async_trait]
impl Backend for BackendClient {
    async fn submit_download(
        &self,
        song: &SongRef,
        quality: Quality,
        target_dir: Option<&str>,
    ) -> Result<JobId, BackendError> {
        let url = self.build_url(&format!("{}/download", song.source.api_prefix()));
        let mut body = match song.source {
            Source::Netease => json!({
                "id": song.remote_id,
                "title": song.title,
                "artist": song.artist,
                "album": song.album,
                "level": quality.netease_level(),
            }),
            Source::QqMusic => json!({
                "mid": song.remote_id,
                "title": song.title,
                "artist": song.artist,
                "file_type": quality.qq_file_type(),
            }),
        };
        if let Some(cover) = &song.cover_url {
            body["cover"] = json!(cover);
        }
        if let Some(dir) = target_dir {
            body["target_dir"] = json!(dir);
        }

        let response: ApiResponse<SubmitPayload> = self.post(&url, &body).await?;
        let ack = check_response(response, "download submission without task_id")?;
        debug!("Submitted {} as job {}", song.display_name(), ack.task_id);
        Ok(JobId(ack.task_id))
    }

    async fn poll_job(&self, source: Source, job: &JobId) -> Result<JobSnapshot, BackendError> {
        let url = self.build_url(&format!(
            "{}/task/{}",
            source.api_prefix(),
            urlencoding::encode(&job.0)
        ));
        let response: ApiResponse<DataPayload<JobSnapshot>> = self.get(&url).await?;
        Ok(check_response(response, "task status without data")?.data)
    }

    async fn search_catalog(
        &self,
        source: Source,
        keywords: &str,
        limit: u32,
    ) -> Result<Vec<SongRef>, BackendError> {
        let limit = limit.clamp(1, MAX_SEARCH_LIMIT);
        let limit_param = match source {
            Source::Netease => "limit",
            Source::QqMusic => "num",
        };
        let url = format!(
            "{}?keywords={}&{}={}",
            self.build_url(&format!("{}/search", source.api_prefix())),
            urlencoding::encode(keywords.trim()),
            limit_param,
            limit
        );

        let response: ApiResponse<DataPayload<Vec<CatalogSong>>> = self.get(&url).await?;
        let songs: Vec<SongRef> = check_response(response, "search without data")?
            .data
            .into_iter()
            .filter_map(|song| song.into_song_ref(source))
            .collect();

        debug!("Found {} songs for {:?} on {}", songs.len(), keywords, source);
        Ok(songs)
    }

    async fn lookup_local_entries(&self) -> Result<Vec<LocalEntry>, BackendError> {
        let url = self.build_url("music");
        let response: ApiResponse<DataPayload<Vec<LocalEntry>>> = self.get(&url).await?;
        let entries = check_response(response, "library listing without data")?.data;

        debug!("Library holds {} entries", entries.len());
        Ok(entries)
    }

    async fn create_playlist(
        &self,
        name: &str,
        pending: &[SongRef],
        origin: Option<&PlaylistOrigin>,
    ) -> Result<Playlist, BackendError> {
        let url = self.build_url("playlists");
        let pending_songs: Vec<PendingSong> = pending
            .iter()
            .enumerate()
            .map(|(idx, song)| PendingSong::from_song(song, idx))
            .collect();
        let mut body = json!({ "name": name, "pending_songs": pending_songs });
        if let Some(origin) = origin {
            body["source_url"] = json!(origin.url);
            body["source_type"] = json!(origin.source.tag());
        }

        let response: ApiResponse<PlaylistPayload> = self.post(&url, &body).await?;
        let playlist = check_response(response, "playlist creation without playlist")?.playlist;

        debug!("Created playlist {} ({})", playlist.name, playlist.id);
        Ok(playlist)
    }

    async fn resolve_playlist(
        &self,
        source: Source,
        link: &str,
    ) -> Result<RemotePlaylist, BackendError> {
        let link = link.trim();
        let response: ApiResponse<ResolvedPlaylistPayload> = match source {
            Source::Netease => {
                let url = format!(
                    "{}?link={}",
                    self.build_url("netease/playlist"),
                    urlencoding::encode(link)
                );
                self.get(&url).await?
            }
            Source::QqMusic => {
                let url = self.build_url("qqmusic/playlist/parse");
                self.post(&url, &json!({ "url": link })).await?
            }
        };

        let playlist = check_response(response, "playlist without songs")?
            .into_remote_playlist(source)
            .ok_or(BackendError::Malformed("playlist without songs"))?;
        debug!(
            "Resolved {} playlist {:?} with {} songs",
            source,
            playlist.name,
            playlist.songs.len()
        );
        Ok(playlist)
    }

    async fn attach_song_to_playlist(
        &self,
        playlist_id: i64,
        local_id: &str,
    ) -> Result<(), BackendError> {
        let url = self.build_url(&format!("playlists/{}/songs", playlist_id));
        let body = json!({ "song_id": local_id });

        let response: ApiResponse<serde_json::Value> = self.post(&url, &body).await?;
        if !response.success {
            return Err(BackendError::Rejected(
                response.error.unwrap_or_else(|| "Unknown server error".to_string()),
            ));
        }
        Ok(())
    }

    async fn login_status(&self, source: Source) -> Result<bool, BackendError> {
        let url = self.build_url(&format!("{}/login/status", source.api_prefix()));
        let response: ApiResponse<LoginPayload> = self.get(&url).await?;
        Ok(check_response(response, "login status without logged_in")?.logged_in)
    }
}
