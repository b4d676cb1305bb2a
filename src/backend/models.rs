//! Music server API request/response models

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Wrapper for all music server API responses
///
/// Every endpoint answers `{"success": bool, "error": "..."}` plus an
/// endpoint-specific payload at the top level.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub success: bool,
    pub error: Option<String>,
    #[serde(flatten)]
    pub payload: Option<T>,
}

/// Payload of endpoints that answer with a `data` field
#[derive(Debug, Clone, Deserialize)]
pub struct DataPayload<T> {
    pub data: T,
}

/// Payload of a download submission
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitPayload {
    pub task_id: String,
}

/// Payload of a playlist creation
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistPayload {
    pub playlist: Playlist,
}

/// Payload of a login status check
#[derive(Debug, Clone, Deserialize)]
pub struct LoginPayload {
    #[serde(default)]
    pub logged_in: bool,
}

/// Remote catalog a song comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum Source {
    #[default]
    #[serde(rename = "netease")]
    Netease,
    #[serde(rename = "qq")]
    #[value(name = "qq")]
    QqMusic,
}

impl Source {
    /// Path segment the server uses for this catalog's endpoints
    pub fn api_prefix(self) -> &'static str {
        match self {
            Source::Netease => "netease",
            Source::QqMusic => "qqmusic",
        }
    }

    /// Tag the server stores on pending playlist songs
    pub fn tag(self) -> &'static str {
        match self {
            Source::Netease => "netease",
            Source::QqMusic => "qq",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Netease => write!(f, "NetEase"),
            Source::QqMusic => write!(f, "QQ Music"),
        }
    }
}

/// Requested audio quality, lowest first
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Standard,
    Higher,
    #[default]
    Exhigh,
    Lossless,
}

impl Quality {
    /// Quality actually requested for a caller
    ///
    /// Callers without a catalog login are downgraded to standard quality
    /// instead of having the download rejected.
    pub fn for_caller(self, authenticated: bool) -> Self {
        if authenticated {
            self
        } else {
            Quality::Standard
        }
    }

    /// NetEase `level` parameter
    pub fn netease_level(self) -> &'static str {
        match self {
            Quality::Standard => "standard",
            Quality::Higher => "higher",
            Quality::Exhigh => "exhigh",
            Quality::Lossless => "lossless",
        }
    }

    /// QQ Music `file_type` parameter
    pub fn qq_file_type(self) -> &'static str {
        match self {
            Quality::Standard => "MP3_128",
            Quality::Higher => "OGG_192",
            Quality::Exhigh => "MP3_320",
            Quality::Lossless => "FLAC",
        }
    }
}

/// Identity of a catalog song: catalog plus its opaque id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SongKey {
    pub source: Source,
    pub remote_id: String,
}

/// A track in a remote catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongRef {
    pub remote_id: String,
    pub source: Source,
    pub title: String,
    /// May hold several artists joined by separators
    pub artist: String,
    pub album: String,
    pub duration_seconds: u32,
    /// Track requires a catalog login for full quality
    pub is_premium_only: bool,
    pub cover_url: Option<String>,
}

impl SongRef {
    pub fn key(&self) -> SongKey {
        SongKey {
            source: self.source,
            remote_id: self.remote_id.clone(),
        }
    }

    /// "Artist - Title" for display
    pub fn display_name(&self) -> String {
        if self.artist.trim().is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.artist, self.title)
        }
    }
}

/// Song as returned by the catalog search endpoints
///
/// NetEase identifies songs by a numeric `id`, QQ Music by a string `mid`.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSong {
    #[serde(default, deserialize_with = "opaque_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub mid: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub is_vip: bool,
}

impl CatalogSong {
    /// Convert into a song reference, dropping records without a usable id
    pub fn into_song_ref(self, source: Source) -> Option<SongRef> {
        let remote_id = match source {
            Source::Netease => self.id,
            Source::QqMusic => self.mid.filter(|mid| !mid.is_empty()),
        }?;

        Some(SongRef {
            remote_id,
            source,
            title: self.title,
            artist: self.artist,
            album: self.album,
            duration_seconds: self.duration.max(0.0).round() as u32,
            is_premium_only: self.is_vip,
            cover_url: self.cover.filter(|c| !c.is_empty()),
        })
    }
}

/// A track already present in the local library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEntry {
    #[serde(rename = "id", deserialize_with = "required_opaque_id")]
    pub local_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    /// On-disk name, often "Artist - Title.ext" or "Title - Artist.ext"
    #[serde(default)]
    pub filename: String,
}

/// Opaque identifier of a server-side download job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-side job state as reported by the task endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Preparing,
    Downloading,
    Success,
    Error,
    #[serde(other)]
    Unknown,
}

/// One poll result for a server-side job
#[derive(Debug, Clone, Deserialize)]
pub struct JobSnapshot {
    pub status: JobState,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl JobSnapshot {
    /// Progress clamped to 0-100
    pub fn percent(&self) -> u8 {
        self.progress.unwrap_or(0.0).clamp(0.0, 100.0).round() as u8
    }
}

/// Playlist in the local library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub pending_count: Option<u32>,
}

/// Catalog playlist a local playlist was copied from
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistOrigin {
    /// Share link as pasted by the user
    pub url: String,
    pub source: Source,
}

/// Songs of a catalog playlist resolved from a share link
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePlaylist {
    pub name: String,
    pub songs: Vec<SongRef>,
}

/// Payload of the playlist link endpoints
///
/// NetEase answers `{"name", "id", "data": [...]}`, QQ Music answers
/// `{"playlist_name", "playlist_id", "songs": [...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolvedPlaylistPayload {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    playlist_name: Option<String>,
    #[serde(default)]
    data: Option<Vec<CatalogSong>>,
    #[serde(default)]
    songs: Option<Vec<CatalogSong>>,
}

impl ResolvedPlaylistPayload {
    /// Convert into a playlist, or `None` if the answer carried no song list
    pub fn into_remote_playlist(self, source: Source) -> Option<RemotePlaylist> {
        let songs = self.data.or(self.songs)?;
        let name = self
            .name
            .or(self.playlist_name)
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "Imported playlist".to_string());

        Some(RemotePlaylist {
            name,
            songs: songs
                .into_iter()
                .filter_map(|song| song.into_song_ref(source))
                .collect(),
        })
    }
}

/// Song recorded on a new playlist as "waiting for download"
#[derive(Debug, Clone, Serialize)]
pub struct PendingSong {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub netease_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub cover: String,
    pub source: &'static str,
    pub sort_order: usize,
}

impl PendingSong {
    pub fn from_song(song: &SongRef, sort_order: usize) -> Self {
        let (netease_id, mid) = match song.source {
            Source::Netease => (Some(song.remote_id.clone()), None),
            Source::QqMusic => (None, Some(song.remote_id.clone())),
        };
        Self {
            netease_id,
            mid,
            title: song.title.clone(),
            artist: song.artist.clone(),
            album: song.album.clone(),
            cover: song.cover_url.clone().unwrap_or_default(),
            source: song.source.tag(),
            sort_order,
        }
    }
}

/// Ids arrive as JSON numbers from NetEase and as strings elsewhere
fn opaque_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn required_opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    opaque_id(deserializer)?.ok_or_else(|| serde::de::Error::custom("missing id"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_netease_song_uses_numeric_id() {
        let json = r#"{"id": 186016, "title": "晴天", "artist": "周杰伦", "album": "叶惠美",
            "cover": "https://p1.music.126.net/a.jpg", "duration": 269.6, "is_vip": true}"#;
        let song: CatalogSong = serde_json::from_str(json).unwrap();
        let song = song.into_song_ref(Source::Netease).unwrap();

        assert_eq!(song.remote_id, "186016");
        assert_eq!(song.duration_seconds, 270);
        assert!(song.is_premium_only);
    }

    #[test]
    fn test_qq_song_uses_mid() {
        let json = r#"{"id": 97773, "mid": "0039MnYb0qxYhV", "title": "晴天", "artist": "周杰伦"}"#;
        let song: CatalogSong = serde_json::from_str(json).unwrap();
        let song = song.into_song_ref(Source::QqMusic).unwrap();

        assert_eq!(song.remote_id, "0039MnYb0qxYhV");
        assert_eq!(song.source, Source::QqMusic);
    }

    #[test]
    fn test_qq_song_without_mid_is_dropped() {
        let json = r#"{"id": 97773, "mid": "", "title": "x"}"#;
        let song: CatalogSong = serde_json::from_str(json).unwrap();
        assert!(song.into_song_ref(Source::QqMusic).is_none());
    }

    #[test]
    fn test_task_status_response() {
        let json = r#"{"success": true, "data": {"status": "downloading", "progress": 42, "title": "x"}}"#;
        let response: ApiResponse<DataPayload<JobSnapshot>> = serde_json::from_str(json).unwrap();

        assert!(response.success);
        let snapshot = response.payload.unwrap().data;
        assert_eq!(snapshot.status, JobState::Downloading);
        assert_eq!(snapshot.percent(), 42);
    }

    #[test]
    fn test_unknown_task_response_has_no_payload() {
        let json = r#"{"success": false, "error": "任务不存在"}"#;
        let response: ApiResponse<DataPayload<JobSnapshot>> = serde_json::from_str(json).unwrap();

        assert!(!response.success);
        assert!(response.payload.is_none());
        assert_eq!(response.error.as_deref(), Some("任务不存在"));
    }

    #[test]
    fn test_unrecognised_job_state() {
        let json = r#"{"status": "queued_remote"}"#;
        let snapshot: JobSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.status, JobState::Unknown);
    }

    #[test]
    fn test_quality_downgrade_without_login() {
        assert_eq!(Quality::Lossless.for_caller(false), Quality::Standard);
        assert_eq!(Quality::Lossless.for_caller(true), Quality::Lossless);
        assert_eq!(Quality::Exhigh.qq_file_type(), "MP3_320");
    }

    #[test]
    fn test_netease_playlist_link_response() {
        let json = r#"{"success": true, "name": "华语经典", "id": "24381616",
            "data": [{"id": 186016, "title": "晴天", "artist": "周杰伦"},
                     {"id": 185811, "title": "稻香", "artist": "周杰伦"}]}"#;
        let response: ApiResponse<ResolvedPlaylistPayload> = serde_json::from_str(json).unwrap();
        let playlist = response
            .payload
            .unwrap()
            .into_remote_playlist(Source::Netease)
            .unwrap();

        assert_eq!(playlist.name, "华语经典");
        assert_eq!(playlist.songs.len(), 2);
        assert_eq!(playlist.songs[1].remote_id, "185811");
    }

    #[test]
    fn test_qq_playlist_link_response() {
        let json = r#"{"success": true, "playlist_name": "周末", "playlist_id": "7256912512",
            "creator": "", "song_count": 2,
            "songs": [{"id": 97773, "mid": "0039MnYb0qxYhV", "title": "晴天", "artist": "周杰伦"},
                      {"id": 1, "mid": "", "title": "no mid"}]}"#;
        let response: ApiResponse<ResolvedPlaylistPayload> = serde_json::from_str(json).unwrap();
        let playlist = response
            .payload
            .unwrap()
            .into_remote_playlist(Source::QqMusic)
            .unwrap();

        assert_eq!(playlist.name, "周末");
        assert_eq!(playlist.songs.len(), 1);
        assert_eq!(playlist.songs[0].remote_id, "0039MnYb0qxYhV");
    }

    #[test]
    fn test_playlist_link_response_without_songs() {
        let json = r#"{"success": true, "name": "x"}"#;
        let response: ApiResponse<ResolvedPlaylistPayload> = serde_json::from_str(json).unwrap();
        assert!(response
            .payload
            .unwrap()
            .into_remote_playlist(Source::Netease)
            .is_none());
    }

    #[test]
    fn test_pending_song_carries_source_id() {
        let song = SongRef {
            remote_id: "0039MnYb0qxYhV".into(),
            source: Source::QqMusic,
            title: "晴天".into(),
            artist: "周杰伦".into(),
            album: String::new(),
            duration_seconds: 0,
            is_premium_only: false,
            cover_url: None,
        };
        let pending = serde_json::to_value(PendingSong::from_song(&song, 3)).unwrap();

        assert_eq!(pending["mid"], "0039MnYb0qxYhV");
        assert!(pending.get("netease_id").is_none());
        assert_eq!(pending["source"], "qq");
        assert_eq!(pending["sort_order"], 3);
    }
}
