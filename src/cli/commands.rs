//! CLI command handlers

use anyhow::{Context, Result};
use clap_complete::generate;
use colored::Colorize;
use dialoguer::MultiSelect;
use futures::stream::{self, StreamExt};
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

use super::progress::{BoardSummary, ProgressBoard};
use super::DownloadOpts;
use crate::backend::{
    Backend, BackendClient, LocalEntry, Playlist, PlaylistOrigin, SongRef, Source,
};
use crate::config::Settings;
use crate::downloads::{Dispatcher, OrchestratorConfig};
use crate::matcher::{self, normalize_text};

/// Searches run concurrently when resolving several queries
const QUERY_CONCURRENCY: usize = 4;

fn connect(settings: &Settings) -> Result<Arc<BackendClient>> {
    let client = BackendClient::new(
        &settings.server_url,
        settings.session_cookie.as_deref(),
        settings.request_timeout(),
    )
    .with_context(|| format!("Invalid server URL {}", settings.server_url))?;
    Ok(Arc::new(client))
}

fn orchestrator(settings: &Settings, opts: &DownloadOpts) -> OrchestratorConfig {
    let mut config = settings.orchestrator();
    if let Some(parallel) = opts.parallel {
        config.concurrency = parallel.max(1);
    }
    if let Some(quality) = opts.quality {
        config.quality = quality;
    }
    config
}

fn format_duration(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

fn describe(song: &SongRef, in_library: bool) -> String {
    let mut line = format!("{} - {}", song.title.bold(), song.artist);
    if !song.album.is_empty() {
        line.push_str(&format!(" [{}]", song.album));
    }
    if song.duration_seconds > 0 {
        line.push_str(&format!(" {}", format_duration(song.duration_seconds).dimmed()));
    }
    if song.is_premium_only {
        line.push_str(&format!(" {}", "VIP".yellow()));
    }
    if in_library {
        line.push_str(&format!(" {}", "(in library)".green()));
    }
    line
}

async fn library_or_empty(client: &BackendClient) -> Vec<LocalEntry> {
    match client.lookup_local_entries().await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to list library: {}", e);
            Vec::new()
        }
    }
}

/// Take the top hit of every query, keeping query order
async fn resolve_queries(
    client: &BackendClient,
    source: Source,
    queries: &[String],
) -> Vec<SongRef> {
    let hits: Vec<Option<SongRef>> = stream::iter(queries)
        .map(|query| async move {
            match client.search_catalog(source, query, 1).await {
                Ok(results) => {
                    let hit = results.into_iter().next();
                    if hit.is_none() {
                        println!("  {} {}", "No match for".yellow(), query);
                    }
                    hit
                }
                Err(e) => {
                    println!("  {} {}: {}", "Search failed for".red(), query, e);
                    None
                }
            }
        })
        .buffered(QUERY_CONCURRENCY)
        .collect()
        .await;

    hits.into_iter().flatten().collect()
}

/// Download songs with a live board, returning the board's tally
///
/// Ctrl-C cancels whatever has not finished yet.
async fn run_downloads(
    dispatcher: &Dispatcher<BackendClient>,
    songs: Vec<SongRef>,
) -> BoardSummary {
    let board = ProgressBoard::attach(dispatcher);
    dispatcher.enqueue_batch(songs);
    tokio::select! {
        _ = dispatcher.wait_idle() => {}
        Ok(()) = tokio::signal::ctrl_c() => {
            dispatcher.cancel_all();
            dispatcher.wait_idle().await;
        }
    }
    board.finish()
}

/// Name and songs of a catalog playlist share link
async fn songs_from_link<B: Backend>(
    client: &B,
    source: Source,
    link: String,
    name: Option<String>,
) -> Result<(String, Vec<SongRef>, PlaylistOrigin)> {
    let remote = client
        .resolve_playlist(source, &link)
        .await
        .context("Failed to read playlist link")?;
    let origin = PlaylistOrigin { url: link, source };
    Ok((name.unwrap_or(remote.name), remote.songs, origin))
}

/// A created playlist and its songs split by library presence
struct PreparedImport {
    playlist: Playlist,
    /// Songs already in the library with their local ids
    local: Vec<(SongRef, String)>,
    missing: Vec<SongRef>,
}

async fn prepare_import<B: Backend>(
    client: &B,
    name: &str,
    songs: Vec<SongRef>,
    origin: Option<&PlaylistOrigin>,
) -> Result<PreparedImport> {
    let library = client
        .lookup_local_entries()
        .await
        .context("Failed to list library")?;
    let mut local = Vec::new();
    let mut missing = Vec::new();
    for song in songs {
        match matcher::find_local_match(&library, &song) {
            Some(entry) => local.push((song, entry.local_id.clone())),
            None => missing.push(song),
        }
    }

    let playlist = client
        .create_playlist(name, &missing, origin)
        .await
        .context("Failed to create playlist")?;
    Ok(PreparedImport {
        playlist,
        local,
        missing,
    })
}

fn print_summary(summary: &BoardSummary) {
    println!();
    println!("{}", "Downloads complete!".green().bold());
    println!("  Downloaded: {}", summary.succeeded);
    if !summary.failed.is_empty() {
        println!("  Failed: {}", summary.failed.len().to_string().red());
        for (name, reason) in &summary.failed {
            println!("    - {}: {}", name, reason);
        }
    }
}

/// Handle the `search` command
pub async fn search(
    settings: &Settings,
    keywords: Vec<String>,
    limit: u32,
    select: bool,
    opts: DownloadOpts,
) -> Result<()> {
    let client = connect(settings)?;
    let source = opts.source.unwrap_or(settings.source);
    let query = keywords.join(" ");

    println!("{}", format!("Searching {} for \"{}\"...", source, query).cyan());
    let results = client
        .search_catalog(source, &query, limit)
        .await
        .context("Search failed")?;

    if results.is_empty() {
        println!("{}", "No results.".yellow());
        return Ok(());
    }

    let library = library_or_empty(&client).await;
    let in_library: Vec<bool> = results
        .iter()
        .map(|song| matcher::find_local_match(&library, song).is_some())
        .collect();

    println!();
    for (i, song) in results.iter().enumerate() {
        println!("{:>3}. {}", i + 1, describe(song, in_library[i]));
    }

    if !select {
        return Ok(());
    }

    let labels: Vec<String> = results.iter().map(|s| s.display_name()).collect();
    let defaults: Vec<bool> = in_library.iter().map(|local| !local).collect();
    println!();
    let picked = MultiSelect::new()
        .with_prompt("Select songs to download (space to toggle, enter to confirm)")
        .items(&labels)
        .defaults(&defaults)
        .interact()?;

    if picked.is_empty() {
        println!("{}", "No songs selected.".yellow());
        return Ok(());
    }

    let songs: Vec<SongRef> = picked.into_iter().map(|i| results[i].clone()).collect();
    let dispatcher = Dispatcher::new(client, orchestrator(settings, &opts));
    let summary = run_downloads(&dispatcher, songs).await;
    print_summary(&summary);

    Ok(())
}

/// Handle the `download` command
pub async fn download(
    settings: &Settings,
    queries: Vec<String>,
    force: bool,
    opts: DownloadOpts,
) -> Result<()> {
    let client = connect(settings)?;
    let source = opts.source.unwrap_or(settings.source);

    println!("{}", format!("Looking up {} song(s) on {}...", queries.len(), source).cyan());
    let songs = resolve_queries(&client, source, &queries).await;
    if songs.is_empty() {
        println!("{}", "Nothing to download.".yellow());
        return Ok(());
    }

    let missing: Vec<SongRef> = if force {
        songs
    } else {
        let library = client
            .lookup_local_entries()
            .await
            .context("Failed to list library")?;
        let (local, missing): (Vec<SongRef>, Vec<SongRef>) = songs
            .into_iter()
            .partition(|song| matcher::find_local_match(&library, song).is_some());
        for song in &local {
            println!("  {} {}", "Already in library:".dimmed(), song.display_name());
        }
        missing
    };

    if missing.is_empty() {
        println!("{}", "Everything is already in the library.".green());
        return Ok(());
    }

    let dispatcher = Dispatcher::new(client, orchestrator(settings, &opts));
    let summary = run_downloads(&dispatcher, missing).await;
    print_summary(&summary);

    Ok(())
}

/// Handle the `import` command
///
/// Songs come from `queries`, or from a catalog playlist when `link` is given.
pub async fn import(
    settings: &Settings,
    name: Option<String>,
    queries: Vec<String>,
    link: Option<String>,
    opts: DownloadOpts,
) -> Result<()> {
    let client = connect(settings)?;
    let source = opts.source.unwrap_or(settings.source);

    let (name, songs, origin) = match link {
        Some(link) => {
            println!("{}", format!("Reading {} playlist {}...", source, link).cyan());
            let (name, songs, origin) = songs_from_link(&*client, source, link, name).await?;
            (name, songs, Some(origin))
        }
        None => {
            let name = name.context("A playlist name is required")?;
            println!("{}", format!("Looking up {} song(s) on {}...", queries.len(), source).cyan());
            (name, resolve_queries(&client, source, &queries).await, None)
        }
    };
    if songs.is_empty() {
        anyhow::bail!("No songs to import");
    }

    let PreparedImport {
        playlist,
        local,
        missing,
    } = prepare_import(&*client, &name, songs, origin.as_ref()).await?;
    println!(
        "Created playlist {} ({} in library, {} to download)",
        playlist.name.green(),
        local.len(),
        playlist.pending_count.map_or(missing.len(), |n| n as usize)
    );

    let mut attached = 0;
    for (song, local_id) in &local {
        match client.attach_song_to_playlist(playlist.id, local_id).await {
            Ok(()) => attached += 1,
            Err(e) => println!("  {} {}: {}", "Failed to add".red(), song.display_name(), e),
        }
    }
    debug!("Attached {} local songs to playlist {}", attached, playlist.id);

    let dispatcher = Dispatcher::new(client, orchestrator(settings, &opts));
    let done = dispatcher.start_playlist_import(playlist.id, &playlist.name, missing.clone())?;
    let board = run_downloads(&dispatcher, missing).await;
    let summary = done
        .await
        .context("Playlist import ended without a summary")?;

    print_summary(&board);
    println!();
    println!("{}", "Playlist ready!".green().bold());
    println!("  Playlist: {}", summary.playlist_name);
    println!("  Already in library: {}", attached);
    println!("  Added after download: {}", summary.added);
    if summary.failed > 0 {
        println!("  Could not add: {}", summary.failed.to_string().red());
    }

    Ok(())
}

/// Handle the `library` command
pub async fn library(settings: &Settings, filter: Option<String>) -> Result<()> {
    let client = connect(settings)?;
    let entries = client
        .lookup_local_entries()
        .await
        .context("Failed to list library")?;

    let needle = filter.as_deref().map(normalize_text).filter(|n| !n.is_empty());
    let shown: Vec<&LocalEntry> = entries
        .iter()
        .filter(|entry| match &needle {
            Some(needle) => {
                normalize_text(&entry.title).contains(needle.as_str())
                    || normalize_text(&entry.artist).contains(needle.as_str())
            }
            None => true,
        })
        .collect();

    if shown.is_empty() {
        println!("{}", "No songs found.".yellow());
        return Ok(());
    }

    for entry in &shown {
        let artist = if entry.artist.is_empty() {
            "Unknown Artist"
        } else {
            &entry.artist
        };
        println!(
            "  {} - {} {}",
            entry.title.bold(),
            artist,
            format!("({})", entry.filename).dimmed()
        );
    }
    println!();
    println!("{} of {} songs", shown.len(), entries.len());

    Ok(())
}

/// Handle the `completion` command
pub fn completion(shell: clap_complete::Shell) {
    let mut cmd = super::Cli::command();
    generate(shell, &mut cmd, "tunefetch", &mut io::stdout());
}

// Extension trait for Cli to get clap Command
impl super::Cli {
    fn command() -> clap::Command {
        <Self as clap::CommandFactory>::command()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Quality, Source};

    use crate::downloads::testing::{song, MockBackend};

    #[tokio::test]
    async fn test_import_from_link_records_origin() {
        let backend = MockBackend::new();
        backend.add_library_entry(&song(2));
        let link = "https://music.163.com/playlist?id=24381616".to_string();

        let (name, songs, origin) = songs_from_link(&backend, Source::Netease, link.clone(), None)
            .await
            .unwrap();
        assert_eq!(name, "Linked");
        let prepared = prepare_import(&backend, &name, songs, Some(&origin)).await.unwrap();

        assert_eq!(prepared.local.len(), 1);
        assert_eq!(prepared.local[0].1, "local-2");
        assert_eq!(prepared.missing, vec![song(1), song(3)]);
        assert_eq!(prepared.playlist.pending_count, Some(2));

        let created = backend.playlists();
        assert_eq!(created.len(), 1);
        let recorded = created[0].1.as_ref().unwrap();
        assert_eq!(recorded.url, link);
        assert_eq!(recorded.source, Source::Netease);
    }

    #[tokio::test]
    async fn test_import_link_keeps_given_name() {
        let backend = MockBackend::new();
        let link = "https://y.qq.com/n/ryqq/playlist/7256912512".to_string();
        let (name, songs, _) =
            songs_from_link(&backend, Source::QqMusic, link, Some("Mine".into()))
                .await
                .unwrap();
        assert_eq!(name, "Mine");
        assert_eq!(songs.len(), 3);
    }

    #[tokio::test]
    async fn test_unreadable_link_fails() {
        let backend = MockBackend::new();
        let result = songs_from_link(&backend, Source::Netease, "24381616".into(), None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_import_from_queries_has_no_origin() {
        let backend = MockBackend::new();
        prepare_import(&backend, "Mix", vec![song(1)], None).await.unwrap();
        assert_eq!(backend.playlists(), vec![("Mix".to_string(), None)]);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(269), "4:29");
    }

    #[test]
    fn test_cli_overrides_settings() {
        let settings = Settings::default();
        let opts = DownloadOpts {
            source: Some(Source::QqMusic),
            parallel: Some(0),
            quality: Some(Quality::Lossless),
        };
        let config = orchestrator(&settings, &opts);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.quality, Quality::Lossless);
    }

    #[test]
    fn test_settings_used_without_flags() {
        let settings = Settings {
            concurrency: 20,
            ..Settings::default()
        };
        let config = orchestrator(&settings, &DownloadOpts::default());
        assert_eq!(config.concurrency, 20);
        assert_eq!(config.quality, Quality::Exhigh);
    }
}
