//! Local/remote song identity matching
//!
//! Catalog metadata and on-disk files disagree on punctuation width, bracket
//! style and artist ordering. Two records denote the same song when their
//! titles are equal after [`normalize_text`] and their artist credits are
//! equal after [`artist_signature`]. There is deliberately no fuzzy distance:
//! a near miss is a miss.

mod normalize;

use std::path::Path;

use crate::backend::{LocalEntry, SongRef};

pub use normalize::{artist_signature, fold_text, is_blank_artist, normalize_text};

/// Separator between artist and title in downloaded file names
const FILENAME_SEPARATOR: &str = " - ";

/// Compare two artist credits; a blank credit on either side matches anything
fn artists_agree(a: &str, b: &str) -> bool {
    is_blank_artist(a) || is_blank_artist(b) || artist_signature(a) == artist_signature(b)
}

/// Compare two titles after normalization
///
/// Titles made only of punctuation normalize to nothing and are compared on
/// their folded text instead; two blank titles never agree.
fn titles_agree(a: &str, b: &str) -> bool {
    let (left, right) = (normalize_text(a), normalize_text(b));
    if left.is_empty() && right.is_empty() {
        let folded = fold_text(a);
        return !folded.is_empty() && folded == fold_text(b);
    }
    left == right
}

/// Split a file name stem into its two " - " separated halves
fn filename_halves(filename: &str) -> Option<(&str, &str)> {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);

    let mut parts = stem.split(FILENAME_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(first), Some(second), None) => Some((first, second)),
        _ => None,
    }
}

/// Decide whether a local library entry is the same work as a catalog song
pub fn is_same_song(local: &LocalEntry, remote: &SongRef) -> bool {
    if titles_agree(&local.title, &remote.title) && artists_agree(&local.artist, &remote.artist) {
        return true;
    }

    // Fall back to the file name, in either "Artist - Title" or "Title - Artist" order
    let Some((first, second)) = filename_halves(&local.filename) else {
        return false;
    };
    let remote_artist_blank = is_blank_artist(&remote.artist);
    let layout_matches = |artist: &str, title: &str| {
        titles_agree(title, &remote.title)
            && (remote_artist_blank || artist_signature(artist) == artist_signature(&remote.artist))
    };

    layout_matches(first, second) || layout_matches(second, first)
}

/// Find the library entry matching a catalog song, if any
pub fn find_local_match<'a>(entries: &'a [LocalEntry], remote: &SongRef) -> Option<&'a LocalEntry> {
    entries.iter().find(|entry| is_same_song(entry, remote))
}
