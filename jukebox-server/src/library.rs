//! Album library
//!
//! Maps album ids (as printed on the web UI and written to NFC tags) to
//! playable tracks. The catalog is a JSON document:
//!
//! ```json
//! {
//!   "albums": [
//!     {
//!       "id": 42,
//!       "title": "Blue Train",
//!       "artist": "John Coltrane",
//!       "year": 1957,
//!       "tracks": [
//!         { "title": "Blue Train", "duration": 643.0, "uri": "http://nas.local/music/blue-train/01.flac" }
//!       ]
//!     }
//!   ]
//! }
//! ```

use crate::error::{Error, Result};
use jukebox_common::events::{AlbumId, Track};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Album {
    pub id: AlbumId,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub year: Option<u16>,
    #[serde(default)]
    pub thumb: Option<String>,
    pub tracks: Vec<LibraryTrack>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LibraryTrack {
    pub title: String,
    /// Overrides the album artist
    #[serde(default)]
    pub artist: Option<String>,
    pub duration: f64,
    pub uri: String,
}

/// Listing entry for `/api/library/albums`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlbumSummary {
    pub id: AlbumId,
    pub title: String,
    pub artist: String,
    pub year: Option<u16>,
    pub thumb: Option<String>,
    pub track_count: usize,
}

impl Album {
    /// Playlist for this album, numbered from 0
    pub fn playlist(&self) -> Vec<Track> {
        self.tracks
            .iter()
            .enumerate()
            .map(|(index, track)| Track {
                track_number: index,
                title: track.title.clone(),
                artist: track.artist.clone().unwrap_or_else(|| self.artist.clone()),
                album: self.title.clone(),
                year: self.year,
                duration: track.duration,
                thumb: self.thumb.clone(),
                uri: track.uri.clone(),
            })
            .collect()
    }

    pub fn summary(&self) -> AlbumSummary {
        AlbumSummary {
            id: self.id,
            title: self.title.clone(),
            artist: self.artist.clone(),
            year: self.year,
            thumb: self.thumb.clone(),
            track_count: self.tracks.len(),
        }
    }
}

/// Album lookup used by the HTTP surface and the tag encoder
pub trait AlbumLibrary: Send + Sync {
    fn album_tracks(&self, id: AlbumId) -> Option<Vec<Track>>;

    fn albums(&self) -> Vec<AlbumSummary>;

    fn contains(&self, id: AlbumId) -> bool {
        self.album_tracks(id).is_some()
    }
}

#[derive(Debug, Deserialize)]
struct Catalog {
    albums: Vec<Album>,
}

/// In-memory album catalog
#[derive(Debug, Clone, Default)]
pub struct StaticLibrary {
    albums: BTreeMap<AlbumId, Album>,
}

impl StaticLibrary {
    pub fn new(albums: Vec<Album>) -> Result<Self> {
        let mut by_id = BTreeMap::new();
        for album in albums {
            let id = album.id;
            if by_id.insert(id, album).is_some() {
                return Err(Error::InvalidInput(format!("duplicate album id {}", id)));
            }
        }
        Ok(Self { albums: by_id })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a JSON catalog
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read library {}: {}", path.display(), e))
        })?;
        let catalog: Catalog = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("Invalid library {}: {}", path.display(), e))
        })?;

        let library = Self::new(catalog.albums)?;
        info!("Loaded {} albums from {}", library.albums.len(), path.display());
        Ok(library)
    }
}

impl AlbumLibrary for StaticLibrary {
    fn album_tracks(&self, id: AlbumId) -> Option<Vec<Track>> {
        self.albums.get(&id).map(Album::playlist)
    }

    fn albums(&self) -> Vec<AlbumSummary> {
        self.albums.values().map(Album::summary).collect()
    }

    fn contains(&self, id: AlbumId) -> bool {
        self.albums.contains_key(&id)
    }
}
