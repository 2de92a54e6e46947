//! Station and Track Catalog
//!
//! Loaded once from a JSON file of the form
//! `{ "stations": [...], "tracks": [...] }` and read-only afterwards.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Duplicate id in catalog: {0}")]
    DuplicateId(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioStation {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    /// Public page or proxy URL
    pub url: String,
    /// Upstream stream URL, used by the stream proxy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl RadioStation {
    /// URL a session should connect to
    pub fn stream_url(&self) -> &str {
        self.direct_url.as_deref().unwrap_or(&self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    pub url: String,
    /// Length in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
}

/// Something the player can be asked to play
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlayableItem {
    Station(RadioStation),
    Track(Track),
    Url { url: String },
}

impl PlayableItem {
    pub fn stream_url(&self) -> &str {
        match self {
            PlayableItem::Station(station) => station.stream_url(),
            PlayableItem::Track(track) => &track.url,
            PlayableItem::Url { url } => url,
        }
    }

    /// Finite media that can be paused in place
    pub fn is_track(&self) -> bool {
        matches!(self, PlayableItem::Track(_))
    }

    pub fn title(&self) -> &str {
        match self {
            PlayableItem::Station(station) => &station.name,
            PlayableItem::Track(track) => &track.title,
            PlayableItem::Url { url } => url,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub stations: Vec<RadioStation>,
    #[serde(default)]
    pub tracks: Vec<Track>,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path)?;
        let catalog = Self::from_json(&contents)?;
        info!(
            "Loaded catalog from {:?}: {} stations, {} tracks",
            path,
            catalog.stations.len(),
            catalog.tracks.len()
        );
        Ok(catalog)
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let catalog: Catalog = serde_json::from_str(json)?;
        catalog.check_ids()?;
        Ok(catalog)
    }

    fn check_ids(&self) -> Result<(), CatalogError> {
        let mut seen = HashSet::new();
        for id in self.stations.iter().map(|s| &s.id) {
            if !seen.insert(id) {
                return Err(CatalogError::DuplicateId(id.clone()));
            }
        }
        seen.clear();
        for id in self.tracks.iter().map(|t| &t.id) {
            if !seen.insert(id) {
                return Err(CatalogError::DuplicateId(id.clone()));
            }
        }
        Ok(())
    }

    pub fn station(&self, id: &str) -> Option<&RadioStation> {
        self.stations.iter().find(|s| s.id == id)
    }

    pub fn track(&self, id: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "stations": [
            { "id": "jazz", "name": "Jazz FM", "genre": "Jazz",
              "url": "/api/stream/jazz", "direct_url": "http://jazz.example/live" },
            { "id": "talk", "name": "Talk", "url": "http://talk.example/stream.mp3" }
        ],
        "tracks": [
            { "id": "t1", "title": "Intro", "artist": "Band", "url": "http://cdn/t1.mp3", "duration": 180 }
        ]
    }"#;

    #[test]
    fn test_parse_and_lookup() {
        let catalog = Catalog::from_json(CATALOG).unwrap();
        assert_eq!(catalog.stations.len(), 2);
        assert_eq!(catalog.station("jazz").unwrap().stream_url(), "http://jazz.example/live");
        assert_eq!(
            catalog.station("talk").unwrap().stream_url(),
            "http://talk.example/stream.mp3"
        );
        assert_eq!(catalog.track("t1").unwrap().duration, Some(180));
        assert!(catalog.station("nope").is_none());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let json = r#"{ "stations": [
            { "id": "a", "name": "A", "url": "http://a" },
            { "id": "a", "name": "B", "url": "http://b" }
        ] }"#;
        assert!(matches!(
            Catalog::from_json(json),
            Err(CatalogError::DuplicateId(id)) if id == "a"
        ));
    }

    #[test]
    fn test_missing_sections_default_empty() {
        let catalog = Catalog::from_json("{}").unwrap();
        assert!(catalog.stations.is_empty() && catalog.tracks.is_empty());
        assert!(matches!(Catalog::from_json("[]"), Err(CatalogError::Parse(_))));
    }

    #[test]
    fn test_playable_item_tagging() {
        let item = PlayableItem::Url {
            url: "http://x/live".to_string(),
        };
        let json = serde_json::to_string(&item).unwrap();
        assert_eq!(json, r#"{"kind":"url","url":"http://x/live"}"#);
        assert!(!item.is_track());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("airwave-catalog-{}.json", std::process::id()));
        std::fs::write(&path, CATALOG).unwrap();
        let catalog = Catalog::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(catalog.tracks[0].title, "Intro");
        assert!(matches!(
            Catalog::load(Path::new("/nonexistent/catalog.json")),
            Err(CatalogError::Io(_))
        ));
    }
}
