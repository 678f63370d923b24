use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::{Serialize, Serializer};
use tracing::{info, warn};

use crate::{tactile::TactileSnapshot, Result};

pub const LEFT_VIDEO: &str = "left_video.mp4";
pub const RIGHT_VIDEO: &str = "right_video.mp4";
pub const TACTILE_JSON: &str = "tactile.json";

/// One capture tick: frame `i` of both videos pairs with entry `i`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeEntry {
    /// seconds since session start, written with two decimals
    #[serde(serialize_with = "two_decimals")]
    pub timestamp: f64,
    pub tactile: TactileSnapshot,
}

fn two_decimals<S: Serializer>(v: &f64, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&format!("{v:.2}"))
}

/// Ordered tick records of one episode.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EpisodeRecord {
    entries: Vec<EpisodeEntry>,
}

impl EpisodeRecord {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            entries: Vec::with_capacity(n),
        }
    }

    /// Appends a tick; timestamps never go backwards.
    pub fn push(&mut self, timestamp: f64, tactile: TactileSnapshot) {
        let timestamp = match self.entries.last() {
            Some(last) => timestamp.max(last.timestamp),
            None => timestamp,
        };
        self.entries.push(EpisodeEntry { timestamp, tactile });
    }

    pub fn entries(&self) -> &[EpisodeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let mut w = BufWriter::new(fs::File::create(path)?);
        serde_json::to_writer(&mut w, self)?;
        w.flush()?;
        Ok(())
    }
}

/// Dataset root holding `epi_000000`, `epi_000001`, ...
#[derive(Debug, Clone)]
pub struct EpisodeStore {
    base: PathBuf,
}

impl EpisodeStore {
    pub fn new(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    pub fn path(&self, index: usize) -> PathBuf {
        self.base.join(format!("epi_{index:06}"))
    }

    /// First index without a directory.
    pub fn next_index(&self) -> usize {
        (0..)
            .find(|i| !self.path(*i).exists())
            .unwrap_or_default()
    }

    pub fn create(&self) -> Result<EpisodeDir> {
        let index = self.next_index();
        let path = self.path(index);
        fs::create_dir(&path)?;
        Ok(EpisodeDir {
            index,
            path,
            keep: false,
        })
    }

    /// Deletes a finished episode.
    pub fn remove(&self, index: usize) -> Result<()> {
        fs::remove_dir_all(self.path(index))?;
        info!(index, "episode deleted");
        Ok(())
    }
}

/// Directory of the episode being recorded; removed on drop unless
/// committed.
#[derive(Debug)]
pub struct EpisodeDir {
    index: usize,
    path: PathBuf,
    keep: bool,
}

impl EpisodeDir {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub fn commit(mut self) -> usize {
        self.keep = true;
        self.index
    }
}

impl Drop for EpisodeDir {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match fs::remove_dir_all(&self.path) {
            Ok(()) => info!(index = self.index, "partial episode removed"),
            Err(e) => warn!(path = %self.path.display(), "removing partial episode: {e}"),
        }
    }
}
