//! Stream registry: stream identifier to output directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{StreamError, StreamResult};
use crate::types::StreamEntry;

/// Maps provisioned stream identifiers to their output directories.
///
/// Lookups vastly outnumber provisioning, so entries sit behind a
/// reader/writer lock. Entries are never evicted implicitly.
#[derive(Debug)]
pub struct StreamRegistry {
    output_root: PathBuf,
    streams: RwLock<HashMap<String, PathBuf>>,
}

impl StreamRegistry {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            streams: RwLock::new(HashMap::new()),
        }
    }

    /// Root under which every stream directory lives.
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Provision a stream, generating a fresh identifier when none is given.
    ///
    /// Provisioning an identifier that is already registered returns the
    /// existing entry.
    pub fn provision(&self, stream_id: Option<&str>) -> StreamResult<StreamEntry> {
        let stream_id = match stream_id {
            Some(id) => {
                validate_stream_id(id)?;
                id.to_string()
            }
            None => Uuid::new_v4().to_string(),
        };

        let mut streams = self.streams.write();
        let output_dir = streams
            .entry(stream_id.clone())
            .or_insert_with(|| self.output_root.join(&stream_id))
            .clone();

        tracing::info!("Provisioned stream {} -> {:?}", stream_id, output_dir);
        Ok(StreamEntry {
            stream_id,
            output_dir,
        })
    }

    /// Look up a stream's entry.
    pub fn resolve(&self, stream_id: &str) -> Option<StreamEntry> {
        self.streams
            .read()
            .get(stream_id)
            .map(|output_dir| StreamEntry {
                stream_id: stream_id.to_string(),
                output_dir: output_dir.clone(),
            })
    }

    /// Remove a stream's entry, returning it if it existed.
    pub fn remove(&self, stream_id: &str) -> Option<StreamEntry> {
        self.streams
            .write()
            .remove(stream_id)
            .map(|output_dir| StreamEntry {
                stream_id: stream_id.to_string(),
                output_dir,
            })
    }

    /// All registered entries, sorted by identifier.
    pub fn entries(&self) -> Vec<StreamEntry> {
        let mut entries: Vec<StreamEntry> = self
            .streams
            .read()
            .iter()
            .map(|(id, dir)| StreamEntry {
                stream_id: id.clone(),
                output_dir: dir.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        entries
    }

    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }
}

/// A stream identifier becomes a directory name, so it must be a single
/// normal path component.
fn validate_stream_id(id: &str) -> StreamResult<()> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\', '\0'])
        && id.trim() == id;
    if valid {
        Ok(())
    } else {
        Err(StreamError::InvalidStreamId(id.to_string()))
    }
}
