pub mod models;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use models::TrackRecord;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("store file not found: {0}")]
    NotFound(String),
    #[error("malformed store file {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// What `upsert` did with a candidate record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    Unchanged,
}

/// Load a store, treating a missing file as an empty store.
///
/// Only stage 1 uses this — later stages must not silently start from
/// scratch, see [`load_existing`]. Malformed content is always fatal so a
/// truncated file never destroys prior progress on the next save.
pub fn load(path: &Path) -> Result<Vec<TrackRecord>> {
    if !path.exists() {
        log::debug!("{} does not exist, starting empty", path.display());
        return Ok(Vec::new());
    }
    read_records(path)
}

/// Load a store that a previous stage must already have written.
pub fn load_existing(path: &Path) -> Result<Vec<TrackRecord>> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.display().to_string()));
    }
    read_records(path)
}

fn read_records(path: &Path) -> Result<Vec<TrackRecord>> {
    let contents = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| StoreError::Malformed {
        path: path.display().to_string(),
        source,
    })
}

/// Persist the full record list: 4-space-indented JSON array, written to a
/// temp file and renamed into place. Called after every unit of work, so a
/// crash loses at most the in-flight record.
pub fn save(path: &Path, records: &[TrackRecord]) -> Result<()> {
    let io_err = |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    };

    let tmp = path.with_extension("json.tmp");
    {
        let file = File::create(&tmp).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut writer, formatter);
        records.serialize(&mut ser).map_err(|source| StoreError::Malformed {
            path: path.display().to_string(),
            source,
        })?;
        writer.write_all(b"\n").map_err(io_err)?;
        writer.flush().map_err(io_err)?;
    }
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

/// Insert or update a record, keyed by `track_url`.
///
/// Metadata fields are replaced from the candidate; analysis fields
/// (`bpm`, `key`, `features`, stage tags) already on the stored record are
/// preserved. A candidate that changes nothing is reported as `Unchanged`,
/// which keeps repeated collection runs idempotent.
pub fn upsert(records: &mut Vec<TrackRecord>, candidate: TrackRecord) -> Upsert {
    match records.iter_mut().find(|r| r.track_url == candidate.track_url) {
        Some(existing) => {
            let updated = TrackRecord {
                title: candidate.title,
                artist: candidate.artist,
                track_url: candidate.track_url,
                duration: candidate.duration,
                genre: candidate.genre,
                bpm: existing.bpm,
                key: existing.key,
                features: existing.features.clone(),
                stages: existing.stages.clone(),
            };
            if *existing == updated {
                Upsert::Unchanged
            } else {
                *existing = updated;
                Upsert::Updated
            }
        }
        None => {
            records.push(candidate);
            Upsert::Inserted
        }
    }
}

/// Drop records that never made it through BPM/key analysis. Produces the
/// handoff list between stage 2 and stage 3.
pub fn clean(records: Vec<TrackRecord>) -> Vec<TrackRecord> {
    records.into_iter().filter(|r| r.has_bpm_key()).collect()
}

#[cfg(test)]
mod tests {
    use super::models::{PitchClass, StageLog};
    use super::*;

    fn record(url: &str) -> TrackRecord {
        TrackRecord {
            title: "Title".to_string(),
            artist: "Artist".to_string(),
            track_url: url.to_string(),
            duration: 200_000,
            genre: "House".to_string(),
            bpm: None,
            key: None,
            features: None,
            stages: StageLog::default(),
        }
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let records = load(&dir.path().join("all_songs.json")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_load_existing_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_existing(&dir.path().join("cleaned_songs.json")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_load_malformed_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all_songs.json");
        std::fs::write(&path, "[{\"title\": ").unwrap();
        let err = load(&path).unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all_songs.json");
        let records = vec![record("https://soundcloud.com/a/one")];
        save(&path, &records).unwrap();
        let back = load(&path).unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn test_save_is_four_space_indented() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all_songs.json");
        save(&path, &[record("https://soundcloud.com/a/one")]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n    {"));
        assert!(text.contains("\n        \"title\""));
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut records = Vec::new();
        assert_eq!(upsert(&mut records, record("u1")), Upsert::Inserted);
        assert_eq!(upsert(&mut records, record("u1")), Upsert::Unchanged);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_upsert_updates_metadata_in_place() {
        let mut records = vec![record("u1")];
        let mut retitled = record("u1");
        retitled.title = "Retitled".to_string();
        assert_eq!(upsert(&mut records, retitled), Upsert::Updated);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Retitled");
    }

    #[test]
    fn test_upsert_preserves_analysis_fields() {
        let mut analyzed = record("u1");
        analyzed.bpm = Some(124.0);
        analyzed.key = Some(PitchClass::A);
        let mut records = vec![analyzed];

        // a fresh stage-1 candidate knows nothing about analysis
        assert_eq!(upsert(&mut records, record("u1")), Upsert::Unchanged);
        assert_eq!(records[0].bpm, Some(124.0));
        assert_eq!(records[0].key, Some(PitchClass::A));
    }

    #[test]
    fn test_clean_drops_unanalyzed() {
        let mut done = record("u1");
        done.bpm = Some(128.0);
        done.key = Some(PitchClass::F);
        let mut bpm_only = record("u2");
        bpm_only.bpm = Some(90.0);
        let input = vec![done, bpm_only, record("u3")];

        let cleaned = clean(input);
        assert_eq!(cleaned.len(), 1);
        assert!(cleaned.iter().all(|r| r.has_bpm_key()));
    }
}
