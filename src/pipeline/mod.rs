use std::collections::BTreeMap;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};

use crate::analyzer;
use crate::config::AnalysisConfig;
use crate::resolver::{ResolvedTrack, TrackSource};
use crate::store::models::{DeepFeatures, PitchClass, StageLog, StageStatus, TrackRecord};
use crate::store::{self, Upsert};

pub struct CollectResult {
    pub playlists: u64,
    pub playlist_errors: u64,
    pub tracks_seen: u64,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub track_errors: u64,
}

/// Stage 1: resolve playlists, re-resolve each contained track by
/// permalink, and upsert metadata-only records. The store is persisted
/// after every playlist, so an interrupted run keeps completed playlists.
pub fn collect<S: TrackSource>(
    source: &S,
    playlists: &[String],
    store_path: &Path,
) -> Result<CollectResult> {
    let mut records = store::load(store_path)
        .with_context(|| format!("Failed to load song store {}", store_path.display()))?;

    let mut result = CollectResult {
        playlists: 0,
        playlist_errors: 0,
        tracks_seen: 0,
        inserted: 0,
        updated: 0,
        unchanged: 0,
        track_errors: 0,
    };

    for (index, playlist_url) in playlists.iter().enumerate() {
        let playlist = match source.resolve_playlist(playlist_url) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("Failed to resolve playlist {playlist_url}: {e:#}");
                result.playlist_errors += 1;
                continue;
            }
        };

        println!(
            "Processing playlist {}/{}: {} by {}",
            index + 1,
            playlists.len(),
            playlist.title,
            playlist.curator
        );
        println!("  Tracks in playlist: {}", playlist.track_urls.len());

        for track_url in &playlist.track_urls {
            result.tracks_seen += 1;
            let track = match source.resolve_track(track_url) {
                Ok(t) => t,
                Err(e) => {
                    log::warn!("  Error resolving {track_url}: {e:#}");
                    result.track_errors += 1;
                    continue;
                }
            };
            log::info!("  Fetched: {} by {}", track.title, track.artist);

            match store::upsert(&mut records, metadata_record(&track)) {
                Upsert::Inserted => result.inserted += 1,
                Upsert::Updated => result.updated += 1,
                Upsert::Unchanged => result.unchanged += 1,
            }
        }

        store::save(store_path, &records)
            .with_context(|| format!("Failed to save song store {}", store_path.display()))?;
        println!("  Progress saved after playlist: {}", playlist.title);
        result.playlists += 1;
    }

    Ok(result)
}

fn metadata_record(track: &ResolvedTrack) -> TrackRecord {
    TrackRecord {
        title: track.title.clone(),
        artist: track.artist.clone(),
        track_url: track.track_url.clone(),
        duration: track.duration_ms,
        genre: track.genre.clone(),
        bpm: None,
        key: None,
        features: None,
        stages: StageLog::default(),
    }
}

#[derive(Debug, Default)]
pub struct StageResult {
    pub processed: u64,
    pub analyzed: u64,
    pub skipped_done: u64,
    pub skipped_attempts: u64,
    pub failed: u64,
}

fn stage_progress(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap()
        .progress_chars("#>-"),
    );
    pb
}

/// Stage 2: annotate every record with BPM and key. Records are processed
/// genre by genre — the grouping drives ordering and progress reporting
/// only. The full store is persisted after every record.
pub fn analyze_bpm_key<S: TrackSource>(
    source: &S,
    input: &Path,
    output: &Path,
    analysis: &AnalysisConfig,
    pace: Duration,
    force: bool,
) -> Result<StageResult> {
    let mut records = store::load_existing(input)
        .with_context(|| format!("Failed to load song store {}", input.display()))?;

    let mut by_genre: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, record) in records.iter().enumerate() {
        let genre = if record.genre.is_empty() {
            "Unknown".to_string()
        } else {
            record.genre.clone()
        };
        by_genre.entry(genre).or_default().push(i);
    }

    let mut result = StageResult::default();
    let pb = stage_progress(records.len() as u64);

    for (genre, indices) in &by_genre {
        pb.println(format!(
            "Processing genre: {} with {} songs",
            genre,
            indices.len()
        ));

        for &i in indices {
            if !force && records[i].has_bpm_key() {
                result.skipped_done += 1;
                pb.inc(1);
                continue;
            }
            if !force && attempts_exhausted(&records[i].stages.bpm_key, analysis.max_attempts) {
                log::warn!(
                    "Skipping {} after {} failed attempts",
                    records[i].title,
                    analysis.max_attempts
                );
                result.skipped_attempts += 1;
                pb.inc(1);
                continue;
            }

            pb.set_message(records[i].title.clone());
            match enrich_bpm_key(source, &records[i]) {
                Ok((bpm, key)) => {
                    let record = &mut records[i];
                    record.bpm = Some(bpm);
                    record.key = Some(key);
                    record.stages.bpm_key = Some(StageStatus::Done { at: Utc::now() });
                    result.analyzed += 1;
                    log::info!(
                        "    Extracted BPM: {bpm:.1}, Key: {key} for {}",
                        record.title
                    );
                }
                Err(e) => {
                    log::warn!("    Failed to analyze {}: {e:#}", records[i].title);
                    mark_failed(&mut records[i].stages.bpm_key, &e);
                    result.failed += 1;
                }
            }
            result.processed += 1;

            store::save(output, &records)
                .with_context(|| format!("Failed to save song store {}", output.display()))?;
            pb.inc(1);
            thread::sleep(pace);
        }
    }

    pb.finish_with_message(format!(
        "Done: {} analyzed, {} failed",
        result.analyzed, result.failed
    ));
    Ok(result)
}

/// Stage 3: attach the deep feature payload to every cleaned record.
/// Same skeleton as stage 2 without the genre pass.
pub fn analyze_deep<S: TrackSource>(
    source: &S,
    input: &Path,
    output: &Path,
    analysis: &AnalysisConfig,
    pace: Duration,
    force: bool,
) -> Result<StageResult> {
    let mut records = store::load_existing(input)
        .with_context(|| format!("Failed to load song store {}", input.display()))?;

    let mut result = StageResult::default();
    let pb = stage_progress(records.len() as u64);

    for i in 0..records.len() {
        if !force && records[i].has_features() {
            result.skipped_done += 1;
            pb.inc(1);
            continue;
        }
        if !force && attempts_exhausted(&records[i].stages.deep, analysis.max_attempts) {
            log::warn!(
                "Skipping {} after {} failed attempts",
                records[i].title,
                analysis.max_attempts
            );
            result.skipped_attempts += 1;
            pb.inc(1);
            continue;
        }

        pb.set_message(records[i].title.clone());
        match enrich_deep(source, &records[i], analysis) {
            Ok(features) => {
                let record = &mut records[i];
                record.features = Some(features);
                record.stages.deep = Some(StageStatus::Done { at: Utc::now() });
                result.analyzed += 1;
                log::info!("    Analysis complete for {}", record.title);
            }
            Err(e) => {
                log::warn!("    Failed to analyze {}: {e:#}", records[i].title);
                mark_failed(&mut records[i].stages.deep, &e);
                result.failed += 1;
            }
        }
        result.processed += 1;

        store::save(output, &records)
            .with_context(|| format!("Failed to save song store {}", output.display()))?;
        pb.inc(1);
        thread::sleep(pace);
    }

    pb.finish_with_message(format!(
        "Done: {} analyzed, {} failed",
        result.analyzed, result.failed
    ));
    Ok(result)
}

fn enrich_bpm_key<S: TrackSource>(
    source: &S,
    record: &TrackRecord,
) -> anyhow::Result<(f64, PitchClass)> {
    let track = source
        .resolve_track(&record.track_url)
        .context("resolving stream URL")?;
    let bytes = source.fetch_audio(&track).context("fetching audio")?;
    let audio = analyzer::decode::decode(bytes).context("decoding audio")?;
    let result = analyzer::analyze_bpm_key(&audio.samples, audio.sample_rate)
        .context("extracting BPM/key")?;
    Ok((result.bpm, result.key))
}

fn enrich_deep<S: TrackSource>(
    source: &S,
    record: &TrackRecord,
    analysis: &AnalysisConfig,
) -> anyhow::Result<DeepFeatures> {
    let track = source
        .resolve_track(&record.track_url)
        .context("resolving stream URL")?;
    let bytes = source.fetch_audio(&track).context("fetching audio")?;
    let audio = analyzer::decode::decode(bytes).context("decoding audio")?;
    analyzer::analyze_deep(&audio.samples, audio.sample_rate, analysis)
        .context("extracting deep features")
}

fn attempts_exhausted(status: &Option<StageStatus>, max_attempts: u32) -> bool {
    status
        .as_ref()
        .is_some_and(|s| !s.is_done() && s.attempts() >= max_attempts)
}

fn mark_failed(slot: &mut Option<StageStatus>, err: &anyhow::Error) {
    let attempts = slot.as_ref().map_or(0, |s| s.attempts()) + 1;
    *slot = Some(StageStatus::Failed {
        reason: format!("{err:#}"),
        attempts,
        last_at: Utc::now(),
    });
}

pub struct CleanResult {
    pub kept: usize,
    pub dropped: usize,
}

/// Cleanup filter between stages 2 and 3: drop records that never made it
/// through BPM/key analysis.
pub fn clean(input: &Path, output: &Path) -> Result<CleanResult> {
    let records = store::load_existing(input)
        .with_context(|| format!("Failed to load song store {}", input.display()))?;
    let total = records.len();
    let cleaned = store::clean(records);
    let kept = cleaned.len();
    store::save(output, &cleaned)
        .with_context(|| format!("Failed to save song store {}", output.display()))?;
    Ok(CleanResult {
        kept,
        dropped: total - kept,
    })
}

pub struct StoreSummary {
    pub total: usize,
    pub metadata_only: usize,
    pub with_bpm_key: usize,
    pub with_features: usize,
    pub failed_bpm_key: usize,
    pub failed_deep: usize,
    pub genres: Vec<(String, usize)>,
}

/// Read-only summary of a store file for the `stats` subcommand.
pub fn summarize(input: &Path) -> Result<StoreSummary> {
    let records = store::load_existing(input)
        .with_context(|| format!("Failed to load song store {}", input.display()))?;

    let mut summary = StoreSummary {
        total: records.len(),
        metadata_only: 0,
        with_bpm_key: 0,
        with_features: 0,
        failed_bpm_key: 0,
        failed_deep: 0,
        genres: Vec::new(),
    };
    let mut genres: BTreeMap<String, usize> = BTreeMap::new();

    for record in &records {
        if record.has_features() {
            summary.with_features += 1;
        } else if record.has_bpm_key() {
            summary.with_bpm_key += 1;
        } else {
            summary.metadata_only += 1;
        }
        if matches!(record.stages.bpm_key, Some(StageStatus::Failed { .. })) {
            summary.failed_bpm_key += 1;
        }
        if matches!(record.stages.deep, Some(StageStatus::Failed { .. })) {
            summary.failed_deep += 1;
        }
        let genre = if record.genre.is_empty() {
            "Unknown".to_string()
        } else {
            record.genre.clone()
        };
        *genres.entry(genre).or_insert(0) += 1;
    }

    let mut genres: Vec<(String, usize)> = genres.into_iter().collect();
    genres.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    summary.genres = genres;
    Ok(summary)
}
