use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the 12 pitch classes a key estimate can land on.
/// Serialized under the conventional note names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PitchClass {
    #[serde(rename = "C")]
    C,
    #[serde(rename = "C#")]
    CSharp,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "D#")]
    DSharp,
    #[serde(rename = "E")]
    E,
    #[serde(rename = "F")]
    F,
    #[serde(rename = "F#")]
    FSharp,
    #[serde(rename = "G")]
    G,
    #[serde(rename = "G#")]
    GSharp,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A#")]
    ASharp,
    #[serde(rename = "B")]
    B,
}

impl PitchClass {
    pub const COUNT: usize = 12;

    /// All pitch classes in chroma bin order (C = 0 .. B = 11).
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    /// Map a chroma bin index (mod 12) to its pitch class.
    pub fn from_index(index: usize) -> PitchClass {
        Self::ALL[index % 12]
    }

    pub fn name(&self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::CSharp => "C#",
            PitchClass::D => "D",
            PitchClass::DSharp => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::FSharp => "F#",
            PitchClass::G => "G",
            PitchClass::GSharp => "G#",
            PitchClass::A => "A",
            PitchClass::ASharp => "A#",
            PitchClass::B => "B",
        }
    }
}

impl std::fmt::Display for PitchClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Tempo and beat positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rhythm {
    pub tempo: f64,
    /// Beat timestamps in seconds, monotonically increasing.
    pub beat_times: Vec<f64>,
}

/// Structural sections and approximate bar positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    /// Section boundary times in seconds. The first boundary is 0.0; each
    /// section runs to the next boundary, the last to the end of the
    /// analyzed audio.
    pub sections: Vec<f64>,
    /// Beat times grouped into bars. A trailing partial bar is kept.
    pub bars: Vec<Vec<f64>>,
}

/// Deep analysis payload attached by stage 3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepFeatures {
    /// `(section_start_seconds, avg_energy)` per section, contiguous and
    /// ordered by start time.
    pub energy: Vec<(f64, f64)>,
    pub rhythm: Rhythm,
    pub structure: Structure,
}

/// Outcome of one enrichment stage for one record.
///
/// A missing tag means the stage is still pending. Failures carry the
/// reason and a running attempt count so retries stay bounded across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StageStatus {
    Done {
        at: DateTime<Utc>,
    },
    Failed {
        reason: String,
        attempts: u32,
        last_at: DateTime<Utc>,
    },
}

impl StageStatus {
    pub fn attempts(&self) -> u32 {
        match self {
            StageStatus::Done { .. } => 0,
            StageStatus::Failed { attempts, .. } => *attempts,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, StageStatus::Done { .. })
    }
}

/// Per-stage status tags for one record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageLog {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm_key: Option<StageStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deep: Option<StageStatus>,
}

impl StageLog {
    pub fn is_empty(&self) -> bool {
        self.bpm_key.is_none() && self.deep.is_none()
    }
}

/// One enriched song. Created by stage 1 with metadata only; stages 2 and 3
/// fill in `bpm`/`key` and `features` in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub title: String,
    pub artist: String,
    /// Permanent permalink. The store key — never the time-limited stream URL.
    pub track_url: String,
    /// Duration in milliseconds, as reported by the API.
    pub duration: u64,
    #[serde(default)]
    pub genre: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<PitchClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<DeepFeatures>,
    #[serde(default, skip_serializing_if = "StageLog::is_empty")]
    pub stages: StageLog,
}

impl TrackRecord {
    /// Stage 2 output present?
    pub fn has_bpm_key(&self) -> bool {
        self.bpm.is_some() && self.key.is_some()
    }

    /// Stage 3 output present?
    pub fn has_features(&self) -> bool {
        self.features.is_some()
    }
}
