use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::pipeline::embedding_source::{EmbeddingSource, FaceSample, SourceFrame};

#[derive(Deserialize)]
struct FrameLine {
    #[serde(default)]
    frame: Option<u64>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    faces: Vec<FaceLine>,
}

#[derive(Deserialize)]
struct FaceLine {
    embedding: Vec<f32>,
    crop: PathBuf,
}

/// Reads frames from newline-delimited JSON, one frame per line:
///
/// ```json
/// {"frame": 12, "timestamp": "2025-03-01T10:00:00Z", "faces": [{"embedding": [0.1, 0.2], "crop": "crops/12_0.png"}]}
/// ```
///
/// `frame` defaults to the line ordinal and `timestamp` to "now". Relative
/// crop paths resolve against `base_dir` (the input file's directory).
/// Blank lines are skipped.
pub struct JsonlEmbeddingSource {
    reader: Option<Box<dyn BufRead + Send>>,
    base_dir: PathBuf,
}

impl JsonlEmbeddingSource {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(Self::from_reader(Box::new(BufReader::new(file)), base_dir))
    }

    pub fn from_reader(reader: Box<dyn BufRead + Send>, base_dir: PathBuf) -> Self {
        Self {
            reader: Some(reader),
            base_dir,
        }
    }

    fn parse_line(
        &self,
        ordinal: u64,
        line: &str,
    ) -> Result<SourceFrame<PathBuf>, Box<dyn std::error::Error>> {
        let parsed: FrameLine = serde_json::from_str(line)
            .map_err(|e| format!("line {}: {e}", ordinal + 1))?;
        Ok(SourceFrame {
            index: parsed.frame.unwrap_or(ordinal),
            timestamp: parsed.timestamp,
            faces: parsed
                .faces
                .into_iter()
                .map(|f| FaceSample {
                    embedding: f.embedding,
                    capture_ref: self.base_dir.join(f.crop),
                })
                .collect(),
        })
    }
}

impl EmbeddingSource<PathBuf> for JsonlEmbeddingSource {
    fn frames(
        &mut self,
    ) -> Box<dyn Iterator<Item = Result<SourceFrame<PathBuf>, Box<dyn std::error::Error>>> + '_>
    {
        let Some(reader) = self.reader.take() else {
            return Box::new(std::iter::empty());
        };
        let this = &*self;
        Box::new(
            reader
                .lines()
                .enumerate()
                .filter(|(_, line)| !matches!(line, Ok(l) if l.trim().is_empty()))
                .map(move |(ordinal, line)| {
                    let line = line?;
                    this.parse_line(ordinal as u64, &line)
                }),
        )
    }

    fn close(&mut self) {
        self.reader = None;
    }
}
