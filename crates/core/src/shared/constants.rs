/// Cluster distance threshold (Euclidean, on raw embeddings).
pub const DEFAULT_EPS: f64 = 0.5;
/// Neighbourhood size, self included, that makes a point a core point.
pub const DEFAULT_MIN_SAMPLES: usize = 3;
/// Accepted observations between two clustering passes.
pub const DEFAULT_RECLUSTER_BATCH_SIZE: usize = 10;
pub const DEFAULT_COOLDOWN_SECONDS: f64 = 30.0;

/// Cooldown choices offered by front ends. The core accepts any positive value.
pub const COOLDOWN_PRESETS_SECONDS: &[u64] = &[30, 15, 10, 5];

pub const FIRST_STABLE_ID: u32 = 0;

pub const OUTPUT_DIR_NAME: &str = "frequent_customers";
pub const LEDGER_FILE_NAME: &str = "visit_log.csv";
pub const LEDGER_HEADER: [&str; 2] = ["Label", "Timestamp"];

pub const CROP_EXTENSION: &str = "jpg";
