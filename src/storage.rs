//! Persistence sink: accepted frames as numbered images plus one CSV summary per run.
//!
//! Layout inside the run directory:
//! - `Snowflake_1.bmp`, `Snowflake_2.bmp`, ...
//! - `image_data.csv` with columns `image_path,feature_values`

use anyhow::{anyhow, Context, Result};
use image::{GrayImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use crate::features::Crystal;

pub const SUMMARY_FILE_NAME: &str = "image_data.csv";
pub const IMAGE_PREFIX: &str = "Snowflake_";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageExtension {
    #[default]
    Bmp,
    Png,
}

impl ImageExtension {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bmp" => Ok(ImageExtension::Bmp),
            "png" => Ok(ImageExtension::Png),
            other => Err(anyhow!("unsupported image extension '{}'", other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImageExtension::Bmp => "bmp",
            ImageExtension::Png => "png",
        }
    }

    fn format(self) -> ImageFormat {
        match self {
            ImageExtension::Bmp => ImageFormat::Bmp,
            ImageExtension::Png => ImageFormat::Png,
        }
    }
}

/// One summary row: a saved image and the crystals measured on it.
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryRow {
    pub image_path: PathBuf,
    pub crystals: Vec<Crystal>,
}

/// In-memory run summary. Owned by the pipeline thread only.
#[derive(Clone, Debug, Default)]
pub struct SummaryTable {
    rows: Vec<SummaryRow>,
}

impl SummaryTable {
    pub fn push(&mut self, image_path: PathBuf, crystals: Vec<Crystal>) {
        self.rows.push(SummaryRow {
            image_path,
            crystals,
        });
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn to_csv(&self) -> Result<String> {
        let mut out = String::from("image_path,feature_values\n");
        for row in &self.rows {
            let tuples: Vec<_> = row.crystals.iter().map(Crystal::summary_tuple).collect();
            let features = serde_json::to_string(&tuples)?;
            out.push_str(&csv_field(&row.image_path.display().to_string()));
            out.push(',');
            out.push_str(&csv_field(&features));
            out.push('\n');
        }
        Ok(out)
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Writes accepted frames and the run summary into one output directory.
pub struct PersistenceSink {
    root: PathBuf,
    extension: ImageExtension,
    next_index: u64,
    summary: SummaryTable,
}

impl PersistenceSink {
    /// Create (or reuse an empty) output directory. Fails before any capture
    /// starts when the directory cannot be created or already holds a run.
    pub fn create(root: impl Into<PathBuf>, extension: ImageExtension) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create output directory {}", root.display()))?;
        let summary_path = root.join(SUMMARY_FILE_NAME);
        if summary_path.exists() {
            return Err(anyhow!(
                "output directory {} already holds a run summary",
                root.display()
            ));
        }
        log::info!("output directory {}", root.display());
        Ok(Self {
            root,
            extension,
            next_index: 1,
            summary: SummaryTable::default(),
        })
    }

    pub fn images_saved(&self) -> u64 {
        self.next_index - 1
    }

    /// Save an image as the next `Snowflake_<n>` file.
    pub fn save_frame(&mut self, image: &GrayImage) -> Result<PathBuf> {
        let path = self.root.join(format!(
            "{}{}.{}",
            IMAGE_PREFIX,
            self.next_index,
            self.extension.as_str()
        ));
        image
            .save_with_format(&path, self.extension.format())
            .with_context(|| format!("failed to write image {}", path.display()))?;
        self.next_index += 1;
        Ok(path)
    }

    pub fn record(&mut self, image_path: PathBuf, crystals: Vec<Crystal>) {
        self.summary.push(image_path, crystals);
    }

    /// Write `image_data.csv`. Consumes the sink, so the summary is flushed once.
    pub fn flush(self) -> Result<PathBuf> {
        let path = self.root.join(SUMMARY_FILE_NAME);
        let csv = self.summary.to_csv()?;
        let mut file = File::create(&path)
            .with_context(|| format!("failed to create summary {}", path.display()))?;
        file.write_all(csv.as_bytes())
            .with_context(|| format!("failed to write summary {}", path.display()))?;
        file.sync_all()?;
        log::info!(
            "summary written to {} ({} rows, {} images saved)",
            path.display(),
            self.summary.len(),
            self.images_saved()
        );
        Ok(path)
    }
}
