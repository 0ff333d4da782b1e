//! Consolidation of relevance outputs into the `text_3434` training artifact.

use crate::paths::ProjectPaths;
use crate::settings::S3Settings;
use crate::storage::{bucket_prefix, files_in_dir, ObjectStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const TEXT_3434_FILE: &str = "text_3434.csv";

/// Merge step invoked between relevance inference and KPI training.
///
/// `Ok(false)` means nothing was produced. Callers treat both that and an error as
/// diagnostic only.
#[async_trait(?Send)]
pub trait TextMerger {
    async fn merge(
        &self,
        project_name: &str,
        s3_usage: bool,
        s3_settings: &S3Settings,
        paths: &ProjectPaths,
    ) -> Result<bool>;
}

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("project name must not be empty")]
    EmptyProjectName,

    #[error("S3 usage is enabled but no interim bucket is configured")]
    MissingInterimBucket,

    #[error("header of {path} does not match the first relevance file")]
    HeaderMismatch { path: PathBuf },
}

/// Concatenates the relevance CSV files under one header.
///
/// With S3 usage on, the relevance output is first fetched from the interim bucket and the
/// merged file is published back to it.
#[derive(Clone, Copy, Default)]
pub struct CsvTextMerger<'a> {
    interim_bucket: Option<&'a dyn ObjectStore>,
}

impl<'a> CsvTextMerger<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interim_bucket(mut self, bucket: &'a dyn ObjectStore) -> Self {
        self.interim_bucket = Some(bucket);
        self
    }
}

#[async_trait(?Send)]
impl TextMerger for CsvTextMerger<'_> {
    async fn merge(
        &self,
        project_name: &str,
        s3_usage: bool,
        s3_settings: &S3Settings,
        paths: &ProjectPaths,
    ) -> Result<bool> {
        if project_name.trim().is_empty() {
            return Err(MergeError::EmptyProjectName.into());
        }
        let bucket = if s3_usage {
            if s3_settings.interim_bucket.s3_bucket_name.trim().is_empty() {
                return Err(MergeError::MissingInterimBucket.into());
            }
            Some(self.interim_bucket.ok_or(MergeError::MissingInterimBucket)?)
        } else {
            None
        };

        let relevance = &paths.path_folder_relevance;
        if let Some(bucket) = bucket {
            let prefix = bucket_prefix(&s3_settings.prefix, paths, relevance)?;
            bucket
                .download_files_in_prefix_to_dir(&prefix, relevance)
                .await?;
        }

        let inputs = relevance_files(relevance)?;
        if inputs.is_empty() {
            info!(folder = %relevance.display(), "no relevance output to merge");
            return Ok(false);
        }

        let text_3434 = &paths.path_folder_text_3434;
        fs::create_dir_all(text_3434)
            .with_context(|| format!("failed to create {}", text_3434.display()))?;
        let output = text_3434.join(TEXT_3434_FILE);
        let rows = write_merged(&inputs, &output)?;
        info!(
            project = project_name,
            files = inputs.len(),
            rows,
            output = %output.display(),
            "merged relevance output"
        );

        if let Some(bucket) = bucket {
            let prefix = bucket_prefix(&s3_settings.prefix, paths, text_3434)?;
            bucket.upload_files_in_dir_to_prefix(text_3434, &prefix).await?;
        }
        Ok(true)
    }
}

fn relevance_files(folder: &Path) -> Result<Vec<PathBuf>> {
    let files = files_in_dir(folder)
        .with_context(|| format!("failed to read relevance folder {}", folder.display()))?;
    Ok(files
        .into_iter()
        .filter(|path| {
            path.extension()
                .map(|ext| ext.eq_ignore_ascii_case("csv"))
                .unwrap_or(false)
        })
        .collect())
}

/// Write the header of the first file and the records of all files. Returns the record count.
fn write_merged(inputs: &[PathBuf], output: &Path) -> Result<usize> {
    let mut writer = csv::Writer::from_path(output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    let mut header: Option<csv::StringRecord> = None;
    let mut rows = 0usize;

    for input in inputs {
        debug!(file = %input.display(), "merging");
        let mut reader = csv::Reader::from_path(input)
            .with_context(|| format!("failed to open {}", input.display()))?;
        let headers = reader
            .headers()
            .with_context(|| format!("failed to read the header of {}", input.display()))?
            .clone();
        if headers.is_empty() {
            continue;
        }
        match &header {
            None => {
                writer.write_record(&headers)?;
                header = Some(headers);
            }
            Some(h) if h.iter().eq(headers.iter()) => {}
            Some(_) => {
                return Err(MergeError::HeaderMismatch {
                    path: input.clone(),
                }
                .into())
            }
        }
        for record in reader.records() {
            let record = record.with_context(|| format!("failed to parse {}", input.display()))?;
            writer.write_record(&record)?;
            rows += 1;
        }
    }

    writer.flush()?;
    Ok(rows)
}
