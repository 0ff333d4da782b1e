//! Conversion of the annotation workbook into the CSV file the extraction service reads.

use crate::paths::ProjectPaths;
use crate::storage::{bucket_prefix, ObjectStore};
use anyhow::Context;
use calamine::{open_workbook_auto, Reader};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const AGGREGATED_ANNOTATION_FILE: &str = "aggregated_annotation.csv";

#[derive(Debug, thiserror::Error)]
pub enum AnnotationConversionError {
    #[error("{role} folder {} is not an existing directory", .path.display())]
    InvalidFolder { role: &'static str, path: PathBuf },

    #[error("expected exactly one .xlsx file in {}, found {found}", .folder.display())]
    FileCount { folder: PathBuf, found: usize },

    #[error("failed to list {}: {source}", .folder.display())]
    List {
        folder: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read workbook {}: {source}", .path.display())]
    Workbook {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },

    #[error("workbook {} has no worksheet", .path.display())]
    NoWorksheet { path: PathBuf },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

type Result<T> = std::result::Result<T, AnnotationConversionError>;

/// Turns the single `*.xlsx` annotation workbook of a folder into `aggregated_annotation.csv`.
#[derive(Debug, Clone)]
pub struct XlsToCsvConverter {
    source: PathBuf,
    destination: PathBuf,
}

impl XlsToCsvConverter {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Convert the workbook and return the path of the written CSV file.
    pub fn convert(&self) -> Result<PathBuf> {
        self.check_for_valid_paths()?;
        let workbook = single_workbook(self.find_xlsx_files()?, &self.source)?;
        self.convert_single_file_to_csv(&workbook)
    }

    fn check_for_valid_paths(&self) -> Result<()> {
        for (role, path) in [("source", &self.source), ("destination", &self.destination)] {
            if path.as_os_str().is_empty() || !path.is_dir() {
                return Err(AnnotationConversionError::InvalidFolder {
                    role,
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }

    fn find_xlsx_files(&self) -> Result<Vec<PathBuf>> {
        let list_error = |source| AnnotationConversionError::List {
            folder: self.source.clone(),
            source,
        };
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.source).map_err(list_error)? {
            let path = entry.map_err(list_error)?.path();
            let is_xlsx = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("xlsx"))
                .unwrap_or(false);
            if path.is_file() && is_xlsx {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn convert_single_file_to_csv(&self, workbook: &Path) -> Result<PathBuf> {
        let read_error = |source| AnnotationConversionError::Workbook {
            path: workbook.to_path_buf(),
            source,
        };
        let mut sheets = open_workbook_auto(workbook).map_err(read_error)?;
        let range = sheets
            .worksheet_range_at(0)
            .ok_or_else(|| AnnotationConversionError::NoWorksheet {
                path: workbook.to_path_buf(),
            })?
            .map_err(read_error)?;

        let output = self.destination.join(AGGREGATED_ANNOTATION_FILE);
        let write_error = |source| AnnotationConversionError::Write {
            path: output.clone(),
            source,
        };
        let mut writer = csv::Writer::from_path(&output).map_err(write_error)?;
        for row in range.rows() {
            writer
                .write_record(row.iter().map(|cell| cell.to_string()))
                .map_err(write_error)?;
        }
        writer
            .flush()
            .map_err(|e| write_error(csv::Error::from(e)))?;

        info!(
            workbook = %workbook.display(),
            output = %output.display(),
            rows = range.height(),
            "converted annotations"
        );
        Ok(output)
    }
}

fn single_workbook(files: Vec<PathBuf>, folder: &Path) -> Result<PathBuf> {
    match <[PathBuf; 1]>::try_from(files) {
        Ok([file]) => Ok(file),
        Err(files) => Err(AnnotationConversionError::FileCount {
            folder: folder.to_path_buf(),
            found: files.len(),
        }),
    }
}

/// Buckets holding the project's inputs (`main`) and intermediate results (`interim`).
#[derive(Clone, Copy)]
pub struct AnnotationBuckets<'a> {
    pub s3_prefix: &'a str,
    pub main: &'a dyn ObjectStore,
    pub interim: &'a dyn ObjectStore,
}

/// Convert the project's annotation workbook.
///
/// With buckets, the workbook is first fetched from the main bucket and the CSV file is
/// published to the interim bucket afterwards.
pub async fn convert_project_annotations(
    paths: &ProjectPaths,
    buckets: Option<AnnotationBuckets<'_>>,
) -> anyhow::Result<PathBuf> {
    let source = &paths.path_folder_source_annotation;
    let destination = &paths.path_folder_destination_annotation;

    if let Some(buckets) = buckets {
        let prefix = bucket_prefix(buckets.s3_prefix, paths, source)?;
        buckets
            .main
            .download_files_in_prefix_to_dir(&prefix, source)
            .await?;
    }

    fs::create_dir_all(destination)
        .with_context(|| format!("failed to create {}", destination.display()))?;
    let output = XlsToCsvConverter::new(source, destination).convert()?;

    if let Some(buckets) = buckets {
        let prefix = bucket_prefix(buckets.s3_prefix, paths, destination)?;
        buckets
            .interim
            .upload_files_in_dir_to_prefix(destination, &prefix)
            .await?;
    }
    Ok(output)
}
