//! Object storage transfers for projects that keep their data in S3 buckets.

use crate::paths::ProjectPaths;
use crate::settings::S3Bucket;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

const DEFAULT_REGION: &str = "us-east-1";

/// Bucket operations the pipeline needs around its local folders.
#[async_trait(?Send)]
pub trait ObjectStore {
    /// Download every object below `prefix` into `dir`, named after the last key segment.
    async fn download_files_in_prefix_to_dir(&self, prefix: &str, dir: &Path) -> Result<usize>;

    /// Upload the regular files directly inside `dir` to `{prefix}/{file name}`.
    async fn upload_files_in_dir_to_prefix(&self, dir: &Path, prefix: &str) -> Result<usize>;
}

/// Client for one S3-compatible bucket.
#[derive(Clone)]
pub struct S3Communication {
    name: String,
    bucket: Box<Bucket>,
}

impl S3Communication {
    pub fn new(settings: &S3Bucket) -> Result<Self> {
        if settings.s3_bucket_name.trim().is_empty() {
            bail!("no bucket name configured for {}", settings.s3_endpoint);
        }
        let region = Region::Custom {
            region: DEFAULT_REGION.to_string(),
            endpoint: settings.s3_endpoint.clone(),
        };
        let credentials = Credentials::new(
            Some(settings.s3_access_key.as_str()),
            Some(settings.s3_secret_key.as_str()),
            None,
            None,
            None,
        )
        .context("invalid S3 credentials")?;
        let bucket = Bucket::new(&settings.s3_bucket_name, region, credentials)
            .with_context(|| format!("failed to open bucket {}", settings.s3_bucket_name))?
            .with_path_style();
        Ok(Self {
            name: settings.s3_bucket_name.clone(),
            bucket,
        })
    }
}

#[async_trait(?Send)]
impl ObjectStore for S3Communication {
    async fn download_files_in_prefix_to_dir(&self, prefix: &str, dir: &Path) -> Result<usize> {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        let pages = self
            .bucket
            .list(prefix.to_string(), None)
            .await
            .with_context(|| format!("failed to list s3://{}/{prefix}", self.name))?;

        let mut count = 0usize;
        for object in pages.iter().flat_map(|page| page.contents.iter()) {
            let Some(file_name) = object.key.rsplit('/').next().filter(|n| !n.is_empty()) else {
                continue;
            };
            let response = self
                .bucket
                .get_object(&object.key)
                .await
                .with_context(|| format!("failed to download s3://{}/{}", self.name, object.key))?;
            let target = dir.join(file_name);
            fs::write(&target, response.bytes())
                .with_context(|| format!("failed to write {}", target.display()))?;
            debug!(key = %object.key, target = %target.display(), "downloaded object");
            count += 1;
        }
        info!(bucket = %self.name, prefix, files = count, "downloaded prefix");
        Ok(count)
    }

    async fn upload_files_in_dir_to_prefix(&self, dir: &Path, prefix: &str) -> Result<usize> {
        let files = files_in_dir(dir)?;
        for path in &files {
            let key = object_key(prefix, path)?;
            let content =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            self.bucket
                .put_object(&key, &content)
                .await
                .with_context(|| format!("failed to upload s3://{}/{key}", self.name))?;
            debug!(%key, source = %path.display(), "uploaded object");
        }
        info!(bucket = %self.name, prefix, files = files.len(), "uploaded folder");
        Ok(files.len())
    }
}

/// Key prefix mirroring a project folder: `{s3 prefix}/{project}/{folder below the project}`.
pub fn bucket_prefix(s3_prefix: &str, paths: &ProjectPaths, folder: &Path) -> Result<String> {
    let relative = folder
        .strip_prefix(paths.path_project_data_folder())
        .with_context(|| format!("{} is not a project data folder", folder.display()))?;

    let mut segments: Vec<String> = Vec::new();
    let s3_prefix = s3_prefix.trim_matches('/');
    if !s3_prefix.is_empty() {
        segments.push(s3_prefix.to_string());
    }
    segments.push(paths.project_name().to_string());
    for component in relative.components() {
        match component {
            Component::Normal(part) => segments.push(part.to_string_lossy().into_owned()),
            _ => return Err(anyhow!("unexpected component in {}", relative.display())),
        }
    }
    Ok(segments.join("/"))
}

/// Regular files directly inside `dir`, sorted by name.
pub(crate) fn files_in_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read folder {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn object_key(prefix: &str, path: &Path) -> Result<String> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("{} has no file name", path.display()))?
        .to_string_lossy();
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        Ok(file_name.into_owned())
    } else {
        Ok(format!("{prefix}/{file_name}"))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MainSettings;

    fn project(dir: &Path) -> ProjectPaths {
        ProjectPaths::new("TEST", &MainSettings::default(), dir).unwrap()
    }

    #[test]
    fn prefixes_mirror_the_project_layout() {
        let dir = tempfile::tempdir().unwrap();
        let paths = project(dir.path());

        assert_eq!(
            bucket_prefix("corporate/", &paths, &paths.path_folder_relevance).unwrap(),
            "corporate/TEST/output/RELEVANCE/Text"
        );
        assert_eq!(
            bucket_prefix("", &paths, &paths.path_folder_text_3434).unwrap(),
            "TEST/interim/ml"
        );
        assert!(bucket_prefix("corporate", &paths, Path::new("/elsewhere")).is_err());
    }

    #[test]
    fn object_keys_use_the_file_name() {
        let path = Path::new("/data/TEST/interim/ml/text_3434.csv");
        assert_eq!(
            object_key("corporate/TEST/interim/ml/", path).unwrap(),
            "corporate/TEST/interim/ml/text_3434.csv"
        );
        assert_eq!(object_key("", path).unwrap(), "text_3434.csv");
    }

    #[test]
    fn folder_listing_skips_subfolders() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.csv"), "b").unwrap();
        fs::write(dir.path().join("a.csv"), "a").unwrap();

        let files = files_in_dir(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("a.csv"), dir.path().join("b.csv")]
        );
    }

    #[test]
    fn bucket_name_is_required() {
        let err = S3Communication::new(&S3Bucket {
            s3_endpoint: "http://127.0.0.1:9000".into(),
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(err.to_string().contains("no bucket name"));
    }
}
