//! Project folder layout derived from a root folder, a project name and the settings.

use crate::settings::MainSettings;
use std::io;
use std::path::{Path, PathBuf};

/// Data-dependent folders, relative to `data/{project}`.
const DATA_FOLDERS: DataFolders<&str> = DataFolders {
    source_pdf: "input/pdfs/training",
    source_annotation: "input/annotations",
    source_mapping: "input/kpi_mapping",
    destination_pdf: "interim/pdfs",
    destination_annotation: "interim/ml/annotations",
    destination_mapping: "interim/kpi_mapping",
    destination_extraction: "interim/ml/extraction",
    destination_curation: "interim/ml/curation",
    destination_training: "interim/ml/training",
    text_3434: "interim/ml",
    relevance: "output/RELEVANCE/Text",
};

const SAVED_MODELS_RELEVANCE: &str = "RELEVANCE/Text";
const SAVED_MODELS_INFERENCE: &str = "KPI_EXTRACTION/Text";

#[derive(Debug, Clone, PartialEq, Eq)]
struct DataFolders<P> {
    source_pdf: P,
    source_annotation: P,
    source_mapping: P,
    destination_pdf: P,
    destination_annotation: P,
    destination_mapping: P,
    destination_extraction: P,
    destination_curation: P,
    destination_training: P,
    text_3434: P,
    relevance: P,
}

/// Resolved folders of one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    project_name: String,
    relevance_model_name: String,
    kpi_model_name: String,
    path_folder_root: PathBuf,
    path_folder_model: PathBuf,
    path_folder_data: PathBuf,

    pub path_folder_source_pdf: PathBuf,
    pub path_folder_source_annotation: PathBuf,
    pub path_folder_source_mapping: PathBuf,
    pub path_folder_destination_pdf: PathBuf,
    pub path_folder_destination_annotation: PathBuf,
    pub path_folder_destination_mapping: PathBuf,
    pub path_folder_destination_extraction: PathBuf,
    pub path_folder_destination_curation: PathBuf,
    pub path_folder_destination_training: PathBuf,
    pub path_folder_destination_saved_models_relevance: PathBuf,
    pub path_folder_destination_saved_models_inference: PathBuf,
    /// Output folder of the merged `text_3434` artifact.
    pub path_folder_text_3434: PathBuf,
    pub path_folder_relevance: PathBuf,
}

impl ProjectPaths {
    /// Resolve every folder and create `root/models` and `root/data`.
    pub fn new(project_name: &str, settings: &MainSettings, root: &Path) -> io::Result<Self> {
        let mut paths = Self {
            project_name: project_name.to_string(),
            relevance_model_name: settings.train_relevance.output_model_name.clone(),
            kpi_model_name: settings.train_kpi.output_model_name.clone(),
            path_folder_root: root.to_path_buf(),
            path_folder_model: PathBuf::new(),
            path_folder_data: PathBuf::new(),
            path_folder_source_pdf: PathBuf::new(),
            path_folder_source_annotation: PathBuf::new(),
            path_folder_source_mapping: PathBuf::new(),
            path_folder_destination_pdf: PathBuf::new(),
            path_folder_destination_annotation: PathBuf::new(),
            path_folder_destination_mapping: PathBuf::new(),
            path_folder_destination_extraction: PathBuf::new(),
            path_folder_destination_curation: PathBuf::new(),
            path_folder_destination_training: PathBuf::new(),
            path_folder_destination_saved_models_relevance: PathBuf::new(),
            path_folder_destination_saved_models_inference: PathBuf::new(),
            path_folder_text_3434: PathBuf::new(),
            path_folder_relevance: PathBuf::new(),
        };
        paths.set_root(root)?;
        Ok(paths)
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn path_folder_root(&self) -> &Path {
        &self.path_folder_root
    }

    pub fn path_folder_model(&self) -> &Path {
        &self.path_folder_model
    }

    pub fn path_folder_data(&self) -> &Path {
        &self.path_folder_data
    }

    pub fn path_project_data_folder(&self) -> PathBuf {
        self.path_folder_data.join(&self.project_name)
    }

    pub fn path_project_model_folder(&self) -> PathBuf {
        self.path_folder_model.join(&self.project_name)
    }

    pub fn set_project_name(&mut self, project_name: &str) {
        self.project_name = project_name.to_string();
        self.update_project_paths();
    }

    /// Take the saved-model names from new settings.
    pub fn set_main_settings(&mut self, settings: &MainSettings) {
        self.relevance_model_name = settings.train_relevance.output_model_name.clone();
        self.kpi_model_name = settings.train_kpi.output_model_name.clone();
        self.update_project_paths();
    }

    /// Move the layout under a new root, creating its folders.
    pub fn set_root(&mut self, root: &Path) -> io::Result<()> {
        std::fs::create_dir_all(root)?;
        self.path_folder_root = root.canonicalize()?;
        self.path_folder_model = self.path_folder_root.join("models");
        self.path_folder_data = self.path_folder_root.join("data");
        std::fs::create_dir_all(&self.path_folder_model)?;
        std::fs::create_dir_all(&self.path_folder_data)?;
        self.update_project_paths();
        Ok(())
    }

    fn update_project_paths(&mut self) {
        let data = self.path_project_data_folder();
        let d = |rel: &str| data.join(rel);
        let folders = DataFolders {
            source_pdf: d(DATA_FOLDERS.source_pdf),
            source_annotation: d(DATA_FOLDERS.source_annotation),
            source_mapping: d(DATA_FOLDERS.source_mapping),
            destination_pdf: d(DATA_FOLDERS.destination_pdf),
            destination_annotation: d(DATA_FOLDERS.destination_annotation),
            destination_mapping: d(DATA_FOLDERS.destination_mapping),
            destination_extraction: d(DATA_FOLDERS.destination_extraction),
            destination_curation: d(DATA_FOLDERS.destination_curation),
            destination_training: d(DATA_FOLDERS.destination_training),
            text_3434: d(DATA_FOLDERS.text_3434),
            relevance: d(DATA_FOLDERS.relevance),
        };
        self.path_folder_source_pdf = folders.source_pdf;
        self.path_folder_source_annotation = folders.source_annotation;
        self.path_folder_source_mapping = folders.source_mapping;
        self.path_folder_destination_pdf = folders.destination_pdf;
        self.path_folder_destination_annotation = folders.destination_annotation;
        self.path_folder_destination_mapping = folders.destination_mapping;
        self.path_folder_destination_extraction = folders.destination_extraction;
        self.path_folder_destination_curation = folders.destination_curation;
        self.path_folder_destination_training = folders.destination_training;
        self.path_folder_text_3434 = folders.text_3434;
        self.path_folder_relevance = folders.relevance;

        let models = self.path_project_model_folder();
        self.path_folder_destination_saved_models_relevance = models
            .join(SAVED_MODELS_RELEVANCE)
            .join(&self.relevance_model_name);
        self.path_folder_destination_saved_models_inference = models
            .join(SAVED_MODELS_INFERENCE)
            .join(&self.kpi_model_name);
    }
}
