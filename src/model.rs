use crate::settings::MainSettings;
use serde::{Deserialize, Serialize};

/// Mode marker sent with every dispatch.
pub const TRAIN_MODE: &str = "train";

/// Name of the single query field carrying the serialized payload.
pub const PAYLOAD_FIELD: &str = "payload";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Extraction,
    Inference,
}

impl Service {
    pub fn label(self) -> &'static str {
        match self {
            Service::Extraction => "Extraction",
            Service::Inference => "Inference",
        }
    }
}

/// Action endpoints exposed by the remote services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Extract,
    Curate,
    TrainRelevance,
    InferRelevance,
    TrainKpi,
}

impl Node {
    pub fn as_str(self) -> &'static str {
        match self {
            Node::Extract => "extract",
            Node::Curate => "curate",
            Node::TrainRelevance => "train_relevance",
            Node::InferRelevance => "infer_relevance",
            Node::TrainKpi => "train_kpi",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Liveness(Service),
    Dispatch(Node),
    RelevanceTraining,
    KpiTraining,
    MergeText,
}

impl Stage {
    pub(crate) fn describe(self) -> String {
        match self {
            Stage::Liveness(service) => format!("{} liveness", service.label()),
            Stage::Dispatch(node) => node.as_str().to_string(),
            Stage::RelevanceTraining => "relevance training".to_string(),
            Stage::KpiTraining => "kpi training".to_string(),
            Stage::MergeText => "text_3434 merge".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageOutcome {
    Passed { status: u16 },
    Failed { status: u16 },
    Skipped,
    MergeProduced,
    MergeEmpty,
    MergeError { detail: String },
}

impl StageOutcome {
    /// Whether this outcome turns the run into a failure. Merge outcomes never do.
    pub fn is_failure(&self) -> bool {
        matches!(self, StageOutcome::Failed { .. })
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            StageOutcome::Passed { status } => format!("ok ({status})"),
            StageOutcome::Failed { status } => format!("failed ({status})"),
            StageOutcome::Skipped => "skipped".to_string(),
            StageOutcome::MergeProduced => "generated".to_string(),
            StageOutcome::MergeEmpty => "nothing generated".to_string(),
            StageOutcome::MergeError { detail } => format!("error: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub outcome: StageOutcome,
}

/// Accumulated outcome of a run.
///
/// Records are append-only, so once a failing outcome is recorded the run stays failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStatus {
    records: Vec<StageRecord>,
}

impl RunStatus {
    pub fn record(&mut self, stage: Stage, outcome: StageOutcome) {
        self.records.push(StageRecord { stage, outcome });
    }

    pub fn succeeded(&self) -> bool {
        !self.records.iter().any(|r| r.outcome.is_failure())
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    pub fn failures(&self) -> impl Iterator<Item = &StageRecord> {
        self.records.iter().filter(|r| r.outcome.is_failure())
    }
}

/// Serialized run description sent as the `payload` query field.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPayload {
    encoded: String,
}

impl RequestPayload {
    /// Flatten every settings section into one object next to `project_name` and `mode`.
    pub fn build(settings: &MainSettings) -> serde_json::Result<Self> {
        let mut object = match serde_json::to_value(settings)? {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        object.insert(
            "project_name".to_string(),
            serde_json::Value::String(settings.general.project_name.clone()),
        );
        object.insert(
            "mode".to_string(),
            serde_json::Value::String(TRAIN_MODE.to_string()),
        );
        let encoded = serde_json::to_string(&serde_json::Value::Object(object))?;
        Ok(Self { encoded })
    }

    /// The JSON string carried by the `payload` field.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn query(&self) -> [(&'static str, &str); 1] {
        [(PAYLOAD_FIELD, self.encoded.as_str())]
    }
}

/// Status messages emitted by the router for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterEvent {
    ServiceUp(Service),
    ServiceDown(Service),
    ResponseBody { node: Node, body: String },
    /// Announced before the relevance training flag is checked.
    RelevanceTrainingStarted,
    RelevanceTrainingSkipped,
    KpiTrainingStarted,
    KpiTrainingSkipped,
    MergeSucceeded,
    MergeProducedNothing,
    MergeFailed { detail: String },
}

impl RouterEvent {
    /// Render a human-readable message for the console.
    pub fn to_message(&self) -> String {
        match self {
            RouterEvent::ServiceUp(Service::Extraction) => {
                "Extraction server is up. Proceeding to extraction.".to_string()
            }
            RouterEvent::ServiceUp(Service::Inference) => {
                "Inference server is up. Proceeding to Inference.".to_string()
            }
            RouterEvent::ServiceDown(service) => {
                format!("{} server is not responding.", service.label())
            }
            RouterEvent::ResponseBody { body, .. } => body.clone(),
            RouterEvent::RelevanceTrainingStarted => {
                "Relevance training will be started.".to_string()
            }
            RouterEvent::RelevanceTrainingSkipped => {
                "No relevance training done. If you want to have a relevance training please \
                 set variable train under train_relevance to true."
                    .to_string()
            }
            RouterEvent::KpiTrainingStarted => {
                "Next we start the training of the inference model. This may take some time."
                    .to_string()
            }
            RouterEvent::KpiTrainingSkipped => {
                "No kpi training done. If you want to have a kpi training please set variable \
                 train under train_kpi to true."
                    .to_string()
            }
            RouterEvent::MergeSucceeded => "text_3434 was generated without error.".to_string(),
            RouterEvent::MergeProducedNothing => {
                "text_3434 was not generated without error.".to_string()
            }
            RouterEvent::MergeFailed { detail } => {
                format!("Error while generating text_3434.\n{detail}")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub timestamp_utc: String,
    pub project_name: String,
    pub extraction_address: String,
    pub inference_address: String,
    pub stages: Vec<StageRecord>,
    pub success: bool,
}
