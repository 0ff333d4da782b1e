//! Pipeline run controller.
//!
//! Drives the extraction and inference services through one training run. Every stage is
//! attempted even after an earlier one failed; failures only accumulate in [`RunStatus`].

use crate::merger::TextMerger;
use crate::model::{
    Node, RequestPayload, RouterEvent, RunReport, RunStatus, Service, Stage, StageOutcome,
};
use crate::paths::ProjectPaths;
use crate::settings::{MainSettings, S3Settings};
use reqwest::StatusCode;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{} server address has not been resolved", .0.label())]
    AddressNotResolved(Service),

    #[error("payload must be built before dispatching to {}", .0.as_str())]
    PayloadNotBuilt(Node),

    #[error("failed to serialize payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub struct Router<'a> {
    settings: &'a MainSettings,
    s3_settings: &'a S3Settings,
    paths: &'a ProjectPaths,
    merger: &'a dyn TextMerger,
    http: reqwest::Client,
    event_tx: Option<UnboundedSender<RouterEvent>>,
    extraction_address: String,
    inference_address: String,
    payload: Option<RequestPayload>,
    status: RunStatus,
}

impl<'a> Router<'a> {
    pub fn new(
        settings: &'a MainSettings,
        s3_settings: &'a S3Settings,
        paths: &'a ProjectPaths,
        merger: &'a dyn TextMerger,
        http: reqwest::Client,
    ) -> Self {
        Self {
            settings,
            s3_settings,
            paths,
            merger,
            http,
            event_tx: None,
            extraction_address: String::new(),
            inference_address: String::new(),
            payload: None,
            status: RunStatus::default(),
        }
    }

    /// Send status messages to `event_tx` as the run progresses.
    pub fn with_events(mut self, event_tx: UnboundedSender<RouterEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Overall result so far: `false` once any liveness check or dispatch saw a non-200 status.
    pub fn return_value(&self) -> bool {
        self.status.succeeded()
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn extraction_address(&self) -> &str {
        &self.extraction_address
    }

    pub fn inference_address(&self) -> &str {
        &self.inference_address
    }

    pub fn payload(&self) -> Option<&RequestPayload> {
        self.payload.as_ref()
    }

    /// Run the whole pipeline and return the accumulated result.
    ///
    /// Non-200 responses never stop the run. Only transport failures end it early.
    pub async fn run(&mut self) -> Result<bool, RouterError> {
        self.resolve_addresses();

        self.check_liveness(Service::Extraction).await?;
        self.build_payload()?;

        self.dispatch(Service::Extraction, Node::Extract).await?;
        self.dispatch(Service::Extraction, Node::Curate).await?;

        self.check_liveness(Service::Inference).await?;

        self.run_relevance_training().await?;
        self.run_kpi_training().await?;

        let result = self.return_value();
        if result {
            info!(project = %self.settings.general.project_name, "pipeline run finished");
        } else {
            warn!(
                project = %self.settings.general.project_name,
                failures = self.status.failures().count(),
                "pipeline run finished with failures"
            );
        }
        Ok(result)
    }

    pub fn resolve_addresses(&mut self) {
        let general = &self.settings.general;
        self.extraction_address = format!("http://{}:{}", general.ext_ip, general.ext_port);
        self.inference_address = format!("http://{}:{}", general.infer_ip, general.infer_port);
        debug!(
            extraction = %self.extraction_address,
            inference = %self.inference_address,
            "resolved service addresses"
        );
    }

    /// Probe `{address}/liveness`. Returns whether the service answered 200.
    pub async fn check_liveness(&mut self, service: Service) -> Result<bool, RouterError> {
        let url = format!("{}/liveness", self.address(service)?);
        debug!(%url, "probing liveness");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| RouterError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        let stage = Stage::Liveness(service);
        if status == StatusCode::OK {
            info!(service = service.label(), "service is live");
            self.emit(RouterEvent::ServiceUp(service));
            self.status.record(
                stage,
                StageOutcome::Passed {
                    status: status.as_u16(),
                },
            );
            Ok(true)
        } else {
            warn!(service = service.label(), status = status.as_u16(), "service is not live");
            self.emit(RouterEvent::ServiceDown(service));
            self.status.record(
                stage,
                StageOutcome::Failed {
                    status: status.as_u16(),
                },
            );
            Ok(false)
        }
    }

    /// Build the request payload. Later calls keep the first payload.
    pub fn build_payload(&mut self) -> Result<&RequestPayload, RouterError> {
        let payload = match self.payload.take() {
            Some(payload) => payload,
            None => {
                let payload = RequestPayload::build(self.settings)?;
                debug!(bytes = payload.encoded().len(), "built request payload");
                payload
            }
        };
        Ok(&*self.payload.insert(payload))
    }

    /// GET `{address}/{node}` with the payload. Returns whether the service answered 200.
    pub async fn dispatch(&mut self, service: Service, node: Node) -> Result<bool, RouterError> {
        let url = format!("{}/{}", self.address(service)?, node.as_str());
        let payload = self
            .payload
            .as_ref()
            .ok_or(RouterError::PayloadNotBuilt(node))?;
        debug!(%url, "dispatching");
        let response = self
            .http
            .get(&url)
            .query(&payload.query())
            .send()
            .await
            .map_err(|source| RouterError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| RouterError::Transport {
                url: url.clone(),
                source,
            })?;
        self.emit(RouterEvent::ResponseBody { node, body });

        let stage = Stage::Dispatch(node);
        if status == StatusCode::OK {
            info!(node = node.as_str(), "dispatch succeeded");
            self.status.record(
                stage,
                StageOutcome::Passed {
                    status: status.as_u16(),
                },
            );
            Ok(true)
        } else {
            warn!(node = node.as_str(), status = status.as_u16(), "dispatch failed");
            self.status.record(
                stage,
                StageOutcome::Failed {
                    status: status.as_u16(),
                },
            );
            Ok(false)
        }
    }

    /// Snapshot of the run for summaries and exports.
    pub fn report(&self) -> RunReport {
        RunReport {
            timestamp_utc: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
            project_name: self.settings.general.project_name.clone(),
            extraction_address: self.extraction_address.clone(),
            inference_address: self.inference_address.clone(),
            stages: self.status.records().to_vec(),
            success: self.return_value(),
        }
    }

    async fn run_relevance_training(&mut self) -> Result<(), RouterError> {
        self.emit(RouterEvent::RelevanceTrainingStarted);
        if self.settings.train_relevance.train {
            self.dispatch(Service::Inference, Node::TrainRelevance)
                .await?;
        } else {
            info!("relevance training disabled");
            self.emit(RouterEvent::RelevanceTrainingSkipped);
            self.status
                .record(Stage::RelevanceTraining, StageOutcome::Skipped);
        }
        Ok(())
    }

    async fn run_kpi_training(&mut self) -> Result<(), RouterError> {
        if !self.settings.train_kpi.train {
            info!("kpi training disabled");
            self.emit(RouterEvent::KpiTrainingSkipped);
            self.status.record(Stage::KpiTraining, StageOutcome::Skipped);
            return Ok(());
        }

        self.dispatch(Service::Inference, Node::InferRelevance)
            .await?;
        self.merge_text().await;
        self.emit(RouterEvent::KpiTrainingStarted);
        self.dispatch(Service::Inference, Node::TrainKpi).await?;
        Ok(())
    }

    /// Run the merge collaborator. Its outcome is reported but never fails the run.
    async fn merge_text(&mut self) {
        let general = &self.settings.general;
        let merged = self
            .merger
            .merge(
                &general.project_name,
                general.s3_usage,
                self.s3_settings,
                self.paths,
            )
            .await;
        let outcome = match merged {
            Ok(true) => {
                info!("text_3434 generated");
                self.emit(RouterEvent::MergeSucceeded);
                StageOutcome::MergeProduced
            }
            Ok(false) => {
                warn!("text_3434 was not generated");
                self.emit(RouterEvent::MergeProducedNothing);
                StageOutcome::MergeEmpty
            }
            Err(e) => {
                let detail = format!("{e:#}");
                warn!(error = %detail, "text_3434 generation failed");
                self.emit(RouterEvent::MergeFailed {
                    detail: detail.clone(),
                });
                StageOutcome::MergeError { detail }
            }
        };
        self.status.record(Stage::MergeText, outcome);
    }

    fn address(&self, service: Service) -> Result<&str, RouterError> {
        let address = match service {
            Service::Extraction => &self.extraction_address,
            Service::Inference => &self.inference_address,
        };
        if address.is_empty() {
            return Err(RouterError::AddressNotResolved(service));
        }
        Ok(address)
    }

    fn emit(&self, event: RouterEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Mock, Server, ServerGuard};
    use std::cell::Cell;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    #[derive(Clone, Copy)]
    enum MergeBehavior {
        Produced,
        Nothing,
        Fails,
    }

    struct FakeMerger {
        behavior: MergeBehavior,
        calls: Cell<usize>,
    }

    impl FakeMerger {
        fn new(behavior: MergeBehavior) -> Self {
            Self {
                behavior,
                calls: Cell::new(0),
            }
        }
    }

    #[async_trait::async_trait(?Send)]
    impl TextMerger for FakeMerger {
        async fn merge(
            &self,
            project_name: &str,
            _s3_usage: bool,
            _s3_settings: &S3Settings,
            _paths: &ProjectPaths,
        ) -> anyhow::Result<bool> {
            assert_eq!(project_name, "TEST");
            self.calls.set(self.calls.get() + 1);
            match self.behavior {
                MergeBehavior::Produced => Ok(true),
                MergeBehavior::Nothing => Ok(false),
                MergeBehavior::Fails => Err(anyhow::anyhow!("relevance folder missing")),
            }
        }
    }

    /// Status codes served by the fake services.
    struct Statuses {
        extraction_liveness: usize,
        extract: usize,
        curate: usize,
        inference_liveness: usize,
        train_relevance: usize,
        infer_relevance: usize,
        train_kpi: usize,
    }

    impl Default for Statuses {
        fn default() -> Self {
            Self {
                extraction_liveness: 200,
                extract: 200,
                curate: 200,
                inference_liveness: 200,
                train_relevance: 200,
                infer_relevance: 200,
                train_kpi: 200,
            }
        }
    }

    struct Mocks {
        _extraction_liveness: Mock,
        _inference_liveness: Mock,
        extract: Mock,
        curate: Mock,
        train_relevance: Mock,
        infer_relevance: Mock,
        train_kpi: Mock,
    }

    struct Harness {
        extraction: ServerGuard,
        inference: ServerGuard,
        settings: MainSettings,
        s3: S3Settings,
        paths: ProjectPaths,
        _root: tempfile::TempDir,
    }

    impl Harness {
        async fn new() -> Self {
            let extraction = Server::new_async().await;
            let inference = Server::new_async().await;

            let mut settings = MainSettings::default();
            settings.general.project_name = "TEST".into();
            let ext = extraction.socket_address();
            settings.general.ext_ip = ext.ip().to_string();
            settings.general.ext_port = ext.port();
            let inf = inference.socket_address();
            settings.general.infer_ip = inf.ip().to_string();
            settings.general.infer_port = inf.port();
            settings.train_relevance.output_model_name = "REL".into();
            settings.train_kpi.output_model_name = "KPI".into();

            let root = tempfile::tempdir().unwrap();
            let paths = ProjectPaths::new("TEST", &settings, root.path()).unwrap();
            Self {
                extraction,
                inference,
                settings,
                s3: S3Settings::default(),
                paths,
                _root: root,
            }
        }

        async fn serve(&mut self, statuses: Statuses) -> Mocks {
            Mocks {
                _extraction_liveness: mock_node(
                    &mut self.extraction,
                    "liveness",
                    statuses.extraction_liveness,
                )
                .await,
                _inference_liveness: mock_node(
                    &mut self.inference,
                    "liveness",
                    statuses.inference_liveness,
                )
                .await,
                extract: mock_node(&mut self.extraction, "extract", statuses.extract).await,
                curate: mock_node(&mut self.extraction, "curate", statuses.curate).await,
                train_relevance: mock_node(
                    &mut self.inference,
                    "train_relevance",
                    statuses.train_relevance,
                )
                .await,
                infer_relevance: mock_node(
                    &mut self.inference,
                    "infer_relevance",
                    statuses.infer_relevance,
                )
                .await,
                train_kpi: mock_node(&mut self.inference, "train_kpi", statuses.train_kpi).await,
            }
        }

        fn router<'a>(
            &'a self,
            merger: &'a dyn TextMerger,
        ) -> (Router<'a>, UnboundedReceiver<RouterEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let router = Router::new(
                &self.settings,
                &self.s3,
                &self.paths,
                merger,
                reqwest::Client::new(),
            )
            .with_events(tx);
            (router, rx)
        }
    }

    fn node_path(node: &str) -> Matcher {
        Matcher::Regex(format!(r"^/{node}(\?.*)?$"))
    }

    async fn mock_node(server: &mut ServerGuard, node: &str, status: usize) -> Mock {
        server
            .mock("GET", node_path(node))
            .match_query(Matcher::Any)
            .with_status(status)
            .with_body(format!("{node} answered {status}"))
            .create_async()
            .await
    }

    fn console(rx: &mut UnboundedReceiver<RouterEvent>) -> String {
        let mut lines = Vec::new();
        while let Ok(event) = rx.try_recv() {
            lines.push(event.to_message());
        }
        lines.join("\n")
    }

    #[test]
    fn resolves_both_addresses() {
        let mut settings = MainSettings::default();
        settings.general.ext_ip = "0.0.0.0".into();
        settings.general.ext_port = 8000;
        settings.general.infer_ip = "0.0.0.1".into();
        settings.general.infer_port = 8001;
        let root = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new("TEST", &settings, root.path()).unwrap();
        let s3 = S3Settings::default();
        let merger = FakeMerger::new(MergeBehavior::Produced);

        let mut router = Router::new(&settings, &s3, &paths, &merger, reqwest::Client::new());
        assert!(router.extraction_address().is_empty());
        router.resolve_addresses();
        router.resolve_addresses();
        assert_eq!(router.extraction_address(), "http://0.0.0.0:8000");
        assert_eq!(router.inference_address(), "http://0.0.0.1:8001");
    }

    #[tokio::test]
    async fn ordering_preconditions_are_enforced() {
        let h = Harness::new().await;
        let merger = FakeMerger::new(MergeBehavior::Produced);
        let (mut router, _rx) = h.router(&merger);

        assert!(matches!(
            router.check_liveness(Service::Extraction).await,
            Err(RouterError::AddressNotResolved(Service::Extraction))
        ));

        router.resolve_addresses();
        assert!(matches!(
            router.dispatch(Service::Extraction, Node::Extract).await,
            Err(RouterError::PayloadNotBuilt(Node::Extract))
        ));
        assert!(router.return_value());
    }

    #[tokio::test]
    async fn payload_is_built_once() {
        let h = Harness::new().await;
        let merger = FakeMerger::new(MergeBehavior::Produced);
        let (mut router, _rx) = h.router(&merger);

        let first = router.build_payload().unwrap().clone();
        let second = router.build_payload().unwrap().clone();
        assert_eq!(first, second);

        let value: serde_json::Value = serde_json::from_str(first.encoded()).unwrap();
        assert_eq!(value["project_name"], "TEST");
        assert_eq!(value["mode"], "train");
    }

    #[tokio::test]
    async fn extraction_liveness_reports_status() {
        for (status, expected_line, expected_result) in [
            (200, "Extraction server is up. Proceeding to extraction.", true),
            (500, "Extraction server is not responding.", false),
        ] {
            let mut h = Harness::new().await;
            let _mocks = h
                .serve(Statuses {
                    extraction_liveness: status,
                    ..Default::default()
                })
                .await;
            let merger = FakeMerger::new(MergeBehavior::Produced);
            let (mut router, mut rx) = h.router(&merger);

            router.resolve_addresses();
            let live = router.check_liveness(Service::Extraction).await.unwrap();

            assert_eq!(live, expected_result);
            assert!(console(&mut rx).contains(expected_line));
            assert_eq!(router.return_value(), expected_result);
        }
    }

    #[tokio::test]
    async fn inference_liveness_reports_status() {
        for (status, expected_line, expected_result) in [
            (200, "Inference server is up. Proceeding to Inference.", true),
            (503, "Inference server is not responding.", false),
        ] {
            let mut h = Harness::new().await;
            let _mocks = h
                .serve(Statuses {
                    inference_liveness: status,
                    ..Default::default()
                })
                .await;
            let merger = FakeMerger::new(MergeBehavior::Produced);
            let (mut router, mut rx) = h.router(&merger);

            router.resolve_addresses();
            router.check_liveness(Service::Inference).await.unwrap();

            assert!(console(&mut rx).contains(expected_line));
            assert_eq!(router.return_value(), expected_result);
        }
    }

    #[tokio::test]
    async fn failed_dispatch_is_never_undone() {
        let mut h = Harness::new().await;
        let _mocks = h
            .serve(Statuses {
                extract: 500,
                ..Default::default()
            })
            .await;
        let merger = FakeMerger::new(MergeBehavior::Produced);
        let (mut router, mut rx) = h.router(&merger);

        router.resolve_addresses();
        router.build_payload().unwrap();
        assert!(!router
            .dispatch(Service::Extraction, Node::Extract)
            .await
            .unwrap());
        assert!(!router.return_value());

        assert!(router
            .dispatch(Service::Extraction, Node::Curate)
            .await
            .unwrap());
        assert!(!router.return_value());

        let output = console(&mut rx);
        assert!(output.contains("extract answered 500"));
        assert!(output.contains("curate answered 200"));
    }

    #[tokio::test]
    async fn payload_travels_as_single_query_field() {
        let mut h = Harness::new().await;
        let expected = RequestPayload::build(&h.settings).unwrap();
        let extract = h
            .extraction
            .mock("GET", node_path("extract"))
            .match_query(Matcher::UrlEncoded(
                "payload".into(),
                expected.encoded().to_string(),
            ))
            .with_status(200)
            .create_async()
            .await;
        let merger = FakeMerger::new(MergeBehavior::Produced);
        let (mut router, _rx) = h.router(&merger);

        router.resolve_addresses();
        router.build_payload().unwrap();
        assert!(router
            .dispatch(Service::Extraction, Node::Extract)
            .await
            .unwrap());
        extract.assert_async().await;
    }

    #[tokio::test]
    async fn run_without_training_succeeds() {
        let mut h = Harness::new().await;
        let mocks = h.serve(Statuses::default()).await;
        let merger = FakeMerger::new(MergeBehavior::Produced);
        let (mut router, mut rx) = h.router(&merger);

        assert!(router.run().await.unwrap());

        let output = console(&mut rx);
        assert!(output.contains("Extraction server is up. Proceeding to extraction."));
        assert!(output.contains("Inference server is up. Proceeding to Inference."));
        assert!(output.contains(
            "Relevance training will be started.\nNo relevance training done."
        ));
        assert!(output.contains("No kpi training done."));
        assert!(mocks.extract.matched_async().await);
        assert!(mocks.curate.matched_async().await);
        assert!(!mocks.train_relevance.matched_async().await);
        assert!(!mocks.infer_relevance.matched_async().await);
        assert!(!mocks.train_kpi.matched_async().await);
        assert_eq!(merger.calls.get(), 0);
    }

    #[tokio::test]
    async fn extraction_down_does_not_stop_the_run() {
        let mut h = Harness::new().await;
        let mocks = h
            .serve(Statuses {
                extraction_liveness: 500,
                ..Default::default()
            })
            .await;
        let merger = FakeMerger::new(MergeBehavior::Produced);
        let (mut router, mut rx) = h.router(&merger);

        assert!(!router.run().await.unwrap());

        assert!(console(&mut rx).contains("Extraction server is not responding."));
        assert!(mocks.extract.matched_async().await);
        assert!(mocks.curate.matched_async().await);
    }

    #[tokio::test]
    async fn curate_failure_fails_the_run() {
        let mut h = Harness::new().await;
        let _mocks = h
            .serve(Statuses {
                curate: 500,
                ..Default::default()
            })
            .await;
        let merger = FakeMerger::new(MergeBehavior::Produced);
        let (mut router, _rx) = h.router(&merger);

        assert!(!router.run().await.unwrap());
        let failed: Vec<_> = router.status().failures().map(|r| r.stage).collect();
        assert_eq!(failed, vec![Stage::Dispatch(Node::Curate)]);
    }

    #[tokio::test]
    async fn relevance_training_result_follows_the_response() {
        for (status, expected) in [(200, true), (500, false)] {
            let mut h = Harness::new().await;
            h.settings.train_relevance.train = true;
            let mocks = h
                .serve(Statuses {
                    train_relevance: status,
                    ..Default::default()
                })
                .await;
            let merger = FakeMerger::new(MergeBehavior::Produced);
            let (mut router, mut rx) = h.router(&merger);

            assert_eq!(router.run().await.unwrap(), expected);
            assert!(console(&mut rx).contains("Relevance training will be started."));
            assert!(mocks.train_relevance.matched_async().await);
        }
    }

    #[tokio::test]
    async fn kpi_training_outcomes() {
        let cases = [
            // infer_relevance, merge, train_kpi, expected line, expected result
            (500, MergeBehavior::Produced, 500, "", false),
            (
                200,
                MergeBehavior::Produced,
                500,
                "text_3434 was generated without error.",
                false,
            ),
            (
                200,
                MergeBehavior::Nothing,
                200,
                "text_3434 was not generated without error.",
                true,
            ),
            (
                200,
                MergeBehavior::Fails,
                500,
                "Error while generating text_3434.",
                false,
            ),
            (
                200,
                MergeBehavior::Fails,
                200,
                "Error while generating text_3434.",
                true,
            ),
        ];

        for (infer_relevance, behavior, train_kpi, expected_line, expected_result) in cases {
            let mut h = Harness::new().await;
            h.settings.train_kpi.train = true;
            let mocks = h
                .serve(Statuses {
                    infer_relevance,
                    train_kpi,
                    ..Default::default()
                })
                .await;
            let merger = FakeMerger::new(behavior);
            let (mut router, mut rx) = h.router(&merger);

            assert_eq!(router.run().await.unwrap(), expected_result);
            let output = console(&mut rx);
            assert!(output.contains(expected_line), "missing {expected_line:?} in {output}");
            assert!(mocks.infer_relevance.matched_async().await);
            assert!(mocks.train_kpi.matched_async().await);
            assert_eq!(merger.calls.get(), 1);
        }
    }

    #[tokio::test]
    async fn merge_error_is_recorded_but_not_counted() {
        let mut h = Harness::new().await;
        h.settings.train_kpi.train = true;
        let _mocks = h.serve(Statuses::default()).await;
        let merger = FakeMerger::new(MergeBehavior::Fails);
        let (mut router, mut rx) = h.router(&merger);

        assert!(router.run().await.unwrap());
        assert!(console(&mut rx).contains("relevance folder missing"));

        let report = router.report();
        assert!(report.success);
        assert!(report.stages.iter().any(|r| matches!(
            &r.outcome,
            StageOutcome::MergeError { detail } if detail.contains("relevance folder missing")
        )));
    }

    #[tokio::test]
    async fn kpi_training_disabled_skips_its_endpoints() {
        let mut h = Harness::new().await;
        let mocks = h
            .serve(Statuses {
                infer_relevance: 500,
                train_kpi: 500,
                ..Default::default()
            })
            .await;
        let merger = FakeMerger::new(MergeBehavior::Fails);
        let (mut router, mut rx) = h.router(&merger);

        assert!(router.run().await.unwrap());
        assert!(console(&mut rx).contains(
            "No kpi training done. If you want to have a kpi training please set variable \
             train under train_kpi to true."
        ));
        assert!(!mocks.infer_relevance.matched_async().await);
        assert!(!mocks.train_kpi.matched_async().await);
        assert_eq!(merger.calls.get(), 0);
    }

    #[tokio::test]
    async fn report_lists_stages_in_order() {
        let mut h = Harness::new().await;
        h.settings.train_relevance.train = true;
        h.settings.train_kpi.train = true;
        let _mocks = h.serve(Statuses::default()).await;
        let merger = FakeMerger::new(MergeBehavior::Produced);
        let (mut router, _rx) = h.router(&merger);

        assert!(router.run().await.unwrap());
        let report = router.report();
        let stages: Vec<Stage> = report.stages.iter().map(|r| r.stage).collect();
        assert_eq!(
            stages,
            vec![
                Stage::Liveness(Service::Extraction),
                Stage::Dispatch(Node::Extract),
                Stage::Dispatch(Node::Curate),
                Stage::Liveness(Service::Inference),
                Stage::Dispatch(Node::TrainRelevance),
                Stage::Dispatch(Node::InferRelevance),
                Stage::MergeText,
                Stage::Dispatch(Node::TrainKpi),
            ]
        );
        assert_eq!(report.project_name, "TEST");
        assert_eq!(report.extraction_address, router.extraction_address());
    }

    #[tokio::test]
    async fn unreachable_service_is_fatal() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut h = Harness::new().await;
        h.settings.general.ext_ip = "127.0.0.1".into();
        h.settings.general.ext_port = port;
        let merger = FakeMerger::new(MergeBehavior::Produced);
        let (mut router, _rx) = h.router(&merger);

        let err = router.run().await.unwrap_err();
        assert!(matches!(err, RouterError::Transport { ref url, .. } if url.ends_with("/liveness")));
    }
}
