//! Text summary builder for CLI output.

use crate::model::RunReport;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub(crate) lines: Vec<String>,
}

/// Build a text summary from a finished run.
pub(crate) fn build_text_summary(report: &RunReport) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!("Project: {}", report.project_name));
    lines.push(format!(
        "Services: extraction {} / inference {}",
        report.extraction_address, report.inference_address
    ));

    let width = report
        .stages
        .iter()
        .map(|r| r.stage.describe().len())
        .max()
        .unwrap_or(0);
    for record in &report.stages {
        lines.push(format!(
            "  {:<width$}  {}",
            record.stage.describe(),
            record.outcome.describe()
        ));
    }

    let failed = report
        .stages
        .iter()
        .filter(|r| r.outcome.is_failure())
        .count();
    if report.success {
        lines.push("Result: success".to_string());
    } else {
        lines.push(format!("Result: failed ({failed} stage(s) did not answer 200)"));
    }

    TextSummary { lines }
}
