//! Export of completed analyses into downloadable artifact descriptors.
//!
//! Rendering concrete PDF/JSON bytes is the delivery layer's job; this
//! module validates the request, assembles the JSON payload, and issues
//! the descriptor with its expiry.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::analysis::AnalysisRun;
use crate::{EngineError, Result};

/// Artifact descriptors expire this many hours after creation.
pub const EXPORT_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Pdf,
    Json,
}

impl ExportFormat {
    /// Parse a caller-supplied format string, case-insensitively.
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "pdf" => Ok(ExportFormat::Pdf),
            "json" => Ok(ExportFormat::Json),
            other => Err(EngineError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Json => "json",
        }
    }
}

/// What to include in the exported artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportOptions {
    pub format: String,
    pub include_moments: bool,
    pub include_pm_insights: bool,
    pub include_charts: bool,
    pub include_transcript: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: "pdf".to_string(),
            include_moments: true,
            include_pm_insights: true,
            include_charts: false,
            include_transcript: false,
        }
    }
}

/// Descriptor handed back to the caller for download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportArtifact {
    pub export_id: Uuid,
    pub download_url: String,
    pub expires_at: DateTime<Utc>,
    pub format: ExportFormat,
    /// The body the delivery layer renders into the requested format
    pub payload: serde_json::Value,
}

/// Packages completed runs into artifact descriptors.
pub struct Exporter;

impl Exporter {
    pub fn export(run: &AnalysisRun, options: &ExportOptions) -> Result<ExportArtifact> {
        let format = ExportFormat::parse(&options.format)?;
        let export_id = Uuid::new_v4();
        Ok(ExportArtifact {
            export_id,
            download_url: format!("/api/v1/exports/{export_id}/download"),
            expires_at: Utc::now() + Duration::hours(EXPORT_TTL_HOURS),
            format,
            payload: Self::render_payload(run, options),
        })
    }

    /// The JSON body a renderer would serialize for this artifact.
    fn render_payload(run: &AnalysisRun, options: &ExportOptions) -> serde_json::Value {
        let mut payload = json!({
            "analysis_id": run.id,
            "meeting_id": run.meeting_id,
            "status": run.status,
            "config": run.config,
            "started_at": run.started_at,
            "completed_at": run.completed_at,
        });
        if let Some(results) = &run.results {
            payload["cost_reduction"] = json!(results.cost_reduction);
            payload["quality_score"] = json!(results.quality_score);
            if options.include_moments {
                payload["selected_moments"] = json!(results.selected_moments);
            }
            if options.include_pm_insights {
                payload["pm_insights"] = json!(results.pm_analysis);
            }
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigRegistry;

    fn some_run() -> AnalysisRun {
        let config = ConfigRegistry::resolve("BALANCED", None).unwrap();
        AnalysisRun::new("meeting-1".to_string(), "user-1".to_string(), config)
    }

    #[test]
    fn test_export_descriptor_expires_in_the_future() {
        let before = Utc::now();
        let artifact = Exporter::export(&some_run(), &ExportOptions::default()).unwrap();
        assert!(artifact.expires_at > before);
        assert!(artifact.expires_at <= before + Duration::hours(EXPORT_TTL_HOURS) + Duration::minutes(1));
        assert!(artifact
            .download_url
            .contains(&artifact.export_id.to_string()));
    }

    #[test]
    fn test_unsupported_format_is_rejected() {
        let options = ExportOptions {
            format: "docx".to_string(),
            ..Default::default()
        };
        let err = Exporter::export(&some_run(), &options).unwrap_err();
        match err {
            EngineError::UnsupportedFormat(format) => assert_eq!(format, "docx"),
            other => panic!("expected UnsupportedFormat, got {other:?}"),
        }
    }

    #[test]
    fn test_format_parsing_is_case_insensitive() {
        assert_eq!(ExportFormat::parse("PDF").unwrap(), ExportFormat::Pdf);
        assert_eq!(ExportFormat::parse("Json").unwrap(), ExportFormat::Json);
    }

    #[test]
    fn test_payload_respects_include_flags() {
        let mut run = some_run();
        run.status = crate::protocol::AnalysisStatus::Completed;
        run.results = Some(crate::analysis::AnalysisResults {
            cost_reduction: 0.75,
            quality_score: 0.9,
            analyzed_duration: 450.0,
            original_duration: 1800.0,
            selected_moments: Vec::new(),
            pm_analysis: crate::insights::InsightDeriver::default().derive(&[]),
        });

        let with_insights = Exporter::export(&run, &ExportOptions::default())
            .unwrap()
            .payload;
        assert!(with_insights.get("pm_insights").is_some());

        let options = ExportOptions {
            include_pm_insights: false,
            include_moments: false,
            ..Default::default()
        };
        let stripped = Exporter::export(&run, &options).unwrap().payload;
        assert!(stripped.get("pm_insights").is_none());
        assert!(stripped.get("selected_moments").is_none());
        assert!(stripped.get("quality_score").is_some());
    }
}
