//! Pipeline error model.

use blockline_types::ConnectorError;

use crate::state::Stage;

/// First recorded failure of one stage.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub message: String,
}

/// Why a pipeline run did not succeed.
///
/// `Config` is raised before any worker starts. `StageFailed` is the
/// aggregate verdict of a run in which one or more stages failed.
/// `Infrastructure` wraps host-side failures: panicked workers, a poisoned
/// state lock, a runtime that could not be built.
#[derive(Debug)]
pub enum PipelineError {
    /// Configuration rejected before any worker was spawned.
    Config(ConnectorError),
    /// One or more stages failed; each entry is that stage's first error.
    StageFailed { failures: Vec<StageFailure> },
    /// Host-side failure outside any connector.
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "{e}"),
            Self::StageFailed { failures } => {
                write!(f, "pipeline failed: ")?;
                for (i, failure) in failures.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{} stage: {}", failure.stage, failure.message)?;
                }
                Ok(())
            }
            Self::Infrastructure(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::StageFailed { .. } | Self::Infrastructure(_) => None,
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl PipelineError {
    /// Message recorded for `stage`, if that stage failed.
    #[must_use]
    pub fn stage_message(&self, stage: Stage) -> Option<&str> {
        match self {
            Self::StageFailed { failures } => failures
                .iter()
                .find(|f| f.stage == stage)
                .map(|f| f.message.as_str()),
            Self::Config(_) | Self::Infrastructure(_) => None,
        }
    }

    /// Stages named in a `StageFailed` verdict, in pipeline order.
    #[must_use]
    pub fn failed_stages(&self) -> Vec<Stage> {
        match self {
            Self::StageFailed { failures } => failures.iter().map(|f| f.stage).collect(),
            Self::Config(_) | Self::Infrastructure(_) => Vec::new(),
        }
    }

    #[must_use]
    pub fn as_config_error(&self) -> Option<&ConnectorError> {
        match self {
            Self::Config(e) => Some(e),
            Self::StageFailed { .. } | Self::Infrastructure(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_failed_names_every_stage() {
        let err = PipelineError::StageFailed {
            failures: vec![
                StageFailure {
                    stage: Stage::Extract,
                    message: "extract error: page 2 timed out".into(),
                },
                StageFailure {
                    stage: Stage::Load,
                    message: "load error: bucket gone".into(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "pipeline failed: extract stage: extract error: page 2 timed out; load stage: load error: bucket gone"
        );
        assert_eq!(err.failed_stages(), vec![Stage::Extract, Stage::Load]);
        assert_eq!(err.stage_message(Stage::Load), Some("load error: bucket gone"));
        assert!(err.stage_message(Stage::Transform).is_none());
    }

    #[test]
    fn config_error_keeps_connector_error() {
        let err = PipelineError::Config(ConnectorError::unsupported("loader", "kafka"));
        assert_eq!(err.to_string(), "unsupported loader type 'kafka'");
        assert!(err.as_config_error().is_some_and(ConnectorError::is_config));
    }

    #[test]
    fn anyhow_converts_to_infrastructure() {
        let err: PipelineError = anyhow::anyhow!("runtime build failed").into();
        assert!(matches!(err, PipelineError::Infrastructure(_)));
        assert!(err.failed_stages().is_empty());
    }
}
