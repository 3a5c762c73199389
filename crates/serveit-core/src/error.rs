//! Pipeline failures and their wire representation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::callback::CallbackError;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// Stages a request passes through, in execution order.
pub enum Stage {
    Load,
    Preprocess,
    Validate,
    Predict,
    Postprocess,
}

impl Stage {
    /// Label used in spans, metrics and log lines.
    pub fn label(self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Preprocess => "preprocess",
            Stage::Validate => "validate",
            Stage::Predict => "predict",
            Stage::Postprocess => "postprocess",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a pipeline run stopped before producing a response body.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Unable to fetch data")]
    DataAcquisition(#[source] CallbackError),
    #[error("Input validation failed with reason: {0}")]
    Validation(String),
    #[error("Unable to make prediction")]
    Prediction(#[source] CallbackError),
    /// Fault in a step whose failures are not mapped to a client-facing
    /// category: preprocessors, validators and postprocessors.
    #[error("unhandled fault in {stage} stage")]
    Unhandled {
        stage: Stage,
        #[source]
        source: CallbackError,
    },
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::DataAcquisition(_) => Stage::Load,
            PipelineError::Validation(_) => Stage::Validate,
            PipelineError::Prediction(_) => Stage::Predict,
            PipelineError::Unhandled { stage, .. } => *stage,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::DataAcquisition(_) => "data acquisition",
            PipelineError::Validation(_) => "validation",
            PipelineError::Prediction(_) => "prediction",
            PipelineError::Unhandled { .. } => "unhandled",
        }
    }

    /// HTTP status code for this failure.
    pub fn status(&self) -> u16 {
        match self {
            PipelineError::DataAcquisition(_) | PipelineError::Validation(_) => 400,
            PipelineError::Prediction(_) | PipelineError::Unhandled { .. } => 500,
        }
    }

    /// Body returned to the client. Unhandled faults expose no details.
    pub fn to_body(&self) -> ErrorBody {
        match self {
            PipelineError::DataAcquisition(source) | PipelineError::Prediction(source) => {
                ErrorBody::new(self.to_string()).with_details(source)
            }
            PipelineError::Validation(_) => ErrorBody::new(self.to_string()),
            PipelineError::Unhandled { .. } => ErrorBody::internal(),
        }
    }
}

/// JSON error body: `{"message": ..., "details": {...}}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub exception_type: String,
    pub exception_message: String,
}

impl From<&CallbackError> for ErrorDetails {
    fn from(err: &CallbackError) -> Self {
        Self {
            exception_type: err.kind().to_owned(),
            exception_message: err.to_string(),
        }
    }
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, err: &CallbackError) -> Self {
        self.details = Some(ErrorDetails::from(err));
        self
    }

    pub fn internal() -> Self {
        Self::new("Internal Server Error")
    }

    pub fn not_found(path: &str) -> Self {
        Self::new(format!(
            "The requested URL {path} was not found on the server. \
If you entered the URL manually please check your spelling and try again."
        ))
    }

    pub fn method_not_allowed(method: &str, path: &str) -> Self {
        Self::new(format!(
            "The method {method} is not allowed for the requested URL {path}."
        ))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn load_failures_are_bad_requests_with_details() {
        let err = PipelineError::DataAcquisition(CallbackError::MissingContentType);
        assert_eq!(err.status(), 400);
        assert_eq!(err.stage(), Stage::Load);
        let body = serde_json::to_value(err.to_body()).unwrap();
        assert_eq!(body["message"], "Unable to fetch data");
        assert_eq!(body["details"]["exception_type"], "MissingContentType");
    }

    #[test]
    fn validation_failures_embed_the_reason() {
        let err = PipelineError::Validation("4 features required, 3 features provided".into());
        assert_eq!(err.status(), 400);
        assert_eq!(
            serde_json::to_value(err.to_body()).unwrap(),
            json!({"message": "Input validation failed with reason: 4 features required, 3 features provided"})
        );
    }

    #[test]
    fn prediction_failures_are_server_errors() {
        let err = PipelineError::Prediction(CallbackError::custom("ValueError", "bad input"));
        assert_eq!(err.status(), 500);
        assert_eq!(
            serde_json::to_value(err.to_body()).unwrap(),
            json!({
                "message": "Unable to make prediction",
                "details": {"exception_type": "ValueError", "exception_message": "bad input"}
            })
        );
    }

    #[test]
    fn unhandled_faults_hide_their_details() {
        let err = PipelineError::Unhandled {
            stage: Stage::Preprocess,
            source: CallbackError::custom("KeyError", "secret"),
        };
        assert_eq!(err.status(), 500);
        assert_eq!(err.category(), "unhandled");
        assert_eq!(err.to_body(), ErrorBody::internal());
    }
}
