//! Collaborator interfaces captured when a pipeline is built.
//!
//! Every interface has a blanket implementation for plain closures so callers
//! can pass `|input: Payload| ...` wherever a collaborator is expected.

use serde_json::Value;
use thiserror::Error;

use crate::payload::{ArrayError, Payload};

/// Error returned by loaders, transforms, validators and prediction callables.
///
/// [`CallbackError::kind`] is reported to HTTP clients as `exception_type`.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("missing content type; expected application/json")]
    MissingContentType,
    #[error("unsupported content type `{0}`; expected application/json")]
    UnsupportedContentType(String),
    #[error("missing query parameter `{0}`")]
    MissingParameter(String),
    #[error("missing field `{0}` in request body")]
    MissingField(String),
    #[error("expected a {expected} payload, found {found}")]
    UnexpectedPayload {
        expected: &'static str,
        found: &'static str,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Array(#[from] ArrayError),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Fetch(#[from] reqwest::Error),
    #[error("{message}")]
    Custom { kind: String, message: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CallbackError {
    /// Error with a caller chosen kind, e.g. `ValueError`.
    pub fn custom(kind: impl Into<String>, message: impl Into<String>) -> Self {
        CallbackError::Custom {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            CallbackError::MissingContentType => "MissingContentType",
            CallbackError::UnsupportedContentType(_) => "UnsupportedContentType",
            CallbackError::MissingParameter(_) => "MissingParameter",
            CallbackError::MissingField(_) => "MissingField",
            CallbackError::UnexpectedPayload { .. } => "UnexpectedPayload",
            CallbackError::Json(_) => "JsonError",
            CallbackError::Array(ArrayError::Shape(_)) => "ShapeError",
            CallbackError::Array(_) => "ArrayError",
            CallbackError::Image(_) => "ImageError",
            CallbackError::Fetch(_) => "FetchError",
            CallbackError::Custom { kind, .. } => kind,
            CallbackError::Other(_) => "Error",
        }
    }
}

/// The parts of an HTTP request a [`DataLoader`] may read.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub content_type: Option<String>,
    pub query: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RequestContext {
    /// A `POST /predictions` request carrying `value` as a JSON body.
    pub fn with_json(value: &Value) -> Self {
        Self {
            method: "POST".into(),
            path: "/predictions".into(),
            content_type: Some("application/json".into()),
            query: Vec::new(),
            body: value.to_string().into_bytes(),
        }
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// True for `application/json` and `application/*+json` media types.
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|content_type| {
                let mime = content_type
                    .split(';')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_ascii_lowercase();
                mime == "application/json"
                    || (mime.starts_with("application/") && mime.ends_with("+json"))
            })
            .unwrap_or(false)
    }

    /// Parse the body as JSON, insisting on a JSON content type.
    pub fn json(&self) -> Result<Value, CallbackError> {
        match self.content_type.as_deref() {
            None => Err(CallbackError::MissingContentType),
            Some(_) if self.is_json() => Ok(serde_json::from_slice(&self.body)?),
            Some(other) => Err(CallbackError::UnsupportedContentType(other.to_owned())),
        }
    }
}

/// Produces the raw input payload for one request.
pub trait DataLoader: Send + Sync {
    fn load(&self, request: &RequestContext) -> Result<Payload, CallbackError>;
}

impl<F> DataLoader for F
where
    F: Fn(&RequestContext) -> Result<Payload, CallbackError> + Send + Sync,
{
    fn load(&self, request: &RequestContext) -> Result<Payload, CallbackError> {
        self(request)
    }
}

/// Single-argument step of a preprocessor or postprocessor chain.
pub trait Transform: Send + Sync {
    fn apply(&self, input: Payload) -> Result<Payload, CallbackError>;
}

impl<F> Transform for F
where
    F: Fn(Payload) -> Result<Payload, CallbackError> + Send + Sync,
{
    fn apply(&self, input: Payload) -> Result<Payload, CallbackError> {
        self(input)
    }
}

/// Outcome of input validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Reject(Option<String>),
}

impl Verdict {
    pub fn reject(reason: impl Into<String>) -> Self {
        Verdict::Reject(Some(reason.into()))
    }
}

/// Predicate-with-reason run on the preprocessed input.
pub trait Validator: Send + Sync {
    fn validate(&self, input: &Payload) -> Result<Verdict, CallbackError>;
}

impl<F> Validator for F
where
    F: Fn(&Payload) -> Result<Verdict, CallbackError> + Send + Sync,
{
    fn validate(&self, input: &Payload) -> Result<Verdict, CallbackError> {
        self(input)
    }
}

/// The prediction callable: data batch in, prediction batch out.
pub trait Predict: Send + Sync {
    fn predict(&self, input: Payload) -> Result<Payload, CallbackError>;
}

impl<F> Predict for F
where
    F: Fn(Payload) -> Result<Payload, CallbackError> + Send + Sync,
{
    fn predict(&self, input: Payload) -> Result<Payload, CallbackError> {
        self(input)
    }
}

/// A fitted model. Only its exported attributes are ever inspected.
pub trait Model: Send + Sync {
    /// Display name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Diagnostic key/value pairs served under `/info/model`.
    fn attributes(&self) -> Vec<(String, Payload)>;
}
