//! Core of the serveit prediction service.
//!
//! A request flows through a fixed sequence of stages:
//! - `load`: a [`DataLoader`] turns the HTTP request into a [`Payload`].
//! - `preprocess`: [`Transform`] steps run left to right, then the payload is
//!   optionally coerced into an [`NdArray`].
//! - `validate`: a [`Validator`] accepts or rejects the input with a reason.
//! - `predict`: the user supplied [`Predict`] callable runs once.
//! - `postprocess`: more [`Transform`] steps, then [`serialize`] produces JSON.
//!
//! Failures are reported as [`PipelineError`] values which carry their own
//! status code and wire body ([`ErrorBody`]). The HTTP framework lives in
//! `serveit-http`; nothing in this crate depends on it.

pub mod callback;
pub mod error;
pub mod loaders;
pub mod payload;
pub mod pipeline;
pub mod preprocess;
pub mod registry;
pub mod serializer;
pub mod validators;

pub use callback::{
    CallbackError, DataLoader, Model, Predict, RequestContext, Transform, Validator, Verdict,
};
pub use error::{ErrorBody, ErrorDetails, PipelineError, Stage};
pub use payload::{ArrayError, NdArray, Opaque, Payload};
pub use pipeline::Pipeline;
pub use registry::{InfoRegistry, MODEL_INFO_NAME, RegistryError};
pub use serializer::{into_json, serialize};
