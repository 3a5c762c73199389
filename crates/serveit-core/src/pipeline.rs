//! Request pipeline: load, preprocess, validate, predict, postprocess.
//!
//! Stages run strictly in order on the calling thread and the first failure
//! ends the run. Collaborators are captured once at construction and only
//! ever borrowed afterwards, so one `Pipeline` can serve any number of
//! concurrent requests.

use std::{fmt, sync::Arc, time::Instant};

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::{
    callback::{CallbackError, DataLoader, Predict, RequestContext, Transform, Validator, Verdict},
    error::{PipelineError, Stage},
    loaders::JsonArrayLoader,
    payload::Payload,
    serializer::into_json,
    validators::AcceptAll,
};

/// Reason rendered when a validator rejects input without saying why.
const UNSPECIFIED_REASON: &str = "unspecified";

/// Immutable description of how one prediction request is processed.
#[derive(Clone)]
pub struct Pipeline {
    loader: Arc<dyn DataLoader>,
    preprocessors: Vec<Arc<dyn Transform>>,
    to_array: bool,
    validator: Arc<dyn Validator>,
    predict: Arc<dyn Predict>,
    postprocessors: Vec<Arc<dyn Transform>>,
}

impl Pipeline {
    /// Pipeline with the default collaborators: JSON array loader, no
    /// preprocessing, array coercion on, accept-all validator and plain
    /// serialization of the prediction.
    pub fn new(predict: impl Predict + 'static) -> Self {
        Self {
            loader: Arc::new(JsonArrayLoader),
            preprocessors: Vec::new(),
            to_array: true,
            validator: Arc::new(AcceptAll),
            predict: Arc::new(predict),
            postprocessors: Vec::new(),
        }
    }

    /// Replace the data loader.
    pub fn with_loader(mut self, loader: impl DataLoader + 'static) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    /// Append a preprocessing step. Steps run in the order they were added.
    pub fn with_preprocessor(mut self, step: impl Transform + 'static) -> Self {
        self.preprocessors.push(Arc::new(step));
        self
    }

    /// Toggle coercion of the preprocessed payload into an array.
    pub fn with_to_array(mut self, enabled: bool) -> Self {
        self.to_array = enabled;
        self
    }

    /// Replace the input validator.
    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    /// Append a postprocessing step, applied before serialization.
    pub fn with_postprocessor(mut self, step: impl Transform + 'static) -> Self {
        self.postprocessors.push(Arc::new(step));
        self
    }

    /// Drive one request through every stage.
    pub fn run(&self, request: &RequestContext) -> Result<Value, PipelineError> {
        let outcome = self.run_stages(request);
        let label = match &outcome {
            Ok(_) => "ok",
            Err(err) => {
                log_failure(err);
                err.category()
            }
        };
        metrics::counter!("serveit_predictions_total", "outcome" => label).increment(1);
        outcome
    }

    fn run_stages(&self, request: &RequestContext) -> Result<Value, PipelineError> {
        let loaded = timed(Stage::Load, || self.loader.load(request))
            .map_err(PipelineError::DataAcquisition)?;

        let prepared = timed(Stage::Preprocess, || self.preprocess(loaded)).map_err(|source| {
            PipelineError::Unhandled {
                stage: Stage::Preprocess,
                source,
            }
        })?;

        let verdict = timed(Stage::Validate, || self.validator.validate(&prepared)).map_err(
            |source| PipelineError::Unhandled {
                stage: Stage::Validate,
                source,
            },
        )?;
        if let Verdict::Reject(reason) = verdict {
            debug!(data = ?prepared, "rejected input");
            let reason = reason.unwrap_or_else(|| UNSPECIFIED_REASON.to_owned());
            return Err(PipelineError::Validation(reason));
        }

        // The callable consumes its input, so keep a rendering for the failure log.
        let diagnostic =
            tracing::enabled!(tracing::Level::DEBUG).then(|| format!("{prepared:?}"));
        let prediction = timed(Stage::Predict, || self.predict.predict(prepared)).map_err(|err| {
            if let Some(data) = &diagnostic {
                debug!(data = %data, "prediction input");
            }
            PipelineError::Prediction(err)
        })?;

        timed(Stage::Postprocess, || self.postprocess(prediction)).map_err(|source| {
            PipelineError::Unhandled {
                stage: Stage::Postprocess,
                source,
            }
        })
    }

    fn preprocess(&self, loaded: Payload) -> Result<Payload, CallbackError> {
        let mut payload = loaded;
        for step in &self.preprocessors {
            payload = step.apply(payload)?;
        }
        if self.to_array {
            payload = payload.into_array()?;
        }
        Ok(payload)
    }

    fn postprocess(&self, prediction: Payload) -> Result<Value, CallbackError> {
        let mut payload = prediction;
        for step in &self.postprocessors {
            payload = step.apply(payload)?;
        }
        Ok(into_json(payload))
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("preprocessors", &self.preprocessors.len())
            .field("to_array", &self.to_array)
            .field("postprocessors", &self.postprocessors.len())
            .finish_non_exhaustive()
    }
}

/// Run `f` inside a span for `stage` and record its latency.
fn timed<T>(stage: Stage, f: impl FnOnce() -> T) -> T {
    let _span = tracing::debug_span!("pipeline.stage", stage = stage.label()).entered();
    let start = Instant::now();
    let out = f();
    metrics::histogram!("serveit_stage_latency_seconds", "stage" => stage.label())
        .record(start.elapsed().as_secs_f64());
    out
}

fn log_failure(err: &PipelineError) {
    match err {
        PipelineError::DataAcquisition(source) | PipelineError::Prediction(source) => {
            error!("{err}: {} exception: {source}", source.kind());
        }
        PipelineError::Validation(_) => warn!("{err}"),
        PipelineError::Unhandled { stage, source } => {
            error!("Unhandled {} exception in {stage} stage: {source}", source.kind());
        }
    }
}
