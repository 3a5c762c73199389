//! Actix Web boundary exposing predictions and info snapshots.
//!
//! Handlers stay thin: they copy what the pipeline needs out of the request
//! and hand it to a blocking worker, so slow models or remote fetches never
//! stall the actix event loop.

use std::{fmt, sync::Arc};

use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer,
    http::{StatusCode, header},
    web,
};
use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use serveit_core::{
    DataLoader, ErrorBody, InfoRegistry, Model, Payload, Pipeline, Predict, RegistryError,
    RequestContext, Transform, Validator,
};
use tracing::{debug, error, info};

use crate::config::ServerConfig;

/// Shared state backing HTTP handlers.
struct ServerState {
    pipeline: Arc<Pipeline>,
    registry: Arc<InfoRegistry>,
    metrics: Option<PrometheusHandle>,
}

#[derive(Clone)]
/// A model wrapped in a prediction pipeline plus its info endpoints.
pub struct ModelServer {
    model: Arc<dyn Model>,
    pipeline: Arc<Pipeline>,
    registry: Arc<InfoRegistry>,
    metrics: Option<PrometheusHandle>,
}

/// Collects collaborators before the pipeline is frozen.
pub struct ModelServerBuilder {
    model: Arc<dyn Model>,
    pipeline: Pipeline,
    model_info: bool,
    metrics: Option<PrometheusHandle>,
}

impl ModelServerBuilder {
    pub fn loader(mut self, loader: impl DataLoader + 'static) -> Self {
        self.pipeline = self.pipeline.with_loader(loader);
        self
    }

    /// Append a preprocessing step.
    pub fn preprocessor(mut self, step: impl Transform + 'static) -> Self {
        self.pipeline = self.pipeline.with_preprocessor(step);
        self
    }

    pub fn to_array(mut self, enabled: bool) -> Self {
        self.pipeline = self.pipeline.with_to_array(enabled);
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.pipeline = self.pipeline.with_validator(validator);
        self
    }

    /// Append a postprocessing step.
    pub fn postprocessor(mut self, step: impl Transform + 'static) -> Self {
        self.pipeline = self.pipeline.with_postprocessor(step);
        self
    }

    /// Whether the model's attributes are served under `/info/model`.
    pub fn model_info(mut self, enabled: bool) -> Self {
        self.model_info = enabled;
        self
    }

    /// Serve this recorder's output at `/metrics`.
    pub fn metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn build(self) -> Result<ModelServer, RegistryError> {
        let registry = Arc::new(InfoRegistry::new());
        if self.model_info {
            let snapshot = registry.register_model(self.model.as_ref())?;
            info!(model = self.model.name(), "model info registered at /info/model");
            debug!(snapshot = %snapshot, "model info snapshot");
        }
        debug!(pipeline = ?self.pipeline, "prediction pipeline assembled");

        Ok(ModelServer {
            model: self.model,
            pipeline: Arc::new(self.pipeline),
            registry,
            metrics: self.metrics,
        })
    }
}

impl ModelServer {
    /// Start building a server for `model`, predicting with `predict`.
    pub fn builder(model: Arc<dyn Model>, predict: impl Predict + 'static) -> ModelServerBuilder {
        ModelServerBuilder {
            model,
            pipeline: Pipeline::new(predict),
            model_info: true,
            metrics: None,
        }
    }

    /// Serve `data`, serialized now, at `GET /info/{name}`.
    ///
    /// The registry is shared with every app built from this server, so
    /// endpoints registered after startup become visible immediately.
    pub fn create_info_endpoint(
        &self,
        name: impl Into<String>,
        data: impl Into<Payload>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let snapshot = self.registry.register(name.clone(), data)?;
        info!("info endpoint registered at /info/{name}");
        debug!(snapshot = %snapshot, "info snapshot for {name}");
        Ok(())
    }

    pub fn registry(&self) -> &InfoRegistry {
        &self.registry
    }

    pub fn model(&self) -> &dyn Model {
        self.model.as_ref()
    }

    /// Install the routes on an actix app.
    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        cfg.app_data(web::Data::new(ServerState {
            pipeline: self.pipeline.clone(),
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
        }))
        .service(
            web::resource("/predictions")
                .route(web::post().to(predictions_handler))
                .default_service(web::to(post_only)),
        )
        .service(
            web::resource("/info/{name}")
                .route(web::get().to(info_handler))
                .default_service(web::to(get_only)),
        );
        if self.metrics.is_some() {
            cfg.route("/metrics", web::get().to(metrics_handler));
        }
        cfg.default_service(web::to(not_found));
    }

    /// Bind and run until actix receives a shutdown signal.
    pub fn serve(self, config: &ServerConfig) -> Result<()> {
        let address = config.bind_address();
        let limit = config.max_body_bytes;
        info!(
            model = self.model.name(),
            %address,
            workers = config.workers,
            "starting prediction server"
        );
        for name in self.registry.names() {
            info!("serving /info/{name}");
        }

        actix_web::rt::System::new().block_on(async move {
            HttpServer::new(move || {
                let server = self.clone();
                App::new()
                    .app_data(web::PayloadConfig::new(limit))
                    .configure(move |cfg| server.configure(cfg))
            })
            .workers(config.workers)
            .bind((config.host.as_str(), config.port))
            .with_context(|| format!("failed to bind {address}"))?
            .run()
            .await
            .context("prediction server stopped with an error")
        })
    }
}

impl fmt::Debug for ModelServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<ModelServer: {}>", self.model.name())
    }
}

/// Run the pipeline for one `POST /predictions`.
async fn predictions_handler(
    req: HttpRequest,
    body: Result<web::Bytes, actix_web::Error>,
    state: web::Data<ServerState>,
) -> HttpResponse {
    let body = match body {
        Ok(body) => body,
        Err(err) => {
            let response = err.error_response();
            debug!(status = %response.status(), "rejected request body: {err}");
            return HttpResponse::build(response.status()).json(ErrorBody::new(err.to_string()));
        }
    };

    let context = RequestContext {
        method: req.method().to_string(),
        path: req.path().to_owned(),
        content_type: req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned),
        query: web::Query::<Vec<(String, String)>>::from_query(req.query_string())
            .map(web::Query::into_inner)
            .unwrap_or_default(),
        body: body.to_vec(),
    };

    let pipeline = state.pipeline.clone();
    match web::block(move || pipeline.run(&context)).await {
        Ok(Ok(prediction)) => HttpResponse::Ok().json(prediction),
        Ok(Err(err)) => {
            let status =
                StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            HttpResponse::build(status).json(err.to_body())
        }
        Err(err) => {
            error!("prediction worker failed: {err}");
            HttpResponse::InternalServerError().json(ErrorBody::internal())
        }
    }
}

/// Return the snapshot registered under `name`.
async fn info_handler(
    req: HttpRequest,
    name: web::Path<String>,
    state: web::Data<ServerState>,
) -> HttpResponse {
    match state.registry.lookup(&name) {
        Some(snapshot) => HttpResponse::Ok().json(snapshot.as_ref()),
        None => {
            debug!(path = req.path(), "no info registered under {name}");
            HttpResponse::NotFound().json(ErrorBody::not_found(req.path()))
        }
    }
}

/// Prometheus text exposition.
async fn metrics_handler(state: web::Data<ServerState>) -> HttpResponse {
    match state.metrics.as_ref() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound().finish(),
    }
}

async fn post_only(req: HttpRequest) -> HttpResponse {
    method_not_allowed(&req, "POST")
}

async fn get_only(req: HttpRequest) -> HttpResponse {
    method_not_allowed(&req, "GET")
}

fn method_not_allowed(req: &HttpRequest, allow: &'static str) -> HttpResponse {
    debug!(method = %req.method(), path = req.path(), allow, "method not allowed");
    HttpResponse::MethodNotAllowed()
        .insert_header((header::ALLOW, allow))
        .json(ErrorBody::method_not_allowed(req.method().as_str(), req.path()))
}

async fn not_found(req: HttpRequest) -> HttpResponse {
    debug!(method = %req.method(), path = req.path(), "no route matched");
    HttpResponse::NotFound().json(ErrorBody::not_found(req.path()))
}
