mod cli;
mod model;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use serveit_core::{Model, Payload, into_json, validators::FeatureCount};
use serveit_http::{ModelServer, ServerConfig, init_metrics_recorder, init_tracing};
use tracing::info;

use crate::{
    cli::{Cli, Command, ServeArgs},
    model::LinearModel,
};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    match Cli::parse().command {
        Command::Serve(args) => serve(args),
        Command::Inspect { model } => inspect(&model),
    }
}

fn serve(args: ServeArgs) -> Result<()> {
    let config = ServerConfig::try_from(args.server)?;
    let _telemetry = init_tracing(&config.telemetry)?;

    let model = Arc::new(LinearModel::from_path(&args.model)?);
    info!(
        model = model.name(),
        features = model.feature_count(),
        classifier = model.is_classifier(),
        path = %args.model.display(),
        "model loaded"
    );

    let predictor = model.clone();
    let mut builder = ModelServer::builder(model.clone(), move |input: Payload| {
        predictor.predict(input)
    })
    .validator(FeatureCount::new(model.feature_count()))
    .model_info(!args.no_model_info);
    if config.telemetry.enable_metrics {
        builder = builder.metrics(init_metrics_recorder().clone());
    }
    let server = builder.build().context("failed to register model info")?;

    if let Some(names) = model.feature_names() {
        server.create_info_endpoint("features", json!(names))?;
    }
    if let Some(names) = model.target_names() {
        server.create_info_endpoint("target_labels", json!(names))?;
    }

    server.serve(&config)
}

fn inspect(path: &Path) -> Result<()> {
    let model = LinearModel::from_path(path)?;
    let attributes = into_json(Payload::Map(model.attributes()));
    println!("{}", serde_json::to_string_pretty(&attributes)?);
    Ok(())
}
