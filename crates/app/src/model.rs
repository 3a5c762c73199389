//! Linear models loaded from JSON, served by `serveit serve`.

use std::{fs, path::Path};

use anyhow::{Context, Result, bail, ensure};
use ndarray::{Array1, Array2, ArrayView1, Axis, Ix2};
use serde::Deserialize;
use serde_json::json;
use serveit_core::{ArrayError, CallbackError, Model, NdArray, Payload};

/// On-disk layout, before validation.
#[derive(Debug, Deserialize)]
struct ModelFile {
    #[serde(default)]
    name: Option<String>,
    coefficients: Vec<Vec<f64>>,
    intercept: Vec<f64>,
    #[serde(default)]
    classes: Option<Vec<i64>>,
    #[serde(default)]
    feature_names: Option<Vec<String>>,
    #[serde(default)]
    target_names: Option<Vec<String>>,
}

/// `scores = X · Wᵀ + b`, optionally followed by an arg-max over classes.
#[derive(Clone, Debug)]
pub struct LinearModel {
    name: String,
    weights: Array2<f64>,
    intercept: Array1<f64>,
    classes: Option<Vec<i64>>,
    feature_names: Option<Vec<String>>,
    target_names: Option<Vec<String>>,
}

impl LinearModel {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read model file {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("invalid model file {}", path.display()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: ModelFile = serde_json::from_str(raw).context("model file is not valid JSON")?;
        Self::try_from(file)
    }

    pub fn feature_count(&self) -> usize {
        self.weights.ncols()
    }

    pub fn feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    pub fn target_names(&self) -> Option<&[String]> {
        self.target_names.as_deref()
    }

    pub fn is_classifier(&self) -> bool {
        self.classes.is_some()
    }

    /// Predict one value per row of a two-dimensional numeric array.
    pub fn predict(&self, input: Payload) -> Result<Payload, CallbackError> {
        let array = input.as_array().ok_or(CallbackError::UnexpectedPayload {
            expected: "array",
            found: input.kind(),
        })?;
        let x = array
            .to_f64()?
            .into_dimensionality::<Ix2>()
            .map_err(ArrayError::from)?;
        if x.ncols() != self.feature_count() {
            return Err(CallbackError::custom(
                "ValueError",
                format!(
                    "X has {} features, but {} is expecting {} features as input",
                    x.ncols(),
                    self.name,
                    self.feature_count()
                ),
            ));
        }

        let scores = x.dot(&self.weights.t()) + &self.intercept;
        let prediction = match &self.classes {
            Some(classes) if scores.ncols() == 1 => {
                // Single decision function: positive scores pick the second class.
                let labels = scores
                    .column(0)
                    .mapv(|score| if score > 0.0 { classes[1] } else { classes[0] });
                NdArray::Int(labels.into_dyn())
            }
            Some(classes) => {
                let labels: Array1<i64> = scores
                    .axis_iter(Axis(0))
                    .map(|row| classes[argmax(row)])
                    .collect();
                NdArray::Int(labels.into_dyn())
            }
            None if scores.ncols() == 1 => NdArray::Float(scores.column(0).to_owned().into_dyn()),
            None => NdArray::Float(scores.into_dyn()),
        };
        Ok(Payload::Array(prediction))
    }
}

impl TryFrom<ModelFile> for LinearModel {
    type Error = anyhow::Error;

    fn try_from(file: ModelFile) -> Result<Self> {
        let outputs = file.coefficients.len();
        ensure!(outputs > 0, "coefficients must have at least one row");
        let features = file.coefficients[0].len();
        ensure!(features > 0, "coefficients must have at least one column");
        if let Some(row) = file.coefficients.iter().position(|row| row.len() != features) {
            bail!(
                "coefficient row {row} has {} values, expected {features}",
                file.coefficients[row].len()
            );
        }
        ensure!(
            file.intercept.len() == outputs,
            "intercept has {} values but there are {outputs} coefficient rows",
            file.intercept.len()
        );

        if let Some(classes) = &file.classes {
            let expected = if outputs == 1 { 2 } else { outputs };
            ensure!(
                classes.len() == expected,
                "expected {expected} classes for {outputs} coefficient rows, found {}",
                classes.len()
            );
        }
        if let Some(names) = &file.feature_names {
            ensure!(
                names.len() == features,
                "{} feature names given for {features} features",
                names.len()
            );
        }
        if let Some(names) = &file.target_names {
            let targets = file.classes.as_ref().map_or(outputs, Vec::len);
            ensure!(
                names.len() == targets,
                "{} target names given for {targets} targets",
                names.len()
            );
        }

        let flat: Vec<f64> = file.coefficients.into_iter().flatten().collect();
        let weights = Array2::from_shape_vec((outputs, features), flat)
            .context("coefficients do not form a matrix")?;
        let kind = if file.classes.is_some() {
            "LinearClassifier"
        } else {
            "LinearRegression"
        };

        Ok(Self {
            name: file.name.unwrap_or_else(|| kind.to_owned()),
            weights,
            intercept: Array1::from(file.intercept),
            classes: file.classes,
            feature_names: file.feature_names,
            target_names: file.target_names,
        })
    }
}

impl Model for LinearModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn attributes(&self) -> Vec<(String, Payload)> {
        let mut attributes = vec![
            ("coef_".to_owned(), Payload::from(self.weights.clone().into_dyn())),
            (
                "intercept_".to_owned(),
                Payload::from(self.intercept.clone().into_dyn()),
            ),
            (
                "n_features_in_".to_owned(),
                Payload::from(json!(self.feature_count())),
            ),
        ];
        if let Some(classes) = &self.classes {
            attributes.push((
                "classes_".to_owned(),
                Payload::from(Array1::from(classes.clone()).into_dyn()),
            ));
        }
        if let Some(names) = &self.feature_names {
            attributes.push(("feature_names_in_".to_owned(), Payload::from(json!(names))));
        }
        attributes
    }
}

fn argmax(row: ArrayView1<'_, f64>) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (index, &score)| {
            if score > best.1 { (index, score) } else { best }
        })
        .0
}
