//! Stock input validators.

use crate::{
    callback::{CallbackError, Validator, Verdict},
    payload::Payload,
};

/// Default validator; every input passes.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn validate(&self, _input: &Payload) -> Result<Verdict, CallbackError> {
        Ok(Verdict::Pass)
    }
}

/// Requires a two-dimensional array with exactly `expected` columns.
#[derive(Clone, Copy, Debug)]
pub struct FeatureCount {
    expected: usize,
}

impl FeatureCount {
    pub fn new(expected: usize) -> Self {
        Self { expected }
    }
}

impl Validator for FeatureCount {
    fn validate(&self, input: &Payload) -> Result<Verdict, CallbackError> {
        let Some(array) = input.as_array() else {
            return Ok(Verdict::reject("Data should be a numeric array."));
        };
        if array.ndim() != 2 {
            return Ok(Verdict::reject("Data should have two dimensions."));
        }
        let provided = array.shape()[1];
        if provided != self.expected {
            return Ok(Verdict::reject(format!(
                "{} features required, {} features provided",
                self.expected, provided
            )));
        }
        Ok(Verdict::Pass)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::payload::NdArray;

    fn array(value: serde_json::Value) -> Payload {
        Payload::Array(NdArray::from_json(&value).unwrap())
    }

    #[test]
    fn matching_width_passes() {
        let verdict = FeatureCount::new(4)
            .validate(&array(json!([[5.1, 3.5, 1.4, 0.2]])))
            .unwrap();
        assert_eq!(verdict, Verdict::Pass);
    }

    #[test]
    fn wrong_width_names_both_counts() {
        let verdict = FeatureCount::new(4)
            .validate(&array(json!([[5.1, 3.5, 1.4]])))
            .unwrap();
        assert_eq!(
            verdict,
            Verdict::reject("4 features required, 3 features provided")
        );
    }

    #[test]
    fn one_dimensional_input_is_rejected() {
        let verdict = FeatureCount::new(3)
            .validate(&array(json!([1, 2, 3])))
            .unwrap();
        assert_eq!(verdict, Verdict::reject("Data should have two dimensions."));
    }

    #[test]
    fn non_arrays_are_rejected() {
        let verdict = FeatureCount::new(3)
            .validate(&Payload::bytes(vec![1]))
            .unwrap();
        assert!(matches!(verdict, Verdict::Reject(Some(_))));
    }
}
