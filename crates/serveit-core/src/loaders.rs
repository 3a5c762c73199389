//! Stock data loaders.

use std::time::Duration;

use reqwest::blocking::Client;
use tracing::debug;

use crate::{
    callback::{CallbackError, DataLoader, RequestContext},
    payload::{NdArray, Payload},
};

/// Default loader: the JSON body as a numeric array.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonArrayLoader;

impl DataLoader for JsonArrayLoader {
    fn load(&self, request: &RequestContext) -> Result<Payload, CallbackError> {
        let value = request.json()?;
        Ok(Payload::Array(NdArray::from_json(&value)?))
    }
}

/// Reads the array stored under one key of a JSON object body,
/// e.g. `{"data": [[...]]}`.
#[derive(Clone, Debug)]
pub struct JsonFieldLoader {
    field: String,
}

impl JsonFieldLoader {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl DataLoader for JsonFieldLoader {
    fn load(&self, request: &RequestContext) -> Result<Payload, CallbackError> {
        let value = request.json()?;
        let inner = value
            .get(&self.field)
            .ok_or_else(|| CallbackError::MissingField(self.field.clone()))?;
        Ok(Payload::Array(NdArray::from_json(inner)?))
    }
}

/// The request body as raw bytes, whatever its content type.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawBodyLoader;

impl DataLoader for RawBodyLoader {
    fn load(&self, request: &RequestContext) -> Result<Payload, CallbackError> {
        Ok(Payload::bytes(request.body.clone()))
    }
}

/// Fetches the resource named by a query parameter (`?url=...`) and returns
/// its bytes.
#[derive(Clone, Debug)]
pub struct UrlLoader {
    param: String,
    timeout: Duration,
}

impl UrlLoader {
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl DataLoader for UrlLoader {
    fn load(&self, request: &RequestContext) -> Result<Payload, CallbackError> {
        let url = request
            .query_param(&self.param)
            .ok_or_else(|| CallbackError::MissingParameter(self.param.clone()))?;

        // Built per call: a blocking client must not be created or dropped on
        // an async executor thread.
        let client = Client::builder().timeout(self.timeout).build()?;
        let response = client.get(url).send()?.error_for_status()?;
        let bytes = response.bytes()?;
        debug!("Fetched {} bytes from {url}", bytes.len());
        Ok(Payload::bytes(bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn json_array_loader_builds_a_matrix() {
        let payload = JsonArrayLoader
            .load(&RequestContext::with_json(&json!([[5.1, 3.5, 1.4, 0.2]])))
            .unwrap();
        assert_eq!(payload.as_array().map(NdArray::shape), Some(&[1, 4][..]));
    }

    #[test]
    fn json_array_loader_rejects_ragged_input() {
        let err = JsonArrayLoader
            .load(&RequestContext::with_json(&json!([[1, 2], [3]])))
            .unwrap_err();
        assert_eq!(err.kind(), "ArrayError");
    }

    #[test]
    fn field_loader_reads_the_named_key() {
        let loader = JsonFieldLoader::new("data");
        let payload = loader
            .load(&RequestContext::with_json(&json!({"data": [[1, 2], [3, 4]]})))
            .unwrap();
        assert_eq!(payload.as_array().map(NdArray::shape), Some(&[2, 2][..]));

        let err = loader
            .load(&RequestContext::with_json(&json!({"rows": []})))
            .unwrap_err();
        assert!(matches!(err, CallbackError::MissingField(field) if field == "data"));
    }

    #[test]
    fn raw_body_loader_ignores_content_type() {
        let request = RequestContext {
            content_type: Some("image/jpeg".into()),
            body: vec![0xff, 0xd8, 0xff],
            ..RequestContext::default()
        };
        let payload = RawBodyLoader.load(&request).unwrap();
        assert!(matches!(payload, Payload::Bytes(bytes) if bytes == [0xff, 0xd8, 0xff]));
    }

    #[test]
    fn url_loader_requires_its_parameter() {
        let err = UrlLoader::new("url")
            .load(&RequestContext::default())
            .unwrap_err();
        assert_eq!(err.kind(), "MissingParameter");
    }
}
