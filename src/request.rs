//! API request and response types, and the retryable unit of work.

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::SdkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

/// One API request: method, path, and an opaque JSON body.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::Delete,
            path: path.into(),
            body: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

pub(crate) type Completion = oneshot::Sender<Result<ApiResponse, SdkError>>;

/// A request bound to its single-shot completion, carrying the number of
/// refresh-and-retry cycles already consumed.
pub(crate) struct RetryableRequest {
    pub(crate) request: ApiRequest,
    pub(crate) attempt: u32,
    completion: Completion,
}

impl RetryableRequest {
    pub(crate) fn new(
        request: ApiRequest,
    ) -> (Self, oneshot::Receiver<Result<ApiResponse, SdkError>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                request,
                attempt: 0,
                completion: tx,
            },
            rx,
        )
    }

    /// Deliver the terminal outcome. Consuming `self` makes a second delivery
    /// impossible; a receiver dropped by an abandoning caller is not an error.
    pub(crate) fn complete(self, result: Result<ApiResponse, SdkError>) {
        let _ = self.completion.send(result);
    }
}
