#![cfg(test)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::json;

use crate::transport::{Request, Response, Transport, TransportError};

/// Replays queued responses in order and records every request it sees.
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<Response, TransportError>>>,
    requests: Mutex<Vec<Request>>,
    delay: Duration,
}

impl MockTransport {
    pub fn new(responses: Vec<Result<Response, TransportError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_body(body: impl Into<String>) -> Self {
        Self::new(vec![Ok(Response::new(200, body))])
    }

    /// Hold every request for `delay` before answering.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Transport for MockTransport {
    fn get(&self, request: &Request) -> Result<Response, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Other("no queued response left".into())))
    }
}

/// Panics on every request.
#[derive(Default)]
pub struct PanickingTransport {
    calls: AtomicUsize,
}

impl PanickingTransport {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for PanickingTransport {
    fn get(&self, _request: &Request) -> Result<Response, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("transport exploded");
    }
}

pub fn network_failure() -> Result<Response, TransportError> {
    Err(TransportError::Connect(
        "Error Communicating with Server".into(),
    ))
}

/// A typical response for the `entity` traffic type.
pub fn entity_treatments() -> String {
    json!({
        "entity": {
            "test_flag1": {"treatment": "off", "config": "test config"},
            "test_flag2": {"treatment": "on", "config": null},
            "another_flag": {"treatment": "off", "config": null},
            "banner": {"treatment": "variant-b", "config": "{\"color\":\"red\"}"},
            "bare": {"treatment": "on"}
        }
    })
    .to_string()
}
