//! Scripted in-memory transport shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use dap_client::net::{RequestOptions, Response, Transport};
use dap_client::TransportError;

#[derive(Debug, Clone)]
enum Scripted {
    Body {
        status: u16,
        body: Vec<u8>,
        headers: Vec<(String, String)>,
    },
    Chunks(Vec<Bytes>),
    Timeout,
}

/// Serves canned responses keyed by exact URL and records every request.
/// Unknown URLs answer 404.
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<HashMap<String, Scripted>>,
    requests: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.with_status(url, 200, body)
    }

    pub fn with_status(self, url: &str, status: u16, body: impl Into<Vec<u8>>) -> Self {
        self.insert(
            url,
            Scripted::Body {
                status,
                body: body.into(),
                headers: Vec::new(),
            },
        )
    }

    pub fn with_header(self, url: &str, name: &str, value: &str) -> Self {
        if let Some(Scripted::Body { headers, .. }) =
            self.responses.lock().unwrap().get_mut(url)
        {
            headers.push((name.to_string(), value.to_string()));
        }
        self
    }

    /// Deliver the body as a stream of the given chunks.
    pub fn with_chunks(self, url: &str, chunks: Vec<Bytes>) -> Self {
        self.insert(url, Scripted::Chunks(chunks))
    }

    pub fn with_timeout(self, url: &str) -> Self {
        self.insert(url, Scripted::Timeout)
    }

    fn insert(self, url: &str, scripted: Scripted) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), scripted);
        self
    }

    pub fn shared(self) -> Arc<MockTransport> {
        Arc::new(self)
    }

    /// URLs requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Transport for MockTransport {
    fn get(&self, url: &str, options: &RequestOptions) -> Result<Response, TransportError> {
        self.requests.lock().unwrap().push(url.to_string());
        let scripted = self.responses.lock().unwrap().get(url).cloned();
        match scripted {
            Some(Scripted::Body {
                status,
                body,
                headers,
            }) => {
                let mut response = Response::new(status, body);
                for (name, value) in headers {
                    response = response.with_header(name, value);
                }
                Ok(response)
            }
            Some(Scripted::Chunks(chunks)) => Ok(Response::streaming(
                200,
                Box::new(chunks.into_iter().map(Ok)),
            )),
            Some(Scripted::Timeout) => Err(TransportError::Timeout(format!(
                "{} after {:?}",
                url, options.timeout
            ))),
            None => Ok(Response::new(404, format!("no such resource: {}", url))),
        }
    }
}
