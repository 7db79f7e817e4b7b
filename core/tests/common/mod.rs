//! Scripted transport shared by the pipeline tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fetch_core::{FetchError, HttpRequest, HttpResponse, Transport};

/// One scripted reaction to a request.
#[derive(Debug, Clone)]
pub enum Step {
    Respond {
        status: u16,
        chunks: Vec<String>,
        delay: Duration,
    },
    Fail(String),
}

/// Transport that plays back `Step`s in order, repeating the last one once
/// the script runs out, and records every request it receives.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    requests: Mutex<Vec<HttpRequest>>,
    log: Option<Arc<Mutex<Vec<String>>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(self, step: Step) -> Self {
        self.script.lock().unwrap().push_back(step);
        self
    }

    pub fn respond(self, status: u16, body: &str) -> Self {
        self.respond_after(Duration::ZERO, status, body)
    }

    pub fn respond_after(self, delay: Duration, status: u16, body: &str) -> Self {
        self.step(Step::Respond {
            status,
            chunks: vec![body.to_string()],
            delay,
        })
    }

    pub fn respond_chunks(self, status: u16, chunks: &[&str]) -> Self {
        self.step(Step::Respond {
            status,
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            delay: Duration::ZERO,
        })
    }

    pub fn fail(self, message: &str) -> Self {
        self.step(Step::Fail(message.to_string()))
    }

    /// Push `"fetch"` onto `log` on every call.
    pub fn with_log(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> HttpRequest {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no request recorded")
    }

    fn next_step(&self) -> Step {
        let mut last = self.last.lock().unwrap();
        match self.script.lock().unwrap().pop_front() {
            Some(step) => {
                *last = Some(step.clone());
                step
            }
            None => last.clone().expect("mock transport has no script"),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        self.requests.lock().unwrap().push(request);
        if let Some(log) = &self.log {
            log.lock().unwrap().push("fetch".to_string());
        }

        match self.next_step() {
            Step::Respond {
                status,
                chunks,
                delay,
            } => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(HttpResponse::from_chunks(status, chunks))
            }
            Step::Fail(message) => Err(FetchError::Network(message)),
        }
    }
}
