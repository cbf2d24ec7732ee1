//! Request descriptors and the transport seam.
//!
//! The pipeline never talks to `reqwest` directly; it goes through the
//! `Transport` trait so the cache/queue/replay policies are unit-testable
//! with scripted transports. A transport distinguishes reaching the server
//! (any HTTP status, even 500) from not reaching it at all; only the
//! latter is a transport failure.

pub mod pipeline;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::{DataError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn as_str(self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "GET" => Ok(Method::Get),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      other => Err(DataError::Storage(format!("unknown HTTP method: {}", other))),
    }
  }

  pub fn is_read(self) -> bool {
    matches!(self, Method::Get)
  }
}

/// Everything needed to issue (or re-issue) one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDescriptor {
  pub method: Method,
  pub url: String,
  /// Resource family the request targets; the invalidation scope key.
  pub collection: String,
  /// Owner scope. Queued entries are namespaced by it.
  pub user_id: String,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
  pub status: u16,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Transport-level failure: the network layer itself was unreachable.
#[derive(Debug, Clone)]
pub struct TransportFailure(pub String);

pub type TransportResult = std::result::Result<HttpResponse, TransportFailure>;

/// Seam between the pipeline and the real network.
pub trait Transport: Send + Sync {
  fn send(&self, req: RequestDescriptor) -> BoxFuture<'static, TransportResult>;
}

/// reqwest-backed transport with a bounded per-request timeout.
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new(timeout: std::time::Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| DataError::Transport(format!("failed to build HTTP client: {}", e)))?;
    Ok(Self { client })
  }
}

impl Transport for HttpTransport {
  fn send(&self, req: RequestDescriptor) -> BoxFuture<'static, TransportResult> {
    let client = self.client.clone();
    Box::pin(async move {
      let method = reqwest::Method::from_bytes(req.method.as_str().as_bytes())
        .map_err(|e| TransportFailure(e.to_string()))?;

      let mut builder = client.request(method, &req.url);
      for (name, value) in &req.headers {
        builder = builder.header(name, value);
      }
      if let Some(body) = req.body {
        builder = builder.body(body);
      }

      // Any error here (connect, DNS, timeout) is transport-level; a
      // response with an error status is not.
      let response = builder
        .send()
        .await
        .map_err(|e| TransportFailure(e.to_string()))?;

      let status = response.status().as_u16();
      let body = response
        .bytes()
        .await
        .map_err(|e| TransportFailure(e.to_string()))?
        .to_vec();

      Ok(HttpResponse { status, body })
    })
  }
}

/// Scripted transport shared by the pipeline and service tests.
#[cfg(test)]
pub mod testing {
  use super::*;
  use std::collections::VecDeque;
  use std::sync::{Arc, Mutex};

  pub enum Scripted {
    Respond(u16, Vec<u8>),
    Fail,
    Hang,
  }

  /// Replays a script of responses and records every request it sees.
  /// An exhausted script behaves like a dead network.
  pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    seen: Mutex<Vec<RequestDescriptor>>,
  }

  impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
      Arc::new(Self {
        script: Mutex::new(VecDeque::new()),
        seen: Mutex::new(Vec::new()),
      })
    }

    pub fn push_ok(&self, body: &[u8]) {
      self
        .script
        .lock()
        .unwrap()
        .push_back(Scripted::Respond(200, body.to_vec()));
    }

    pub fn push_status(&self, status: u16) {
      self
        .script
        .lock()
        .unwrap()
        .push_back(Scripted::Respond(status, Vec::new()));
    }

    pub fn push_fail(&self) {
      self.script.lock().unwrap().push_back(Scripted::Fail);
    }

    pub fn push_hang(&self) {
      self.script.lock().unwrap().push_back(Scripted::Hang);
    }

    pub fn seen_urls(&self) -> Vec<String> {
      self.seen.lock().unwrap().iter().map(|r| r.url.clone()).collect()
    }
  }

  impl Transport for ScriptedTransport {
    fn send(&self, req: RequestDescriptor) -> BoxFuture<'static, TransportResult> {
      self.seen.lock().unwrap().push(req);
      let step = self.script.lock().unwrap().pop_front();
      Box::pin(async move {
        match step {
          Some(Scripted::Respond(status, body)) => Ok(HttpResponse { status, body }),
          Some(Scripted::Fail) | None => Err(TransportFailure("connection refused".to_string())),
          Some(Scripted::Hang) => {
            futures::future::pending::<()>().await;
            unreachable!()
          }
        }
      })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn method_parse_roundtrips() {
    for m in [
      Method::Get,
      Method::Post,
      Method::Put,
      Method::Patch,
      Method::Delete,
    ] {
      assert_eq!(Method::parse(m.as_str()).unwrap(), m);
    }
    assert!(Method::parse("TRACE").is_err());
  }

  #[test]
  fn only_get_is_a_read() {
    assert!(Method::Get.is_read());
    assert!(!Method::Post.is_read());
    assert!(!Method::Delete.is_read());
  }
}
