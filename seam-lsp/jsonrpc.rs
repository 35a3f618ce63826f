use std::sync::mpsc::Receiver;

use serde::{
  Deserialize,
  Serialize,
};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Version {
  #[serde(rename = "2.0")]
  V2,
}

impl Default for Version {
  fn default() -> Self {
    Self::V2
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
  Null,
  Number(u64),
  String(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
  #[serde(default)]
  pub jsonrpc: Version,
  pub id:      Id,
  pub method:  String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub params:  Option<Value>,
}

impl Request {
  pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
    Self {
      jsonrpc: Version::V2,
      id: Id::Number(id),
      method: method.into(),
      params,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
  pub code:    i64,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data:    Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
  #[serde(default)]
  pub jsonrpc: Version,
  pub id:      Id,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub result:  Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error:   Option<ResponseError>,
}

impl Response {
  pub fn ok(id: Id, result: Option<Value>) -> Self {
    Self {
      jsonrpc: Version::V2,
      id,
      result,
      error: None,
    }
  }

  pub fn err(id: Id, code: i64, message: impl Into<String>) -> Self {
    Self {
      jsonrpc: Version::V2,
      id,
      result: None,
      error: Some(ResponseError {
        code,
        message: message.into(),
        data: None,
      }),
    }
  }

  pub fn is_error(&self) -> bool {
    self.error.is_some()
  }
}

/// One in-flight protocol request per call: the implementation delivers
/// exactly one [`Response`] on the returned channel, or drops the sender
/// when the connection dies. Framing and process lifecycle live behind
/// this trait, outside this crate.
pub trait RequestDispatch: Send + Sync {
  fn send(&self, request: Request) -> Receiver<Response>;
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn request_serializes_with_version_and_id() {
    let request = Request::new(7, "textDocument/codeAction", Some(json!({"a": 1})));
    let value = serde_json::to_value(&request).expect("serialize");
    assert_eq!(
      value,
      json!({
        "jsonrpc": "2.0",
        "id": 7,
        "method": "textDocument/codeAction",
        "params": {"a": 1},
      })
    );
  }

  #[test]
  fn error_response_round_trips() {
    let value = json!({
      "jsonrpc": "2.0",
      "id": 3,
      "error": { "code": -32601, "message": "method not found" }
    });
    let response: Response = serde_json::from_value(value).expect("deserialize");
    assert!(response.is_error());
    assert_eq!(response.id, Id::Number(3));
  }
}
