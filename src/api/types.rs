//! Types exchanged with the payroll API.
//!
//! Records are kept opaque: the client never validates their fields.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// Field map of an employee or payslip record.
pub type Record = Map<String, Value>;

/// Employee identifier as the API hands it out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmployeeId {
  Number(i64),
  Text(String),
}

impl FromStr for EmployeeId {
  type Err = color_eyre::Report;

  /// All-digit input becomes a number, anything else a string.
  fn from_str(s: &str) -> Result<Self> {
    let s = s.trim();
    if s.is_empty() {
      return Err(eyre!("Employee id must not be empty"));
    }
    match s.parse::<i64>() {
      Ok(n) => Ok(Self::Number(n)),
      Err(_) => Ok(Self::Text(s.to_string())),
    }
  }
}

impl std::fmt::Display for EmployeeId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Number(n) => write!(f, "{}", n),
      Self::Text(s) => write!(f, "{}", s),
    }
  }
}

/// An employee record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Employee(pub Record);

impl Employee {
  #[allow(dead_code)]
  pub fn id(&self) -> Option<EmployeeId> {
    self
      .0
      .get("id")
      .and_then(|v| serde_json::from_value(v.clone()).ok())
  }
}

/// A payslip record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payslip(pub Record);

/// `{ "error": "..." }` body returned on failures.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
  pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RoleResponse {
  #[serde(default = "default_role")]
  pub role: String,
}

fn default_role() -> String {
  "viewer".to_string()
}

/// Body of an update request: the id first, then the caller's fields on top.
pub fn update_body(id: &EmployeeId, fields: &Record) -> Value {
  let mut body = Record::new();
  body.insert("id".to_string(), serde_json::json!(id));
  body.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
  Value::Object(body)
}

/// Pull the server's `error` message out of a JSON body, if it has one.
pub fn error_message(body: &Value) -> Option<String> {
  serde_json::from_value::<ErrorBody>(body.clone())
    .ok()
    .and_then(|b| b.error)
    .filter(|e| !e.is_empty())
}

/// Parse user input as a JSON object.
pub fn parse_record(input: &str) -> Result<Record> {
  match serde_json::from_str::<Value>(input) {
    Ok(Value::Object(map)) => Ok(map),
    Ok(_) => Err(eyre!("Expected a JSON object")),
    Err(e) => Err(eyre!("Invalid JSON: {}", e)),
  }
}
