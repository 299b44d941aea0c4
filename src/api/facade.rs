//! Payroll API operations with their user-facing outcomes.
//!
//! None of these return errors. Failures become an alert on the page plus a
//! log entry, and the caller gets an empty/negative result.

use color_eyre::{eyre::eyre, Report, Result};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::error;

use super::client::ApiClient;
use super::page::{Navigation, Page};
use super::types::{
  error_message, update_body, Employee, EmployeeId, Payslip, Record, RoleResponse,
};

const EMPLOYEES: &str = "/api/employees";
const PAYSLIPS: &str = "/api/payslips";
const USER_ROLE: &str = "/api/user-role";

const ADMIN_ONLY_SAVE: &str = "Only administrators can add or modify employee data";
const ADMIN_ONLY_UPDATE: &str = "Only administrators can modify employee data";
const ADMIN_ONLY_DELETE: &str = "Only administrators can delete employee data";
const PAYSLIP_FORBIDDEN: &str = "You are not allowed to create payslips";

/// Result of a write that the server may refuse on role grounds.
enum WriteOutcome {
  Done(Value),
  Forbidden,
}

pub struct PayrollApi<P: Page> {
  client: ApiClient,
  page: P,
}

impl<P: Page> PayrollApi<P> {
  pub fn new(client: ApiClient, page: P) -> Self {
    Self { client, page }
  }

  pub fn page(&self) -> &P {
    &self.page
  }

  /// Whether the session is still valid. Sends the user to login on 401.
  pub async fn check_session(&self) -> bool {
    match self.client.request(Method::GET, EMPLOYEES, &[], None).await {
      Ok(response) if response.status == StatusCode::UNAUTHORIZED => {
        self.page.navigate(Navigation::Login);
        false
      }
      Ok(_) => true,
      Err(e) => {
        error!(error = %e, "auth check failed");
        false
      }
    }
  }

  pub async fn load_employees(&self) -> Vec<Employee> {
    match self.fetch_list(EMPLOYEES, "Failed to load employees").await {
      Ok(employees) => employees,
      Err(e) => {
        self.report("load", "Failed to load employee data", &e);
        Vec::new()
      }
    }
  }

  /// Create an employee. Returns the server's echo of the created row(s).
  pub async fn save_employee(&self, record: &Record) -> Option<Value> {
    let body = Value::Object(record.clone());
    match self
      .write(Method::POST, EMPLOYEES, Some(&body), "Failed to save employee")
      .await
    {
      Ok(WriteOutcome::Done(created)) => Some(created),
      Ok(WriteOutcome::Forbidden) => {
        self.page.alert(ADMIN_ONLY_SAVE);
        None
      }
      Err(e) => {
        self.report("save", "Failed to save employee data", &e);
        None
      }
    }
  }

  pub async fn update_employee(&self, id: &EmployeeId, fields: &Record) -> Option<Value> {
    let body = update_body(id, fields);
    match self
      .write(Method::PUT, EMPLOYEES, Some(&body), "Failed to update employee")
      .await
    {
      Ok(WriteOutcome::Done(updated)) => Some(updated),
      Ok(WriteOutcome::Forbidden) => {
        self.page.alert(ADMIN_ONLY_UPDATE);
        None
      }
      Err(e) => {
        self.report("update", "Failed to update employee data", &e);
        None
      }
    }
  }

  pub async fn delete_employee(&self, id: &EmployeeId) -> bool {
    match self.try_delete(id).await {
      Ok(WriteOutcome::Done(_)) => true,
      Ok(WriteOutcome::Forbidden) => {
        self.page.alert(ADMIN_ONLY_DELETE);
        false
      }
      Err(e) => {
        self.report("delete", "Failed to delete employee", &e);
        false
      }
    }
  }

  pub fn logout(&self) {
    self.page.navigate(Navigation::Logout);
  }

  pub async fn load_payslips(&self) -> Vec<Payslip> {
    match self.fetch_list(PAYSLIPS, "Failed to load payslips").await {
      Ok(payslips) => payslips,
      Err(e) => {
        self.report("payslip load", "Failed to load payslip data", &e);
        Vec::new()
      }
    }
  }

  pub async fn save_payslip(&self, record: &Record) -> Option<Value> {
    let body = Value::Object(record.clone());
    match self
      .write(Method::POST, PAYSLIPS, Some(&body), "Failed to save payslip")
      .await
    {
      Ok(WriteOutcome::Done(created)) => Some(created),
      Ok(WriteOutcome::Forbidden) => {
        self.page.alert(PAYSLIP_FORBIDDEN);
        None
      }
      Err(e) => {
        self.report("payslip save", "Failed to save payslip data", &e);
        None
      }
    }
  }

  /// Role of the signed-in user, if the server tells us.
  pub async fn user_role(&self) -> Option<String> {
    let result: Result<RoleResponse> = async {
      let response = self.client.request(Method::GET, USER_ROLE, &[], None).await?;
      if !response.is_success() {
        return Err(eyre!("Role lookup failed with status {}", response.status));
      }
      response.json::<RoleResponse>()
    }
    .await;

    match result {
      Ok(role) => Some(role.role),
      Err(e) => {
        error!(error = %e, "role lookup failed");
        None
      }
    }
  }

  async fn fetch_list<T: DeserializeOwned>(&self, path: &str, failure: &str) -> Result<Vec<T>> {
    let response = self.client.request(Method::GET, path, &[], None).await?;
    if !response.is_success() {
      return Err(eyre!("{}", failure));
    }
    response.json()
  }

  /// POST/PUT with the shared 403 and `{error}` handling.
  ///
  /// The body is parsed before the status is looked at, so a non-JSON error
  /// page surfaces as a parse error.
  async fn write(
    &self,
    method: Method,
    path: &str,
    body: Option<&Value>,
    fallback: &str,
  ) -> Result<WriteOutcome> {
    let response = self.client.request(method, path, &[], body).await?;
    if response.status == StatusCode::FORBIDDEN {
      return Ok(WriteOutcome::Forbidden);
    }

    let data: Value = response.json()?;
    if response.is_success() {
      Ok(WriteOutcome::Done(data))
    } else {
      Err(eyre!("{}", error_message(&data).unwrap_or_else(|| fallback.to_string())))
    }
  }

  /// DELETE only reads the body when the server reports a failure.
  async fn try_delete(&self, id: &EmployeeId) -> Result<WriteOutcome> {
    let query = [("id", id.to_string())];
    let response = self
      .client
      .request(Method::DELETE, EMPLOYEES, &query, None)
      .await?;

    if response.status == StatusCode::FORBIDDEN {
      return Ok(WriteOutcome::Forbidden);
    }
    if response.is_success() {
      return Ok(WriteOutcome::Done(Value::Null));
    }

    let data: Value = response.json()?;
    Err(eyre!(
      "{}",
      error_message(&data).unwrap_or_else(|| "Failed to delete employee".to_string())
    ))
  }

  fn report(&self, action: &str, prefix: &str, e: &Report) {
    error!(action, error = %e, "api call failed");
    self.page.alert(&format!("{}: {}", prefix, e));
  }
}
