//! Client for the payroll JSON API.

mod client;
mod facade;
mod page;
mod types;

pub use client::ApiClient;
pub use facade::PayrollApi;
pub use page::TerminalPage;
pub use types::{parse_record, EmployeeId};
