use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::api::{parse_record, ApiClient, EmployeeId, PayrollApi, TerminalPage};
use crate::cache::{
  Activation, CacheController, CacheStorage, GenerationState, HttpFetcher, MessageOutcome,
  ServiceWorker, SqliteStorage, SKIP_WAITING,
};
use crate::config::Config;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Session helpers
  #[command(subcommand)]
  Session(SessionCommand),
  /// Employee records
  #[command(subcommand, visible_alias = "emp")]
  Employees(EmployeeCommand),
  /// Payslip records
  #[command(subcommand)]
  Payslips(PayslipCommand),
  /// Offline resource cache
  #[command(subcommand)]
  Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
  /// Check whether the session cookie is still accepted
  Check,
  /// Sign out
  Logout,
  /// Show the signed-in user's role
  Role,
}

#[derive(Subcommand, Debug)]
pub enum EmployeeCommand {
  /// List all employees
  #[command(visible_alias = "ls")]
  List,
  /// Create an employee from a JSON object
  Save { json: String },
  /// Update an employee's fields from a JSON object
  Update { id: String, json: String },
  /// Delete an employee
  #[command(visible_alias = "rm")]
  Delete { id: String },
}

#[derive(Subcommand, Debug)]
pub enum PayslipCommand {
  /// List all payslips
  #[command(visible_alias = "ls")]
  List,
  /// Create a payslip from a JSON object
  Save { json: String },
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
  /// Fetch and store every manifest resource for the current generation
  Install,
  /// Activate the installed generation and delete all others
  Activate,
  /// Send the skip-waiting control message
  SkipWaiting,
  /// Install and activate the current generation in one step
  Update,
  /// Fetch a resource, cache first
  Fetch {
    path: String,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Show stored generations
  Status,
}

/// Run a command. Returns false when the operation reported a failure.
pub async fn run(command: Command, config: &Config) -> Result<bool> {
  match command {
    Command::Session(cmd) => run_session(cmd, &payroll_api(config)?).await,
    Command::Employees(cmd) => run_employees(cmd, &payroll_api(config)?).await,
    Command::Payslips(cmd) => run_payslips(cmd, &payroll_api(config)?).await,
    Command::Cache(cmd) => run_cache(cmd, config).await,
  }
}

fn payroll_api(config: &Config) -> Result<PayrollApi<TerminalPage>> {
  let client = ApiClient::new(config)?;
  let page = TerminalPage::new(client.origin().clone());
  Ok(PayrollApi::new(client, page))
}

async fn run_session(cmd: SessionCommand, api: &PayrollApi<TerminalPage>) -> Result<bool> {
  match cmd {
    SessionCommand::Check => {
      let ok = api.check_session().await;
      println!("{}", if ok { "Session active" } else { "Not signed in" });
      Ok(ok)
    }
    SessionCommand::Logout => {
      api.logout();
      Ok(true)
    }
    SessionCommand::Role => match api.user_role().await {
      Some(role) => {
        println!("{}", role);
        Ok(true)
      }
      None => Ok(false),
    },
  }
}

async fn run_employees(cmd: EmployeeCommand, api: &PayrollApi<TerminalPage>) -> Result<bool> {
  match cmd {
    EmployeeCommand::List => {
      print_json(&api.load_employees().await)?;
      Ok(true)
    }
    EmployeeCommand::Save { json } => {
      let record = parse_record(&json)?;
      print_outcome(api.save_employee(&record).await)
    }
    EmployeeCommand::Update { id, json } => {
      let id: EmployeeId = id.parse()?;
      let fields = parse_record(&json)?;
      print_outcome(api.update_employee(&id, &fields).await)
    }
    EmployeeCommand::Delete { id } => {
      let id: EmployeeId = id.parse()?;
      let deleted = api.delete_employee(&id).await;
      if deleted {
        println!("Deleted employee {}", id);
      }
      Ok(deleted)
    }
  }
}

async fn run_payslips(cmd: PayslipCommand, api: &PayrollApi<TerminalPage>) -> Result<bool> {
  match cmd {
    PayslipCommand::List => {
      print_json(&api.load_payslips().await)?;
      Ok(true)
    }
    PayslipCommand::Save { json } => {
      let record = parse_record(&json)?;
      print_outcome(api.save_payslip(&record).await)
    }
  }
}

type Controller = CacheController<SqliteStorage, HttpFetcher>;

fn cache_controller(config: &Config) -> Result<Controller> {
  let storage = Arc::new(SqliteStorage::open(&config.cache_db_path()?)?);
  CacheController::new(
    storage,
    HttpFetcher::new()?,
    config.origin_url()?,
    config.cache.generation.clone(),
    config.cache.manifest.clone(),
  )
}

async fn run_cache(cmd: CacheCommand, config: &Config) -> Result<bool> {
  let mut sw = cache_controller(config)?;

  match cmd {
    CacheCommand::Install => {
      let outcome = sw.install().await?;
      println!("Installed {} resources into {}", outcome.entries, sw.tag());
      if let Some(activation) = outcome.activation {
        print_activation(sw.tag(), &activation);
      }
    }
    CacheCommand::Activate => {
      if sw.state() == GenerationState::Active {
        println!("{} is already active", sw.tag());
      } else {
        let activation = sw.activate()?;
        print_activation(sw.tag(), &activation);
      }
    }
    CacheCommand::SkipWaiting => match sw.message(SKIP_WAITING)? {
      MessageOutcome::Activated { deleted } => {
        print_activation(sw.tag(), &Activation::Activated { deleted })
      }
      MessageOutcome::Deferred => println!("{} is not installed yet", sw.tag()),
      MessageOutcome::NoEffect => println!("{} is {}", sw.tag(), sw.state()),
      MessageOutcome::Unrecognized => return Err(eyre!("Control message was not recognized")),
    },
    CacheCommand::Update => {
      if sw.state() == GenerationState::Active {
        println!("{} is up to date", sw.tag());
        return Ok(true);
      }
      // Installed generations activate on the message itself; new ones on install
      if let MessageOutcome::Activated { deleted } = sw.message(SKIP_WAITING)? {
        print_activation(sw.tag(), &Activation::Activated { deleted });
        return Ok(true);
      }
      let outcome = sw.install().await?;
      println!("Installed {} resources into {}", outcome.entries, sw.tag());
      if let Some(activation) = outcome.activation {
        print_activation(sw.tag(), &activation);
      }
    }
    CacheCommand::Fetch { path, output } => {
      let url = sw.resolve(&path)?;
      let result = sw.fetch(&url).await?;
      tracing::info!(%url, source = %result.source, status = result.response.status, "fetch handled");
      eprintln!(
        "{} {} ({}, {})",
        result.response.status,
        url,
        result.source,
        result.response.header("content-type").unwrap_or("no content type")
      );

      match output {
        Some(path) => std::fs::write(&path, &result.response.body)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
        None => std::io::stdout()
          .write_all(&result.response.body)
          .map_err(|e| eyre!("Failed to write response body: {}", e))?,
      }
      return Ok(result.response.is_success());
    }
    CacheCommand::Status => print_status(&sw)?,
  }

  Ok(true)
}

fn print_activation(tag: &str, activation: &Activation) {
  match activation {
    Activation::Activated { deleted } if deleted.is_empty() => println!("Activated {}", tag),
    Activation::Activated { deleted } => {
      println!("Activated {}, deleted {}", tag, deleted.join(", "))
    }
    Activation::Waiting { clients } => {
      println!("{} is waiting for {} open client(s)", tag, clients)
    }
  }
}

fn print_status(sw: &Controller) -> Result<()> {
  let generations = sw.storage().generations()?;
  if !generations.iter().any(|g| g.name == sw.tag()) {
    println!("{} (current): {}", sw.tag(), sw.state());
  }

  for generation in generations {
    let marker = if generation.name == sw.tag() {
      " (current)"
    } else {
      ""
    };
    println!(
      "{}{}: {}, {} entries, installed {}",
      generation.name,
      marker,
      generation.state,
      generation.entry_count,
      generation.installed_at.format("%Y-%m-%d %H:%M:%S")
    );
    for entry in sw.storage().entries(&generation.name)? {
      println!(
        "  {} {} {}B sha256:{} at {}",
        entry.status,
        entry.key,
        entry.size,
        &entry.digest[..12.min(entry.digest.len())],
        entry.cached_at.format("%H:%M:%S")
      );
    }
  }
  Ok(())
}

fn print_outcome<T: Serialize>(value: Option<T>) -> Result<bool> {
  match value {
    Some(value) => {
      print_json(&value)?;
      Ok(true)
    }
    None => Ok(false),
  }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
  let text =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to format JSON: {}", e))?;
  println!("{}", text);
  Ok(())
}
