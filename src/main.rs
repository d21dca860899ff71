use clap::{Parser, Subcommand};
use overtime_sync::application::commands::{
    AppState, SubmitRecordRequest, current_identity_impl, delete_record_impl, export_records_impl,
    import_records_impl, list_records_impl, login_impl, logout_impl, register_impl,
    set_webhook_url_impl, start_polling_impl, stop_polling_impl, submit_record_impl,
    summary_impl, sync_now_impl, sync_status_impl, update_status_impl, webhook_url_impl,
};
use overtime_sync::infrastructure::error::InfraError;
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "overtime-sync")]
#[command(about = "Overtime records with offline cache and shared remote sync", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Workspace holding config/, state/ and logs/
    #[arg(long, env = "OVERTIME_ROOT")]
    root: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "OVERTIME_LOG")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "OVERTIME_LOG_JSON")]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    Register {
        username: String,
        #[arg(long, env = "OVERTIME_PASSWORD")]
        password: String,
        #[arg(long)]
        full_name: String,
        /// coordinator, supervisor or employee
        #[arg(long, default_value = "employee")]
        role: String,
        /// Supervisor whose queue receives this user's records
        #[arg(long)]
        supervisor: Option<String>,
    },
    /// Log in and run the initial sync
    Login {
        username: String,
        #[arg(long, env = "OVERTIME_PASSWORD")]
        password: String,
    },
    Logout,
    Whoami,
    /// Submit an overtime record
    Submit {
        #[arg(long)]
        start_date: String,
        #[arg(long)]
        start_time: String,
        /// Defaults to the start date
        #[arg(long)]
        end_date: Option<String>,
        #[arg(long)]
        end_time: String,
        #[arg(long, default_value = "")]
        reason: String,
        #[arg(long)]
        employee_name: Option<String>,
        #[arg(long)]
        supervisor: Option<String>,
    },
    Approve {
        record_id: String,
    },
    Reject {
        record_id: String,
    },
    /// Withdraw a pending record you own
    Delete {
        record_id: String,
    },
    /// Records visible to the logged-in user
    List,
    Summary,
    /// Fetch, merge and push now
    Sync,
    Status,
    /// Print the full record collection as JSON
    Export,
    /// Merge a JSON backup read from a file, or stdin when omitted
    Import {
        file: Option<PathBuf>,
    },
    /// Keep refreshing in the background until Ctrl+C
    Watch,
    /// Show or set the webhook URL; an empty value clears it
    Webhook {
        #[arg(long)]
        set: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.json_logs);

    let workspace_root = match cli.root.clone().map(Ok).unwrap_or_else(std::env::current_dir) {
        Ok(path) => path,
        Err(error) => {
            eprintln!("failed to resolve workspace root: {error}");
            return ExitCode::FAILURE;
        }
    };
    let state = match AppState::new(workspace_root) {
        Ok(state) => state,
        Err(error) => {
            eprintln!("failed to initialize app state: {error}");
            return ExitCode::FAILURE;
        }
    };

    let (command, result) = run(&state, cli.command).await;
    state.drain_background().await;

    match result {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("{}", state.command_error(command, &error));
            ExitCode::FAILURE
        }
    }
}

async fn run(state: &AppState, command: Commands) -> (&'static str, Result<String, InfraError>) {
    match command {
        Commands::Register {
            username,
            password,
            full_name,
            role,
            supervisor,
        } => (
            "register",
            render(register_impl(state, username, password, full_name, role, supervisor).await),
        ),
        Commands::Login { username, password } => (
            "login",
            render(login_impl(state, username, password, false).await),
        ),
        Commands::Logout => ("logout", render(logout_impl(state).await)),
        Commands::Whoami => ("whoami", render(current_identity_impl(state))),
        Commands::Submit {
            start_date,
            start_time,
            end_date,
            end_time,
            reason,
            employee_name,
            supervisor,
        } => {
            let request = SubmitRecordRequest {
                end_date: end_date.unwrap_or_else(|| start_date.clone()),
                start_date,
                start_time,
                end_time,
                reason,
                employee_name,
                supervisor,
            };
            ("submit_record", render(submit_record_impl(state, request).await))
        }
        Commands::Approve { record_id } => (
            "update_status",
            render(update_status_impl(state, record_id, "approved".to_string()).await),
        ),
        Commands::Reject { record_id } => (
            "update_status",
            render(update_status_impl(state, record_id, "rejected".to_string()).await),
        ),
        Commands::Delete { record_id } => {
            ("delete_record", render(delete_record_impl(state, record_id).await))
        }
        Commands::List => ("list_records", render(list_records_impl(state))),
        Commands::Summary => ("summary", render(summary_impl(state))),
        Commands::Sync => ("sync_now", render(sync_now_impl(state).await)),
        Commands::Status => ("sync_status", render(sync_status_impl(state))),
        Commands::Export => ("export_records", export_records_impl(state)),
        Commands::Import { file } => {
            let result = match read_payload(file) {
                Ok(payload) => render(import_records_impl(state, payload).await),
                Err(error) => Err(error),
            };
            ("import_records", result)
        }
        Commands::Watch => ("watch", watch(state).await),
        Commands::Webhook { set: Some(url) } => {
            ("set_webhook_url", render(set_webhook_url_impl(state, url).await))
        }
        Commands::Webhook { set: None } => ("webhook_url", render(webhook_url_impl(state).await)),
    }
}

async fn watch(state: &AppState) -> Result<String, InfraError> {
    let sync = sync_now_impl(state).await?;
    start_polling_impl(state).await?;
    tracing::info!(
        records = sync.record_count,
        interval_seconds = state.config().poll_interval.as_secs(),
        "watching for remote changes; press Ctrl+C to stop"
    );
    tokio::signal::ctrl_c().await?;
    stop_polling_impl(state).await;
    render(sync_status_impl(state))
}

fn read_payload(file: Option<PathBuf>) -> Result<String, InfraError> {
    match file {
        Some(path) => Ok(std::fs::read_to_string(path)?),
        None => {
            let mut payload = String::new();
            std::io::stdin().read_to_string(&mut payload)?;
            Ok(payload)
        }
    }
}

fn render<T: Serialize>(result: Result<T, InfraError>) -> Result<String, InfraError> {
    let value = result?;
    Ok(serde_json::to_string_pretty(&value)?)
}

fn init_logging(level: &str, json: bool) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    let fmt_layer = if json {
        fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
