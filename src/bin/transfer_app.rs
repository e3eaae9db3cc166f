use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use ysql_samples::accounts;
use ysql_samples::config;
use ysql_samples::core::db::{self, Session};
use ysql_samples::core::Result;
use ysql_samples::results_grid::ResultsGrid;
use ysql_samples::transfer::{self, TransactionalClient};

const TRANSFER_FROM: &str = "Jessica";
const TRANSFER_TO: &str = "John";
const TRANSFER_AMOUNT: i32 = 800;

fn main() -> ExitCode {
    // Initialize the logging system using tracing subscriber
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    info!("Starting transfer-app...");

    // Optional path to a TOML configuration file
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    match run(config_path.as_deref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "transfer-app failed");
            eprintln!("{}", transfer::failure_diagnostic(&e));
            ExitCode::from(1)
        }
    }
}

fn print_accounts(session: &mut Session) -> Result<()> {
    let rows = accounts::select_rows(session)?;
    print!("{}", ResultsGrid::from_row_set(&rows).render());
    Ok(())
}

fn run(config_path: Option<&Path>) -> Result<()> {
    let config = config::resolve_config(config_path)?;
    let settings = config.connection_settings()?;
    let policy = config.retry_policy()?;

    let tls = settings.sslmode.uses_tls().then(db::initialize_tls);
    let mut session = Session::connect(&settings, tls.as_ref())?;

    accounts::create_table(&mut session)?;
    println!("Created table accounts");

    for account in accounts::demo_accounts() {
        accounts::insert(&mut session, &account)?;
        println!(
            "Inserted data ({}, '{}', {}, '{}', {})",
            account.id, account.name, account.age, account.country, account.balance
        );
    }
    print_accounts(&mut session)?;

    let receipt = TransactionalClient::new(&mut session).transfer_with_retry(
        &policy,
        TRANSFER_FROM,
        TRANSFER_TO,
        TRANSFER_AMOUNT,
    )?;
    info!(id = %receipt.id, attempts = receipt.attempts, "transfer complete");
    println!(
        "Transferred {} from {} to {}",
        receipt.amount, receipt.from, receipt.to
    );
    print_accounts(&mut session)?;

    session.close()
}
