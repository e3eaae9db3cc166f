use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use ysql_samples::config;
use ysql_samples::core::db::{self, Session};
use ysql_samples::core::Result;
use ysql_samples::employee;

fn main() -> ExitCode {
    // Initialize the logging system using tracing subscriber
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    info!("Starting sample-app...");

    // Optional path to a TOML configuration file
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    match run(config_path.as_deref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "sample-app failed");
            eprintln!("{}", e);
            ExitCode::from(1)
        }
    }
}

fn run(config_path: Option<&Path>) -> Result<()> {
    let config = config::resolve_config(config_path)?;
    let settings = config.connection_settings()?;

    let tls = settings.sslmode.uses_tls().then(db::initialize_tls);
    let mut session = Session::connect(&settings, tls.as_ref())?;

    employee::create_table(&mut session)?;
    println!("Created table employee");

    let john = employee::demo_employee();
    employee::insert(&mut session, &john)?;
    println!("{}", employee::render_inserted(&john));

    let rows = employee::select_by_id(&mut session, john.id)?;
    for row in &rows.rows {
        println!("{}", employee::render_query_row(row));
    }

    session.close()
}
