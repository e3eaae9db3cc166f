/// Connection Management Module
///
/// This module provides connection settings, the libpq-style key/value
/// connection string, and the live `Session` that owns one database
/// connection for the lifetime of a sample program.

use crate::core::db::query::{CommandOutcome, CommandResult, DbFailure, Executor, RowSet, SqlParam, StatementType};
use crate::core::db::tls::TlsContext;
use crate::core::{Result, YsqlError};
use postgres::types::{ToSql, Type};
use postgres::{Client, NoTls, Row, SimpleQueryMessage};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5433;
pub const DEFAULT_DB_NAME: &str = "yugabyte";
pub const DEFAULT_USER: &str = "yugabyte";
pub const DEFAULT_PASSWORD: &str = "yugabyte";

/// TLS negotiation mode, named as in libpq's `sslmode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    #[default]
    Disable,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }

    /// Whether connecting in this mode needs a TLS connector at all.
    pub fn uses_tls(&self) -> bool {
        !matches!(self, SslMode::Disable)
    }

    /// The mode the driver negotiates with. Certificate verification for the
    /// `verify-*` modes is done by our connector, so the driver only needs to
    /// know that TLS is mandatory.
    fn driver_mode(&self) -> postgres::config::SslMode {
        match self {
            SslMode::Disable => postgres::config::SslMode::Disable,
            SslMode::Prefer => postgres::config::SslMode::Prefer,
            SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => {
                postgres::config::SslMode::Require
            }
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SslMode {
    type Err = YsqlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "disable" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(YsqlError::Config(format!("invalid sslmode: {}", other))),
        }
    }
}

/// Everything needed to open a session.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub sslmode: SslMode,
    /// PEM file with the CA certificate(s) used to verify the server
    pub sslrootcert: Option<PathBuf>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionSettings {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            dbname: DEFAULT_DB_NAME.to_string(),
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            sslmode: SslMode::default(),
            sslrootcert: None,
        }
    }
}

impl ConnectionSettings {
    /// Parses a key/value connection string such as
    /// `host=127.0.0.1 port=5433 dbname=yugabyte user=yugabyte password=yugabyte`.
    ///
    /// Keys that are not given keep their default. Values may be single-quoted,
    /// with `\'` and `\\` escapes inside quotes.
    ///
    /// # Errors
    ///
    /// Returns `YsqlError::Config` for malformed pairs, unknown keys, a bad port
    /// or an unknown `sslmode`.
    pub fn from_conninfo(conninfo: &str) -> Result<Self> {
        let mut settings = ConnectionSettings::default();
        for (key, value) in parse_conninfo(conninfo)? {
            match key.as_str() {
                "host" => settings.host = value,
                "port" => {
                    settings.port = value
                        .parse()
                        .map_err(|_| YsqlError::Config(format!("invalid port: {}", value)))?
                }
                "dbname" => settings.dbname = value,
                "user" => settings.user = value,
                "password" => settings.password = value,
                "sslmode" => settings.sslmode = value.parse()?,
                "sslrootcert" => settings.sslrootcert = Some(PathBuf::from(value)),
                other => {
                    return Err(YsqlError::Config(format!(
                        "unknown connection option: {}",
                        other
                    )))
                }
            }
        }
        Ok(settings)
    }

    /// Renders the settings as a key/value connection string.
    pub fn to_conninfo(&self) -> String {
        self.render(false)
    }

    /// Same as `to_conninfo`, with the password masked for logging.
    pub fn redacted(&self) -> String {
        self.render(true)
    }

    fn render(&self, redact: bool) -> String {
        let password = if redact { "********" } else { self.password.as_str() };
        let mut pairs = vec![
            ("host", quote_value(&self.host)),
            ("port", self.port.to_string()),
            ("dbname", quote_value(&self.dbname)),
            ("user", quote_value(&self.user)),
            ("password", quote_value(password)),
            ("sslmode", self.sslmode.to_string()),
        ];
        if let Some(root_cert) = &self.sslrootcert {
            pairs.push(("sslrootcert", quote_value(&root_cert.to_string_lossy())));
        }
        pairs
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Builds the driver configuration.
    fn to_pg_config(&self) -> postgres::Config {
        let mut config = postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.dbname)
            .user(&self.user)
            .password(&self.password)
            .ssl_mode(self.sslmode.driver_mode());
        config
    }
}

fn quote_value(value: &str) -> String {
    if !value.is_empty() && !value.contains(|c: char| c.is_whitespace() || c == '\'' || c == '\\') {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

fn parse_conninfo(conninfo: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut chars = conninfo.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
            key.push(c);
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next() != Some('=') {
            return Err(YsqlError::Config(format!(
                "missing \"=\" after \"{}\" in connection string",
                key
            )));
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'\'').is_some() {
            loop {
                match chars.next() {
                    Some('\'') => break,
                    Some('\\') => match chars.next() {
                        Some(escaped) => value.push(escaped),
                        None => return Err(unterminated_quote()),
                    },
                    Some(c) => value.push(c),
                    None => return Err(unterminated_quote()),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                value.push(c);
            }
        }

        pairs.push((key, value));
    }

    Ok(pairs)
}

fn unterminated_quote() -> YsqlError {
    YsqlError::Config("unterminated quoted value in connection string".to_string())
}

/// A live database session.
///
/// The session is owned by exactly one caller. It is released by `close`, or
/// by being dropped when an error unwinds the caller.
pub struct Session {
    client: Client,
}

impl Session {
    /// Opens a session.
    ///
    /// `sslmode=disable` connects in plaintext. Every other mode needs the
    /// `TlsContext` produced by the process bootstrap.
    ///
    /// # Errors
    ///
    /// Returns `YsqlError::Tls` when TLS is requested without a context or the
    /// connector cannot be built, and `YsqlError::Connection` when the server
    /// cannot be reached or rejects the login.
    pub fn connect(settings: &ConnectionSettings, tls: Option<&TlsContext>) -> Result<Self> {
        info!(conninfo = %settings.redacted(), "connecting");
        let config = settings.to_pg_config();

        let connected = if settings.sslmode.uses_tls() {
            let tls = tls.ok_or_else(|| {
                YsqlError::Tls(format!(
                    "sslmode={} requested before TLS was initialised",
                    settings.sslmode
                ))
            })?;
            config.connect(tls.make_connector(settings)?)
        } else {
            config.connect(NoTls)
        };
        let client =
            connected.map_err(|e| YsqlError::Connection(DbFailure::from(e).message))?;

        info!(host = %settings.host, port = settings.port, "connected");
        Ok(Session { client })
    }

    /// Closes the session, waiting for the server to acknowledge.
    pub fn close(self) -> Result<()> {
        self.client
            .close()
            .map_err(|e| YsqlError::Connection(DbFailure::from(e).message))?;
        debug!("session closed");
        Ok(())
    }

    /// True once the connection to the server has been lost.
    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

impl Executor for Session {
    fn execute(&mut self, sql: &str, params: &[SqlParam<'_>]) -> CommandResult {
        debug!(kind = StatementType::from_sql(sql).as_str(), sql, "execute");
        if params.is_empty() {
            let messages = self.client.simple_query(sql)?;
            return Ok(collect_simple_query(messages));
        }
        let values: Vec<&(dyn ToSql + Sync)> = params.iter().map(SqlParam::as_sql).collect();
        let affected = self.client.execute(sql, &values)?;
        Ok(CommandOutcome::Completed(affected))
    }

    fn query(&mut self, sql: &str, params: &[SqlParam<'_>]) -> CommandResult {
        debug!(kind = StatementType::from_sql(sql).as_str(), sql, "query");
        if params.is_empty() {
            let messages = self.client.simple_query(sql)?;
            return Ok(collect_simple_query(messages));
        }
        let values: Vec<&(dyn ToSql + Sync)> = params.iter().map(SqlParam::as_sql).collect();
        let rows = self.client.query(sql, &values)?;
        Ok(CommandOutcome::Rows(render_rows(&rows)?))
    }
}

/// Folds simple-query messages into one outcome. A row description or any
/// data row makes it a row set; otherwise the completion count is reported.
fn collect_simple_query(messages: Vec<SimpleQueryMessage>) -> CommandOutcome {
    let mut row_set: Option<RowSet> = None;
    let mut affected = 0;

    for message in messages {
        match message {
            SimpleQueryMessage::RowDescription(columns) => {
                row_set.get_or_insert_with(RowSet::default).columns =
                    columns.iter().map(|c| c.name().to_string()).collect();
            }
            SimpleQueryMessage::Row(row) => {
                let set = row_set.get_or_insert_with(RowSet::default);
                if set.columns.is_empty() {
                    set.columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                }
                set.rows
                    .push((0..row.len()).map(|i| row.get(i).map(str::to_string)).collect());
            }
            SimpleQueryMessage::CommandComplete(count) => affected = count,
            _ => {}
        }
    }

    match row_set {
        Some(rows) => CommandOutcome::Rows(rows),
        None => CommandOutcome::Completed(affected),
    }
}

/// Renders typed rows from the extended protocol as text.
fn render_rows(rows: &[Row]) -> std::result::Result<RowSet, DbFailure> {
    let columns = match rows.first() {
        Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
        None => Vec::new(),
    };

    let mut rendered = Vec::with_capacity(rows.len());
    for row in rows {
        let mut fields = Vec::with_capacity(row.len());
        for (i, column) in row.columns().iter().enumerate() {
            fields.push(render_field(row, i, column.type_())?);
        }
        rendered.push(fields);
    }

    Ok(RowSet::new(columns, rendered))
}

fn render_field(row: &Row, i: usize, ty: &Type) -> std::result::Result<Option<String>, DbFailure> {
    let value = match *ty {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(i)?
            .map(|b| if b { "t".to_string() } else { "f".to_string() }),
        Type::INT2 => row.try_get::<_, Option<i16>>(i)?.map(|v| v.to_string()),
        Type::INT4 => row.try_get::<_, Option<i32>>(i)?.map(|v| v.to_string()),
        Type::INT8 => row.try_get::<_, Option<i64>>(i)?.map(|v| v.to_string()),
        Type::FLOAT4 => row.try_get::<_, Option<f32>>(i)?.map(|v| v.to_string()),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(i)?.map(|v| v.to_string()),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            row.try_get::<_, Option<String>>(i)?
        }
        ref other => {
            return Err(DbFailure::new(
                None,
                format!("cannot render column {} of type {} as text", i, other),
            ))
        }
    };
    Ok(value)
}
