/// TLS Module
///
/// TLS setup happens in two explicit steps: the process bootstrap calls
/// [`initialize`] once before any connection is made, and the resulting
/// [`TlsContext`] is then required to build a connector.

use crate::core::db::connection::{ConnectionSettings, SslMode};
use crate::core::{Result, YsqlError};
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use postgres_openssl::MakeTlsConnector;
use tracing::debug;

/// Proof that the TLS library has been initialised for this process.
#[derive(Debug)]
pub struct TlsContext {
    _initialized: (),
}

/// One-time TLS bootstrap. Call it from `main` before connecting.
pub fn initialize() -> TlsContext {
    openssl::init();
    debug!("TLS library initialised");
    TlsContext { _initialized: () }
}

impl TlsContext {
    /// Creates a TLS connector for the given connection settings.
    ///
    /// The mode dictates whether we verify peer certs and hostnames, following
    /// libpq: `require` only verifies when a root certificate is supplied,
    /// `verify-ca` checks the chain, `verify-full` also checks the hostname.
    pub fn make_connector(&self, settings: &ConnectionSettings) -> Result<MakeTlsConnector> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())?;

        let (verify_mode, verify_hostname) = match settings.sslmode {
            SslMode::Disable | SslMode::Prefer => (SslVerifyMode::NONE, false),
            SslMode::Require => match settings.sslrootcert {
                Some(_) => (SslVerifyMode::PEER, false),
                None => (SslVerifyMode::NONE, false),
            },
            SslMode::VerifyCa => (SslVerifyMode::PEER, false),
            SslMode::VerifyFull => (SslVerifyMode::PEER, true),
        };
        builder.set_verify(verify_mode);

        match &settings.sslrootcert {
            Some(path) => {
                if !path.exists() {
                    return Err(YsqlError::Tls(format!(
                        "root certificate file {} does not exist",
                        path.display()
                    )));
                }
                builder.set_ca_file(path)?;
            }
            None if verify_mode == SslVerifyMode::PEER => {
                return Err(YsqlError::Tls(format!(
                    "sslmode={} requires sslrootcert",
                    settings.sslmode
                )));
            }
            None => {}
        }

        let mut connector = MakeTlsConnector::new(builder.build());
        if verify_mode == SslVerifyMode::PEER && !verify_hostname {
            connector.set_callback(|config, _| {
                config.set_verify_hostname(false);
                Ok(())
            });
        }

        Ok(connector)
    }
}
