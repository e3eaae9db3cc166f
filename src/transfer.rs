//! Transactional balance transfer between two named accounts.
//!
//! A transfer is BEGIN, debit, credit, COMMIT on one session, with every step
//! checked before the next is issued. A failure whose SQL state is
//! `40001` (serialization failure) is reported as `YsqlError::Conflict`;
//! any other failure as `YsqlError::Statement`.
//!
//! `TransactionalClient::transfer` never retries. Re-running the transaction
//! on conflict is opt-in through `transfer_with_retry` and a `RetryPolicy`.

use crate::core::db::{CommandOutcome, Executor, SqlParam};
use crate::core::{FailureClass, Result, YsqlError};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

pub const BEGIN_SQL: &str = "BEGIN TRANSACTION";
pub const DEBIT_SQL: &str = "UPDATE accounts SET balance = balance - $1 WHERE name = $2";
pub const CREDIT_SQL: &str = "UPDATE accounts SET balance = balance + $1 WHERE name = $2";
pub const COMMIT_SQL: &str = "COMMIT";
pub const ROLLBACK_SQL: &str = "ROLLBACK";

/// Bounded retry of a whole transfer on serialization conflicts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first. Zero means a conflict is returned
    /// to the caller straight away.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Retries up to `max_retries` times with no delay in between.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay before the given retry (1 for the first retry), capped at
    /// `max_backoff`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Record of a committed transfer.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub id: Uuid,
    pub from: String,
    pub to: String,
    pub amount: i32,
    /// Number of times the transaction body ran, including the one that
    /// committed
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
}

/// Runs transfers over a borrowed executor.
pub struct TransactionalClient<'a, E: Executor + ?Sized> {
    executor: &'a mut E,
}

impl<'a, E: Executor + ?Sized> TransactionalClient<'a, E> {
    pub fn new(executor: &'a mut E) -> Self {
        TransactionalClient { executor }
    }

    /// Moves `amount` from `from` to `to` in a single transaction.
    ///
    /// The account names are not checked first; an UPDATE that matches no
    /// row is not an error.
    ///
    /// # Errors
    ///
    /// - `YsqlError::InvalidArgument` if `amount` is not positive. Nothing is
    ///   sent to the server in that case.
    /// - `YsqlError::Conflict` if a step failed with a serialization failure.
    /// - `YsqlError::Statement` for any other failed step.
    pub fn transfer(&mut self, from: &str, to: &str, amount: i32) -> Result<()> {
        if amount <= 0 {
            return Err(YsqlError::InvalidArgument(format!(
                "transfer amount must be positive, got {}",
                amount
            )));
        }

        let span = info_span!("transfer", from, to, amount);
        let _entered = span.enter();

        self.step("BEGIN", BEGIN_SQL, &[])?;

        let result = self.transaction_body(from, to, amount);
        match &result {
            Ok(()) => info!("transfer committed"),
            Err(err) => {
                self.rollback_after_failure();
                match err.failure_class() {
                    FailureClass::Conflict => {
                        warn!(error = %err, "transfer aborted by a serialization conflict, retry the transaction")
                    }
                    FailureClass::Fatal => error!(error = %err, "transfer failed"),
                }
            }
        }
        result
    }

    /// Runs `transfer`, re-running the whole transaction while it fails with a
    /// conflict and the policy allows another attempt. Fatal errors are
    /// returned immediately.
    pub fn transfer_with_retry(
        &mut self,
        policy: &RetryPolicy,
        from: &str,
        to: &str,
        amount: i32,
    ) -> Result<TransferReceipt> {
        let id = Uuid::new_v4();
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.transfer(from, to, amount) {
                Ok(()) => {
                    if attempts > 1 {
                        info!(%id, attempts, "transfer succeeded after retrying");
                    }
                    return Ok(TransferReceipt {
                        id,
                        from: from.to_string(),
                        to: to.to_string(),
                        amount,
                        attempts,
                        completed_at: Utc::now(),
                    });
                }
                Err(err) if err.is_conflict() && attempts <= policy.max_retries => {
                    let delay = policy.backoff(attempts);
                    warn!(
                        %id,
                        "retry attempt {}/{} after {:?}",
                        attempts,
                        policy.max_retries,
                        delay
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn transaction_body(&mut self, from: &str, to: &str, amount: i32) -> Result<()> {
        let debited = self.step(
            "UPDATE (debit)",
            DEBIT_SQL,
            &[SqlParam::Int(amount), SqlParam::Text(from)],
        )?;
        let credited = self.step(
            "UPDATE (credit)",
            CREDIT_SQL,
            &[SqlParam::Int(amount), SqlParam::Text(to)],
        )?;
        debug!(debited, credited, "balances updated");
        self.step("COMMIT", COMMIT_SQL, &[])?;
        Ok(())
    }

    fn step(&mut self, context: &str, sql: &str, params: &[SqlParam<'_>]) -> Result<u64> {
        match self.executor.execute(sql, params) {
            Ok(outcome) => outcome.expect_command(context),
            Err(failure) if failure.is_serialization_failure() => Err(YsqlError::Conflict {
                context: context.to_string(),
                message: failure.message,
            }),
            Err(failure) => Err(failure.into_statement_error(context)),
        }
    }

    fn rollback_after_failure(&mut self) {
        match self.executor.execute(ROLLBACK_SQL, &[]) {
            Ok(CommandOutcome::Completed(_)) => debug!("transaction rolled back"),
            Ok(CommandOutcome::Rows(_)) => debug!("ROLLBACK returned rows, ignoring"),
            Err(failure) => debug!(%failure, "ROLLBACK after failed transfer also failed"),
        }
    }
}

/// Moves `amount` from `from` to `to` in one transaction on `executor`.
pub fn transfer<E: Executor + ?Sized>(executor: &mut E, from: &str, to: &str, amount: i32) -> Result<()> {
    TransactionalClient::new(executor).transfer(from, to, amount)
}

/// Like `transfer`, retrying conflicts as allowed by `policy`.
pub fn transfer_with_retry<E: Executor + ?Sized>(
    executor: &mut E,
    policy: &RetryPolicy,
    from: &str,
    to: &str,
    amount: i32,
) -> Result<TransferReceipt> {
    TransactionalClient::new(executor).transfer_with_retry(policy, from, to, amount)
}

/// The line `transfer-app` prints to stderr for any failure. Conflicts get
/// their own wording recommending a retry; everything else is the error text.
pub fn failure_diagnostic(err: &YsqlError) -> String {
    match err.failure_class() {
        FailureClass::Conflict => format!(
            "The operation is retryable. Add a retry loop around the transaction for serialization failures like this one: {}",
            err
        ),
        FailureClass::Fatal => err.to_string(),
    }
}
