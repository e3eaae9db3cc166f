//! Property-based tests for the transactional transfer
//!
//! These tests verify, against the in-memory ledger, that:
//! - A committed transfer moves exactly the amount and conserves the total
//! - A transfer that fails at any step leaves every balance untouched
//! - Conflicts are classified as retryable and nothing else is

#[cfg(test)]
mod tests {
    use postgres::error::SqlState;
    use proptest::prelude::*;
    use ysql_samples::core::FailureClass;
    use ysql_samples::test_utils::{FailureKind, LedgerExecutor};
    use ysql_samples::transfer::{
        self, RetryPolicy, BEGIN_SQL, COMMIT_SQL, CREDIT_SQL, DEBIT_SQL,
    };

    fn arb_step() -> impl Strategy<Value = &'static str> {
        prop_oneof![
            Just(BEGIN_SQL),
            Just(DEBIT_SQL),
            Just(CREDIT_SQL),
            Just(COMMIT_SQL),
        ]
    }

    fn arb_failure() -> impl Strategy<Value = FailureKind> {
        prop_oneof![
            Just(FailureKind::SerializationFailure),
            Just(FailureKind::Connection),
            Just(FailureKind::Sql(SqlState::UNIQUE_VIOLATION)),
            Just(FailureKind::Sql(SqlState::QUERY_CANCELED)),
            Just(FailureKind::Sql(SqlState::T_R_DEADLOCK_DETECTED)),
        ]
    }

    fn ledger(from_balance: i32, to_balance: i32) -> LedgerExecutor {
        let mut ledger = LedgerExecutor::new();
        ledger.seed("Jessica", from_balance);
        ledger.seed("John", to_balance);
        ledger
    }

    proptest! {
        #[test]
        fn successful_transfer_conserves_total(
            from_balance in 0i32..1_000_000,
            to_balance in 0i32..1_000_000,
            amount in 1i32..100_000,
        ) {
            let mut ledger = ledger(from_balance, to_balance);
            let before = ledger.total();

            transfer::transfer(&mut ledger, "Jessica", "John", amount).unwrap();

            prop_assert_eq!(ledger.balance("Jessica"), Some(from_balance - amount));
            prop_assert_eq!(ledger.balance("John"), Some(to_balance + amount));
            prop_assert_eq!(ledger.total(), before);
            prop_assert!(!ledger.in_transaction());
        }

        #[test]
        fn failed_transfer_changes_nothing(
            from_balance in 0i32..1_000_000,
            to_balance in 0i32..1_000_000,
            amount in 1i32..100_000,
            step in arb_step(),
            failure in arb_failure(),
        ) {
            let mut ledger = ledger(from_balance, to_balance);
            ledger.fail_on(step, failure.clone());

            let err = transfer::transfer(&mut ledger, "Jessica", "John", amount).unwrap_err();

            prop_assert_eq!(ledger.balance("Jessica"), Some(from_balance));
            prop_assert_eq!(ledger.balance("John"), Some(to_balance));
            prop_assert!(!ledger.in_transaction());

            let expected = if failure == FailureKind::SerializationFailure {
                FailureClass::Conflict
            } else {
                FailureClass::Fatal
            };
            prop_assert_eq!(err.failure_class(), expected);
        }

        #[test]
        fn retries_are_bounded_by_policy(
            conflicts in 0u32..6,
            max_retries in 0u32..6,
        ) {
            let mut ledger = ledger(10_000, 9_000);
            ledger.fail_times(COMMIT_SQL, FailureKind::SerializationFailure, conflicts);

            let result = transfer::transfer_with_retry(
                &mut ledger,
                &RetryPolicy::immediate(max_retries),
                "Jessica",
                "John",
                800,
            );

            if conflicts <= max_retries {
                let receipt = result.unwrap();
                prop_assert_eq!(receipt.attempts, conflicts + 1);
                prop_assert_eq!(ledger.balance("Jessica"), Some(9_200));
                prop_assert_eq!(ledger.balance("John"), Some(9_800));
            } else {
                prop_assert!(result.unwrap_err().is_conflict());
                prop_assert_eq!(ledger.count(BEGIN_SQL), max_retries as usize + 1);
                prop_assert_eq!(ledger.balance("Jessica"), Some(10_000));
            }
            prop_assert_eq!(ledger.total(), 19_000);
        }
    }

    #[test]
    fn overflowing_credit_rolls_back_the_debit() {
        let mut ledger = ledger(100, i32::MAX);
        let err = transfer::transfer(&mut ledger, "Jessica", "John", 50).unwrap_err();

        assert_eq!(err.failure_class(), FailureClass::Fatal);
        assert_eq!(err.sql_state(), Some(SqlState::NUMERIC_VALUE_OUT_OF_RANGE));
        assert_eq!(ledger.balance("Jessica"), Some(100));
        assert_eq!(ledger.balance("John"), Some(i32::MAX));
    }
}
