//! Repository implementations for PostgreSQL

pub mod domain;
pub mod invitation;
pub mod nonce;
pub mod policy;

pub use domain::*;
pub use invitation::*;
pub use nonce::*;
pub use policy::*;

use bastion_core::BastionError;

const UNIQUE_VIOLATION: &str = "23505";
const QUERY_CANCELED: &str = "57014";

/// Maps a driver error, turning unique-key violations into `conflict`.
pub(crate) fn db_error(e: sqlx::Error, conflict_message: &str) -> BastionError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return BastionError::conflict(conflict_message);
        }
    }
    driver_error(e)
}

/// Pool waits and statements cut by `statement_timeout` become
/// `deadline-exceeded`; anything else is internal.
pub(crate) fn driver_error(e: sqlx::Error) -> BastionError {
    match &e {
        sqlx::Error::PoolTimedOut => BastionError::deadline_exceeded("acquire database connection"),
        sqlx::Error::Database(db) if db.code().as_deref() == Some(QUERY_CANCELED) => {
            BastionError::deadline_exceeded("database statement")
        }
        _ => BastionError::database(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_core::ErrorKind;

    #[test]
    fn test_pool_timeout_is_deadline_exceeded() {
        let err = db_error(sqlx::Error::PoolTimedOut, "duplicate");
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_other_driver_errors_are_internal() {
        let err = driver_error(sqlx::Error::RowNotFound);
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
