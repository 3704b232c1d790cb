//! Mapping of diesel and pool faults onto the core error taxonomy.

use diesel::result::{DatabaseErrorInformation, DatabaseErrorKind, Error as DieselError};
use hearth_core::errors::{Error, StorageError};

/// Translate a diesel error into the core taxonomy. Uniqueness violations
/// surface as conflicts so callers can report duplicate integration keys.
pub fn map_diesel_error(err: DieselError) -> Error {
    match err {
        DieselError::NotFound => Error::NotFound("Record not found".into()),
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            Error::Conflict(info.message().to_string())
        }
        DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
            Error::Storage(StorageError::Constraint(info.message().to_string()))
        }
        other => Error::Storage(StorageError::Query(other.to_string())),
    }
}

pub fn map_pool_error(err: r2d2::Error) -> Error {
    Error::Storage(StorageError::Unavailable(err.to_string()))
}

/// Local wrapper so closures returning core results can run inside diesel
/// transactions, which require `From<diesel::result::Error>` on the error.
pub struct TxError(pub Error);

impl From<DieselError> for TxError {
    fn from(err: DieselError) -> Self {
        TxError(map_diesel_error(err))
    }
}

impl From<Error> for TxError {
    fn from(err: Error) -> Self {
        TxError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_core_not_found() {
        assert!(matches!(
            map_diesel_error(DieselError::NotFound),
            Error::NotFound(_)
        ));
    }
}
