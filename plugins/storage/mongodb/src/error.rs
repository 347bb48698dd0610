use mongodb::error::{
    Error, ErrorKind, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT, WriteFailure,
};

use docbatch_api::StoreError;

const DUPLICATE_KEY: i32 = 11000;

/// Translate a driver error into a `StoreError` of the matching kind.
pub(crate) fn store_error(err: &Error) -> StoreError {
    classify(err.to_string(), err.contains_label(TRANSIENT_TRANSACTION_ERROR), &err.kind)
}

fn classify(message: String, transient: bool, kind: &ErrorKind) -> StoreError {
    if transient {
        return StoreError::write_conflict(message);
    }
    match kind {
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY => {
            StoreError::duplicate_key(message)
        }
        ErrorKind::InsertMany(e)
            if e
                .write_errors
                .as_ref()
                .is_some_and(|errors| errors.iter().any(|w| w.code == DUPLICATE_KEY)) =>
        {
            StoreError::duplicate_key(message)
        }
        ErrorKind::Command(e) if e.code == DUPLICATE_KEY => StoreError::duplicate_key(message),
        ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } | ErrorKind::DnsResolve { .. } => {
            StoreError::connection(message)
        }
        ErrorKind::Transaction { .. } | ErrorKind::SessionsNotSupported => StoreError::session(message),
        ErrorKind::BsonSerialization(_) | ErrorKind::BsonDeserialization(_) => StoreError::encoding(message),
        _ => StoreError::other(message),
    }
}

/// Error handed back to the driver when a transaction body fails.
///
/// Transient failures return the driver's own error so its labels reach the
/// driver's retry logic. Everything else travels as a custom error and is
/// recovered unchanged by `from_driver`.
pub(crate) fn into_driver(err: StoreError, driver: Option<Error>) -> Error {
    match driver {
        Some(driver) if err.is_transient() => driver,
        _ => Error::custom(err),
    }
}

/// Outcome of a driver-run transaction as a `StoreError`.
pub(crate) fn from_driver(err: Error) -> StoreError {
    if let Some(carried) = err.get_custom::<StoreError>() {
        return carried.clone();
    }
    if err.contains_label(TRANSIENT_TRANSACTION_ERROR) || err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) {
        return StoreError::transaction(format!("retries exhausted: {err}"));
    }
    store_error(&err)
}

#[cfg(test)]
mod tests {
    use docbatch_api::ErrorKind as StoreErrorKind;
    use mongodb::bson::{doc, from_document};
    use mongodb::error::{CommandError, InsertManyError, WriteError};

    use super::*;

    fn io_error() -> Error {
        Error::from(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"))
    }

    fn duplicate_write_error() -> WriteError {
        from_document(doc! {
            "code": DUPLICATE_KEY,
            "codeName": "DuplicateKey",
            "errmsg": "E11000 duplicate key error collection: test.bookInfo dup key: { _id: \"2\" }",
        })
        .unwrap()
    }

    #[test]
    fn io_errors_are_connection_errors() {
        assert_eq!(store_error(&io_error()).kind(), StoreErrorKind::Connection);
    }

    #[test]
    fn transient_label_wins_over_kind() {
        let err = io_error();
        let mapped = classify(err.to_string(), true, &err.kind);
        assert_eq!(mapped.kind(), StoreErrorKind::WriteConflict);
        assert!(mapped.is_transient());
    }

    #[test]
    fn duplicate_key_on_single_write() {
        let kind = ErrorKind::Write(WriteFailure::WriteError(duplicate_write_error()));
        let mapped = classify("E11000".into(), false, &kind);
        assert_eq!(mapped.kind(), StoreErrorKind::DuplicateKey);
    }

    #[test]
    fn duplicate_key_on_insert_many() {
        let err: InsertManyError = from_document(doc! {
            "writeErrors": [{
                "index": 1,
                "code": DUPLICATE_KEY,
                "codeName": "DuplicateKey",
                "errmsg": "E11000 duplicate key error",
            }],
        })
        .unwrap();
        let mapped = classify("E11000".into(), false, &ErrorKind::InsertMany(err));
        assert_eq!(mapped.kind(), StoreErrorKind::DuplicateKey);
    }

    #[test]
    fn duplicate_key_on_command() {
        let err: CommandError = from_document(doc! {
            "code": DUPLICATE_KEY,
            "codeName": "DuplicateKey",
            "errmsg": "E11000 duplicate key error",
        })
        .unwrap();
        let mapped = classify("E11000".into(), false, &ErrorKind::Command(err));
        assert_eq!(mapped.kind(), StoreErrorKind::DuplicateKey);

        let other: CommandError = from_document(doc! {
            "code": 50,
            "codeName": "MaxTimeMSExpired",
            "errmsg": "operation exceeded time limit",
        })
        .unwrap();
        let mapped = classify("timeout".into(), false, &ErrorKind::Command(other));
        assert_eq!(mapped.kind(), StoreErrorKind::Other);
    }

    #[test]
    fn body_errors_survive_the_driver() {
        let original = StoreError::duplicate_key("E11000 dup key: { _id: \"2\" }").with_context("bulk write");
        let back = from_driver(into_driver(original.clone(), Some(io_error())));
        assert_eq!(back, original);
    }

    #[test]
    fn transient_body_errors_hand_back_the_driver_error() {
        let carried = into_driver(StoreError::write_conflict("conflict"), Some(io_error()));
        assert!(carried.get_custom::<StoreError>().is_none());
        assert!(matches!(*carried.kind, ErrorKind::Io(_)));

        // Without a driver error there is nothing to retry on.
        let carried = into_driver(StoreError::write_conflict("conflict"), None);
        assert!(carried.get_custom::<StoreError>().is_some());
    }

    #[test]
    fn unlabeled_driver_errors_are_mapped_by_kind() {
        assert_eq!(from_driver(io_error()).kind(), StoreErrorKind::Connection);
    }
}
