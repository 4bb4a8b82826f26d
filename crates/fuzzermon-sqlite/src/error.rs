use crate::{ArchId, Entity};
use rusqlite::ffi;
use thiserror::Error;

/// Storage-level failures callers are expected to tell apart.
///
/// These travel inside `anyhow::Error`; match on them with `err.downcast_ref::<StoreError>()`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate value for {column}")]
    Duplicate { column: String },
    #[error("referenced row does not exist")]
    MissingReference,
    #[error("constraint failed: {0}")]
    Check(String),
    #[error("{0}")]
    Immutable(String),
    #[error("host {hostname} belongs to arch {existing}, not {requested}")]
    HostArchMismatch { hostname: String, existing: ArchId, requested: ArchId },
    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: i64 },
}

/// Maps SQLite constraint failures onto `StoreError`, passing anything else through.
pub(crate) fn classify(err: rusqlite::Error) -> anyhow::Error {
    if let rusqlite::Error::SqliteFailure(code, msg) = &err {
        let msg = msg.clone().unwrap_or_default();
        let store = match code.extended_code {
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                // "UNIQUE constraint failed: arches.name"
                let column = msg.rsplit(": ").next().unwrap_or_default().to_string();
                Some(StoreError::Duplicate { column })
            }
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => Some(StoreError::MissingReference),
            ffi::SQLITE_CONSTRAINT_CHECK | ffi::SQLITE_CONSTRAINT_NOTNULL => Some(StoreError::Check(msg)),
            ffi::SQLITE_CONSTRAINT_TRIGGER => Some(StoreError::Immutable(msg)),
            _ => None,
        };
        if let Some(store) = store {
            return store.into();
        }
    }
    err.into()
}
