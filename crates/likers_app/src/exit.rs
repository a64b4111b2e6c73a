use likers_core::ConfigError;
use likers_engine::{ApiErrorKind, ExportError, PagerError, PersistError, StoreError};

pub const FAILURE: u8 = 1;
pub const CONFIG: u8 = 2;
pub const AUTH: u8 = 3;
pub const NOT_FOUND: u8 = 4;
pub const STORAGE: u8 = 5;

/// Invalid input that clap could not catch on its own.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct UsageError(pub String);

/// Process exit code for a failed command, from the first error in the chain
/// that has a dedicated code.
pub fn code_for(err: &anyhow::Error) -> u8 {
    err.chain().find_map(classify).unwrap_or(FAILURE)
}

fn classify(cause: &(dyn std::error::Error + 'static)) -> Option<u8> {
    if cause.is::<UsageError>() || cause.is::<ConfigError>() {
        return Some(CONFIG);
    }
    if cause.is::<StoreError>() || cause.is::<PersistError>() {
        return Some(STORAGE);
    }
    if let Some(err) = cause.downcast_ref::<PagerError>() {
        return Some(match err {
            PagerError::Fatal(api) => match api.kind {
                ApiErrorKind::Auth { .. } => AUTH,
                ApiErrorKind::NotFound => NOT_FOUND,
                _ => FAILURE,
            },
            PagerError::Storage(_) => STORAGE,
            _ => FAILURE,
        });
    }
    if let Some(ExportError::Store(_) | ExportError::Persist(_)) = cause.downcast_ref::<ExportError>() {
        return Some(STORAGE);
    }
    None
}
