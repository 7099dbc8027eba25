//! Crate-level error and exit statuses.
//!
//! Each subsystem keeps its own error enum. [`Error`] joins them for
//! callers that drive a whole run, and [`exit_status`] maps any failure
//! chain to the process exit code.

use thiserror::Error;

use crate::connection::ConnectionError;
use crate::executor::ExecutorError;
use crate::handlers::HandlerError;
use crate::inventory::InventoryError;
use crate::modules::ModuleError;
use crate::playbook::PlaybookError;
use crate::template::TemplateError;
use crate::vars::VarsError;
use crate::vault::VaultError;

pub type Result<T> = std::result::Result<T, Error>;

/// Invalid input or configuration
pub const EXIT_INVALID: i32 = 1;
/// At least one host failed or was unreachable
pub const EXIT_HOST_FAILED: i32 = 2;
/// Vault key missing or wrong
pub const EXIT_VAULT: i32 = 3;
/// Interrupted before the run finished
pub const EXIT_CANCELLED: i32 = 130;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Vars(#[from] VarsError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Playbook(#[from] PlaybookError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("run cancelled")]
    Cancelled,
}

impl Error {
    /// Host failures never reach here; a run reports them through
    /// [`RunReport::exit_code`](crate::executor::RunReport::exit_code).
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Vault(_) | Error::Template(TemplateError::Vault(_)) => EXIT_VAULT,
            Error::Cancelled => EXIT_CANCELLED,
            _ => EXIT_INVALID,
        }
    }
}

/// Exit status for a failure anywhere in `error`'s cause chain.
///
/// Transparent wrappers hide a vault error from the chain, so template
/// errors are matched by variant as well as vault errors by type.
pub fn exit_status(error: &anyhow::Error) -> i32 {
    error
        .chain()
        .find_map(|cause| {
            if let Some(e) = cause.downcast_ref::<Error>() {
                Some(e.exit_code())
            } else if cause.is::<VaultError>() {
                Some(EXIT_VAULT)
            } else if let Some(TemplateError::Vault(_)) = cause.downcast_ref::<TemplateError>() {
                Some(EXIT_VAULT)
            } else {
                None
            }
        })
        .unwrap_or(EXIT_INVALID)
}
