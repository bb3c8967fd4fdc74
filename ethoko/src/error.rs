//! Classification of the errors surfaced by the actions.
//!
//! User-actionable errors carry their own remediation message and are shown
//! verbatim. Internal errors are rendered generically and keep their cause
//! as the error source, which is only logged when debug is enabled.

/// The two classes of errors an action can fail with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input from the caller, with a specific remediation message.
    UserActionable,
    /// I/O failure or unforeseen condition.
    Internal,
}

/// Implemented by every error type that reaches the caller of an action.
pub trait Classify {
    fn class(&self) -> ErrorClass;

    fn is_user_actionable(&self) -> bool {
        self.class() == ErrorClass::UserActionable
    }
}

/// Renders an error for the caller: verbatim when user-actionable, otherwise
/// a generic message naming what was being done.
pub(crate) fn surface<E: Classify + std::fmt::Display>(err: &E, doing: &str) -> String {
    match err.class() {
        ErrorClass::UserActionable => err.to_string(),
        ErrorClass::Internal => format!(
            "An unexpected error occurred while {doing}. Run the command again with debug enabled for more details."
        ),
    }
}

/// Logs an error and its whole source chain.
pub(crate) fn log_error_chain(err: &dyn std::error::Error) {
    log::error!("{}", err);
    let mut source = err.source();
    while let Some(cause) = source {
        log::error!("  caused by: {}", cause);
        source = cause.source();
    }
}
