use tracing::error;

/// Crate-wide error.  The detail of a failure is logged where it happens; the error itself only
/// carries a static description of what went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppError(pub &'static str);

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for AppError {}

/// Last stop for errors that end a call (or the process) early.
pub async fn handle_error(e: impl std::error::Error) {
    error!("ERROR: {e}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_description() {
        assert_eq!(AppError("realtime session closed").to_string(), "realtime session closed");
    }
}
