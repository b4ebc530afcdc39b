// Error taxonomy for the CLI. "No prediction" is deliberately not an
// error: an empty taxon_prediction list still produces a header-only
// report and a zero exit code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or unusable user-supplied input: consumer credentials,
    /// input paths. Recoverable by the user correcting the invocation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The remote service rejected our credentials outright (request or
    /// access token step, or a protected call that kept failing after a
    /// session refresh). Fatal.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A session-token refresh failed. The access token may still be
    /// valid; surfaced to the user with the server's message.
    #[error("session token refresh failed: {0}")]
    Session(String),

    /// Network failure, non-auth HTTP error, or a body that was not the
    /// JSON we expected.
    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Exit code for the process when this error reaches `main`.
    /// 2 mirrors clap's usage-error code for missing input; everything
    /// remote-side is 1.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Configuration(_) => 2,
            Error::Authentication(_) | Error::Session(_) | Error::Transport(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_cli_contract() {
        assert_eq!(Error::Configuration("x".into()).exit_code(), 2);
        assert_eq!(Error::Authentication("x".into()).exit_code(), 1);
        assert_eq!(Error::Session("x".into()).exit_code(), 1);
        assert_eq!(Error::Transport("x".into()).exit_code(), 1);
    }
}
