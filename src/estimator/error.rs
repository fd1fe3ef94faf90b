//! Errors from talking to the learning server.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EstimatorError {
    /// Connecting to the learning server failed.
    #[error("learning server at {addr} unreachable: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// `send`/`receive` called before `connect`.
    #[error("not connected to the learning server")]
    NotConnected,

    /// The server hung up mid-exchange.
    #[error("learning server closed the connection")]
    Closed,

    #[error("learning server did not answer within {0}ms")]
    Timeout(u64),

    /// The server understood the request and refused it (`ERR <reason>`).
    #[error("learning server error: {0}")]
    Server(String),

    #[error("unexpected reply from learning server: {0:?}")]
    Parse(String),

    #[error("network error: {0}")]
    Network(#[from] std::io::Error),
}
