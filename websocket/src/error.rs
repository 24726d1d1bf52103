use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("subscriber hub is shut down")]
    Closed,

    /// Socket-level failure on one client connection.
    #[error("connection error: {0}")]
    Connection(String),
}
