use thiserror::Error;

/// Errors surfaced by the simulator.
///
/// Protocol violations a peer can be answered on the wire never reach this
/// type: malformed encapsulation payloads get encapsulation status codes
/// and malformed CIP requests get a CIP general status. `ServerError`
/// covers the failures that end a connection or stop the server instead.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket-level failure (bind, accept, read, write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration value could not be parsed or is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The inbound byte stream could not be framed as encapsulation
    /// packets; the connection is closed because there is no delimiter to
    /// resynchronize on.
    #[error("framing error: {0}")]
    Frame(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
