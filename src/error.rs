use std::fmt;

/// Coarse classification of a failure, used for routing decisions (does a
/// poll group's timeout grow, does a TCP session close, is a group skipped)
/// rather than as a replacement for [`anyhow::Error`]. Call sites still
/// propagate the underlying error with `anyhow::Context`; `Failure` rides
/// alongside it as a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// A read/write on a serial port or TCP socket timed out or the
    /// underlying I/O failed in a way that may succeed on retry.
    TransientIo,
    /// A response frame was truncated, mis-framed, or failed CRC.
    ProtocolDecode,
    /// The remote device returned a Modbus exception response.
    ProtocolException(u8),
    /// Configuration failed validation (out-of-range counts, addresses).
    ConfigInvalid,
    /// A fixed-size table (groups, maps, clients) is already full.
    ResourceExhausted,
    /// Unrecoverable; the owning task should stop.
    Fatal,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::TransientIo => write!(f, "transient I/O error"),
            Failure::ProtocolDecode => write!(f, "protocol decode error"),
            Failure::ProtocolException(code) => write!(f, "modbus exception 0x{code:02x}"),
            Failure::ConfigInvalid => write!(f, "invalid configuration"),
            Failure::ResourceExhausted => write!(f, "resource exhausted"),
            Failure::Fatal => write!(f, "fatal error"),
        }
    }
}

impl std::error::Error for Failure {}
