//! Error types for mxf-demux

use std::io;

/// Result type for mxf-demux operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while demultiplexing an MXF stream
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from the byte source
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Not enough bytes are available yet
    ///
    /// In push mode this means "wait for more input"; in pull mode it is
    /// reported when a structure claims more bytes than its container holds.
    #[error("Truncated data at offset {offset}: need {needed} more bytes")]
    Truncated { offset: u64, needed: u64 },

    /// Structurally invalid KLV, BER length, partition or index data
    #[error("Malformed data at offset {offset}: {reason}")]
    Malformed { offset: u64, reason: String },

    /// Index, partition or metadata lookup failed
    #[error("Not found: {0}")]
    NotFound(String),

    /// Tracks of one interleaved package declare different edit rates
    #[error("Inconsistent edit rates in interleaved package: {first} vs {second}")]
    InconsistentEditRate { first: String, second: String },

    /// The index points somewhere else than where the essence actually is
    #[error("Essence offset mismatch: index says {expected}, stream is at {actual}")]
    OffsetMismatch { expected: u64, actual: u64 },

    /// Clip or custom wrapped essence cannot be read without an index
    #[error("Index table required for track {track_number:#010x} in body {body_sid}")]
    IndexRequired { track_number: u32, body_sid: u32 },

    /// The metadata graph has no resolvable Preface
    #[error("Preface could not be resolved")]
    PrefaceUnresolved,

    /// No usable essence track was found in the metadata
    #[error("No valid essence tracks")]
    NoValidTracks,

    /// Processing was interrupted by a flush request
    #[error("Flushing")]
    Flushing,

    /// The byte source has no more data
    #[error("End of stream")]
    EndOfStream,

    /// Feature not available in the current mode
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Packet arrived in a state where it cannot be handled
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Shorthand for [`Error::Malformed`].
    pub(crate) fn malformed(offset: u64, reason: impl Into<String>) -> Self {
        Error::Malformed {
            offset,
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::NotFound`].
    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    /// True for end-of-stream.
    pub fn is_eos(&self) -> bool {
        matches!(self, Error::EndOfStream)
    }

    /// True for conditions the engine can recover from by falling back to
    /// scanning or waiting for more data.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Truncated { .. } | Error::NotFound(_) | Error::PrefaceUnresolved
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::EndOfStream.is_eos());
        assert!(!Error::Flushing.is_eos());
        assert!(Error::not_found("segment").is_recoverable());
        assert!(Error::Truncated {
            offset: 0,
            needed: 4
        }
        .is_recoverable());
        assert!(!Error::malformed(17, "bad BER").is_recoverable());
        assert!(!Error::NoValidTracks.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::OffsetMismatch {
            expected: 100,
            actual: 120,
        };
        assert_eq!(
            err.to_string(),
            "Essence offset mismatch: index says 100, stream is at 120"
        );
    }
}
