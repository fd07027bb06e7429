//! Demuxer configuration

use crate::klv::MAX_KLV_LENGTH;
use crate::time::MSECOND;

/// Smallest accepted cross-track drift, in nanoseconds
pub const MIN_MAX_DRIFT: u64 = 100 * MSECOND;

/// Default cross-track drift, in nanoseconds
pub const DEFAULT_MAX_DRIFT: u64 = 100 * MSECOND;

/// The header partition pack must start within this many bytes
pub const DEFAULT_MAX_RUN_IN: u64 = 64 * 1024;

/// Options for a [`Demuxer`](crate::Demuxer)
///
/// Built with chained setters starting from the defaults.
///
/// # Example
///
/// ```
/// use mxf_demux::{DemuxConfig, MSECOND};
///
/// let config = DemuxConfig::new()
///     .max_drift(500 * MSECOND)
///     .pull_footer_metadata(false);
/// assert_eq!(config.max_drift, 500 * MSECOND);
///
/// // values below the minimum are raised to it
/// let config = DemuxConfig::new().max_drift(MSECOND);
/// assert_eq!(config.max_drift, 100 * MSECOND);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemuxConfig {
    /// Maximum time any output stream may run ahead of the slowest one
    pub max_drift: u64,
    /// UMID (64 hex digits, optionally `urn:smpte:umid:` prefixed) of the
    /// package to play instead of the default choice
    pub requested_package: Option<String>,
    /// Read final metadata from the footer when the header partition is
    /// open or incomplete (pull mode only)
    pub pull_footer_metadata: bool,
    pub max_run_in: u64,
    /// Largest KLV payload the demuxer will read into memory
    pub max_klv_length: u64,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            max_drift: DEFAULT_MAX_DRIFT,
            requested_package: None,
            pull_footer_metadata: true,
            max_run_in: DEFAULT_MAX_RUN_IN,
            max_klv_length: MAX_KLV_LENGTH,
        }
    }
}

impl DemuxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum drift in nanoseconds, at least [`MIN_MAX_DRIFT`].
    pub fn max_drift(mut self, max_drift: u64) -> Self {
        self.max_drift = max_drift.max(MIN_MAX_DRIFT);
        self
    }

    pub fn package(mut self, umid: impl Into<String>) -> Self {
        self.requested_package = Some(umid.into());
        self
    }

    pub fn pull_footer_metadata(mut self, pull: bool) -> Self {
        self.pull_footer_metadata = pull;
        self
    }

    pub fn max_run_in(mut self, max_run_in: u64) -> Self {
        self.max_run_in = max_run_in;
        self
    }

    pub fn max_klv_length(mut self, max_klv_length: u64) -> Self {
        self.max_klv_length = max_klv_length;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DemuxConfig::new();
        assert_eq!(config.max_drift, 100 * MSECOND);
        assert!(config.requested_package.is_none());
        assert!(config.pull_footer_metadata);
        assert_eq!(config.max_run_in, 65536);
        assert_eq!(config.max_klv_length, MAX_KLV_LENGTH);
    }

    #[test]
    fn test_builder_chain() {
        let config = DemuxConfig::new()
            .package("urn:smpte:umid:00")
            .max_drift(0)
            .max_run_in(1024);
        assert_eq!(config.requested_package.as_deref(), Some("urn:smpte:umid:00"));
        assert_eq!(config.max_drift, MIN_MAX_DRIFT);
        assert_eq!(config.max_run_in, 1024);
    }
}
