//! Error taxonomy for the slideforge toolkit.
//!
//! Fatal conditions (`Io`, `Format`) abort a pipeline run; contract
//! violations (`Capability`, `Bounds`) fail fast and indicate a programming
//! error in the caller; `Aborted` is the clean-shutdown path for cooperative
//! cancellation. Solver convergence timeouts are deliberately *not* errors —
//! packing proceeds with its best-effort result (see `slideforge-solver`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Source or sink unreadable/unwritable. Fatal; partial output is left
    /// in place so a re-run can resume.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed model/renderer/metadata document or undecodable tile entry.
    #[error("format error: {0}")]
    Format(String),

    /// Operation the receiver cannot represent (e.g. requesting a finer LOD
    /// than the pyramid holds, or a parent assignment that would cycle).
    #[error("capability error: {0}")]
    Capability(String),

    /// Pixel access outside the image extent. Callers must clip.
    #[error("pixel ({x}, {y}) outside image extent {width}x{height}")]
    Bounds { x: i64, y: i64, width: u32, height: u32 },

    /// Cooperative cancellation observed; in-flight work finished, no new
    /// work was started.
    #[error("pipeline aborted")]
    Aborted,
}

impl Error {
    pub fn format(message: impl Into<String>) -> Self {
        Error::Format(message.into())
    }

    pub fn capability(message: impl Into<String>) -> Self {
        Error::Capability(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_error_display() {
        let err = Error::Bounds { x: -1, y: 12, width: 8, height: 8 };
        assert_eq!(err.to_string(), "pixel (-1, 12) outside image extent 8x8");
    }

    #[test]
    fn test_io_error_is_source() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
