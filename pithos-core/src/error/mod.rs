//! Core error types for Pithos

use thiserror::Error;

/// Main error type for Pithos operations
///
/// Backend failures are split into transient errors the storage fabric
/// recovers from by falling over to another backend, and fatal errors that
/// must surface to the caller. Legitimate absence (unknown handle, missing
/// record) is expressed as `Option`, never as an error.
#[derive(Error, Debug)]
pub enum PithosError {
    /// The backend could not be reached or refused authentication.
    /// Transient: the fabric retries the next backend in rotation.
    #[error("backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// The backend refused this particular payload (size, type, quota).
    /// Transient for the fabric, but never retried on the same backend.
    #[error("backend {backend} rejected payload: {reason}")]
    PayloadRejected { backend: String, reason: String },

    /// Every backend in rotation was tried and failed an upload.
    #[error("all {attempts} backends failed to store the payload")]
    AllBackendsFailed {
        attempts: usize,
        #[source]
        last: Box<PithosError>,
    },

    /// Corrupt compressed or steganographic payload. Fatal for that blob;
    /// an unreadable table is surfaced, never silently treated as empty.
    #[error("decode error: {0}")]
    Decode(String),

    /// Reserved for the optimistic write-version check; not raised today.
    #[error("write conflict on table {table}: {reason}")]
    Conflict { table: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Pithos operations
pub type PithosResult<T> = Result<T, PithosError>;

impl PithosError {
    /// Whether the storage fabric may recover from this error by trying
    /// another backend.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PithosError::BackendUnavailable { .. } | PithosError::PayloadRejected { .. }
        )
    }
}

impl From<serde_json::Error> for PithosError {
    fn from(err: serde_json::Error) -> Self {
        PithosError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_display() {
        let unavailable = PithosError::BackendUnavailable {
            backend: "video-host".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            format!("{}", unavailable),
            "backend video-host unavailable: connection refused"
        );

        let rejected = PithosError::PayloadRejected {
            backend: "photo-host".to_string(),
            reason: "payload too large".to_string(),
        };
        assert!(format!("{}", rejected).contains("rejected payload"));

        let decode = PithosError::Decode("bad gzip stream".to_string());
        assert_eq!(format!("{}", decode), "decode error: bad gzip stream");

        let conflict = PithosError::Conflict {
            table: "videos".to_string(),
            reason: "stale updatedAt".to_string(),
        };
        assert!(format!("{}", conflict).contains("videos"));
    }

    #[test]
    fn test_all_backends_failed_keeps_source() {
        let last = PithosError::BackendUnavailable {
            backend: "bot-channel".to_string(),
            reason: "timed out".to_string(),
        };
        let err = PithosError::AllBackendsFailed {
            attempts: 3,
            last: Box::new(last),
        };

        assert!(format!("{}", err).contains("all 3 backends"));
        let source = std::error::Error::source(&err).expect("source should be set");
        assert!(source.to_string().contains("timed out"));
    }

    #[test]
    fn test_transient_classification() {
        let unavailable = PithosError::BackendUnavailable {
            backend: "b".to_string(),
            reason: "r".to_string(),
        };
        let rejected = PithosError::PayloadRejected {
            backend: "b".to_string(),
            reason: "r".to_string(),
        };
        let decode = PithosError::Decode("corrupt".to_string());
        let exhausted = PithosError::AllBackendsFailed {
            attempts: 2,
            last: Box::new(PithosError::Decode("x".to_string())),
        };

        assert!(unavailable.is_transient());
        assert!(rejected.is_transient());
        assert!(!decode.is_transient());
        assert!(!exhausted.is_transient());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: PithosError = io_err.into();

        match err {
            PithosError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::PermissionDenied),
            _ => panic!("Expected Io error variant"),
        }
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let parse_result: Result<serde_json::Value, serde_json::Error> =
            serde_json::from_str("{invalid json}");

        assert!(parse_result.is_err());
        let err: PithosError = parse_result.unwrap_err().into();
        assert!(matches!(err, PithosError::Serialization(_)));
    }
}
