use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum NmdcError {
    #[error("NMDC request failed: {0}")]
    RemoteHttp(String),

    #[error("NMDC returned status {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("failed to decode NMDC response: {0}")]
    RemoteDecode(String),

    #[error("NMDC returned page token {0:?} which was already followed")]
    RepeatedPageToken(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),
}

impl NmdcError {
    /// Transport, status and decoding failures of the remote service.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            NmdcError::RemoteHttp(_)
                | NmdcError::RemoteStatus { .. }
                | NmdcError::RemoteDecode(_)
                | NmdcError::RepeatedPageToken(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, NmdcError::NotFound(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, NmdcError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_error_families() {
        assert!(NmdcError::RemoteHttp("reset".to_string()).is_remote());
        assert!(
            NmdcError::RemoteStatus {
                status: 502,
                message: "bad gateway".to_string()
            }
            .is_remote()
        );
        assert!(NmdcError::RepeatedPageToken("abc".to_string()).is_remote());
        assert!(NmdcError::NotFound("gone".to_string()).is_not_found());
        assert!(!NmdcError::NotFound("gone".to_string()).is_remote());
        assert!(NmdcError::Validation("bad".to_string()).is_validation());
    }
}
