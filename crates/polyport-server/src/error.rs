use std::path::PathBuf;

use polyport_transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("no listeners configured")]
    NoListeners,

    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to set up {listener}: {source}")]
    Setup {
        listener: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to start {listener}: {source}")]
    Start {
        listener: String,
        #[source]
        source: TransportError,
    },

    #[error("{} listener(s) failed to stop cleanly: {}", .0.len(), join_errors(.0))]
    Stop(Vec<(String, TransportError)>),
}

fn join_errors(errors: &[(String, TransportError)]) -> String {
    errors
        .iter()
        .map(|(listener, e)| format!("{listener}: {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}
