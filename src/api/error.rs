use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::errors::VmError;

/// JSON error body shared by the public API and the cluster RPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

pub fn status_for(err: &VmError) -> StatusCode {
    match err {
        VmError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
        VmError::NotFound { .. } => StatusCode::NOT_FOUND,
        VmError::AlreadyExists { .. } | VmError::DirectoryConflict { .. } => StatusCode::CONFLICT,
        VmError::ClusterNotReady { .. } | VmError::StorageUnavailable { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        VmError::RemoteOperationFailed { .. } => StatusCode::BAD_GATEWAY,
        VmError::NetworkNotFound { .. } => StatusCode::BAD_REQUEST,
        err if err.is_validation() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for VmError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            error!(kind = self.kind(), status = %status, "{}", self);
        }

        let mut body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        if let VmError::RemoteOperationFailed {
            operation,
            succeeded,
            failed,
        } = &self
        {
            body["operation"] = json!(operation);
            body["succeeded"] = json!(succeeded);
            body["failed"] = json!(failed);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    #[test]
    fn validation_errors_are_client_errors() {
        let cases = [
            VmError::InvalidName {
                name: "a".into(),
                reason: "too short".into(),
            },
            VmError::InvalidNodeCount { expected: 2, actual: 3 },
            VmError::UnknownNode { node: "node-x".into() },
            VmError::InvalidNodes { reason: "x".into() },
        ];
        for err in cases {
            assert_eq!(status_for(&err), StatusCode::BAD_REQUEST, "{}", err);
        }
    }

    #[test]
    fn conflicts_and_availability() {
        assert_eq!(
            status_for(&VmError::AlreadyExists { name: "web01".into() }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&VmError::DirectoryConflict {
                name: "web01".into(),
                path: PathBuf::from("/tmp/web01"),
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&VmError::ClusterNotReady { node: "node-a".into() }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&VmError::NotFound { name: "web01".into() }),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn remote_failures_are_bad_gateway() {
        let mut failed = BTreeMap::new();
        failed.insert("node-c".to_string(), "unreachable".to_string());
        let err = VmError::RemoteOperationFailed {
            operation: "create_vm".into(),
            succeeded: vec!["node-b".into()],
            failed,
        };
        assert_eq!(status_for(&err), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(&VmError::Store("disk full".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
