use std::time::Duration;

use tuile::{FieldError, Result, SyncError};

#[test]
fn test_error_display() {
    let err = SyncError::NotFound {
        table: "chantiers".to_string(),
        id: "c42".to_string(),
    };
    assert_eq!(err.to_string(), "row not found: chantiers/c42");
}

#[test]
fn test_result_alias() {
    fn returns_error() -> Result<()> {
        Err(SyncError::Configuration("no data service configured".into()))
    }
    assert!(returns_error().is_err());
}

// ============================================================================
// Transient error classification
// ============================================================================

#[test]
fn transient_errors() {
    assert!(SyncError::RateLimited { retry_after: None }.is_transient());
    assert!(
        SyncError::RateLimited {
            retry_after: Some(Duration::from_secs(1))
        }
        .is_transient()
    );
    assert!(SyncError::Http("connection reset".into()).is_transient());
    assert!(SyncError::ChannelDisconnected("socket closed".into()).is_transient());
    assert!(
        SyncError::Api {
            status: 502,
            message: "bad gateway".into()
        }
        .is_transient()
    );
}

#[test]
fn terminal_errors() {
    assert!(SyncError::PermissionDenied("rls".into()).is_terminal());
    assert!(SyncError::validation("bad row").is_terminal());
    assert!(
        SyncError::NotFound {
            table: "devis".into(),
            id: "d1".into()
        }
        .is_terminal()
    );
    assert!(SyncError::Json("expected array".into()).is_terminal());
    assert!(SyncError::Aborted("panicked".into()).is_terminal());
    assert!(
        SyncError::Api {
            status: 404,
            message: "not found".into()
        }
        .is_terminal()
    );
}

#[test]
fn network_errors_are_the_offline_ones() {
    assert!(SyncError::Http("dns failure".into()).is_network());
    assert!(SyncError::ChannelDisconnected("closed".into()).is_network());
    // A server error is transient but not a network failure.
    let server = SyncError::Api {
        status: 502,
        message: "bad gateway".into(),
    };
    assert!(server.is_transient());
    assert!(!server.is_network());
    assert_eq!(server.kind(), "api");
    assert_eq!(SyncError::RateLimited { retry_after: None }.kind(), "rate_limited");
}

#[test]
fn retry_after_only_for_rate_limits() {
    let err = SyncError::RateLimited {
        retry_after: Some(Duration::from_secs(3)),
    };
    assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    assert_eq!(SyncError::Http("x".into()).retry_after(), None);
}

// ============================================================================
// Validation detail
// ============================================================================

#[test]
fn field_errors_for_forms() {
    let err = SyncError::Validation {
        message: "null value in column \"nom_client\"".into(),
        fields: vec![FieldError::new("nom_client", "is required")],
    };
    assert_eq!(err.field_errors(), &[FieldError::new("nom_client", "is required")]);
    assert!(SyncError::validation("no detail").field_errors().is_empty());
    assert!(SyncError::PermissionDenied("rls".into()).field_errors().is_empty());
}

#[test]
fn json_errors_convert() {
    let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
    let err: SyncError = parse.unwrap_err().into();
    assert!(matches!(err, SyncError::Json(_)));
}
