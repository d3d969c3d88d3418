use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use loomerp_auth::AuthzError;
use loomerp_core::DomainError;
use loomerp_infra::command_dispatcher::DispatchError;
use loomerp_infra::projections::StatusBoardError;

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::InvalidTransition { .. } => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_transition", err.to_string())
        }
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DispatchError::Unauthorized(msg) => json_error(StatusCode::FORBIDDEN, "unauthorized", msg),
        DispatchError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DispatchError::Deserialize(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
        DispatchError::Publish(msg) => json_error(StatusCode::BAD_GATEWAY, "publish_error", msg),
        DispatchError::TenantIsolation(msg) => json_error(StatusCode::FORBIDDEN, "tenant_isolation", msg),
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    dispatch_error_to_response(err.into())
}

pub fn authz_error_to_response(err: AuthzError) -> axum::response::Response {
    json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string())
}

pub fn status_board_error_to_response(err: StatusBoardError) -> axum::response::Response {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "read_model_error", err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: DispatchError) -> StatusCode {
        dispatch_error_to_response(err).status()
    }

    #[test]
    fn lifecycle_failures_map_to_documented_codes() {
        let invalid = DispatchError::InvalidTransition {
            entity: "purchasing.order".to_string(),
            from: "draft".to_string(),
            to: "sent".to_string(),
        };
        assert_eq!(status_of(invalid), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_of(DispatchError::Unauthorized("x".into())), StatusCode::FORBIDDEN);
        assert_eq!(status_of(DispatchError::Concurrency("stale".into())), StatusCode::CONFLICT);
        assert_eq!(status_of(DispatchError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_of(DispatchError::Validation("bad".into())), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn malformed_ids_are_bad_requests() {
        let err = "not-a-uuid".parse::<loomerp_core::AggregateId>().unwrap_err();
        assert_eq!(domain_error_to_response(err).status(), StatusCode::BAD_REQUEST);
    }
}
