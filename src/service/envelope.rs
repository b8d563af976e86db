use serde::Serialize;

// ============================================================================
// Result Envelope
// ============================================================================
//
// Every orchestrator operation resolves to {status, success, result|errors}
// so a thin controller can map it directly onto a transport response without
// knowing any business rules.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Caller broke a protocol precondition (missing token, no lock held).
    Precondition,
    /// Absent or already locked; deliberately ambiguous to callers.
    NotFound,
    /// Domain rule rejected the request (illegal transition, bad payload).
    Validation,
    /// A required collaborator (payment) failed.
    Collaborator,
    /// Infrastructure fault in the store.
    Storage,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceError {
    pub category: ErrorCategory,
    pub code: String,
    pub detail: String,
}

impl ServiceError {
    pub fn new(category: ErrorCategory, code: &str, detail: impl Into<String>) -> Self {
        Self {
            category,
            code: code.to_string(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceResponse<T> {
    pub status: u16,
    pub success: bool,
    pub result: Option<T>,
    pub errors: Vec<ServiceError>,
}

impl<T> ServiceResponse<T> {
    pub fn ok(result: T) -> Self {
        Self {
            status: 200,
            success: true,
            result: Some(result),
            errors: Vec::new(),
        }
    }

    pub fn created(result: T) -> Self {
        Self {
            status: 201,
            success: true,
            result: Some(result),
            errors: Vec::new(),
        }
    }

    pub fn error(status: u16, error: ServiceError) -> Self {
        Self {
            status,
            success: false,
            result: None,
            errors: vec![error],
        }
    }

    pub fn errors(status: u16, errors: Vec<ServiceError>) -> Self {
        Self {
            status,
            success: false,
            result: None,
            errors,
        }
    }

    pub fn missing_token() -> Self {
        Self::error(
            400,
            ServiceError::new(
                ErrorCategory::Precondition,
                "missing_idempotency_token",
                "an idempotency token is required for this operation",
            ),
        )
    }

    /// Intentionally does not distinguish "no such order" from "locked by
    /// another holder" - existence is observable through the read path only.
    pub fn not_found_or_locked() -> Self {
        Self::error(
            404,
            ServiceError::new(
                ErrorCategory::NotFound,
                "not_found_or_locked",
                "order not found or already locked",
            ),
        )
    }

    pub fn not_found() -> Self {
        Self::error(
            404,
            ServiceError::new(ErrorCategory::NotFound, "not_found", "order not found"),
        )
    }

    pub fn validation(code: &str, detail: impl Into<String>) -> Self {
        Self::error(
            422,
            ServiceError::new(ErrorCategory::Validation, code, detail),
        )
    }

    pub fn collaborator(code: &str, detail: impl Into<String>) -> Self {
        Self::error(
            502,
            ServiceError::new(ErrorCategory::Collaborator, code, detail),
        )
    }

    pub fn storage(detail: impl Into<String>) -> Self {
        Self::error(
            500,
            ServiceError::new(ErrorCategory::Storage, "storage_error", detail),
        )
    }
}
