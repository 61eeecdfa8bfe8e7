use serde::Serialize;

/// Error taxonomy for the checkout core.
///
/// Messages originating from the payment provider or the fulfillment backend
/// are carried verbatim; downstream support workflows depend on the literal
/// text, so nothing is translated or swallowed.
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    /// Local input validation failed. No network call was made.
    #[error("{0}")]
    Validation(String),

    /// The buyer has no provisioned custodial address for the requested
    /// currency. Provisioning happens out-of-band; this is not retried.
    #[error("No {currency} settlement address is provisioned for this account")]
    NoWallet { currency: String },

    /// The payment provider rejected the request. Message is the provider's
    /// own text, shown to the buyer unmodified.
    #[error("{0}")]
    ProviderRejected(String),

    /// Transport failure talking to an external service.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid payload: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The fulfillment backend failed the order, or its response could not
    /// be obtained. Terminal for the current order id.
    #[error("{0}")]
    Fulfillment(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CheckoutError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn fulfillment(message: impl Into<String>) -> Self {
        Self::Fulfillment(message.into())
    }
}

impl From<validator::ValidationErrors> for CheckoutError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(flatten_validation_errors(&errors))
    }
}

impl From<config::ConfigError> for CheckoutError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Collapses validator's nested error map into one form-level message,
/// preferring the custom messages attached to each rule.
fn flatten_validation_errors(errors: &validator::ValidationErrors) -> String {
    let mut parts: Vec<String> = Vec::new();
    for (field, kinds) in errors.errors() {
        if let validator::ValidationErrorsKind::Field(field_errors) = kinds {
            for err in field_errors {
                match &err.message {
                    Some(message) => parts.push(message.to_string()),
                    None => parts.push(format!("{}: {}", field, err.code)),
                }
            }
        }
    }
    if parts.is_empty() {
        "Invalid input".to_string()
    } else {
        parts.join("; ")
    }
}

/// Serialized shape for surfacing an error to the presentation layer.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl From<&CheckoutError> for ErrorResponse {
    fn from(err: &CheckoutError) -> Self {
        let kind = match err {
            CheckoutError::Validation(_) => "validation_error",
            CheckoutError::NoWallet { .. } => "no_wallet",
            CheckoutError::ProviderRejected(_) => "provider_rejected",
            CheckoutError::Http(_) => "http_error",
            CheckoutError::Serialization(_) => "serialization_error",
            CheckoutError::Fulfillment(_) => "fulfillment_error",
            CheckoutError::Config(_) => "config_error",
        };
        Self {
            error: kind.to_string(),
            message: err.to_string(),
        }
    }
}
