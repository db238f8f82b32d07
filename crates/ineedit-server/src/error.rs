use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use ineedit_market::MarketError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Market(#[from] MarketError),

    #[error("Missing or unknown X-Account-Id")]
    Unauthenticated,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::Market(e) => match e {
                MarketError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
                MarketError::AlreadySold
                | MarketError::ListingUnavailable
                | MarketError::OfferNotPending
                | MarketError::DuplicateOffer
                | MarketError::DuplicateOrder
                | MarketError::AlreadyRefunded => StatusCode::CONFLICT,
                MarketError::OfferExpired => StatusCode::GONE,
                MarketError::Forbidden(_) => StatusCode::FORBIDDEN,
                MarketError::InvalidAmount(_)
                | MarketError::OutOfPriceBounds(_)
                | MarketError::ShippingUnavailable
                | MarketError::InvalidRefundReason(_)
                | MarketError::NoRecipients => StatusCode::UNPROCESSABLE_ENTITY,
                MarketError::NotFound(_) => StatusCode::NOT_FOUND,
                MarketError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                MarketError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServerError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ServerError::Market(e) => e.code(),
            ServerError::Unauthenticated => "unauthenticated",
            ServerError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = serde_json::json!({
            "error": message,
            "code": self.code(),
        });

        (status, axum::Json(body)).into_response()
    }
}
