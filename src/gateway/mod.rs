//! Payment gateway adapters.
//!
//! Each adapter owns one external gateway's wire format: outbound redirect
//! construction and inbound callback parsing/verification. The reconciliation
//! engine (`services::payments`) is written against the typed records an
//! adapter produces, so adding a gateway means adding a module here.

pub mod gatepay;

use crate::entities::order;
use crate::errors::ServiceError;
use axum::http::StatusCode;
use serde::Serialize;

/// A gateway an order can be handed to for online payment.
pub trait PaymentGateway {
    fn name(&self) -> &'static str;

    /// Builds the signed auto-submit form payload that sends the customer's
    /// browser to the gateway.
    fn redirect_payload(&self, order: &order::Model) -> Result<RedirectPayload, ServiceError>;
}

/// Outbound redirect: gateway URL plus the form fields to POST to it.
#[derive(Debug, Clone, Serialize)]
pub struct RedirectPayload {
    pub gateway_url: String,
    pub fields: gatepay::RedirectFields,
}

/// Rejection taxonomy for the inbound callback protocol. Every variant is an
/// expected business-rule rejection with a fixed plain-text body; only
/// `Store` signals the gateway to retry.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("Invalid merchant")]
    InvalidMerchant,

    #[error("Order not found")]
    OrderNotFound,

    #[error("Amount mismatch")]
    AmountMismatch,

    #[error("Invalid request: {0}")]
    InvalidRequest(&'static str),

    #[error("Invalid checksum")]
    InvalidChecksum,

    #[error("Internal error")]
    Store(#[from] ServiceError),
}

impl From<sea_orm::DbErr> for CallbackError {
    fn from(err: sea_orm::DbErr) -> Self {
        CallbackError::Store(ServiceError::DatabaseError(err))
    }
}

impl CallbackError {
    /// Status + plain-text body on the callback wire. Never JSON, and never
    /// carrying the shared secret or any computed digest.
    pub fn wire_response(&self) -> (StatusCode, String) {
        match self {
            CallbackError::Store(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
            }
            other => (StatusCode::BAD_REQUEST, other.to_string()),
        }
    }
}
