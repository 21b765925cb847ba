//! GatePay redirect gateway adapter.
//!
//! GatePay is a redirect gateway with a two-phase server-to-server callback:
//! a precheck ("will you accept payment for this bill?") followed by a
//! confirm ("the customer has paid"). Both arrive as form-encoded POSTs with
//! `pg_*` fields and expect `text/plain` answers.
//!
//! The confirm checksum is the lowercase-hex SHA-256 digest of the direct
//! concatenation, in this order, of:
//!
//! ```text
//! merchant id | amount (two decimals) | secret key | bill number
//!            | payer account | transaction id | transaction date
//! ```
//!
//! The amount fed into the digest is always formatted from the order's
//! stored total with [`format_amount`], so initiation and verification use
//! byte-identical strings. The tolerance and field order here are GatePay
//! conventions; other gateways substitute their own documented values.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use super::{CallbackError, PaymentGateway, RedirectPayload};
use crate::config::GatewayConfig;
use crate::entities::order;
use crate::errors::ServiceError;

/// Maximum difference between the callback amount and the stored order total
/// that still counts as the same amount. Absorbs rounding drift between the
/// gateway's formatter and ours.
pub const AMOUNT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Raw form mirror of an inbound callback. Everything is optional here; the
/// typed records below enforce which fields each phase requires.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCallback {
    #[serde(rename = "pg_merchant_id")]
    pub merchant_id: Option<String>,
    #[serde(rename = "pg_bill_no")]
    pub bill_no: Option<String>,
    #[serde(rename = "pg_amount")]
    pub amount: Option<String>,
    #[serde(rename = "pg_precheck")]
    pub precheck: Option<String>,
    #[serde(rename = "pg_payer_account")]
    pub payer_account: Option<String>,
    #[serde(rename = "pg_trans_id")]
    pub trans_id: Option<String>,
    #[serde(rename = "pg_trans_date")]
    pub trans_date: Option<String>,
    #[serde(rename = "pg_checksum")]
    pub checksum: Option<String>,
}

/// A fully-populated, phase-tagged callback.
#[derive(Debug, Clone)]
pub enum CallbackRequest {
    Precheck(PrecheckCallback),
    Confirm(ConfirmCallback),
}

#[derive(Debug, Clone)]
pub struct PrecheckCallback {
    pub merchant_id: String,
    pub bill_no: String,
    pub amount: String,
}

#[derive(Debug, Clone)]
pub struct ConfirmCallback {
    pub merchant_id: String,
    pub bill_no: String,
    pub amount: String,
    pub payer_account: String,
    pub trans_id: String,
    /// Participates in the checksum; GatePay omits it on some legacy
    /// terminals, in which case the digest is computed over the empty string.
    pub trans_date: String,
    pub checksum: String,
}

impl CallbackRequest {
    /// Parses a raw form into a typed record, or names the first missing
    /// required field.
    pub fn parse(raw: RawCallback) -> Result<Self, CallbackError> {
        let merchant_id = require(raw.merchant_id, "pg_merchant_id")?;
        let bill_no = require(raw.bill_no, "pg_bill_no")?;
        let amount = require(raw.amount, "pg_amount")?;

        if raw.precheck.as_deref() == Some("1") {
            return Ok(CallbackRequest::Precheck(PrecheckCallback {
                merchant_id,
                bill_no,
                amount,
            }));
        }

        let payer_account = require(raw.payer_account, "pg_payer_account")?;
        let trans_id = require(raw.trans_id, "pg_trans_id")?;
        let checksum = require(raw.checksum, "pg_checksum")?;
        let trans_date = raw.trans_date.unwrap_or_default();

        Ok(CallbackRequest::Confirm(ConfirmCallback {
            merchant_id,
            bill_no,
            amount,
            payer_account,
            trans_id,
            trans_date,
            checksum,
        }))
    }
}

fn require(value: Option<String>, field: &'static str) -> Result<String, CallbackError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(CallbackError::InvalidRequest(field)),
    }
}

/// Formats an amount with exactly two decimal digits. Initiation and
/// verification must produce byte-identical strings for the same total, so
/// every amount that reaches the gateway or the digest goes through here.
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}

/// Whether a callback-supplied amount matches the authoritative order total
/// within the gateway tolerance.
pub fn amount_matches(callback_amount: Decimal, order_total: Decimal) -> bool {
    (callback_amount - order_total).abs() <= AMOUNT_TOLERANCE
}

/// Computes the confirm checksum over the documented field concatenation.
/// `amount` must come from [`format_amount`] applied to the order's stored
/// total, never from the callback.
pub fn compute_checksum(
    merchant_id: &str,
    amount: &str,
    secret_key: &str,
    bill_no: &str,
    payer_account: &str,
    trans_id: &str,
    trans_date: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(merchant_id.as_bytes());
    hasher.update(amount.as_bytes());
    hasher.update(secret_key.as_bytes());
    hasher.update(bill_no.as_bytes());
    hasher.update(payer_account.as_bytes());
    hasher.update(trans_id.as_bytes());
    hasher.update(trans_date.as_bytes());
    hex::encode(hasher.finalize())
}

/// Exact digest equality: full-string comparison after trimming and hex-case
/// folding. No prefix or partial matches.
pub fn checksum_eq(supplied: &str, expected: &str) -> bool {
    supplied.trim().eq_ignore_ascii_case(expected)
}

/// Form fields for the outbound auto-submit redirect.
#[derive(Debug, Clone, Serialize)]
pub struct RedirectFields {
    #[serde(rename = "pg_merchant_id")]
    pub merchant_id: String,
    #[serde(rename = "pg_bill_no")]
    pub bill_no: String,
    #[serde(rename = "pg_amount")]
    pub amount: String,
    #[serde(rename = "pg_description")]
    pub description: String,
    #[serde(rename = "pg_success_url")]
    pub success_url: String,
    #[serde(rename = "pg_failure_url")]
    pub failure_url: String,
}

/// The GatePay adapter. Holds the configured credentials; construction and
/// verification are otherwise stateless.
#[derive(Debug, Clone)]
pub struct GatePay {
    config: GatewayConfig,
}

impl GatePay {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    pub fn merchant_id(&self) -> &str {
        &self.config.merchant_id
    }

    /// Merchant-account gate, applied before any order lookup.
    pub fn verify_merchant(&self, merchant_id: &str) -> Result<(), CallbackError> {
        if merchant_id == self.config.merchant_id {
            Ok(())
        } else {
            Err(CallbackError::InvalidMerchant)
        }
    }

    /// Recomputes the checksum for a confirm callback against the order's
    /// stored total and compares it to the supplied digest.
    pub fn verify_checksum(&self, callback: &ConfirmCallback, order_total: Decimal) -> bool {
        let expected = compute_checksum(
            &self.config.merchant_id,
            &format_amount(order_total),
            &self.config.secret_key,
            &callback.bill_no,
            &callback.payer_account,
            &callback.trans_id,
            &callback.trans_date,
        );
        checksum_eq(&callback.checksum, &expected)
    }

    fn return_url(&self, bill_no: &str, result: &str) -> Result<String, ServiceError> {
        let mut url = Url::parse(&self.config.return_url)
            .map_err(|e| ServiceError::InternalError(format!("invalid return_url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("bill", bill_no)
            .append_pair("result", result);
        Ok(url.into())
    }
}

impl PaymentGateway for GatePay {
    fn name(&self) -> &'static str {
        "gatepay"
    }

    fn redirect_payload(&self, order: &order::Model) -> Result<RedirectPayload, ServiceError> {
        let bill_no = order.id.to_string();
        Ok(RedirectPayload {
            gateway_url: self.config.payment_url.clone(),
            fields: RedirectFields {
                merchant_id: self.config.merchant_id.clone(),
                bill_no: bill_no.clone(),
                amount: format_amount(order.total_amount),
                description: format!("Order {bill_no}"),
                success_url: self.return_url(&bill_no, "success")?,
                failure_url: self.return_url(&bill_no, "failure")?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order::{DeliveryMethod, OrderStatus, PaymentMethod, PaymentStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn config() -> GatewayConfig {
        GatewayConfig {
            merchant_id: "MERCHANT-001".to_string(),
            secret_key: "a_sufficiently_long_shared_secret".to_string(),
            payment_url: "https://gate.example.com/pay".to_string(),
            return_url: "https://shop.example.com/payment/return".to_string(),
        }
    }

    fn order_with_total(total: Decimal) -> order::Model {
        order::Model {
            id: Uuid::new_v4(),
            customer_id: None,
            status: OrderStatus::Pending,
            payment_method: PaymentMethod::GatePay,
            payment_status: PaymentStatus::Pending,
            payment_id: None,
            payment_data: None,
            total_amount: total,
            delivery_fee: dec!(0),
            delivery_method: DeliveryMethod::Pickup,
            delivery_address: None,
            customer_name: "Test".into(),
            customer_phone: "+100000000".into(),
            currency: "USD".into(),
            created_at: Utc::now(),
            updated_at: None,
            version: 1,
        }
    }

    fn confirm_raw() -> RawCallback {
        RawCallback {
            merchant_id: Some("MERCHANT-001".into()),
            bill_no: Some(Uuid::new_v4().to_string()),
            amount: Some("2500.00".into()),
            precheck: None,
            payer_account: Some("ACC-42".into()),
            trans_id: Some("TX-1001".into()),
            trans_date: Some("2024-03-01 12:00:00".into()),
            checksum: Some("deadbeef".into()),
        }
    }

    #[test]
    fn amount_formatting_is_two_decimals() {
        assert_eq!(format_amount(dec!(2500)), "2500.00");
        assert_eq!(format_amount(dec!(2500.5)), "2500.50");
        assert_eq!(format_amount(dec!(0.1)), "0.10");
        assert_eq!(format_amount(dec!(99.999)), "100.00");
    }

    #[test]
    fn amount_tolerance_is_one_cent() {
        assert!(amount_matches(dec!(2500.00), dec!(2500)));
        assert!(amount_matches(dec!(2500.01), dec!(2500)));
        assert!(amount_matches(dec!(2499.99), dec!(2500)));
        assert!(!amount_matches(dec!(2500.02), dec!(2500)));
        assert!(!amount_matches(dec!(2400.00), dec!(2500)));
    }

    #[test]
    fn checksum_is_deterministic_and_field_order_sensitive() {
        let a = compute_checksum("m", "10.00", "s", "b", "p", "t", "d");
        let b = compute_checksum("m", "10.00", "s", "b", "p", "t", "d");
        assert_eq!(a, b);

        // Swapping any two inputs must change the digest.
        let swapped = compute_checksum("m", "10.00", "s", "b", "p", "d", "t");
        assert_ne!(a, swapped);
    }

    #[test]
    fn checksum_comparison_folds_hex_case_but_not_content() {
        let digest = compute_checksum("m", "10.00", "s", "b", "p", "t", "d");
        assert!(checksum_eq(&digest.to_uppercase(), &digest));
        assert!(checksum_eq(&format!("  {digest}  "), &digest));

        // Flip one hex nibble: must not match.
        let mut tampered = digest.clone().into_bytes();
        tampered[0] = if tampered[0] == b'0' { b'1' } else { b'0' };
        assert!(!checksum_eq(std::str::from_utf8(&tampered).unwrap(), &digest));

        // A prefix is not a match.
        assert!(!checksum_eq(&digest[..digest.len() - 1], &digest));
    }

    #[test]
    fn verify_checksum_binds_to_the_stored_total() {
        let gate = GatePay::new(config());
        let order = order_with_total(dec!(2500));
        let mut cb = ConfirmCallback {
            merchant_id: "MERCHANT-001".into(),
            bill_no: order.id.to_string(),
            amount: "2500.00".into(),
            payer_account: "ACC-42".into(),
            trans_id: "TX-1001".into(),
            trans_date: "2024-03-01 12:00:00".into(),
            checksum: String::new(),
        };
        cb.checksum = compute_checksum(
            "MERCHANT-001",
            "2500.00",
            &config().secret_key,
            &cb.bill_no,
            &cb.payer_account,
            &cb.trans_id,
            &cb.trans_date,
        );

        assert!(gate.verify_checksum(&cb, order.total_amount));
        // The digest is computed from the stored total, so a different order
        // total invalidates the same callback.
        assert!(!gate.verify_checksum(&cb, dec!(2400)));
    }

    #[test]
    fn parse_detects_precheck_phase() {
        let mut raw = confirm_raw();
        raw.precheck = Some("1".into());
        raw.payer_account = None;
        raw.trans_id = None;
        raw.checksum = None;

        match CallbackRequest::parse(raw).unwrap() {
            CallbackRequest::Precheck(p) => assert_eq!(p.amount, "2500.00"),
            CallbackRequest::Confirm(_) => panic!("expected precheck"),
        }
    }

    #[test]
    fn parse_confirm_requires_payer_trans_id_and_checksum() {
        let cases: [(&str, fn(&mut RawCallback)); 3] = [
            ("pg_payer_account", |r| r.payer_account = None),
            ("pg_trans_id", |r| r.trans_id = None),
            ("pg_checksum", |r| r.checksum = None),
        ];
        for (field, clear) in cases {
            let mut raw = confirm_raw();
            clear(&mut raw);
            match CallbackRequest::parse(raw) {
                Err(CallbackError::InvalidRequest(f)) => assert_eq!(f, field),
                other => panic!("expected InvalidRequest({field}), got {other:?}"),
            }
        }
    }

    #[test]
    fn parse_treats_blank_fields_as_missing() {
        let mut raw = confirm_raw();
        raw.trans_id = Some("   ".into());
        assert!(matches!(
            CallbackRequest::parse(raw),
            Err(CallbackError::InvalidRequest("pg_trans_id"))
        ));
    }

    #[test]
    fn parse_confirm_tolerates_missing_trans_date() {
        let mut raw = confirm_raw();
        raw.trans_date = None;
        match CallbackRequest::parse(raw).unwrap() {
            CallbackRequest::Confirm(c) => assert_eq!(c.trans_date, ""),
            CallbackRequest::Precheck(_) => panic!("expected confirm"),
        }
    }

    #[test]
    fn merchant_gate_rejects_foreign_accounts() {
        let gate = GatePay::new(config());
        assert!(gate.verify_merchant("MERCHANT-001").is_ok());
        assert!(matches!(
            gate.verify_merchant("MERCHANT-002"),
            Err(CallbackError::InvalidMerchant)
        ));
    }

    #[test]
    fn redirect_payload_carries_bill_number_and_formatted_amount() {
        let gate = GatePay::new(config());
        let order = order_with_total(dec!(2500));
        let payload = gate.redirect_payload(&order).unwrap();

        assert_eq!(payload.gateway_url, "https://gate.example.com/pay");
        assert_eq!(payload.fields.bill_no, order.id.to_string());
        assert_eq!(payload.fields.amount, "2500.00");
        assert!(payload
            .fields
            .success_url
            .contains(&format!("bill={}", order.id)));
        assert!(payload.fields.success_url.contains("result=success"));
        assert!(payload.fields.failure_url.contains("result=failure"));
    }
}
