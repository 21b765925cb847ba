use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::order::{self, PaymentData, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::gatepay::{
        amount_matches, CallbackRequest, ConfirmCallback, GatePay, PrecheckCallback, RawCallback,
    },
    gateway::{CallbackError, PaymentGateway, RedirectPayload},
    repositories::OrderRepository,
};

/// Outcome of a verified confirm callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// This delivery applied the success mutation.
    Applied,
    /// The order was already `Success`; nothing was mutated. The caller
    /// answers with the same acknowledgement as a fresh success.
    AlreadyApplied,
}

/// The callback reconciliation engine.
///
/// Decides, per verified callback, whether to accept, reject, or ignore it,
/// and applies the resulting mutation through the Order Store exactly once.
/// Order state is re-read from the store on every callback; nothing is cached
/// across requests.
#[derive(Clone)]
pub struct PaymentService {
    repository: OrderRepository,
    gateway: GatePay,
    event_sender: EventSender,
}

impl PaymentService {
    pub fn new(repository: OrderRepository, gateway: GatePay, event_sender: EventSender) -> Self {
        Self {
            repository,
            gateway,
            event_sender,
        }
    }

    pub fn gateway(&self) -> &GatePay {
        &self.gateway
    }

    /// Builds the outbound redirect for an unpaid gateway order. Used at
    /// checkout and again when the storefront offers a payment retry.
    pub async fn redirect_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<RedirectPayload, ServiceError> {
        let order = self
            .repository
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        if order.payment_method != PaymentMethod::GatePay {
            return Err(ServiceError::InvalidOperation(
                "Order is not paid through the gateway".to_string(),
            ));
        }
        if order.payment_status == PaymentStatus::Success {
            return Err(ServiceError::InvalidOperation(
                "Order is already paid".to_string(),
            ));
        }

        self.gateway.redirect_payload(&order)
    }

    /// Entry point for the callback endpoint: parse, dispatch by phase.
    pub async fn handle_callback(&self, raw: RawCallback) -> Result<(), CallbackError> {
        match CallbackRequest::parse(raw)? {
            CallbackRequest::Precheck(precheck) => self.handle_precheck(precheck).await,
            CallbackRequest::Confirm(confirm) => self.handle_confirm(confirm).await.map(|_| ()),
        }
    }

    /// Precheck phase: the gateway asks whether we will accept a payment for
    /// this bill number and amount. Pure gate, no mutation.
    #[instrument(skip(self, callback), fields(bill_no = %callback.bill_no))]
    pub async fn handle_precheck(
        &self,
        callback: PrecheckCallback,
    ) -> Result<(), CallbackError> {
        self.gateway.verify_merchant(&callback.merchant_id)?;

        let order = self.lookup_order(&callback.bill_no).await?;
        let amount = parse_amount(&callback.amount)?;

        if !amount_matches(amount, order.total_amount) {
            warn!(
                bill_no = %callback.bill_no,
                received = %callback.amount,
                "precheck amount does not match order total"
            );
            return Err(CallbackError::AmountMismatch);
        }

        info!(bill_no = %callback.bill_no, "precheck accepted");
        Ok(())
    }

    /// Confirm phase: the gateway asserts the payment completed.
    #[instrument(skip(self, callback), fields(bill_no = %callback.bill_no, trans_id = %callback.trans_id))]
    pub async fn handle_confirm(
        &self,
        callback: ConfirmCallback,
    ) -> Result<ConfirmOutcome, CallbackError> {
        self.gateway.verify_merchant(&callback.merchant_id)?;

        let order = self.lookup_order(&callback.bill_no).await?;
        let amount = parse_amount(&callback.amount)?;

        // Always against the stored total, never a client-supplied value.
        if !amount_matches(amount, order.total_amount) {
            warn!(
                bill_no = %callback.bill_no,
                received = %callback.amount,
                trans_id = %callback.trans_id,
                "confirm amount does not match order total"
            );
            return Err(CallbackError::AmountMismatch);
        }

        if !self.gateway.verify_checksum(&callback, order.total_amount) {
            // Terminal for this callback only; a later, correctly signed
            // confirm for the same order may still succeed.
            self.repository
                .mark_payment_failed(order.id, Some(&callback.trans_id))
                .await?;
            warn!(
                bill_no = %callback.bill_no,
                trans_id = %callback.trans_id,
                payer_account = %callback.payer_account,
                trans_date = %callback.trans_date,
                "confirm checksum verification failed"
            );
            self.notify_failure(order.id, Some(callback.trans_id.clone())).await;
            return Err(CallbackError::InvalidChecksum);
        }

        // Idempotency guard: a success already recorded stays untouched.
        if order.payment_status == PaymentStatus::Success {
            info!(bill_no = %callback.bill_no, "confirm re-delivered for settled order");
            return Ok(ConfirmOutcome::AlreadyApplied);
        }

        let data = PaymentData {
            payer_account: callback.payer_account.clone(),
            trans_date: callback.trans_date.clone(),
            amount: callback.amount.clone(),
        };

        let applied = self
            .repository
            .conditional_update_payment_success(order.id, &callback.trans_id, &data)
            .await?;

        if !applied {
            // A concurrent delivery won the conditional update between our
            // read and this write.
            info!(bill_no = %callback.bill_no, "confirm raced an earlier delivery");
            return Ok(ConfirmOutcome::AlreadyApplied);
        }

        info!(
            bill_no = %callback.bill_no,
            trans_id = %callback.trans_id,
            "payment confirmed"
        );

        if let Err(e) = self
            .event_sender
            .send(Event::PaymentSucceeded {
                order_id: order.id,
                transaction_id: callback.trans_id.clone(),
            })
            .await
        {
            warn!(error = %e, order_id = %order.id, "failed to send payment succeeded event");
        }

        Ok(ConfirmOutcome::Applied)
    }

    async fn lookup_order(&self, bill_no: &str) -> Result<order::Model, CallbackError> {
        // Bill numbers are the opaque order ids we generated; anything else
        // cannot name an order.
        let order_id =
            Uuid::parse_str(bill_no.trim()).map_err(|_| CallbackError::OrderNotFound)?;

        self.repository
            .find_by_id(order_id)
            .await
            .map_err(CallbackError::Store)?
            .ok_or(CallbackError::OrderNotFound)
    }

    async fn notify_failure(&self, order_id: Uuid, transaction_id: Option<String>) {
        if let Err(e) = self
            .event_sender
            .send(Event::PaymentFailed {
                order_id,
                transaction_id,
            })
            .await
        {
            warn!(error = %e, %order_id, "failed to send payment failed event");
        }
    }
}

fn parse_amount(raw: &str) -> Result<Decimal, CallbackError> {
    Decimal::from_str(raw.trim()).map_err(|_| CallbackError::InvalidRequest("pg_amount"))
}
