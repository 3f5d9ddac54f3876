//! Payment gateway client
//!
//! The order engine never talks to the payment provider itself. It hands a
//! [`PaymentRequest`] to a gateway service over NATS request/reply and passes
//! the opaque client-side parameters it gets back straight to the caller.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::value_objects::{OrderId, OrderSn};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub order_id: OrderId,
    pub order_sn: OrderSn,
    pub amount: Decimal,
    pub open_id: String,
    pub client_ip: String,
    pub description: String,
}

/// Parameters the client passes to the provider's SDK; not interpreted here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentParams(pub serde_json::Value);

#[derive(Error, Debug)]
pub enum PaymentGatewayError {
    #[error("no payment gateway is configured")]
    NotConfigured,

    #[error("payment gateway unreachable: {0}")]
    Transport(String),

    #[error("payment gateway rejected order {order_sn}: {reason}")]
    Rejected { order_sn: String, reason: String },

    #[error("malformed payment gateway reply: {0}")]
    MalformedReply(#[from] serde_json::Error),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn prepare(&self, request: &PaymentRequest) -> Result<PaymentParams, PaymentGatewayError>;
}

#[derive(Deserialize)]
struct GatewayReply {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    params: Option<serde_json::Value>,
}

#[derive(Clone, Debug)]
pub struct NatsPaymentGateway {
    client: async_nats::Client,
    subject: String,
}

impl NatsPaymentGateway {
    pub fn new(client: async_nats::Client, subject: impl Into<String>) -> Self { Self { client, subject: subject.into() } }
}

#[async_trait]
impl PaymentGateway for NatsPaymentGateway {
    async fn prepare(&self, request: &PaymentRequest) -> Result<PaymentParams, PaymentGatewayError> {
        let payload = serde_json::to_vec(request)?;
        debug!(order_sn = %request.order_sn, subject = %self.subject, "Requesting payment parameters");
        let message = self.client.request(self.subject.clone(), payload.into()).await
            .map_err(|e| PaymentGatewayError::Transport(e.to_string()))?;
        let reply: GatewayReply = serde_json::from_slice(&message.payload)?;
        match (reply.error, reply.params) {
            (Some(reason), _) => {
                warn!(order_sn = %request.order_sn, %reason, "Payment gateway rejected request");
                Err(PaymentGatewayError::Rejected { order_sn: request.order_sn.to_string(), reason })
            }
            (None, Some(params)) => Ok(PaymentParams(params)),
            (None, None) => Err(PaymentGatewayError::Rejected {
                order_sn: request.order_sn.to_string(),
                reason: "reply carried no parameters".into(),
            }),
        }
    }
}

/// Used when no NATS connection is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailablePaymentGateway;

#[async_trait]
impl PaymentGateway for UnavailablePaymentGateway {
    async fn prepare(&self, _request: &PaymentRequest) -> Result<PaymentParams, PaymentGatewayError> {
        Err(PaymentGatewayError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_shapes() {
        let ok: GatewayReply = serde_json::from_str(r#"{"params":{"package":"prepay_id=wx1"}}"#).unwrap();
        assert!(ok.error.is_none());
        assert_eq!(ok.params.unwrap()["package"], "prepay_id=wx1");
        let rejected: GatewayReply = serde_json::from_str(r#"{"error":"ORDERPAID"}"#).unwrap();
        assert_eq!(rejected.error.as_deref(), Some("ORDERPAID"));
    }

    #[tokio::test]
    async fn test_unavailable_gateway() {
        let request = PaymentRequest {
            order_id: OrderId(1), order_sn: OrderSn::from_stored("SN1"), amount: Decimal::ONE,
            open_id: "o".into(), client_ip: "127.0.0.1".into(), description: "order".into(),
        };
        assert!(matches!(UnavailablePaymentGateway.prepare(&request).await, Err(PaymentGatewayError::NotConfigured)));
    }
}
