use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{GatewayError, Payment, PaymentGateway, Receivable, ReceivableStatus};
use crate::models::drop::MSAT_PER_SAT;

const API_KEY_HEADER: &str = "X-Api-Key";

/// LNbits wallet API client.
#[derive(Clone)]
pub struct LnbitsGateway {
    base_url: String,
    admin_key: String,
    client: reqwest::Client,
}

impl LnbitsGateway {
    pub fn new(base_url: &str, admin_key: &str, timeout: Duration) -> Result<Self, GatewayError> {
        assert!(!base_url.is_empty(), "LNbits URL must be provided");
        assert!(!admin_key.is_empty(), "LNbits admin key must be provided");
        assert!(
            timeout >= Duration::from_millis(100),
            "Timeout below 100ms is unsafe"
        );

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            admin_key: admin_key.to_string(),
            client,
        })
    }

    fn payments_url(&self) -> String {
        format!("{}/api/v1/payments", self.base_url)
    }

    async fn reject(response: reqwest::Response) -> GatewayError {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|err| format!("<unreadable body: {err}>"));
        warn!("LNbits rejected request with status {status}");
        GatewayError::Rejected { status, body }
    }
}

/// Only a refused connection proves the payment never reached LNbits.
fn classify_send_error(err: reqwest::Error) -> GatewayError {
    if err.is_connect() && !err.is_timeout() {
        return GatewayError::Transport(err);
    }
    warn!("LNbits payment request failed after it may have been sent: {err}");
    GatewayError::Indeterminate(err.to_string())
}

#[derive(Debug, Serialize)]
struct CreateInvoiceBody<'a> {
    out: bool,
    amount: u64,
    memo: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CreateInvoiceResponse {
    payment_hash: String,
    #[serde(alias = "bolt11")]
    payment_request: String,
}

#[derive(Debug, Serialize)]
struct PayInvoiceBody<'a> {
    out: bool,
    bolt11: &'a str,
}

#[derive(Debug, Deserialize)]
struct PayInvoiceResponse {
    payment_hash: String,
}

#[derive(Debug, Deserialize)]
struct PaymentLookupResponse {
    paid: bool,
    #[serde(default)]
    details: Option<PaymentDetails>,
}

#[derive(Debug, Deserialize)]
struct PaymentDetails {
    #[serde(default)]
    memo: Option<String>,
    /// Millisatoshis
    #[serde(default)]
    amount: Option<i64>,
}

#[async_trait]
impl PaymentGateway for LnbitsGateway {
    async fn create_receivable(
        &self,
        amount_msat: u64,
        memo: &str,
        notify_url: Option<&str>,
    ) -> Result<Receivable, GatewayError> {
        // LNbits takes whole sats for invoices
        let body = CreateInvoiceBody {
            out: false,
            amount: amount_msat / MSAT_PER_SAT,
            memo,
            webhook: notify_url,
        };
        let response = self
            .client
            .post(self.payments_url())
            .header(API_KEY_HEADER, &self.admin_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }

        let invoice: CreateInvoiceResponse = response
            .json()
            .await
            .map_err(|err| GatewayError::Decode(err.to_string()))?;
        debug!("LNbits issued invoice {}", invoice.payment_hash);

        Ok(Receivable {
            payment_request: invoice.payment_request,
            payment_hash: invoice.payment_hash,
        })
    }

    async fn pay(&self, payment_request: &str) -> Result<Payment, GatewayError> {
        let body = PayInvoiceBody {
            out: true,
            bolt11: payment_request,
        };
        let response = self
            .client
            .post(self.payments_url())
            .header(API_KEY_HEADER, &self.admin_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_send_error)?;

        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }

        // A 2xx means LNbits accepted the payment; a bad body does not undo it
        let payment: PayInvoiceResponse = response.json().await.map_err(|err| {
            warn!("LNbits accepted payment but the response was unreadable: {err}");
            GatewayError::Indeterminate(format!("accepted payment with unreadable body: {err}"))
        })?;
        Ok(Payment {
            payment_hash: payment.payment_hash,
        })
    }

    async fn lookup_receivable(
        &self,
        payment_hash: &str,
    ) -> Result<Option<ReceivableStatus>, GatewayError> {
        if payment_hash.is_empty() || !payment_hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Ok(None);
        }

        let url = format!("{}/{}", self.payments_url(), payment_hash);
        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.admin_key)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }

        let lookup: PaymentLookupResponse = response
            .json()
            .await
            .map_err(|err| GatewayError::Decode(err.to_string()))?;
        let details = lookup.details.unwrap_or(PaymentDetails {
            memo: None,
            amount: None,
        });

        Ok(Some(ReceivableStatus {
            paid: lookup.paid,
            memo: details.memo.unwrap_or_default(),
            amount_msat: details.amount.map(|amount| amount.unsigned_abs()),
        }))
    }
}
