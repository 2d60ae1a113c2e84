//! Stripe integration via REST API (no SDK dependency)

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppError, AppResult};

/// The slice of a payment intent the engine actually consumes.
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: String,
    pub amount: i64,
    pub latest_charge: Option<String>,
}

#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    currency: String,
}

impl StripeClient {
    pub fn new(secret_key: String, currency: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key,
            currency,
        }
    }

    /// Create a Stripe Customer tagged with our user id.
    pub async fn create_customer(
        &self,
        email: &str,
        name: Option<&str>,
        user_id: &str,
    ) -> AppResult<String> {
        let mut form = vec![("email", email), ("metadata[user_id]", user_id)];
        if let Some(name) = name {
            form.push(("name", name));
        }
        let resp: serde_json::Value = self
            .http
            .post("https://api.stripe.com/v1/customers")
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::gateway(format!("Stripe request failed: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::gateway(format!("Stripe response invalid: {e}")))?;

        resp["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| AppError::gateway(format!("Stripe create_customer failed: {resp}")))
    }

    /// Open a payment intent for an order; metadata carries the order and
    /// buyer ids so webhook events can be routed back.
    pub async fn create_payment_intent(
        &self,
        amount_minor: i64,
        customer_id: &str,
        order_id: &str,
        buyer_id: &str,
        description: &str,
    ) -> AppResult<PaymentIntent> {
        let amount = amount_minor.to_string();
        let resp: serde_json::Value = self
            .http
            .post("https://api.stripe.com/v1/payment_intents")
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&[
                ("amount", amount.as_str()),
                ("currency", self.currency.as_str()),
                ("customer", customer_id),
                ("description", description),
                ("metadata[order_id]", order_id),
                ("metadata[buyer_id]", buyer_id),
                ("automatic_payment_methods[enabled]", "true"),
            ])
            .send()
            .await
            .map_err(|e| AppError::gateway(format!("Stripe request failed: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::gateway(format!("Stripe response invalid: {e}")))?;

        parse_intent(&resp)
            .ok_or_else(|| AppError::gateway(format!("Payment intent creation failed: {resp}")))
    }

    pub async fn retrieve_payment_intent(&self, intent_id: &str) -> AppResult<PaymentIntent> {
        let resp: serde_json::Value = self
            .http
            .get(format!("https://api.stripe.com/v1/payment_intents/{intent_id}"))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| AppError::gateway(format!("Stripe request failed: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::gateway(format!("Stripe response invalid: {e}")))?;

        parse_intent(&resp)
            .ok_or_else(|| AppError::gateway(format!("Payment intent lookup failed: {resp}")))
    }

    /// Full refund of the charge behind a payment intent.
    pub async fn create_refund(&self, intent_id: &str, reason: &str) -> AppResult<String> {
        let resp: serde_json::Value = self
            .http
            .post("https://api.stripe.com/v1/refunds")
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&[("payment_intent", intent_id), ("reason", reason)])
            .send()
            .await
            .map_err(|e| AppError::gateway(format!("Stripe request failed: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::gateway(format!("Stripe response invalid: {e}")))?;

        resp["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| AppError::gateway(format!("Stripe refund failed: {resp}")))
    }
}

fn parse_intent(resp: &serde_json::Value) -> Option<PaymentIntent> {
    Some(PaymentIntent {
        id: resp["id"].as_str()?.to_string(),
        client_secret: resp["client_secret"].as_str().map(String::from),
        status: resp["status"].as_str()?.to_string(),
        amount: resp["amount"].as_i64()?,
        latest_charge: resp["latest_charge"].as_str().map(String::from),
    })
}

/// Verify Stripe webhook signature (HMAC-SHA256)
pub fn verify_webhook_signature(
    payload: &[u8],
    sig_header: &str,
    secret: &str,
) -> Result<(), &'static str> {
    let mut timestamp = "";
    let mut signature = "";
    for part in sig_header.split(',') {
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = t;
        } else if let Some(v) = part.strip_prefix("v1=") {
            signature = v;
        }
    }

    if timestamp.is_empty() || signature.is_empty() {
        return Err("Invalid Stripe-Signature header");
    }

    let signed_payload = format!("{timestamp}.{}", std::str::from_utf8(payload).unwrap_or(""));
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| "HMAC key error")?;
    mac.update(signed_payload.as_bytes());

    // Decode hex signature and use constant-time comparison via hmac::verify_slice
    let sig_bytes = hex::decode(signature).map_err(|_| "Invalid signature hex")?;
    mac.verify_slice(&sig_bytes)
        .map_err(|_| "Webhook signature mismatch")?;

    // Reject events older than 5 minutes to prevent replay attacks
    let ts: i64 = timestamp.parse().map_err(|_| "Invalid timestamp")?;
    let now = chrono::Utc::now().timestamp();
    if (now - ts).abs() > 300 {
        return Err("Webhook timestamp too old");
    }

    Ok(())
}
