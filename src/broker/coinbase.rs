use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::prelude::*;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::{Broker, ExecutionReport, OrderType, PlacedOrder};
use crate::config::ExchangeSettings;
use crate::error::BrokerError;
use crate::models::{OrderBookTop, OrderStatus, Side};

/// Coinbase Exchange REST client.
///
/// Requests are signed with HMAC-SHA256 over `timestamp + method + path +
/// body`, keyed by the base64-decoded API secret.
pub struct CoinbaseBroker {
    client: Client,
    rest_url: String,
    api_key: String,
    api_secret: String,
}

#[derive(Debug, Deserialize)]
struct BookResponse {
    bids: Vec<(String, String, serde_json::Value)>,
    asks: Vec<(String, String, serde_json::Value)>,
}

#[derive(Debug, Serialize)]
struct NewOrderRequest<'a> {
    product_id: &'a str,
    side: &'a str,
    #[serde(rename = "type")]
    order_type: &'a str,
    size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    done_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    currency: String,
    available: String,
}

fn map_status(status: &str, done_reason: Option<&str>) -> OrderStatus {
    match status {
        "done" => match done_reason {
            Some("canceled") | Some("cancelled") => OrderStatus::Canceled,
            _ => OrderStatus::Filled,
        },
        "rejected" => OrderStatus::Rejected,
        _ => OrderStatus::Working,
    }
}

fn parse_price(value: &str, symbol: &str) -> Result<f64, BrokerError> {
    value
        .parse::<f64>()
        .map_err(|_| BrokerError::Api(format!("unparseable price level for {symbol}: {value}")))
}

impl CoinbaseBroker {
    pub fn new(settings: &ExchangeSettings) -> Self {
        Self {
            client: Client::new(),
            rest_url: settings.rest_url.clone(),
            api_key: settings.api_key.clone(),
            api_secret: settings.api_secret.clone(),
        }
    }

    fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> Result<String, BrokerError> {
        let key = BASE64_STANDARD
            .decode(&self.api_secret)
            .map_err(|_| BrokerError::Api("api secret is not valid base64".to_string()))?;
        let mut mac = Hmac::<Sha256>::new_from_slice(&key)
            .map_err(|_| BrokerError::Api("api secret rejected by hmac".to_string()))?;
        mac.update(format!("{timestamp}{method}{path}{body}").as_bytes());
        Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
    ) -> Result<T, BrokerError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string();
        let body_str = body.as_deref().unwrap_or("");
        let signature = self.sign(&timestamp, method.as_str(), path, body_str)?;

        let mut request = self
            .client
            .request(method, format!("{}{}", self.rest_url, path))
            .header("CB-ACCESS-KEY", &self.api_key)
            .header("CB-ACCESS-SIGN", signature)
            .header("CB-ACCESS-TIMESTAMP", timestamp)
            .header("User-Agent", "smartflow");
        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BrokerError::Api(format!("{status}: {text}")));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl Broker for CoinbaseBroker {
    async fn get_orderbook_data(&self, symbol: &str) -> Result<OrderBookTop, BrokerError> {
        let path = format!("/products/{symbol}/book?level=1");
        let book: BookResponse = self.request(Method::GET, &path, None).await?;

        let bid = book
            .bids
            .first()
            .ok_or_else(|| BrokerError::EmptyBook(symbol.to_string()))?;
        let ask = book
            .asks
            .first()
            .ok_or_else(|| BrokerError::EmptyBook(symbol.to_string()))?;

        Ok(OrderBookTop {
            best_bid: parse_price(&bid.0, symbol)?,
            best_bid_size: parse_price(&bid.1, symbol)?,
            best_offer: parse_price(&ask.0, symbol)?,
            best_offer_size: parse_price(&ask.1, symbol)?,
        })
    }

    async fn place_order(
        &self,
        symbol: &str,
        order_type: OrderType,
        side: Side,
        amount: f64,
        price: Option<f64>,
    ) -> Result<PlacedOrder, BrokerError> {
        let request = NewOrderRequest {
            product_id: symbol,
            side: side.as_str(),
            order_type: match order_type {
                OrderType::Limit => "limit",
                OrderType::Market => "market",
            },
            size: amount.to_string(),
            price: price.map(|p| p.to_string()),
        };
        let body = serde_json::to_string(&request)
            .map_err(|e| BrokerError::Api(format!("failed to encode order: {e}")))?;

        let order: OrderResponse = self.request(Method::POST, "/orders", Some(body)).await?;
        tracing::debug!(order_id = %order.id, symbol, side = %side, amount, "order placed");

        Ok(PlacedOrder {
            status: map_status(&order.status, order.done_reason.as_deref()),
            id: order.id,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError> {
        let path = format!("/orders/{order_id}");
        let _: serde_json::Value = self.request(Method::DELETE, &path, None).await?;
        tracing::debug!(order_id, "order canceled");
        Ok(())
    }

    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatus, BrokerError> {
        let path = format!("/orders/{order_id}");
        let order: OrderResponse = self.request(Method::GET, &path, None).await?;
        Ok(map_status(&order.status, order.done_reason.as_deref()))
    }

    async fn execute_order(
        &self,
        symbol: &str,
        quantity: f64,
        side: Side,
    ) -> Result<ExecutionReport, BrokerError> {
        let placed = self
            .place_order(symbol, OrderType::Market, side, quantity, None)
            .await?;
        // Market orders usually settle immediately; confirm with one fetch
        let status = match placed.status {
            OrderStatus::Filled | OrderStatus::Rejected => placed.status,
            _ => self.get_order_status(&placed.id).await?,
        };
        Ok(ExecutionReport {
            id: placed.id,
            status,
        })
    }

    async fn get_account_balance(&self) -> Result<HashMap<String, f64>, BrokerError> {
        let accounts: Vec<AccountResponse> = self.request(Method::GET, "/accounts", None).await?;
        let mut balances = HashMap::new();
        for account in accounts {
            let available = account.available.parse::<f64>().unwrap_or(0.0);
            balances.insert(account.currency, available);
        }
        Ok(balances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_status() {
        assert_eq!(map_status("open", None), OrderStatus::Working);
        assert_eq!(map_status("pending", None), OrderStatus::Working);
        assert_eq!(map_status("active", None), OrderStatus::Working);
        assert_eq!(map_status("rejected", None), OrderStatus::Rejected);
        assert_eq!(map_status("done", Some("filled")), OrderStatus::Filled);
        assert_eq!(map_status("done", Some("canceled")), OrderStatus::Canceled);
        assert_eq!(map_status("done", None), OrderStatus::Filled);
    }

    #[test]
    fn test_sign_is_deterministic() {
        let broker = CoinbaseBroker::new(&ExchangeSettings {
            api_key: "key".to_string(),
            api_secret: BASE64_STANDARD.encode(b"secret"),
            rest_url: "https://example.invalid".to_string(),
        });

        let a = broker.sign("1700000000", "GET", "/accounts", "").unwrap();
        let b = broker.sign("1700000000", "GET", "/accounts", "").unwrap();
        assert_eq!(a, b);

        let c = broker.sign("1700000001", "GET", "/accounts", "").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_sign_rejects_bad_secret() {
        let broker = CoinbaseBroker::new(&ExchangeSettings {
            api_key: "key".to_string(),
            api_secret: "not base64!!!".to_string(),
            rest_url: "https://example.invalid".to_string(),
        });
        assert!(broker.sign("0", "GET", "/accounts", "").is_err());
    }

    #[test]
    fn test_book_response_parses() {
        let json = r#"{"bids":[["100.5","2.0",3]],"asks":[["101.0","1.5",1]],"sequence":42}"#;
        let book: BookResponse = serde_json::from_str(json).unwrap();
        assert_eq!(book.bids[0].0, "100.5");
        assert_eq!(book.asks[0].1, "1.5");
    }
}
