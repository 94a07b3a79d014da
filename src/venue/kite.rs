//! Kite Connect REST adapter
//!
//! Places, modifies and cancels orders and reads the order book over the
//! Kite v3 HTTP API. Prices are rounded to the instrument tick before they go
//! on the wire, and Kite's status strings are folded into [`VenueStatus`].
//!
//! Kite regular orders only support DAY, IOC and TTL validity. Good-till-
//! canceled requests are sent as DAY, and an end-of-day expiry comes back as
//! a CANCELED status like any other cancellation.

use super::{
    BrokerageClient, BrokerageOrder, InstrumentSpec, InstrumentTable, PlaceOrder, VenueError,
    VenueStatus,
};
use crate::config::VenueConfig;
use crate::order::{Action, BrokerOrderId, OrderType};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Kite Connect API base URL
pub const KITE_API_URL: &str = "https://api.kite.trade";

/// Indian Standard Time, the offset Kite timestamps are written in
const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// Configuration for the Kite client
#[derive(Debug, Clone)]
pub struct KiteConfig {
    pub base_url: String,
    pub api_key: String,
    pub access_token: String,
    /// Product code sent with every order (MIS, CNC, NRML)
    pub product: String,
    /// Order variety path segment (regular, amo, co)
    pub variety: String,
    pub timeout: Duration,
    /// UTC offset of the venue's naive timestamps
    pub utc_offset_secs: i32,
    pub instruments: InstrumentTable,
}

impl Default for KiteConfig {
    fn default() -> Self {
        Self {
            base_url: KITE_API_URL.to_string(),
            api_key: String::new(),
            access_token: String::new(),
            product: "MIS".to_string(),
            variety: "regular".to_string(),
            timeout: Duration::from_secs(10),
            utc_offset_secs: IST_OFFSET_SECS,
            instruments: InstrumentTable::default(),
        }
    }
}

impl From<&VenueConfig> for KiteConfig {
    fn from(config: &VenueConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            access_token: config.access_token.clone(),
            product: config.product.clone(),
            variety: config.variety.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            utc_offset_secs: config.utc_offset_secs,
            instruments: InstrumentTable::new(config.instruments.iter().cloned()),
        }
    }
}

/// Response envelope shared by every Kite endpoint
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderIdData {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct KiteOrder {
    order_id: String,
    status: String,
    #[serde(default)]
    status_message: Option<String>,
    #[serde(default)]
    filled_quantity: Decimal,
    #[serde(default)]
    average_price: Option<Decimal>,
    #[serde(default)]
    order_timestamp: Option<String>,
    #[serde(default)]
    exchange_update_timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LtpQuote {
    last_price: Decimal,
}

/// HTTP client for the Kite Connect order API
pub struct KiteClient {
    config: KiteConfig,
    client: Client,
    offset: FixedOffset,
}

impl KiteClient {
    pub fn new(config: KiteConfig) -> Result<Self, VenueError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        let offset = FixedOffset::east_opt(config.utc_offset_secs).ok_or_else(|| {
            VenueError::Decode(format!("invalid UTC offset {}", config.utc_offset_secs))
        })?;
        Ok(Self {
            config,
            client,
            offset,
        })
    }

    fn instrument(&self, symbol: &str) -> Result<&InstrumentSpec, VenueError> {
        self.config
            .instruments
            .get(symbol)
            .ok_or_else(|| VenueError::UnknownInstrument(symbol.to_string()))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("X-Kite-Version", "3").header(
            "Authorization",
            format!("token {}:{}", self.config.api_key, self.config.access_token),
        )
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, VenueError> {
        let response = self.authorized(builder).send().await?;
        let status = response.status();
        let body = response.text().await?;

        let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
            if status.is_success() {
                VenueError::Decode(e.to_string())
            } else {
                VenueError::Api {
                    status: status.as_u16(),
                    message: body.chars().take(200).collect(),
                }
            }
        })?;

        if !status.is_success() || envelope.status != "success" {
            return Err(VenueError::Api {
                status: status.as_u16(),
                message: envelope.message.unwrap_or(envelope.status),
            });
        }

        envelope
            .data
            .ok_or_else(|| VenueError::Decode("response carried no data".to_string()))
    }

    /// Form parameters shared by place and modify
    fn order_params(
        &self,
        spec: &InstrumentSpec,
        request: &PlaceOrder,
    ) -> Result<Vec<(&'static str, String)>, VenueError> {
        if !spec.is_valid_quantity(request.quantity) {
            return Err(VenueError::Api {
                status: 400,
                message: format!(
                    "quantity {} is not a multiple of lot size {}",
                    request.quantity, spec.lot_size
                ),
            });
        }

        let mut params = vec![
            ("order_type", kite_order_type(request.order_type).to_string()),
            ("quantity", request.quantity.normalize().to_string()),
            ("validity", kite_validity(request).to_string()),
        ];
        if let Some(limit) = request.limit_price {
            params.push(("price", spec.round_price(limit).to_string()));
        }
        if let Some(stop) = request.stop_price {
            params.push(("trigger_price", spec.round_price(stop).to_string()));
        }
        Ok(params)
    }

    fn parse_timestamp(&self, raw: Option<&str>) -> Option<DateTime<Utc>> {
        let naive = NaiveDateTime::parse_from_str(raw?, "%Y-%m-%d %H:%M:%S").ok()?;
        self.offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn to_brokerage_order(&self, order: KiteOrder) -> Option<BrokerageOrder> {
        let Some(status) = classify_status(&order.status) else {
            tracing::warn!(
                order_id = %order.order_id,
                status = %order.status,
                "Unknown Kite order status, skipping"
            );
            return None;
        };

        let updated_at = self
            .parse_timestamp(order.exchange_update_timestamp.as_deref())
            .or_else(|| self.parse_timestamp(order.order_timestamp.as_deref()))
            .unwrap_or_else(Utc::now);

        Some(BrokerageOrder {
            id: order.order_id,
            status,
            raw_status: order.status,
            status_message: order.status_message.filter(|m| !m.is_empty()),
            filled_quantity: order.filled_quantity,
            average_price: order.average_price.filter(|p| !p.is_zero()),
            updated_at,
        })
    }
}

#[async_trait]
impl BrokerageClient for KiteClient {
    async fn place_order(&self, request: &PlaceOrder) -> Result<BrokerOrderId, VenueError> {
        let spec = self.instrument(&request.instrument)?;
        let mut params = self.order_params(spec, request)?;
        params.extend([
            ("tradingsymbol", spec.tradingsymbol.clone()),
            ("exchange", spec.exchange.clone()),
            ("transaction_type", kite_side(request.action).to_string()),
            ("product", self.config.product.clone()),
        ]);

        let url = format!("{}/orders/{}", self.config.base_url, self.config.variety);
        tracing::debug!(url = %url, instrument = %request.instrument, "Placing Kite order");

        let data: OrderIdData = self.send(self.client.post(&url).form(&params)).await?;
        Ok(data.order_id)
    }

    async fn modify_order(
        &self,
        id: &str,
        request: &PlaceOrder,
    ) -> Result<BrokerOrderId, VenueError> {
        let spec = self.instrument(&request.instrument)?;
        let params = self.order_params(spec, request)?;

        let url = format!(
            "{}/orders/{}/{}",
            self.config.base_url, self.config.variety, id
        );
        tracing::debug!(url = %url, "Modifying Kite order");

        let data: OrderIdData = self.send(self.client.put(&url).form(&params)).await?;
        Ok(data.order_id)
    }

    async fn cancel_order(&self, id: &str) -> Result<(), VenueError> {
        let url = format!(
            "{}/orders/{}/{}",
            self.config.base_url, self.config.variety, id
        );
        tracing::debug!(url = %url, "Cancelling Kite order");

        let _: OrderIdData = self.send(self.client.delete(&url)).await?;
        Ok(())
    }

    async fn order_book(&self) -> Result<Vec<BrokerageOrder>, VenueError> {
        let url = format!("{}/orders", self.config.base_url);
        let orders: Vec<KiteOrder> = self.send(self.client.get(&url)).await?;

        Ok(orders
            .into_iter()
            .filter_map(|order| self.to_brokerage_order(order))
            .collect())
    }

    async fn last_traded_price(&self, instrument: &str) -> Result<Decimal, VenueError> {
        let key = self.instrument(instrument)?.quote_key();
        let url = format!("{}/quote/ltp", self.config.base_url);

        let quotes: HashMap<String, LtpQuote> = self
            .send(self.client.get(&url).query(&[("i", key.as_str())]))
            .await?;

        quotes
            .get(&key)
            .map(|quote| quote.last_price)
            .ok_or_else(|| VenueError::Decode(format!("no quote for {}", key)))
    }
}

/// Kite has no GTC validity for regular orders
fn kite_validity(_request: &PlaceOrder) -> &'static str {
    "DAY"
}

/// Fold Kite's status vocabulary into [`VenueStatus`]
///
/// Returns `None` for statuses this adapter does not recognise.
pub fn classify_status(raw: &str) -> Option<VenueStatus> {
    let status = raw.trim().to_ascii_uppercase();
    match status.as_str() {
        "OPEN" => Some(VenueStatus::Open),
        "COMPLETE" => Some(VenueStatus::Complete),
        "CANCELLED" | "CANCELED" => Some(VenueStatus::Canceled),
        "REJECTED" => Some(VenueStatus::Rejected),
        "TRIGGER PENDING" => Some(VenueStatus::TriggerPending),
        s if s.ends_with("PENDING") || s.ends_with("RECEIVED") => Some(VenueStatus::Pending),
        _ => None,
    }
}

fn kite_order_type(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "MARKET",
        OrderType::Limit => "LIMIT",
        OrderType::Stop => "SL-M",
        OrderType::StopLimit => "SL",
    }
}

fn kite_side(action: Action) -> &'static str {
    if action.is_buy() {
        "BUY"
    } else {
        "SELL"
    }
}
