//! Alpaca brokerage and market data integration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Response, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info, warn};
use trading_core::clock::MarketClock;
use trading_core::error::{BrokerError, DataError};
use trading_core::traits::{Brokerage, CandleSource, QuoteSource};
use trading_core::types::{
    AccountSummary, BrokerOrder, Candle, HistorySpan, OrderAmount, OrderRequest, OrderStatus,
    OrderType, Position, SessionBounds, Side, Timeframe,
};

const BARS_PAGE_LIMIT: usize = 10_000;

/// Alpaca API configuration.
#[derive(Debug, Clone)]
pub struct AlpacaConfig {
    pub api_key: String,
    pub api_secret: String,
    pub paper: bool,
    /// Market data feed, `iex` or `sip`
    pub feed: String,
}

impl AlpacaConfig {
    /// Create config directly with key and secret.
    pub fn new(api_key: String, api_secret: String, paper: bool) -> Self {
        Self {
            api_key,
            api_secret,
            paper,
            feed: "iex".to_string(),
        }
    }

    /// Load from environment variables.
    pub fn from_env() -> Result<Self, BrokerError> {
        let api_key = std::env::var("ALPACA_API_KEY")
            .map_err(|_| BrokerError::Configuration("ALPACA_API_KEY not set".into()))?;
        let api_secret = std::env::var("ALPACA_API_SECRET")
            .map_err(|_| BrokerError::Configuration("ALPACA_API_SECRET not set".into()))?;
        let paper = std::env::var("ALPACA_PAPER")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        Ok(Self::new(api_key, api_secret, paper))
    }

    pub fn with_feed(mut self, feed: impl Into<String>) -> Self {
        self.feed = feed.into();
        self
    }

    pub fn base_url(&self) -> &str {
        if self.paper {
            "https://paper-api.alpaca.markets"
        } else {
            "https://api.alpaca.markets"
        }
    }

    pub fn data_url(&self) -> &str {
        "https://data.alpaca.markets"
    }
}

#[derive(Debug, Deserialize)]
struct AlpacaAccount {
    cash: String,
    buying_power: String,
    equity: String,
}

#[derive(Debug, Deserialize)]
struct AlpacaPosition {
    symbol: String,
    qty: String,
    avg_entry_price: String,
    current_price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaOrder {
    id: String,
    client_order_id: Option<String>,
    status: String,
    symbol: String,
    qty: Option<String>,
    notional: Option<String>,
    filled_qty: String,
    #[serde(rename = "type")]
    order_type: String,
    side: String,
    limit_price: Option<String>,
    filled_avg_price: Option<String>,
    created_at: String,
}

#[derive(Debug, Serialize)]
struct CreateOrderRequest {
    symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    qty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notional: Option<String>,
    side: &'static str,
    #[serde(rename = "type")]
    order_type: &'static str,
    time_in_force: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_price: Option<String>,
    extended_hours: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_order_id: Option<String>,
}

impl From<&OrderRequest> for CreateOrderRequest {
    fn from(request: &OrderRequest) -> Self {
        let (qty, notional) = match request.amount {
            OrderAmount::Shares(shares) => (Some(shares.to_string()), None),
            OrderAmount::Notional(dollars) => (None, Some(dollars.round_dp(2).to_string())),
        };
        Self {
            symbol: request.symbol.clone(),
            qty,
            notional,
            side: match request.side {
                Side::Buy => "buy",
                Side::Sell => "sell",
            },
            order_type: match request.order_type {
                OrderType::Market => "market",
                OrderType::Limit => "limit",
            },
            time_in_force: "day",
            limit_price: request.limit_price.map(|p| p.round_dp(2).to_string()),
            extended_hours: request.extended_hours,
            client_order_id: request.client_order_id.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AlpacaBar {
    t: String,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

#[derive(Debug, Deserialize)]
struct AlpacaBarsResponse {
    #[serde(default)]
    bars: Option<HashMap<String, Vec<AlpacaBar>>>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaTrade {
    p: f64,
}

#[derive(Debug, Deserialize)]
struct AlpacaLatestTradeResponse {
    trade: AlpacaTrade,
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal, BrokerError> {
    value
        .parse()
        .map_err(|_| BrokerError::ApiError(format!("invalid {}: {}", field, value)))
}

fn parse_status(status: &str) -> OrderStatus {
    match status {
        "partially_filled" => OrderStatus::PartiallyFilled,
        "filled" => OrderStatus::Filled,
        "canceled" | "pending_cancel" | "done_for_day" | "replaced" => OrderStatus::Canceled,
        "rejected" => OrderStatus::Rejected,
        "expired" => OrderStatus::Expired,
        "new" | "pending_new" => OrderStatus::Submitted,
        _ => OrderStatus::Accepted,
    }
}

fn parse_order(order: AlpacaOrder) -> Result<BrokerOrder, BrokerError> {
    let side = match order.side.as_str() {
        "buy" => Side::Buy,
        "sell" => Side::Sell,
        _ => return Err(BrokerError::ApiError(format!("Unknown side: {}", order.side))),
    };
    let order_type = match order.order_type.as_str() {
        "limit" => OrderType::Limit,
        _ => OrderType::Market,
    };
    let amount = match (&order.qty, &order.notional) {
        (Some(qty), _) => OrderAmount::Shares(parse_decimal("qty", qty)?),
        (None, Some(notional)) => OrderAmount::Notional(parse_decimal("notional", notional)?),
        (None, None) => OrderAmount::Shares(Decimal::ZERO),
    };
    let limit_price = match &order.limit_price {
        Some(p) => Some(parse_decimal("limit_price", p)?),
        None => None,
    };
    let filled_avg_price = match &order.filled_avg_price {
        Some(p) => Some(parse_decimal("filled_avg_price", p)?),
        None => None,
    };
    let submitted_at = DateTime::parse_from_rfc3339(&order.created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BrokerError::ApiError(format!("invalid created_at: {}", e)))?;

    Ok(BrokerOrder {
        status: parse_status(&order.status),
        filled_quantity: parse_decimal("filled_qty", &order.filled_qty)?,
        id: order.id,
        client_order_id: order.client_order_id,
        symbol: order.symbol,
        side,
        order_type,
        amount,
        limit_price,
        filled_avg_price,
        submitted_at,
    })
}

fn parse_position(p: AlpacaPosition) -> Result<Position, BrokerError> {
    let mut position = Position::new(
        p.symbol,
        parse_decimal("qty", &p.qty)?,
        parse_decimal("avg_entry_price", &p.avg_entry_price)?,
    );
    if let Some(current) = &p.current_price {
        position.current_price = parse_decimal("current_price", current)?;
    }
    Ok(position)
}

fn timeframe_param(interval: Timeframe) -> &'static str {
    match interval {
        Timeframe::Minute1 => "1Min",
        Timeframe::Minute5 => "5Min",
        Timeframe::Minute10 => "10Min",
        Timeframe::Minute15 => "15Min",
        Timeframe::Minute30 => "30Min",
        Timeframe::Hour1 => "1Hour",
        Timeframe::Daily => "1Day",
    }
}

/// Convert bars to candles, keeping only regular-session bars when asked.
fn bars_to_candles(
    bars: Vec<AlpacaBar>,
    bounds: SessionBounds,
    clock: &MarketClock,
) -> Vec<Candle> {
    bars.into_iter()
        .filter_map(|b| {
            let ts = DateTime::parse_from_rfc3339(&b.t).ok()?.with_timezone(&Utc);
            if bounds == SessionBounds::Regular && !clock.is_regular_hours_at(ts) {
                return None;
            }
            Some(Candle::new(ts.timestamp_millis(), b.o, b.h, b.l, b.c, b.v))
        })
        .collect()
}

async fn check(resp: Response) -> Result<Response, BrokerError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let retry_after_secs = resp
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);
    let text = resp.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            BrokerError::AuthenticationError(format!("{}: {}", status, text))
        }
        StatusCode::TOO_MANY_REQUESTS => BrokerError::RateLimited { retry_after_secs },
        StatusCode::NOT_FOUND => BrokerError::OrderNotFound(text),
        StatusCode::UNPROCESSABLE_ENTITY => BrokerError::OrderRejected(format!("{}: {}", status, text)),
        _ => BrokerError::ApiError(format!("{}: {}", status, text)),
    })
}

fn build_client(config: &AlpacaConfig) -> Result<Client, BrokerError> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        "APCA-API-KEY-ID",
        header::HeaderValue::from_str(&config.api_key)
            .map_err(|e| BrokerError::Configuration(e.to_string()))?,
    );
    headers.insert(
        "APCA-API-SECRET-KEY",
        header::HeaderValue::from_str(&config.api_secret)
            .map_err(|e| BrokerError::Configuration(e.to_string()))?,
    );

    Client::builder()
        .default_headers(headers)
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| BrokerError::Connection(e.to_string()))
}

/// Alpaca client for orders, quotes and historical bars.
pub struct AlpacaBroker {
    config: RwLock<AlpacaConfig>,
    client: RwLock<Client>,
    clock: MarketClock,
}

impl AlpacaBroker {
    pub fn new(config: AlpacaConfig, clock: MarketClock) -> Result<Self, BrokerError> {
        let client = build_client(&config)?;
        Ok(Self {
            config: RwLock::new(config),
            client: RwLock::new(client),
            clock,
        })
    }

    /// Create from environment variables.
    pub fn from_env(clock: MarketClock) -> Result<Self, BrokerError> {
        Self::new(AlpacaConfig::from_env()?, clock)
    }

    fn config(&self) -> AlpacaConfig {
        match self.config.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn client(&self) -> Client {
        match self.client.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, BrokerError> {
        let resp = self
            .client()
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        check(resp)
            .await?
            .json()
            .await
            .map_err(|e| BrokerError::ApiError(e.to_string()))
    }

    /// Historical bars for several symbols, following pagination.
    async fn fetch_bars(
        &self,
        symbols: &[String],
        interval: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashMap<String, Vec<AlpacaBar>>, BrokerError> {
        let config = self.config();
        let url = format!("{}/v2/stocks/bars", config.data_url());
        let mut bars: HashMap<String, Vec<AlpacaBar>> = HashMap::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("symbols", symbols.join(",")),
                ("timeframe", timeframe_param(interval).to_string()),
                ("start", start.to_rfc3339()),
                ("end", end.to_rfc3339()),
                ("limit", BARS_PAGE_LIMIT.to_string()),
                ("feed", config.feed.clone()),
            ];
            if let Some(token) = &page_token {
                query.push(("page_token", token.clone()));
            }

            let page: AlpacaBarsResponse = self.get_json(&url, &query).await?;
            for (symbol, mut symbol_bars) in page.bars.unwrap_or_default() {
                bars.entry(symbol).or_default().append(&mut symbol_bars);
            }
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(bars)
    }
}

#[async_trait]
impl Brokerage for AlpacaBroker {
    async fn account(&self) -> Result<AccountSummary, BrokerError> {
        let url = format!("{}/v2/account", self.config().base_url());
        let account: AlpacaAccount = self.get_json(&url, &[]).await?;

        Ok(AccountSummary {
            cash: parse_decimal("cash", &account.cash)?,
            buying_power: parse_decimal("buying_power", &account.buying_power)?,
            equity: parse_decimal("equity", &account.equity)?,
        })
    }

    async fn positions(&self) -> Result<Vec<Position>, BrokerError> {
        let url = format!("{}/v2/positions", self.config().base_url());
        let positions: Vec<AlpacaPosition> = self.get_json(&url, &[]).await?;
        positions.into_iter().map(parse_position).collect()
    }

    async fn position(&self, symbol: &str) -> Result<Option<Position>, BrokerError> {
        let url = format!("{}/v2/positions/{}", self.config().base_url(), symbol);
        match self.get_json::<AlpacaPosition>(&url, &[]).await {
            Ok(p) => parse_position(p).map(Some),
            Err(BrokerError::OrderNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn submit_order(&self, request: OrderRequest) -> Result<BrokerOrder, BrokerError> {
        let url = format!("{}/v2/orders", self.config().base_url());
        let body = CreateOrderRequest::from(&request);
        debug!(?body, "Submitting order");

        let resp = self
            .client()
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let order: AlpacaOrder = check(resp)
            .await
            .map_err(|e| match e {
                BrokerError::OrderNotFound(text) => BrokerError::OrderRejected(text),
                other => other,
            })?
            .json()
            .await
            .map_err(|e| BrokerError::ApiError(e.to_string()))?;

        info!(
            id = %order.id,
            symbol = %order.symbol,
            side = %order.side,
            qty = ?order.qty,
            notional = ?order.notional,
            limit_price = ?order.limit_price,
            "Order submitted"
        );
        parse_order(order)
    }

    async fn order(&self, order_id: &str) -> Result<BrokerOrder, BrokerError> {
        let url = format!("{}/v2/orders/{}", self.config().base_url(), order_id);
        let order: AlpacaOrder = self.get_json(&url, &[]).await?;
        parse_order(order)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError> {
        let url = format!("{}/v2/orders/{}", self.config().base_url(), order_id);
        let resp = self
            .client()
            .delete(&url)
            .send()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        check(resp).await?;
        info!(id = order_id, "Order canceled");
        Ok(())
    }

    /// Re-read credentials from the environment and rebuild the client.
    async fn reauthenticate(&self) -> Result<(), BrokerError> {
        let feed = self.config().feed;
        let config = AlpacaConfig::from_env()?.with_feed(feed);
        let client = build_client(&config)?;

        match self.client.write() {
            Ok(mut guard) => *guard = client,
            Err(poisoned) => *poisoned.into_inner() = client,
        }
        match self.config.write() {
            Ok(mut guard) => *guard = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
        info!("Re-authenticated with Alpaca");
        Ok(())
    }

    fn name(&self) -> &str {
        "Alpaca"
    }
}

#[async_trait]
impl QuoteSource for AlpacaBroker {
    /// Latest trade. Alpaca reports pre-market and after-hours trades on the
    /// same endpoint, so the flag does not change the request.
    async fn latest_price(&self, symbol: &str, _extended_hours: bool) -> Result<Decimal, BrokerError> {
        let config = self.config();
        let url = format!("{}/v2/stocks/{}/trades/latest", config.data_url(), symbol);
        let data: AlpacaLatestTradeResponse = self.get_json(&url, &[("feed", config.feed.clone())]).await?;

        Decimal::from_f64_retain(data.trade.p)
            .map(|p| p.round_dp(4))
            .ok_or_else(|| BrokerError::PriceUnavailable(symbol.to_string()))
    }

    async fn reconnect_quotes(&self) -> Result<(), BrokerError> {
        self.reauthenticate().await
    }
}

#[async_trait]
impl CandleSource for AlpacaBroker {
    async fn candles(
        &self,
        symbols: &[String],
        interval: Timeframe,
        span: HistorySpan,
        bounds: SessionBounds,
    ) -> Result<HashMap<String, Vec<Candle>>, DataError> {
        let end = self.clock.now();
        let start = end - span.as_duration();
        let bars = self.fetch_bars(symbols, interval, start, end).await?;

        let candles: HashMap<String, Vec<Candle>> = bars
            .into_iter()
            .map(|(symbol, bars)| (symbol, bars_to_candles(bars, bounds, &self.clock)))
            .collect();
        if candles.values().all(Vec::is_empty) {
            warn!(symbols = %symbols.join(","), "No bars returned");
        }
        Ok(candles)
    }

    async fn reconnect(&self) -> Result<(), DataError> {
        self.reauthenticate().await.map_err(DataError::from)
    }

    fn source_name(&self) -> &str {
        "Alpaca"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order_json(status: &str) -> AlpacaOrder {
        serde_json::from_value(serde_json::json!({
            "id": "61e69015-8549-4bfd-b9c3-01e75843f47d",
            "client_order_id": "tok-1",
            "status": status,
            "symbol": "AAPL",
            "qty": null,
            "notional": "500",
            "filled_qty": "2.5",
            "type": "market",
            "side": "buy",
            "limit_price": null,
            "filled_avg_price": "200.00",
            "created_at": "2024-03-04T15:00:00.123456Z"
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_order() {
        let order = parse_order(order_json("filled")).unwrap();

        assert!(order.is_filled());
        assert_eq!(order.amount, OrderAmount::Notional(dec!(500)));
        assert_eq!(order.filled_quantity, dec!(2.5));
        assert_eq!(order.filled_avg_price, Some(dec!(200)));
        assert_eq!(order.client_order_id.as_deref(), Some("tok-1"));

        assert_eq!(parse_order(order_json("partially_filled")).unwrap().status, OrderStatus::PartiallyFilled);
        assert_eq!(parse_order(order_json("pending_new")).unwrap().status, OrderStatus::Submitted);
        assert_eq!(parse_order(order_json("expired")).unwrap().status, OrderStatus::Expired);
    }

    #[test]
    fn test_order_body() {
        let notional = OrderRequest::market_notional("AAPL", Side::Buy, dec!(333.333));
        let body = serde_json::to_value(CreateOrderRequest::from(&notional)).unwrap();
        assert_eq!(body["notional"], "333.33");
        assert!(body.get("qty").is_none());
        assert_eq!(body["type"], "market");
        assert_eq!(body["extended_hours"], false);

        let limit = OrderRequest::extended_limit("AAPL", Side::Sell, dec!(1.5), dec!(101.257))
            .with_client_order_id("tok-2");
        let body = serde_json::to_value(CreateOrderRequest::from(&limit)).unwrap();
        assert_eq!(body["qty"], "1.5");
        assert_eq!(body["limit_price"], "101.26");
        assert_eq!(body["side"], "sell");
        assert_eq!(body["extended_hours"], true);
        assert_eq!(body["client_order_id"], "tok-2");
    }

    #[test]
    fn test_regular_bounds_filter_bars() {
        let bar = |t: &str| AlpacaBar {
            t: t.to_string(),
            o: 1.0,
            h: 2.0,
            l: 0.5,
            c: 1.5,
            v: 100.0,
        };
        // 08:00, 10:00 and 17:00 New York time
        let bars = || {
            vec![
                bar("2024-03-04T13:00:00Z"),
                bar("2024-03-04T15:00:00Z"),
                bar("2024-03-04T22:00:00Z"),
            ]
        };
        let clock = MarketClock::default();

        assert_eq!(bars_to_candles(bars(), SessionBounds::Regular, &clock).len(), 1);
        assert_eq!(bars_to_candles(bars(), SessionBounds::Extended, &clock).len(), 3);
    }

    #[test]
    fn test_timeframe_param() {
        assert_eq!(timeframe_param(Timeframe::Minute5), "5Min");
        assert_eq!(timeframe_param(Timeframe::Daily), "1Day");
    }

    #[test]
    fn test_config_urls() {
        let paper = AlpacaConfig::new("k".into(), "s".into(), true);
        assert_eq!(paper.base_url(), "https://paper-api.alpaca.markets");
        assert_eq!(paper.feed, "iex");
        let live = AlpacaConfig::new("k".into(), "s".into(), false).with_feed("sip");
        assert_eq!(live.base_url(), "https://api.alpaca.markets");
        assert_eq!(live.feed, "sip");
    }
}
