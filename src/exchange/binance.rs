// =============================================================================
// Binance REST client — HMAC-SHA256 signed requests (§4.4.1)
// =============================================================================
//
// SECURITY: the secret key is never logged or serialized. All signed requests
// include X-MBX-APIKEY as a header and a recvWindow of 5000ms to tolerate
// minor clock drift between this process and Binance servers.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

use super::client::{with_deadline, ExchangeClient, ExchangeError, ExchangePosition, OrderAck, QuoteBalance, SymbolInfo};
use super::rate_limit::RateLimitTracker;
use crate::bar::Bar;
use crate::types::Direction;

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: u64 = 5000;

/// Binance REST API client with HMAC-SHA256 request signing.
pub struct BinanceClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
    rate_limiter: RateLimitTracker,
}

impl BinanceClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!("BinanceClient initialised (base_url=https://api.binance.com)");

        Self {
            api_key,
            secret,
            base_url: "https://api.binance.com".to_string(),
            client,
            rate_limiter: RateLimitTracker::new(),
        }
    }

    pub fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    #[instrument(skip(self), name = "binance::get_account")]
    async fn get_account(&self) -> Result<serde_json::Value> {
        let qs = self.signed_query("");
        let url = format!("{}/api/v3/account?{}", self.base_url, qs);

        let resp = self.client.get(&url).send().await.context("GET /api/v3/account request failed")?;
        self.rate_limiter.update_from_headers(resp.headers());
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.context("failed to parse account response")?;

        if !status.is_success() {
            anyhow::bail!("Binance GET /api/v3/account returned {}: {}", status, body);
        }
        Ok(body)
    }

    /// GET /api/v3/klines (public). Used by an OHLCV ingestion adapter to
    /// fill a `BarStore`; the core's analysis path only ever reads bars back
    /// out of the store (§6.1).
    #[instrument(skip(self), name = "binance::get_klines")]
    pub async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Bar>> {
        let url = format!("{}/api/v3/klines?symbol={}&interval={}&limit={}", self.base_url, symbol, interval, limit);

        let resp = self.client.get(&url).send().await.context("GET /api/v3/klines request failed")?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.context("failed to parse klines response")?;

        if !status.is_success() {
            anyhow::bail!("Binance GET /api/v3/klines returned {}: {}", status, body);
        }

        let raw = body.as_array().context("klines response is not an array")?;
        let mut bars = Vec::with_capacity(raw.len());

        for entry in raw {
            let arr = entry.as_array().context("kline entry is not an array")?;
            if arr.len() < 11 {
                warn!("skipping malformed kline entry with {} elements", arr.len());
                continue;
            }
            let open_time = arr[0].as_i64().unwrap_or(0);
            let open = parse_str_f64(&arr[1])?;
            let high = parse_str_f64(&arr[2])?;
            let low = parse_str_f64(&arr[3])?;
            let close = parse_str_f64(&arr[4])?;
            let volume = parse_str_f64(&arr[5])?;
            let close_time = arr[6].as_i64().unwrap_or(0);
            bars.push(Bar::new(open_time, open, high, low, close, volume, close_time));
        }

        debug!(symbol, interval, count = bars.len(), "klines fetched");
        Ok(bars)
    }
}

fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>().with_context(|| format!("failed to parse '{s}' as f64"))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        anyhow::bail!("expected string or number, got: {val}")
    }
}

fn map_anyhow(err: anyhow::Error) -> ExchangeError {
    let msg = err.to_string();
    if msg.contains("-2015") || msg.contains("Invalid API-key") {
        ExchangeError::InvalidApiKey
    } else if msg.contains("-1003") || msg.contains("Too many requests") {
        ExchangeError::RateLimited
    } else {
        ExchangeError::ExchangeReject(msg)
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    #[instrument(skip(self, deadline), name = "binance::fetch_balance")]
    async fn fetch_balance(&self, quote_asset: &str, deadline: Duration) -> Result<QuoteBalance, ExchangeError> {
        with_deadline(deadline, async {
            let account = self.get_account().await.map_err(map_anyhow)?;
            let balances = account["balances"].as_array().ok_or_else(|| {
                ExchangeError::ExchangeReject("account response missing 'balances'".into())
            })?;

            for b in balances {
                if b["asset"].as_str() == Some(quote_asset) {
                    let free: f64 = b["free"].as_str().unwrap_or("0").parse().unwrap_or(0.0);
                    let locked: f64 = b["locked"].as_str().unwrap_or("0").parse().unwrap_or(0.0);
                    return Ok(QuoteBalance { free, used: locked, total: free + locked });
                }
            }
            warn!(quote_asset, "asset not found in balances — returning zero");
            Ok(QuoteBalance { free: 0.0, used: 0.0, total: 0.0 })
        })
        .await
    }

    #[instrument(skip(self, deadline), name = "binance::fetch_mark_price")]
    async fn fetch_mark_price(&self, symbol: &str, deadline: Duration) -> Result<f64, ExchangeError> {
        with_deadline(deadline, async {
            let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);
            let resp = self.client.get(&url).send().await.map_err(|e| ExchangeError::ExchangeReject(e.to_string()))?;
            let status = resp.status();
            let body: serde_json::Value =
                resp.json().await.map_err(|e| ExchangeError::ExchangeReject(e.to_string()))?;

            if !status.is_success() {
                return Err(ExchangeError::InvalidSymbol(symbol.to_string()));
            }
            body["price"]
                .as_str()
                .and_then(|s| s.parse::<f64>().ok())
                .ok_or_else(|| ExchangeError::ExchangeReject("malformed ticker response".into()))
        })
        .await
    }

    #[instrument(skip(self, deadline), name = "binance::submit_market_order")]
    async fn submit_market_order(
        &self,
        symbol: &str,
        side: Direction,
        quantity: f64,
        _leverage: u32,
        deadline: Duration,
    ) -> Result<OrderAck, ExchangeError> {
        if !self.rate_limiter.can_place_order() {
            return Err(ExchangeError::RateLimited);
        }

        with_deadline(deadline, async {
            let side_str = match side {
                Direction::Long => "BUY",
                Direction::Short => "SELL",
            };
            let params = format!("symbol={symbol}&side={side_str}&type=MARKET&quantity={quantity}");
            let qs = self.signed_query(&params);
            let url = format!("{}/api/v3/order?{}", self.base_url, qs);

            debug!(symbol, side_str, quantity, "submitting market order");

            let resp = self.client.post(&url).send().await.map_err(|e| ExchangeError::ExchangeReject(e.to_string()))?;
            self.rate_limiter.record_order_sent();
            self.rate_limiter.update_from_headers(resp.headers());
            let status = resp.status();
            let body: serde_json::Value =
                resp.json().await.map_err(|e| ExchangeError::ExchangeReject(e.to_string()))?;

            if status == reqwest::StatusCode::INSUFFICIENT_STORAGE {
                return Err(ExchangeError::InsufficientBalance);
            }
            if !status.is_success() {
                let code = body["code"].as_i64().unwrap_or(0);
                return Err(match code {
                    -2010 => ExchangeError::InsufficientBalance,
                    -1121 => ExchangeError::InvalidSymbol(symbol.to_string()),
                    -2015 => ExchangeError::InvalidApiKey,
                    -1003 => ExchangeError::RateLimited,
                    _ => ExchangeError::ExchangeReject(format!("{status}: {body}")),
                });
            }

            let order_id = body["orderId"].as_i64().map(|v| v.to_string()).unwrap_or_default();
            let filled_price: f64 = body["fills"]
                .as_array()
                .and_then(|fills| fills.first())
                .and_then(|f| f["price"].as_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0);
            let filled_qty: f64 = body["executedQty"].as_str().and_then(|s| s.parse().ok()).unwrap_or(quantity);

            Ok(OrderAck { order_id, filled_price, filled_qty })
        })
        .await
    }

    #[instrument(skip(self, deadline), name = "binance::fetch_open_positions")]
    async fn fetch_open_positions(&self, deadline: Duration) -> Result<Vec<ExchangePosition>, ExchangeError> {
        with_deadline(deadline, async {
            let account = self.get_account().await.map_err(map_anyhow)?;
            let balances = account["balances"].as_array().cloned().unwrap_or_default();

            let mut positions = Vec::new();
            for b in balances {
                let asset = b["asset"].as_str().unwrap_or_default();
                let free: f64 = b["free"].as_str().unwrap_or("0").parse().unwrap_or(0.0);
                if free <= 0.0 || asset == "USDT" || asset == "BUSD" || asset.is_empty() {
                    continue;
                }
                let symbol = format!("{asset}USDT");
                let mark_price = self.fetch_mark_price(&symbol, deadline).await.unwrap_or(0.0);
                positions.push(ExchangePosition {
                    symbol,
                    side: Direction::Long,
                    entry_price: mark_price,
                    quantity: free,
                    mark_price,
                    unrealized_pnl: 0.0,
                });
            }
            Ok(positions)
        })
        .await
    }

    #[instrument(skip(self, deadline), name = "binance::exchange_info")]
    async fn exchange_info(&self, symbol: &str, deadline: Duration) -> Result<SymbolInfo, ExchangeError> {
        with_deadline(deadline, async {
            let url = format!("{}/api/v3/exchangeInfo?symbol={}", self.base_url, symbol);
            let resp = self.client.get(&url).send().await.map_err(|e| ExchangeError::ExchangeReject(e.to_string()))?;
            let status = resp.status();
            let body: serde_json::Value =
                resp.json().await.map_err(|e| ExchangeError::ExchangeReject(e.to_string()))?;

            if !status.is_success() {
                return Err(ExchangeError::InvalidSymbol(symbol.to_string()));
            }

            let info = body["symbols"]
                .as_array()
                .and_then(|arr| arr.first())
                .ok_or_else(|| ExchangeError::InvalidSymbol(symbol.to_string()))?;

            let filters = info["filters"].as_array().cloned().unwrap_or_default();
            let mut tick_size = 0.01;
            let mut lot_step = 0.00001;
            let mut min_notional = 10.0;

            for f in &filters {
                match f["filterType"].as_str() {
                    Some("PRICE_FILTER") => {
                        tick_size = f["tickSize"].as_str().and_then(|s| s.parse().ok()).unwrap_or(tick_size);
                    }
                    Some("LOT_SIZE") => {
                        lot_step = f["stepSize"].as_str().and_then(|s| s.parse().ok()).unwrap_or(lot_step);
                    }
                    Some("MIN_NOTIONAL") | Some("NOTIONAL") => {
                        min_notional = f["minNotional"]
                            .as_str()
                            .or_else(|| f["notional"].as_str())
                            .and_then(|s| s.parse().ok())
                            .unwrap_or(min_notional);
                    }
                    _ => {}
                }
            }

            Ok(SymbolInfo { tick_size, lot_step, min_notional })
        })
        .await
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}
