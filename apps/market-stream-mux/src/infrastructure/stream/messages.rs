//! Stream Wire Message Types
//!
//! Serde types for the JSON frames exchanged with the quotes stream, plus
//! validation into domain records.
//!
//! # Message Types
//!
//! ## Outbound
//! - `WireCommand`: `{"op":"subscribe"|"unsubscribe","symbols":[...]}`
//!
//! ## Inbound
//! - `TickFrame`: last price update (`type: "tick"`)
//! - `TradeFrame`: last-sale print (`type: "trade"`), the US stream's price
//!   feed
//! - `BarFrame`: OHLCV bar update (`type: "bar"` or `"candle"`)
//! - `BackfillFrame`: batch of closed bars (`type: "backfill"`)
//! - Status payloads (`provider_health`, `market_status`, `status`) kept as
//!   raw JSON
//! - Control acks (`ready`, `subscribed`, `unsubscribed`, `pong`) and
//!   `error`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use crate::domain::subscription::WireOp;
use crate::domain::streaming::{BarRecord, BarStatus, TickRecord};
use crate::domain::token::{InstrumentToken, SymbolResolver, TokenError};

// =============================================================================
// Outbound
// =============================================================================

/// Batched subscribe/unsubscribe command.
///
/// # Wire Format (JSON)
/// ```json
/// {"op": "subscribe", "symbols": ["NASDAQ:AAPL", "NASDAQ:MSFT"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireCommand {
    /// Operation.
    pub op: WireOp,
    /// Tokens in the batch.
    pub symbols: Vec<String>,
}

impl WireCommand {
    /// Build a command from tokens.
    #[must_use]
    pub fn new(op: WireOp, tokens: &[InstrumentToken]) -> Self {
        Self {
            op,
            symbols: tokens.iter().map(ToString::to_string).collect(),
        }
    }
}

// =============================================================================
// Validation Errors
// =============================================================================

/// Reasons an inbound frame is rejected after decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// `symbol` missing or blank.
    #[error("frame has no symbol")]
    MissingSymbol,
    /// `symbol` is not a valid token.
    #[error("invalid symbol: {0}")]
    InvalidToken(#[source] TokenError),
    /// Token belongs to another venue.
    #[error("symbol {0} belongs to another market")]
    ForeignMarket(String),
    /// A numeric field is NaN or infinite.
    #[error("non-finite value in field {0}")]
    NonFinite(&'static str),
    /// `ts` is not RFC 3339, or `t` is out of range.
    #[error("unparseable timestamp: {0}")]
    BadTimestamp(String),
}

impl FrameError {
    /// Label for the dropped-frames counter.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::MissingSymbol => "missing_symbol",
            Self::InvalidToken(_) => "invalid_token",
            Self::ForeignMarket(_) => "foreign_market",
            Self::NonFinite(_) => "non_finite",
            Self::BadTimestamp(_) => "bad_timestamp",
        }
    }
}

fn resolve_token(
    resolver: &SymbolResolver,
    symbol: Option<&str>,
) -> Result<InstrumentToken, FrameError> {
    let symbol = symbol.map(str::trim).filter(|s| !s.is_empty());
    let Some(symbol) = symbol else {
        return Err(FrameError::MissingSymbol);
    };
    resolver.resolve(symbol).map_err(|err| match err {
        TokenError::ForeignExchange { .. } => FrameError::ForeignMarket(symbol.to_string()),
        other => FrameError::InvalidToken(other),
    })
}

fn finite(field: &'static str, value: f64) -> Result<f64, FrameError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(FrameError::NonFinite(field))
    }
}

fn finite_opt(field: &'static str, value: Option<f64>) -> Result<Option<f64>, FrameError> {
    value.map(|v| finite(field, v)).transpose()
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, FrameError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| FrameError::BadTimestamp(raw.to_string()))
}

fn from_epoch_millis(t: f64) -> Result<DateTime<Utc>, FrameError> {
    let t = finite("t", t)?;
    #[allow(clippy::cast_possible_truncation)]
    let millis = t.round() as i64;
    DateTime::from_timestamp_millis(millis).ok_or_else(|| FrameError::BadTimestamp(t.to_string()))
}

// =============================================================================
// Tick
// =============================================================================

/// Tick update.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "tick", "symbol": "NSE:INFY", "ltp": 100.75, "change": 1.25,
///  "change_pct": 1.26, "oi": null, "volume": 1000.0,
///  "ts": "2026-02-28T10:00:00+00:00"}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TickFrame {
    /// Token, qualified or bare.
    #[serde(default)]
    pub symbol: Option<String>,
    /// Last traded price.
    pub ltp: f64,
    /// Absolute change.
    #[serde(default)]
    pub change: Option<f64>,
    /// Percent change.
    #[serde(default)]
    pub change_pct: Option<f64>,
    /// Open interest.
    #[serde(default)]
    pub oi: Option<f64>,
    /// Volume.
    #[serde(default)]
    pub volume: Option<f64>,
    /// RFC 3339 timestamp.
    #[serde(default)]
    pub ts: Option<String>,
}

impl TickFrame {
    /// Validate into a [`TickRecord`].
    ///
    /// `received_at` stands in for a missing `ts`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the symbol is missing, invalid, or foreign,
    /// a number is non-finite, or `ts` does not parse.
    pub fn into_record(
        self,
        resolver: &SymbolResolver,
        received_at: DateTime<Utc>,
    ) -> Result<TickRecord, FrameError> {
        let token = resolve_token(resolver, self.symbol.as_deref())?;
        let ts = match self.ts.as_deref() {
            None => received_at,
            Some(raw) => parse_rfc3339(raw)?,
        };

        Ok(TickRecord {
            token,
            ltp: finite("ltp", self.ltp)?,
            change: finite("change", self.change.unwrap_or(0.0))?,
            change_pct: finite("change_pct", self.change_pct.unwrap_or(0.0))?,
            oi: finite_opt("oi", self.oi)?,
            volume: finite_opt("volume", self.volume)?,
            ts,
        })
    }
}

// =============================================================================
// Trade
// =============================================================================

/// Last-sale print.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "trade", "symbol": "AAPL", "p": 190.5, "v": 100.0,
///  "t": 1772272800000, "ts": "2026-02-28T10:00:00+00:00",
///  "provider": "finnhub", "latency_ms": 12.5, "raw": {}}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TradeFrame {
    /// Token, usually bare.
    #[serde(default)]
    pub symbol: Option<String>,
    /// Trade price.
    pub p: f64,
    /// Trade size.
    #[serde(default)]
    pub v: Option<f64>,
    /// Trade time, epoch milliseconds.
    #[serde(default)]
    pub t: Option<f64>,
    /// Trade time, RFC 3339.
    #[serde(default)]
    pub ts: Option<String>,
}

impl TradeFrame {
    /// Validate into a [`TickRecord`] carrying the print as last price.
    ///
    /// The time comes from `ts`, then `t`, then `received_at`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the symbol is missing, invalid, or foreign,
    /// a number is non-finite, or a timestamp does not parse.
    pub fn into_record(
        self,
        resolver: &SymbolResolver,
        received_at: DateTime<Utc>,
    ) -> Result<TickRecord, FrameError> {
        let token = resolve_token(resolver, self.symbol.as_deref())?;
        let ltp = finite("p", self.p)?;
        let volume = finite_opt("v", self.v)?;
        let ts = match (self.ts.as_deref(), self.t) {
            (Some(raw), _) => parse_rfc3339(raw)?,
            (None, Some(t)) => from_epoch_millis(t)?,
            (None, None) => received_at,
        };

        Ok(TickRecord {
            token,
            ltp,
            change: 0.0,
            change_pct: 0.0,
            oi: None,
            volume,
            ts,
        })
    }
}

// =============================================================================
// Bars
// =============================================================================

/// Wire bar status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireBarStatus {
    /// Forming.
    #[default]
    Partial,
    /// Final.
    Closed,
}

impl From<WireBarStatus> for BarStatus {
    fn from(status: WireBarStatus) -> Self {
        match status {
            WireBarStatus::Partial => Self::Partial,
            WireBarStatus::Closed => Self::Closed,
        }
    }
}

fn default_interval() -> String {
    "1m".to_string()
}

/// OHLCV fields shared by live bars and backfill entries.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BarFields {
    /// Bar open time, epoch milliseconds.
    pub t: f64,
    /// Open.
    pub o: f64,
    /// High.
    pub h: f64,
    /// Low.
    pub l: f64,
    /// Close.
    pub c: f64,
    /// Volume.
    #[serde(default)]
    pub v: Option<f64>,
    /// Volume-weighted average price.
    #[serde(default)]
    pub vwap: Option<f64>,
    /// Session label.
    #[serde(default)]
    pub s: Option<String>,
    /// Extended-hours flag.
    #[serde(default)]
    pub ext: Option<bool>,
}

impl BarFields {
    fn into_record(
        self,
        token: InstrumentToken,
        interval: String,
        status: BarStatus,
    ) -> Result<BarRecord, FrameError> {
        let t = finite("t", self.t)?;
        #[allow(clippy::cast_possible_truncation)]
        let t = t.round() as i64;

        Ok(BarRecord {
            token,
            interval,
            t,
            open: finite("o", self.o)?,
            high: finite("h", self.h)?,
            low: finite("l", self.l)?,
            close: finite("c", self.c)?,
            volume: finite("v", self.v.unwrap_or(0.0))?,
            vwap: finite_opt("vwap", self.vwap)?,
            session: self.s,
            extended: self.ext,
            status,
        })
    }
}

/// Live bar update.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "bar", "symbol": "AAPL", "interval": "1m", "status": "partial",
///  "t": 1772272800000, "o": 100.0, "h": 101.0, "l": 99.8, "c": 100.75,
///  "v": 1200.0, "vwap": 100.4, "s": "regular", "ext": false}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BarFrame {
    /// Token, qualified or bare.
    #[serde(default)]
    pub symbol: Option<String>,
    /// Interval label.
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Partial or closed.
    #[serde(default)]
    pub status: WireBarStatus,
    /// OHLCV fields.
    #[serde(flatten)]
    pub fields: BarFields,
}

impl BarFrame {
    /// Validate into a [`BarRecord`].
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the symbol is missing, invalid, or foreign,
    /// or any OHLCV or time field is non-finite.
    pub fn into_record(self, resolver: &SymbolResolver) -> Result<BarRecord, FrameError> {
        let token = resolve_token(resolver, self.symbol.as_deref())?;
        self.fields
            .into_record(token, self.interval, self.status.into())
    }
}

/// Closed-bar history for one token.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "backfill", "symbol": "AAPL", "interval": "1m",
///  "bars": [{"t": 1772272800000, "o": 1, "h": 2, "l": 0.5, "c": 1.5, "v": 10}]}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackfillFrame {
    /// Token, qualified or bare.
    #[serde(default)]
    pub symbol: Option<String>,
    /// Interval label.
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Raw bar entries, validated one at a time.
    #[serde(default)]
    pub bars: Vec<serde_json::Value>,
}

/// Validated backfill: the token plus every entry that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Backfill {
    /// Token.
    pub token: InstrumentToken,
    /// Interval label.
    pub interval: String,
    /// Valid closed bars.
    pub bars: Vec<BarRecord>,
    /// Entries skipped as invalid.
    pub skipped: usize,
}

impl BackfillFrame {
    /// Validate into a [`Backfill`].
    ///
    /// Invalid entries are skipped and counted.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] only for a missing, invalid, or foreign symbol.
    pub fn into_backfill(self, resolver: &SymbolResolver) -> Result<Backfill, FrameError> {
        let token = resolve_token(resolver, self.symbol.as_deref())?;
        let mut bars = Vec::with_capacity(self.bars.len());
        let mut skipped = 0;

        for value in self.bars {
            let record = serde_json::from_value::<BarFields>(value)
                .ok()
                .and_then(|fields| {
                    fields
                        .into_record(token.clone(), self.interval.clone(), BarStatus::Closed)
                        .ok()
                });
            match record {
                Some(bar) => bars.push(bar),
                None => skipped += 1,
            }
        }

        Ok(Backfill {
            token,
            interval: self.interval,
            bars,
            skipped,
        })
    }
}

// =============================================================================
// Control
// =============================================================================

/// Error frame from the server.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "error", "message": "No valid symbols to subscribe"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorFrame {
    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::token::Venue;

    fn us() -> SymbolResolver {
        SymbolResolver::new(Venue::us())
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T15:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn wire_command_serializes() {
        let cmd = WireCommand::new(
            WireOp::Subscribe,
            &[
                InstrumentToken::parse("NASDAQ:AAPL").unwrap(),
                InstrumentToken::parse("NASDAQ:MSFT").unwrap(),
            ],
        );
        assert_eq!(
            serde_json::to_string(&cmd).unwrap(),
            r#"{"op":"subscribe","symbols":["NASDAQ:AAPL","NASDAQ:MSFT"]}"#
        );
    }

    #[test]
    fn tick_defaults_change_and_timestamp() {
        let frame: TickFrame =
            serde_json::from_str(r#"{"symbol":"aapl","ltp":190.5}"#).unwrap();

        let tick = frame.into_record(&us(), now()).unwrap();

        assert_eq!(tick.token.as_str(), "NASDAQ:AAPL");
        assert_eq!(tick.change, 0.0);
        assert_eq!(tick.change_pct, 0.0);
        assert_eq!(tick.ts, now());
        assert!(tick.oi.is_none());
    }

    #[test]
    fn tick_parses_timestamp() {
        let frame: TickFrame = serde_json::from_str(
            r#"{"symbol":"NYSE:IBM","ltp":1,"ts":"2026-02-28T10:00:00+00:00"}"#,
        )
        .unwrap();

        let tick = frame.into_record(&us(), now()).unwrap();
        assert_eq!(tick.ts.to_rfc3339(), "2026-02-28T10:00:00+00:00");
    }

    #[test]
    fn tick_rejects_string_ltp() {
        let parsed = serde_json::from_str::<TickFrame>(r#"{"symbol":"AAPL","ltp":"not-a-number"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn tick_rejects_missing_symbol() {
        let frame: TickFrame = serde_json::from_str(r#"{"ltp":1.0}"#).unwrap();
        assert_eq!(
            frame.into_record(&us(), now()),
            Err(FrameError::MissingSymbol)
        );
    }

    #[test]
    fn tick_rejects_foreign_market() {
        let frame: TickFrame = serde_json::from_str(r#"{"symbol":"NSE:INFY","ltp":1.0}"#).unwrap();
        let err = frame.into_record(&us(), now()).unwrap_err();
        assert_eq!(err.reason(), "foreign_market");
    }

    #[test]
    fn tick_rejects_bad_timestamp() {
        let frame: TickFrame =
            serde_json::from_str(r#"{"symbol":"AAPL","ltp":1.0,"ts":"yesterday"}"#).unwrap();
        let err = frame.into_record(&us(), now()).unwrap_err();
        assert_eq!(err.reason(), "bad_timestamp");
    }

    #[test]
    fn non_finite_values_rejected() {
        let frame = TickFrame {
            symbol: Some("AAPL".into()),
            ltp: f64::NAN,
            change: None,
            change_pct: None,
            oi: None,
            volume: None,
            ts: None,
        };
        assert_eq!(
            frame.into_record(&us(), now()),
            Err(FrameError::NonFinite("ltp"))
        );
    }

    #[test]
    fn trade_becomes_last_price() {
        let frame: TradeFrame = serde_json::from_str(
            r#"{"symbol":"AAPL","p":190.5,"v":100,"t":1772272800000,
                "ts":"2026-02-28T10:00:00+00:00","provider":"finnhub","raw":{}}"#,
        )
        .unwrap();

        let tick = frame.into_record(&us(), now()).unwrap();

        assert_eq!(tick.token.as_str(), "NASDAQ:AAPL");
        assert_eq!(tick.ltp, 190.5);
        assert_eq!(tick.volume, Some(100.0));
        assert_eq!(tick.ts.to_rfc3339(), "2026-02-28T10:00:00+00:00");
    }

    #[test]
    fn trade_time_falls_back_to_epoch_millis() {
        let frame: TradeFrame =
            serde_json::from_str(r#"{"symbol":"AAPL","p":1.0,"t":1772272800000}"#).unwrap();
        let tick = frame.into_record(&us(), now()).unwrap();
        assert_eq!(tick.ts.timestamp_millis(), 1_772_272_800_000);

        let frame: TradeFrame = serde_json::from_str(r#"{"symbol":"AAPL","p":1.0}"#).unwrap();
        assert_eq!(frame.into_record(&us(), now()).unwrap().ts, now());
    }

    #[test]
    fn trade_rejects_non_finite_price() {
        let frame = TradeFrame {
            symbol: Some("AAPL".into()),
            p: f64::INFINITY,
            v: None,
            t: None,
            ts: None,
        };
        assert_eq!(
            frame.into_record(&us(), now()),
            Err(FrameError::NonFinite("p"))
        );
    }

    #[test]
    fn bare_symbol_resolves_against_wanted_tokens() {
        let ibm = InstrumentToken::parse("NYSE:IBM").unwrap();
        let mut resolver = us();
        resolver.set_wanted([&ibm]);

        let frame: BarFrame = serde_json::from_str(
            r#"{"symbol":"IBM","t":60000,"o":1,"h":1,"l":1,"c":1}"#,
        )
        .unwrap();

        assert_eq!(frame.into_record(&resolver).unwrap().token, ibm);
    }

    #[test]
    fn bar_keeps_optional_fields() {
        let frame: BarFrame = serde_json::from_str(
            r#"{"symbol":"AAPL","interval":"5m","status":"closed","t":1772272800000,
                "o":100.0,"h":101.0,"l":99.8,"c":100.75,"v":1200.0,
                "vwap":100.4,"s":"regular","ext":false,"ticks":12}"#,
        )
        .unwrap();

        let bar = frame.into_record(&us()).unwrap();

        assert_eq!(bar.interval, "5m");
        assert_eq!(bar.t, 1_772_272_800_000);
        assert_eq!(bar.status, BarStatus::Closed);
        assert_eq!(bar.vwap, Some(100.4));
        assert_eq!(bar.session.as_deref(), Some("regular"));
        assert_eq!(bar.extended, Some(false));
    }

    #[test]
    fn bar_defaults_volume_and_status() {
        let frame: BarFrame = serde_json::from_str(
            r#"{"symbol":"AAPL","t":60000,"o":1,"h":1,"l":1,"c":1}"#,
        )
        .unwrap();

        let bar = frame.into_record(&us()).unwrap();
        assert_eq!(bar.volume, 0.0);
        assert_eq!(bar.status, BarStatus::Partial);
        assert_eq!(bar.interval, "1m");
    }

    #[test]
    fn bar_missing_ohlc_fails_decode() {
        let parsed = serde_json::from_str::<BarFrame>(r#"{"symbol":"AAPL","t":1,"o":1}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn backfill_skips_invalid_entries() {
        let frame: BackfillFrame = serde_json::from_str(
            r#"{"symbol":"AAPL","interval":"1m","bars":[
                {"t":0,"o":1,"h":2,"l":0.5,"c":1.5,"v":10},
                {"t":60000,"o":"bad","h":2,"l":0.5,"c":1.5},
                {"t":120000,"o":1,"h":2,"l":0.5,"c":1.5}
            ]}"#,
        )
        .unwrap();

        let backfill = frame.into_backfill(&us()).unwrap();

        assert_eq!(backfill.bars.len(), 2);
        assert_eq!(backfill.skipped, 1);
        assert!(backfill.bars.iter().all(|b| b.status == BarStatus::Closed));
    }
}
