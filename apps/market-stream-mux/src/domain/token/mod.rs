//! Instrument Tokens and Venues
//!
//! An instrument token is the venue-qualified symbol `MARKET:SYMBOL`,
//! uppercase and whitespace-trimmed. Tokens are the only key used by the
//! ledger, the wire protocol, and the store.
//!
//! A [`Venue`] groups the exchanges served by one streaming endpoint. Each
//! venue gets its own connection, ledger, and supervisor.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Exchanges recognized in instrument tokens.
pub const KNOWN_EXCHANGES: &[&str] = &["NSE", "BSE", "NFO", "NYSE", "NASDAQ"];

/// Longest accepted symbol part of a token.
const MAX_SYMBOL_LEN: usize = 41;

// =============================================================================
// Errors
// =============================================================================

/// Reasons a raw symbol cannot become an [`InstrumentToken`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Input was empty after trimming.
    #[error("empty symbol")]
    Empty,
    /// Exchange prefix is not a known exchange.
    #[error("unknown exchange: {0}")]
    UnknownExchange(String),
    /// Symbol part violates the token grammar.
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),
    /// Exchange is valid but not served by this venue.
    #[error("exchange {exchange} is not served by venue {venue}")]
    ForeignExchange {
        /// Exchange from the token.
        exchange: String,
        /// Venue that rejected it.
        venue: String,
    },
}

// =============================================================================
// Instrument Token
// =============================================================================

/// Normalized `MARKET:SYMBOL` identifier.
///
/// Equality is string equality of the normalized form, so `" nse:infy "`
/// and `"NSE:INFY"` produce equal tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct InstrumentToken(String);

impl InstrumentToken {
    /// Parse a fully qualified token.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] if the input has no valid exchange prefix or
    /// the symbol part violates the token grammar.
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let normalized = raw.trim().to_uppercase();
        if normalized.is_empty() {
            return Err(TokenError::Empty);
        }
        let Some((exchange, symbol)) = normalized.split_once(':') else {
            return Err(TokenError::UnknownExchange(String::new()));
        };
        Self::from_parts(exchange.trim(), symbol.trim())
    }

    fn from_parts(exchange: &str, symbol: &str) -> Result<Self, TokenError> {
        if !KNOWN_EXCHANGES.contains(&exchange) {
            return Err(TokenError::UnknownExchange(exchange.to_string()));
        }
        if !is_valid_symbol(symbol) {
            return Err(TokenError::InvalidSymbol(symbol.to_string()));
        }
        Ok(Self(format!("{exchange}:{symbol}")))
    }

    /// Exchange prefix (`NSE` in `NSE:INFY`).
    #[must_use]
    pub fn exchange(&self) -> &str {
        self.0.split_once(':').map_or("", |(exchange, _)| exchange)
    }

    /// Symbol part (`INFY` in `NSE:INFY`).
    #[must_use]
    pub fn symbol(&self) -> &str {
        self.0.split_once(':').map_or("", |(_, symbol)| symbol)
    }

    /// The normalized token string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for InstrumentToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_valid_symbol(symbol: &str) -> bool {
    let mut chars = symbol.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    symbol.len() <= MAX_SYMBOL_LEN
        && first.is_ascii_alphanumeric()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

// =============================================================================
// Venue
// =============================================================================

/// A market venue served by one streaming endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Venue {
    id: String,
    exchanges: Vec<String>,
    default_exchange: String,
    stream_path: String,
}

impl Venue {
    /// Create a venue.
    ///
    /// The first exchange is used to qualify bare symbols.
    #[must_use]
    pub fn new(id: &str, exchanges: &[&str], stream_path: &str) -> Self {
        let exchanges: Vec<String> = exchanges.iter().map(|e| e.to_uppercase()).collect();
        Self {
            id: id.to_lowercase(),
            default_exchange: exchanges.first().cloned().unwrap_or_default(),
            exchanges,
            stream_path: stream_path.to_string(),
        }
    }

    /// Indian markets: NSE, BSE, and NFO derivatives.
    #[must_use]
    pub fn india() -> Self {
        Self::new("india", &["NSE", "BSE", "NFO"], "/ws/quotes")
    }

    /// US markets: NASDAQ and NYSE.
    #[must_use]
    pub fn us() -> Self {
        Self::new("us", &["NASDAQ", "NYSE"], "/ws/us-quotes")
    }

    /// Look up a preset venue by id.
    #[must_use]
    pub fn preset(id: &str) -> Option<Self> {
        match id.trim().to_lowercase().as_str() {
            "india" | "in" => Some(Self::india()),
            "us" => Some(Self::us()),
            _ => None,
        }
    }

    /// Venue identifier used in logs, metrics, and store keys.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Path suffix appended to the API base for the stream endpoint.
    #[must_use]
    pub fn stream_path(&self) -> &str {
        &self.stream_path
    }

    /// Exchange used for bare symbols.
    #[must_use]
    pub fn default_exchange(&self) -> &str {
        &self.default_exchange
    }

    /// Whether this venue serves the token's exchange.
    #[must_use]
    pub fn serves(&self, token: &InstrumentToken) -> bool {
        self.exchanges.iter().any(|e| e == token.exchange())
    }

    /// Normalize a raw symbol into a token belonging to this venue.
    ///
    /// Bare symbols are qualified with the default exchange.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] if the symbol is invalid or its exchange is
    /// not served by this venue.
    pub fn normalize(&self, raw: &str) -> Result<InstrumentToken, TokenError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TokenError::Empty);
        }
        let token = if trimmed.contains(':') {
            InstrumentToken::parse(trimmed)?
        } else {
            InstrumentToken::from_parts(&self.default_exchange, &trimmed.to_uppercase())?
        };
        if !self.serves(&token) {
            return Err(TokenError::ForeignExchange {
                exchange: token.exchange().to_string(),
                venue: self.id.clone(),
            });
        }
        Ok(token)
    }

    /// Normalize and dedupe a list of raw symbols, skipping invalid ones.
    ///
    /// Order of first appearance is preserved.
    #[must_use]
    pub fn normalize_all<S: AsRef<str>>(&self, raw: &[S]) -> Vec<InstrumentToken> {
        let mut out: Vec<InstrumentToken> = Vec::with_capacity(raw.len());
        for item in raw {
            match self.normalize(item.as_ref()) {
                Ok(token) if !out.contains(&token) => out.push(token),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(venue = %self.id, input = item.as_ref(), error = %e, "Skipping symbol");
                }
            }
        }
        out
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

// =============================================================================
// Symbol Resolver
// =============================================================================

/// Maps symbols from inbound frames onto tokens for one venue.
///
/// Servers may strip the exchange and send bare symbols. A bare symbol
/// resolves to the wanted token with that symbol; only when none is wanted
/// does it fall back to the venue's default exchange. When several wanted
/// tokens share a symbol, the first in token order wins.
#[derive(Debug, Clone)]
pub struct SymbolResolver {
    venue: Venue,
    by_symbol: HashMap<String, InstrumentToken>,
}

impl SymbolResolver {
    /// A resolver with nothing wanted yet.
    #[must_use]
    pub fn new(venue: Venue) -> Self {
        Self {
            venue,
            by_symbol: HashMap::new(),
        }
    }

    /// Venue served.
    #[must_use]
    pub const fn venue(&self) -> &Venue {
        &self.venue
    }

    /// Replace the wanted set. `wanted` should iterate in token order.
    pub fn set_wanted<'a, I>(&mut self, wanted: I)
    where
        I: IntoIterator<Item = &'a InstrumentToken>,
    {
        self.by_symbol.clear();
        for token in wanted {
            self.by_symbol
                .entry(token.symbol().to_string())
                .or_insert_with(|| token.clone());
        }
    }

    /// Resolve a raw inbound symbol.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] if the symbol is invalid or belongs to another
    /// venue.
    pub fn resolve(&self, raw: &str) -> Result<InstrumentToken, TokenError> {
        let trimmed = raw.trim();
        if !trimmed.contains(':') {
            if let Some(token) = self.by_symbol.get(&trimmed.to_uppercase()) {
                return Ok(token.clone());
            }
        }
        self.venue.normalize(trimmed)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(" nse:infy ", "NSE:INFY" ; "trims and uppercases")]
    #[test_case("NSE:M&M", "" ; "rejects ampersand")]
    #[test_case("BSE:500325", "BSE:500325" ; "numeric symbol")]
    #[test_case("NFO:NIFTY24MAR22000CE", "NFO:NIFTY24MAR22000CE" ; "option symbol")]
    #[test_case("NSE:BAJAJ-AUTO", "NSE:BAJAJ-AUTO" ; "dash allowed")]
    #[test_case("LSE:VOD", "" ; "unknown exchange")]
    #[test_case("NSE:-BAD", "" ; "leading dash")]
    #[test_case("   ", "" ; "blank")]
    fn parse_token(input: &str, expected: &str) {
        let parsed = InstrumentToken::parse(input).map(|t| t.to_string()).unwrap_or_default();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn token_parts() {
        let token = InstrumentToken::parse("nasdaq:aapl").unwrap();
        assert_eq!(token.exchange(), "NASDAQ");
        assert_eq!(token.symbol(), "AAPL");
        assert_eq!(token.as_str(), "NASDAQ:AAPL");
    }

    #[test]
    fn symbol_length_limit() {
        let ok = format!("NSE:{}", "A".repeat(41));
        let too_long = format!("NSE:{}", "A".repeat(42));
        assert!(InstrumentToken::parse(&ok).is_ok());
        assert!(matches!(
            InstrumentToken::parse(&too_long),
            Err(TokenError::InvalidSymbol(_))
        ));
    }

    #[test_case("aapl", "NASDAQ:AAPL" ; "bare symbol gets default exchange")]
    #[test_case("nyse:ibm", "NYSE:IBM" ; "qualified symbol kept")]
    #[test_case(" Msft ", "NASDAQ:MSFT" ; "bare symbol trimmed")]
    fn us_normalize(input: &str, expected: &str) {
        assert_eq!(Venue::us().normalize(input).unwrap().as_str(), expected);
    }

    #[test]
    fn foreign_exchange_rejected() {
        let err = Venue::us().normalize("NSE:INFY").unwrap_err();
        assert_eq!(
            err,
            TokenError::ForeignExchange {
                exchange: "NSE".to_string(),
                venue: "us".to_string(),
            }
        );
    }

    #[test]
    fn normalize_all_dedupes_and_skips_invalid() {
        let venue = Venue::india();
        let tokens = venue.normalize_all(&["infy", "NSE:INFY", " nse:infy", "", "NASDAQ:AAPL", "TCS"]);
        let strings: Vec<&str> = tokens.iter().map(InstrumentToken::as_str).collect();
        assert_eq!(strings, vec!["NSE:INFY", "NSE:TCS"]);
    }

    #[test]
    fn bare_inbound_symbol_prefers_wanted_exchange() {
        let ibm = InstrumentToken::parse("NYSE:IBM").unwrap();
        let aapl = InstrumentToken::parse("NASDAQ:AAPL").unwrap();
        let mut resolver = SymbolResolver::new(Venue::us());
        resolver.set_wanted([&aapl, &ibm]);

        assert_eq!(resolver.resolve("ibm").unwrap(), ibm);
        assert_eq!(resolver.resolve("AAPL").unwrap(), aapl);
        assert_eq!(resolver.resolve("MSFT").unwrap().as_str(), "NASDAQ:MSFT");
        assert_eq!(resolver.resolve("NASDAQ:IBM").unwrap().as_str(), "NASDAQ:IBM");
        assert!(resolver.resolve("NSE:INFY").is_err());

        resolver.set_wanted(std::iter::empty());
        assert_eq!(resolver.resolve("IBM").unwrap().as_str(), "NASDAQ:IBM");
    }

    #[test]
    fn shared_symbol_resolves_to_first_token() {
        let nasdaq = InstrumentToken::parse("NASDAQ:IBM").unwrap();
        let nyse = InstrumentToken::parse("NYSE:IBM").unwrap();
        let mut resolver = SymbolResolver::new(Venue::us());
        resolver.set_wanted([&nasdaq, &nyse]);

        assert_eq!(resolver.resolve("IBM").unwrap(), nasdaq);
    }

    #[test]
    fn presets() {
        assert_eq!(Venue::preset("IN"), Some(Venue::india()));
        assert_eq!(Venue::preset(" us "), Some(Venue::us()));
        assert_eq!(Venue::preset("eu"), None);
        assert_eq!(Venue::india().default_exchange(), "NSE");
        assert_eq!(Venue::us().stream_path(), "/ws/us-quotes");
    }
}
