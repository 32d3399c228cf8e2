use std::{
    fmt::Display,
    str::FromStr,
    sync::OnceLock,
};

use num_bigint::{
    BigInt,
    ParseBigIntError,
    Sign,
};

/// The maximum length of the wire encoding of a single price: a 256-bit
/// magnitude plus one byte of sign slack. Anything longer is malformed.
pub const MAX_PRICE_BYTE_LEN: usize = 33;

/// A signed arbitrary-precision price. The scale (number of decimal places)
/// is defined per currency pair by the oracle sidecar and is not tracked
/// here.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Price(BigInt);

impl Price {
    #[must_use]
    pub fn new(value: BigInt) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn get(&self) -> &BigInt {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> BigInt {
        self.0
    }

    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.0.sign() == Sign::Minus
    }

    /// Returns the wire form of this price: big-endian two's-complement
    /// bytes, minimal length.
    #[must_use]
    pub fn to_signed_bytes(&self) -> Vec<u8> {
        self.0.to_signed_bytes_be()
    }

    /// Parses a price from its big-endian two's-complement wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is longer than [`MAX_PRICE_BYTE_LEN`]
    /// bytes.
    pub fn from_signed_bytes(input: &[u8]) -> Result<Self, PriceBytesTooLong> {
        if input.len() > MAX_PRICE_BYTE_LEN {
            return Err(PriceBytesTooLong {
                len: input.len(),
            });
        }
        Ok(Self(BigInt::from_signed_bytes_be(input)))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("price bytes are too long: {len}")]
pub struct PriceBytesTooLong {
    pub len: usize,
}

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ParsePriceError(#[from] ParseBigIntError);

impl FromStr for Price {
    type Err = ParsePriceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self::new).map_err(Into::into)
    }
}

impl Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for Price {
    fn from(value: i64) -> Self {
        Self(BigInt::from(value))
    }
}

impl From<u64> for Price {
    fn from(value: u64) -> Self {
        Self(BigInt::from(value))
    }
}

fn token_regex() -> &'static regex::Regex {
    static REGEX: OnceLock<regex::Regex> = OnceLock::new();
    REGEX.get_or_init(|| regex::Regex::new(r"^[A-Z0-9]+$").expect("valid regex"))
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Base(String);

impl Display for Base {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, thiserror::Error)]
#[error(
    "failed to parse input `{input}` as base part of currency pair; only uppercase alphanumeric \
     characters are permitted"
)]
pub struct ParseBaseError {
    input: String,
}

impl FromStr for Base {
    type Err = ParseBaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if token_regex().find(s).is_none() {
            return Err(Self::Err {
                input: s.to_string(),
            });
        }
        Ok(Self(s.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quote(String);

impl Display for Quote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, thiserror::Error)]
#[error(
    "failed to parse input `{input}` as quote part of currency pair; only uppercase alphanumeric \
     characters are permitted"
)]
pub struct ParseQuoteError {
    input: String,
}

impl FromStr for Quote {
    type Err = ParseQuoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if token_regex().find(s).is_none() {
            return Err(Self::Err {
                input: s.to_string(),
            });
        }
        Ok(Self(s.to_string()))
    }
}

/// A pair of uppercase alphanumeric tokens naming a price series, canonical
/// string form `BASE/QUOTE`. The derived ordering is lexicographic on
/// `(base, quote)`, which matches ordering by canonical string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CurrencyPair {
    base: Base,
    quote: Quote,
}

impl CurrencyPair {
    #[must_use]
    pub fn from_parts(base: Base, quote: Quote) -> Self {
        Self {
            base,
            quote,
        }
    }

    /// Returns the `(base, quote)` pair that makes up this [`CurrencyPair`].
    #[must_use]
    pub fn into_parts(self) -> (String, String) {
        (self.base.0, self.quote.0)
    }

    #[must_use]
    pub fn base(&self) -> &str {
        &self.base.0
    }

    #[must_use]
    pub fn quote(&self) -> &str {
        &self.quote.0
    }
}

impl Display for CurrencyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for CurrencyPair {
    type Err = CurrencyPairParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static REGEX: OnceLock<regex::Regex> = OnceLock::new();
        fn get_regex() -> &'static regex::Regex {
            REGEX.get_or_init(|| {
                regex::Regex::new(r"^([A-Z0-9]+)/([A-Z0-9]+)$").expect("valid regex")
            })
        }

        let caps = get_regex()
            .captures(s)
            .ok_or_else(|| CurrencyPairParseError::invalid_currency_pair_string(s))?;
        let base = caps
            .get(1)
            .expect("must have base string, as regex captured it")
            .as_str();
        let quote = caps
            .get(2)
            .expect("must have quote string, as regex captured it")
            .as_str();

        Ok(Self {
            base: Base(base.to_string()),
            quote: Quote(quote.to_string()),
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct CurrencyPairParseError(CurrencyPairParseErrorKind);

#[derive(Debug, thiserror::Error)]
enum CurrencyPairParseErrorKind {
    #[error("invalid currency pair string: {0}")]
    InvalidCurrencyPairString(String),
}

impl CurrencyPairParseError {
    #[must_use]
    fn invalid_currency_pair_string(s: &str) -> Self {
        Self(CurrencyPairParseErrorKind::InvalidCurrencyPairString(
            s.to_string(),
        ))
    }
}

/// The compact integer form of a currency pair under a given ID strategy.
///
/// The pair-to-ID mapping is stable within one height but may change across
/// heights (the delta strategy keys IDs by position in a sorted registry
/// snapshot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CurrencyPairId(u64);

impl std::fmt::Display for CurrencyPairId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl CurrencyPairId {
    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}
