//! Ticker normalization.
//!
//! A caller may hand us `"000858.sz"`, `" 600519.SH "` or a bare `"000858"`.
//! Every dataset for that instrument is stored under the digit-only
//! `pure_code`; remote endpoints want either the bare code or an
//! exchange-qualified form such as `SZ000858`.
//!
//! When no suffix is given the exchange is inferred from the leading digit:
//!
//! | leading digit | exchange |
//! |---------------|----------|
//! | `6`           | SH       |
//! | `0`, `3`      | SZ       |
//! | `4`, `8`      | BJ       |
//! | anything else | SZ       |
//!
//! The table is best-effort. Inference emits a warning so callers notice
//! and start passing explicit suffixes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Listing venue of an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    /// Shanghai.
    Sh,
    /// Shenzhen.
    Sz,
    /// Beijing.
    Bj,
    /// Any other explicitly supplied suffix, stored upper-case.
    Other(String),
}

impl Exchange {
    fn from_suffix(suffix: &str) -> Self {
        match suffix {
            "sh" => Exchange::Sh,
            "sz" => Exchange::Sz,
            "bj" => Exchange::Bj,
            other => Exchange::Other(other.to_ascii_uppercase()),
        }
    }

    /// Best-effort venue for a bare code.
    fn infer(pure_code: &str) -> Self {
        match pure_code.as_bytes().first() {
            Some(b'6') => Exchange::Sh,
            Some(b'0') | Some(b'3') => Exchange::Sz,
            Some(b'4') | Some(b'8') => Exchange::Bj,
            _ => Exchange::Sz,
        }
    }

    /// Upper-case prefix used in qualified codes.
    pub fn prefix(&self) -> &str {
        match self {
            Exchange::Sh => "SH",
            Exchange::Sz => "SZ",
            Exchange::Bj => "BJ",
            Exchange::Other(s) => s,
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Whether the exchange came from the caller or from the digit table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeSource {
    Explicit,
    Inferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("empty symbol")]
    Empty,

    #[error("malformed symbol '{0}': expected CODE or CODE.EXCHANGE")]
    Malformed(String),

    #[error("symbol code '{0}' must contain only digits")]
    NonDigitCode(String),
}

/// Normalized identity of an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolIdentity {
    raw_input: String,
    pure_code: String,
    exchange: Exchange,
    exchange_source: ExchangeSource,
}

impl SymbolIdentity {
    /// Parse a user-supplied ticker.
    pub fn parse(raw_input: &str) -> Result<Self, SymbolError> {
        let normalized = raw_input.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(SymbolError::Empty);
        }

        let mut parts = normalized.split('.');
        let code = parts.next().unwrap_or_default();
        let suffix = parts.next();
        if parts.next().is_some() || code.is_empty() || suffix == Some("") {
            return Err(SymbolError::Malformed(raw_input.to_string()));
        }
        if !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SymbolError::NonDigitCode(code.to_string()));
        }

        let (exchange, exchange_source) = match suffix {
            Some(s) => (Exchange::from_suffix(s), ExchangeSource::Explicit),
            None => {
                let inferred = Exchange::infer(code);
                warn!(
                    symbol = %code,
                    exchange = %inferred,
                    "no exchange suffix given, inferred from leading digit"
                );
                (inferred, ExchangeSource::Inferred)
            }
        };

        Ok(Self {
            raw_input: raw_input.to_string(),
            pure_code: code.to_string(),
            exchange,
            exchange_source,
        })
    }

    pub fn raw_input(&self) -> &str {
        &self.raw_input
    }

    /// Digit-only code; also the storage key.
    pub fn pure_code(&self) -> &str {
        &self.pure_code
    }

    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    pub fn exchange_source(&self) -> ExchangeSource {
        self.exchange_source
    }

    /// Exchange-prefixed code, e.g. `SZ000858`.
    pub fn qualified_code(&self) -> String {
        format!("{}{}", self.exchange.prefix(), self.pure_code)
    }

    /// Lower-case qualified code, e.g. `sz000858`.
    pub fn lower_qualified_code(&self) -> String {
        self.qualified_code().to_ascii_lowercase()
    }
}

impl fmt::Display for SymbolIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_code())
    }
}
