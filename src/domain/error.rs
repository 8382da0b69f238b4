//! Domain error types.

use rust_decimal::Decimal;

/// Top-level error type for tradesim.
///
/// The first group of variants are business rejections: the request was
/// refused and nothing was written. The rest are infrastructure failures.
#[derive(Debug, thiserror::Error)]
pub enum TradesimError {
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("invalid amount {amount}: must be positive")]
    InvalidAmount { amount: Decimal },

    #[error("ticker {ticker} already exists")]
    DuplicateTicker { ticker: String },

    #[error("unknown instrument {ticker}")]
    UnknownInstrument { ticker: String },

    #[error("unknown account {account_id}")]
    UnknownAccount { account_id: i64 },

    #[error("unknown bank link {bank_link_id} for account {account_id}")]
    UnknownBankLink { account_id: i64, bank_link_id: i64 },

    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("insufficient bank funds: need {needed}, have {available}")]
    InsufficientBankFunds { needed: Decimal, available: Decimal },

    #[error("insufficient volume for {ticker}: requested {requested}, available {available}")]
    InsufficientVolume {
        ticker: String,
        requested: i64,
        available: i64,
    },

    #[error("insufficient position in {ticker}: requested {requested}, held {held}")]
    InsufficientPosition {
        ticker: String,
        requested: i64,
        held: i64,
    },

    #[error("market is closed")]
    MarketClosed,

    #[error("concurrent modification: {reason}")]
    ConcurrentModification { reason: String },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TradesimError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        TradesimError::InvalidInput {
            reason: reason.into(),
        }
    }

    /// True for refusals the caller should show to the user; false for
    /// store, config and I/O failures.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            TradesimError::InvalidInput { .. }
                | TradesimError::InvalidAmount { .. }
                | TradesimError::DuplicateTicker { .. }
                | TradesimError::UnknownInstrument { .. }
                | TradesimError::UnknownAccount { .. }
                | TradesimError::UnknownBankLink { .. }
                | TradesimError::InsufficientFunds { .. }
                | TradesimError::InsufficientBankFunds { .. }
                | TradesimError::InsufficientVolume { .. }
                | TradesimError::InsufficientPosition { .. }
                | TradesimError::MarketClosed
                | TradesimError::ConcurrentModification { .. }
        )
    }
}

impl From<&TradesimError> for std::process::ExitCode {
    fn from(err: &TradesimError) -> Self {
        let code: u8 = match err {
            TradesimError::Io(_) => 1,
            TradesimError::ConfigParse { .. }
            | TradesimError::ConfigMissing { .. }
            | TradesimError::ConfigInvalid { .. } => 2,
            TradesimError::Database { .. }
            | TradesimError::DatabaseQuery { .. }
            | TradesimError::ConcurrentModification { .. } => 3,
            TradesimError::InvalidInput { .. }
            | TradesimError::InvalidAmount { .. }
            | TradesimError::DuplicateTicker { .. } => 4,
            TradesimError::UnknownInstrument { .. }
            | TradesimError::UnknownAccount { .. }
            | TradesimError::UnknownBankLink { .. } => 5,
            TradesimError::InsufficientFunds { .. }
            | TradesimError::InsufficientBankFunds { .. }
            | TradesimError::InsufficientVolume { .. }
            | TradesimError::InsufficientPosition { .. } => 6,
            TradesimError::MarketClosed => 7,
        };
        std::process::ExitCode::from(code)
    }
}
