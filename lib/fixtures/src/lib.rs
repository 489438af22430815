//! Deterministic fixture generation and artifact validation (C8), used by
//! the sandboxed tester to materialize test workspaces and to check
//! required output artifacts before a verdict is computed.

pub mod ohlcv;
pub mod secrets;
pub mod validate;

pub use ohlcv::{generate_ohlcv, OhlcvBar};
pub use secrets::{default_secret_patterns, scan_secrets};
pub use validate::{
    validate_equity_curve_csv, validate_events_log, validate_json_schema, validate_trades_csv,
    ValidationResult,
};
