//! Pure validators for the sandbox's required output artifacts (§4.4 step
//! 4): JSON-schema checking for `test_report.json` and CSV header/column
//! checks for `trades.csv`/`equity_curve.csv`. Each takes only its input
//! bytes and returns a structured `(ok, issues)` result — no I/O.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The outcome of a single validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub ok: bool,
    pub issues: Vec<String>,
}

impl ValidationResult {
    #[must_use]
    pub fn new(issues: Vec<String>) -> Self {
        Self { ok: issues.is_empty(), issues }
    }

    #[must_use]
    pub fn passed() -> Self {
        Self { ok: true, issues: Vec::new() }
    }

    fn failed(issue: impl Into<String>) -> Self {
        Self { ok: false, issues: vec![issue.into()] }
    }
}

/// Validates `instance_bytes` (expected to be JSON, e.g. `test_report.json`)
/// against `schema`. Every schema violation is collected rather than
/// stopping at the first.
#[must_use]
pub fn validate_json_schema(instance_bytes: &[u8], schema: &JsonValue) -> ValidationResult {
    let instance: JsonValue = match serde_json::from_slice(instance_bytes) {
        Ok(value) => value,
        Err(e) => return ValidationResult::failed(format!("not valid JSON: {e}")),
    };

    let validator = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        Err(e) => return ValidationResult::failed(format!("invalid schema: {e}")),
    };

    let issues: Vec<String> = validator
        .iter_errors(&instance)
        .map(|err| format!("{err} (at {})", err.instance_path))
        .collect();
    ValidationResult::new(issues)
}

/// Validates a CSV document has a header row containing every column in
/// `required_columns`, in any order.
#[must_use]
pub fn validate_csv_columns(csv_bytes: &[u8], required_columns: &[&str]) -> ValidationResult {
    let mut reader = csv::Reader::from_reader(csv_bytes);
    let headers = match reader.headers() {
        Ok(h) => h.clone(),
        Err(e) => return ValidationResult::failed(format!("failed to read CSV headers: {e}")),
    };

    let present: Vec<&str> = headers.iter().collect();
    let missing: Vec<String> = required_columns
        .iter()
        .filter(|col| !present.contains(col))
        .map(|col| format!("missing required column: {col}"))
        .collect();

    let mut issues = missing;
    for (row_idx, record) in reader.records().enumerate() {
        if let Err(e) = record {
            issues.push(format!("malformed row {row_idx}: {e}"));
        }
    }

    ValidationResult::new(issues)
}

/// Validates `trades.csv`'s required columns per §4.4 step 4.
#[must_use]
pub fn validate_trades_csv(csv_bytes: &[u8]) -> ValidationResult {
    validate_csv_columns(csv_bytes, &["time", "symbol", "action", "volume", "price", "pnl"])
}

/// Validates `equity_curve.csv`'s required columns per §4.4 step 4.
#[must_use]
pub fn validate_equity_curve_csv(csv_bytes: &[u8]) -> ValidationResult {
    validate_csv_columns(csv_bytes, &["time", "balance", "equity"])
}

/// Validates `events.log` per §4.4 step 4: must be present (checked by the
/// caller before this runs) and valid UTF-8 text; an empty log means the
/// harness never ran, which is treated as a validation failure rather than
/// silently passing.
#[must_use]
pub fn validate_events_log(log_bytes: &[u8]) -> ValidationResult {
    let text = match std::str::from_utf8(log_bytes) {
        Ok(t) => t,
        Err(e) => return ValidationResult::failed(format!("events.log is not valid UTF-8: {e}")),
    };
    if text.trim().is_empty() {
        return ValidationResult::failed("events.log is empty");
    }
    ValidationResult::passed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_validation_passes_for_conforming_document() {
        let schema = json!({
            "type": "object",
            "required": ["win_rate", "total_trades"],
            "properties": {
                "win_rate": {"type": "number"},
                "total_trades": {"type": "integer"}
            }
        });
        let instance = br#"{"win_rate": 0.6, "total_trades": 42}"#;
        let result = validate_json_schema(instance, &schema);
        assert!(result.ok);
    }

    #[test]
    fn schema_validation_collects_every_violation() {
        let schema = json!({
            "type": "object",
            "required": ["win_rate", "total_trades"],
            "properties": {
                "win_rate": {"type": "number"},
                "total_trades": {"type": "integer"}
            }
        });
        let instance = br#"{"win_rate": "not a number"}"#;
        let result = validate_json_schema(instance, &schema);
        assert!(!result.ok);
        assert!(result.issues.len() >= 2);
    }

    #[test]
    fn schema_validation_rejects_non_json() {
        let schema = json!({"type": "object"});
        let result = validate_json_schema(b"not json at all", &schema);
        assert!(!result.ok);
    }

    #[test]
    fn trades_csv_with_all_columns_passes() {
        let csv = "time,symbol,action,volume,price,pnl\n2026-01-01T00:00:00Z,EURUSD,buy,1.0,1.1,0.0\n";
        let result = validate_trades_csv(csv.as_bytes());
        assert!(result.ok);
    }

    #[test]
    fn trades_csv_missing_column_fails() {
        let csv = "time,symbol,action\n2026-01-01T00:00:00Z,EURUSD,buy\n";
        let result = validate_trades_csv(csv.as_bytes());
        assert!(!result.ok);
        assert!(result.issues.iter().any(|i| i.contains("volume")));
    }

    #[test]
    fn equity_curve_csv_with_all_columns_passes() {
        let csv = "time,balance,equity\n2026-01-01T00:00:00Z,10000.0,10050.0\n";
        let result = validate_equity_curve_csv(csv.as_bytes());
        assert!(result.ok);
    }

    #[test]
    fn events_log_with_content_passes() {
        let result = validate_events_log(b"suite started\nsuite finished\n");
        assert!(result.ok);
    }

    #[test]
    fn empty_events_log_fails() {
        let result = validate_events_log(b"   \n");
        assert!(!result.ok);
    }
}
