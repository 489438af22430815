//! Generates and parses the canonical artifact filename:
//! `YYYYMMDD_HHMMSS_{wf_short}_{task_short}_{desc_snake}.{ext}`.
//!
//! `wf_short`/`task_short` are each a deterministic 12-char Crockford
//! base32 encoding of the low 60 bits of the respective ULID — reusing the
//! `ulid` crate's own alphabet rather than introducing a second encoding, so
//! two different workflows never collide on `wf_short` within the birthday
//! bound of a 60-bit space at this system's scale.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::fmt;
use tradeforge_core::{TaskId, WorkflowId};

/// Crockford base32 alphabet, matching `ulid`'s own encoding (excludes
/// I, L, O, U to avoid visual confusion).
const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Encodes the low 60 bits of `value` as 12 Crockford base32 characters.
fn encode_low_60_bits(value: u128) -> String {
    let mut bits = value & ((1u128 << 60) - 1);
    let mut chars = [0u8; 12];
    for slot in chars.iter_mut().rev() {
        let idx = usize::try_from(bits & 0x1f).unwrap_or(0);
        *slot = ALPHABET[idx];
        bits >>= 5;
    }
    String::from_utf8(chars.to_vec()).expect("alphabet is ASCII")
}

/// The deterministic 12-char short form of a `WorkflowId`.
#[must_use]
pub fn workflow_short(workflow_id: WorkflowId) -> String {
    encode_low_60_bits(u128::from(workflow_id.as_ulid()))
}

/// The deterministic 12-char short form of a `TaskId`.
#[must_use]
pub fn task_short(task_id: TaskId) -> String {
    encode_low_60_bits(u128::from(task_id.as_ulid()))
}

/// Truncates `description` to at most 6 snake_case words, lowercased, with
/// non-alphanumeric runs collapsed to single underscores.
#[must_use]
pub fn snake_case_description(description: &str) -> String {
    let words: Vec<String> = description
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .take(6)
        .collect();
    words.join("_")
}

/// Generates a canonical filename for the given logical creation instant
/// (never the file's mtime), workflow, task, free-text description, and
/// extension (without a leading dot).
#[must_use]
pub fn generate(timestamp: DateTime<Utc>, workflow_id: WorkflowId, task_id: TaskId, description: &str, ext: &str) -> String {
    format!(
        "{}_{}_{}_{}.{}",
        timestamp.format("%Y%m%d_%H%M%S"),
        workflow_short(workflow_id),
        task_short(task_id),
        snake_case_description(description),
        ext,
    )
}

/// The components recovered by parsing a canonical filename. `wf_short` and
/// `task_short` are the short forms, not full IDs — the filename alone
/// cannot recover a full ULID, so round-tripping is defined against these
/// short forms, matching `generate`'s own output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub timestamp: DateTime<Utc>,
    pub wf_short: String,
    pub task_short: String,
    pub description: String,
    pub ext: String,
}

/// Errors parsing a filename that does not match the canonical shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseNameError {
    MalformedName { filename: String },
    InvalidTimestamp { filename: String },
}

impl fmt::Display for ParseNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedName { filename } => write!(f, "malformed artifact filename: {filename}"),
            Self::InvalidTimestamp { filename } => write!(f, "invalid timestamp in filename: {filename}"),
        }
    }
}

impl std::error::Error for ParseNameError {}

/// Parses a canonical filename back into its components.
///
/// # Errors
///
/// Returns [`ParseNameError`] if the filename does not match the
/// `YYYYMMDD_HHMMSS_{wf}_{task}_{desc}.{ext}` shape.
pub fn parse(filename: &str) -> Result<ParsedName, ParseNameError> {
    let (stem, ext) = filename.rsplit_once('.').ok_or_else(|| ParseNameError::MalformedName {
        filename: filename.to_string(),
    })?;

    let mut parts = stem.splitn(5, '_');
    let date = parts.next();
    let time = parts.next();
    let wf_short = parts.next();
    let task_short = parts.next();
    let description = parts.next();

    let (Some(date), Some(time), Some(wf_short), Some(task_short), Some(description)) =
        (date, time, wf_short, task_short, description)
    else {
        return Err(ParseNameError::MalformedName {
            filename: filename.to_string(),
        });
    };

    let naive = NaiveDateTime::parse_from_str(&format!("{date}_{time}"), "%Y%m%d_%H%M%S")
        .map_err(|_| ParseNameError::InvalidTimestamp {
            filename: filename.to_string(),
        })?;
    let timestamp = Utc.from_utc_datetime(&naive);

    Ok(ParsedName {
        timestamp,
        wf_short: wf_short.to_string(),
        task_short: task_short.to_string(),
        description: description.to_string(),
        ext: ext.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_then_parse_roundtrips_modulo_truncation() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 5, 14, 30, 0).unwrap();
        let workflow_id = WorkflowId::new();
        let task_id = TaskId::new();
        let filename = generate(ts, workflow_id, task_id, "RSI buy sell cross strategy now extra words", "py");

        let parsed = parse(&filename).unwrap();
        assert_eq!(parsed.timestamp, ts);
        assert_eq!(parsed.wf_short, workflow_short(workflow_id));
        assert_eq!(parsed.task_short, task_short(task_id));
        assert_eq!(parsed.ext, "py");
        // Truncated to 6 words.
        assert_eq!(parsed.description, "rsi_buy_sell_cross_strategy_now");
    }

    #[test]
    fn wf_short_is_twelve_chars() {
        let short = workflow_short(WorkflowId::new());
        assert_eq!(short.len(), 12);
    }

    #[test]
    fn different_workflows_have_different_short_forms() {
        let a = workflow_short(WorkflowId::new());
        let b = workflow_short(WorkflowId::new());
        assert_ne!(a, b);
    }

    #[test]
    fn description_truncates_to_six_words_snake_case() {
        let desc = snake_case_description("Buy When 20 EMA Crosses 40 EMA With Stop Loss");
        assert_eq!(desc.split('_').count(), 6);
        assert_eq!(desc, "buy_when_20_ema_crosses_40");
    }

    #[test]
    fn parse_rejects_malformed_filename() {
        let err = parse("not_a_valid_name").unwrap_err();
        assert!(matches!(err, ParseNameError::MalformedName { .. }));
    }

    #[test]
    fn parse_rejects_bad_timestamp() {
        let err = parse("notadate_notatime_abc_def_desc.py").unwrap_err();
        assert!(matches!(err, ParseNameError::InvalidTimestamp { .. }));
    }
}
