//! Record validation
//!
//! Limits are fixed and enforced before anything is written. Lengths are
//! counted in characters, not bytes; the import payload limit is in bytes.

use crate::error::{Error, Result};
use crate::memory::{DomainStagingRecord, EpisodicRecord, SemanticFact};

pub const MAX_RAW_TEXT_CHARS: usize = 10_000;
pub const MAX_NAME_CHARS: usize = 256;
pub const MAX_VALUE_CHARS: usize = 2_000;
pub const MAX_EXTERNAL_REFS: usize = 10;
pub const MAX_IMPORT_BYTES: usize = 5 * 1024 * 1024;
pub const MAX_IMPORT_LINES: usize = 1_000;

fn check_len(field: &str, value: &str, max: usize) -> Result<()> {
    if value.chars().count() > max {
        return Err(Error::Validation(format!(
            "{} exceeds {} characters",
            field, max
        )));
    }
    Ok(())
}

fn check_present(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} is empty", field)));
    }
    Ok(())
}

fn check_refs(refs: &[String]) -> Result<()> {
    if refs.len() > MAX_EXTERNAL_REFS {
        return Err(Error::Validation(format!(
            "external_refs exceeds {} items",
            MAX_EXTERNAL_REFS
        )));
    }
    Ok(())
}

/// Split a comma-separated reference list, dropping blanks.
pub fn split_refs(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(String::from)
        .collect()
}

/// Field limits of a `remember` call (after normalization).
///
/// Empty text and blank categories are rejected here with the same rule the
/// import path applies, so everything `remember` writes can be re-imported.
pub fn remember_input(
    raw_text: &str,
    entity: &str,
    attribute: &str,
    value: &str,
    category: &str,
    refs: &[String],
) -> Result<()> {
    check_present("raw_text", raw_text)?;
    check_present("category", category)?;
    check_len("raw_text", raw_text, MAX_RAW_TEXT_CHARS)?;
    check_len("entity", entity, MAX_NAME_CHARS)?;
    check_len("attribute", attribute, MAX_NAME_CHARS)?;
    check_len("value", value, MAX_VALUE_CHARS)?;
    check_len("category", category, MAX_NAME_CHARS)?;
    check_refs(refs)
}

pub fn episode(record: &EpisodicRecord) -> Result<()> {
    check_present("raw_text", &record.raw_text)?;
    check_len("raw_text", &record.raw_text, MAX_RAW_TEXT_CHARS)?;
    check_len("category", &record.category, MAX_NAME_CHARS)?;
    check_refs(&record.external_refs)
}

pub fn fact(record: &SemanticFact) -> Result<()> {
    check_len("entity", &record.entity, MAX_NAME_CHARS)?;
    check_len("attribute", &record.attribute, MAX_NAME_CHARS)?;
    check_len("value", &record.value, MAX_VALUE_CHARS)?;
    check_len("category", &record.category, MAX_NAME_CHARS)?;
    check_refs(&record.external_refs)
}

pub fn domain(record: &DomainStagingRecord) -> Result<()> {
    check_present("domain", &record.domain)?;
    check_len("domain", &record.domain, MAX_NAME_CHARS)
}

/// Guardrail on a whole import payload.
///
/// Line count is `newlines + 1`, so a trailing newline counts as a line.
pub fn import_payload(payload: &str) -> Result<()> {
    if payload.len() > MAX_IMPORT_BYTES {
        return Err(Error::Validation(format!(
            "import payload exceeds {}MB limit",
            MAX_IMPORT_BYTES / (1024 * 1024)
        )));
    }
    let lines = payload.bytes().filter(|b| *b == b'\n').count() + 1;
    if lines > MAX_IMPORT_LINES {
        return Err(Error::Validation(format!(
            "import payload exceeds {} lines limit",
            MAX_IMPORT_LINES
        )));
    }
    Ok(())
}
