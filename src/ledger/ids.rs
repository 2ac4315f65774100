//! Sequential ledger ids: `<PREFIX>-<NNN>`, derived from on-disk state.

use super::entry::EntryKind;

pub fn format_id(kind: EntryKind, number: u32) -> String {
    format!("{}-{:03}", kind.prefix(), number)
}

/// Numeric suffix of `id` when it carries `kind`'s prefix.
pub fn parse_number(kind: EntryKind, id: &str) -> Option<u32> {
    let digits = id.strip_prefix(kind.prefix())?.strip_prefix('-')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Max existing suffix for `kind`, plus one.
pub fn next_id<'a>(kind: EntryKind, existing: impl IntoIterator<Item = &'a str>) -> String {
    let max = existing
        .into_iter()
        .filter_map(|id| parse_number(kind, id))
        .max()
        .unwrap_or(0);
    format_id(kind, max.saturating_add(1))
}
