//! Splitting of delimiter-separated lists such as header or config values.

use std::collections::HashSet;

/// Splits on `separator`, trims every part and drops the empty ones.
pub fn split(value: &str, separator: &str) -> Vec<String> {
    value
        .split(separator)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// Splits every value like [`split`] and flattens the parts, keeping the
/// first occurrence of each.
pub fn split_uniq<I, S>(values: I, separator: &str) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    values
        .into_iter()
        .flat_map(|value| split(value.as_ref(), separator))
        .filter(|part| seen.insert(part.clone()))
        .collect()
}
