//! Masking of personal data before it reaches logs or responses.

const MASK_WIDTH: usize = 4;
const DEFAULT_MASK: char = '*';

/// Keeps `prefix` leading and `suffix` trailing characters with exactly four
/// mask characters in between.
///
/// Strings with no more than `prefix + suffix` characters are masked entirely.
pub fn mask(value: &str, prefix: usize, suffix: usize, mask_char: char) -> String {
    let chars = value.chars().collect::<Vec<_>>();
    let length = chars.len();
    if length <= prefix.saturating_add(suffix) {
        return std::iter::repeat_n(mask_char, length).collect();
    }

    let mut masked = String::with_capacity(value.len() + MASK_WIDTH);
    masked.extend(&chars[..prefix]);
    masked.extend(std::iter::repeat_n(mask_char, MASK_WIDTH));
    masked.extend(&chars[length - suffix..]);
    masked
}

pub fn mask_phone(phone: &str) -> String {
    mask(phone, 3, 4, DEFAULT_MASK)
}

/// Keeps two characters before `@` and the whole domain.
pub fn mask_email(email: &str) -> String {
    match email.find('@') {
        Some(at) if at > 2 => format!("{}{}", mask(&email[..at], 2, 0, DEFAULT_MASK), &email[at..]),
        _ => email.to_owned(),
    }
}

pub fn mask_id_card(id: &str) -> String {
    mask(id, 6, 4, DEFAULT_MASK)
}

pub fn mask_bank_card(card: &str) -> String {
    mask(card, 4, 4, DEFAULT_MASK)
}
