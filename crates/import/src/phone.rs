use kitty_core::PhoneToken;

use crate::config::ParserConfig;

/// Canonicalizes phone references to `<country><subscriber>` digits.
///
/// Anything that cannot be normalized without guessing is rejected, so a
/// caller never sees a plausible-but-wrong number.
#[derive(Debug, Clone)]
pub struct PhoneNormalizer {
    country_code: String,
    trunk_digit: char,
    subscriber_digits: usize,
    mask_glyph: char,
}

impl Default for PhoneNormalizer {
    fn default() -> Self {
        Self::new(&ParserConfig::default())
    }
}

impl PhoneNormalizer {
    pub fn new(config: &ParserConfig) -> Self {
        Self {
            country_code: config.country_code.clone(),
            trunk_digit: config.trunk_digit,
            subscriber_digits: config.subscriber_digits,
            mask_glyph: config.mask_glyph,
        }
    }

    pub fn normalize(&self, raw: &str) -> Option<PhoneToken> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.contains(self.mask_glyph) {
            return self.normalize_masked(trimmed);
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')'))
        {
            return None;
        }
        let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

        // Trunk forms are 9 or 10 digits long and country forms 12 or 13
        // (for a 9-digit subscriber plan).
        let local = self.subscriber_digits..=self.subscriber_digits + 1;
        let international = self.country_code.len() + self.subscriber_digits
            ..=self.country_code.len() + self.subscriber_digits + 1;

        if digits.starts_with(&self.country_code) && international.contains(&digits.len()) {
            return Some(PhoneToken::full(digits));
        }
        if digits.starts_with(self.trunk_digit) && local.contains(&digits.len()) {
            let subscriber = &digits[self.trunk_digit.len_utf8()..];
            return Some(PhoneToken::full(format!("{}{subscriber}", self.country_code)));
        }
        None
    }

    /// A bare subscriber number or anything that normalizes to a full phone.
    pub fn is_phone_shaped(&self, token: &str) -> bool {
        let bare_subscriber =
            token.len() == self.subscriber_digits && token.chars().all(|c| c.is_ascii_digit());
        bare_subscriber || matches!(self.normalize(token), Some(PhoneToken::Full { .. }))
    }

    /// Every phone token in free text, in order of appearance.
    pub fn scan(&self, text: &str) -> Vec<PhoneToken> {
        let mut found = Vec::new();
        let phone_char = |c: char| c.is_ascii_digit() || c == self.mask_glyph || c == '+';
        let separator =
            |c: char| c.is_whitespace() || matches!(c, '/' | ',' | ';' | ':' | '(' | ')');
        for piece in text.split(separator) {
            let piece = piece.trim_matches(|c: char| !phone_char(c));
            if piece.len() < 6 || !piece.chars().all(phone_char) {
                continue;
            }
            if let Some(token) = self.normalize(piece) {
                if !found.contains(&token) {
                    found.push(token);
                }
            }
        }
        found
    }

    fn normalize_masked(&self, raw: &str) -> Option<PhoneToken> {
        let s = raw.trim_start_matches('+');
        let prefix: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
        let rest = &s[prefix.len()..];
        let mask_len = rest.chars().take_while(|c| *c == self.mask_glyph).count();
        let suffix = &rest[mask_len * self.mask_glyph.len_utf8()..];

        if mask_len < 2 || !(2..=3).contains(&suffix.len()) {
            return None;
        }
        if !suffix.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let prefix = if prefix.starts_with(&self.country_code) {
            prefix
        } else if prefix.starts_with(self.trunk_digit) {
            format!("{}{}", self.country_code, &prefix[1..])
        } else {
            return None;
        };
        Some(PhoneToken::masked(prefix, suffix))
    }
}
