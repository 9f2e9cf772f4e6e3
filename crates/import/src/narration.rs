use std::sync::OnceLock;

use kitty_core::{ParsedFields, TransactionOrigin};
use regex::Regex;

use crate::config::ParserConfig;
use crate::phone::PhoneNormalizer;

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_switch_header, r"^\s*([A-Za-z]{3})\s+(\d{12})\b");
re!(re_slash_header, r"^\s*([A-Za-z0-9*#-]+)\s*/");
re!(re_paybill_from, r"(?i)\bfrom\s+(\+?[0-9*]{6,16})");
re!(re_account_name, r"(?i)\bAcc\.?\s+(.+?)\s*$");
re!(re_payer_name, r"(?i)-\s+([A-Za-z\s*]+?)\s+Acc\b");
re!(re_member_number, r"\b(\d{4,6})#");
re!(re_tpg_code, r"(?i)\bTPG\s+([A-Za-z0-9]+)\b");
re!(re_sender_name, r"(?i)\b(?:FRM|FROM)\s+([A-Za-z][A-Za-z' .-]*?)\s*$");
re!(re_transfer_name, r"(?i)\bTRANSFER\s+([A-Za-z][A-Za-z ]*?)\s*(?:/|$)");
re!(re_prefixed_name, r"(?i)\b(?:FROM|FRM|TO|BY)\s+([A-Za-z][A-Za-z' .]*)");
re!(re_after_number, r"\d\S*\s+([A-Za-z][A-Za-z' .]*?)\s*$");
re!(re_agent_name, r"(?i)^\s*([A-Za-z][A-Za-z ]*?)\s+\S*BY:");

// ── Dispatch table ───────────────────────────────────────────────────────────

type Predicate = fn(&NarrationParser, &str) -> bool;
type Extract = fn(&NarrationParser, &str) -> ParsedFields;

struct FormatRule {
    origin: TransactionOrigin,
    matches: Predicate,
    extract: Extract,
}

/// Evaluated top to bottom; the first matching rule wins.
static FORMAT_RULES: [FormatRule; 6] = [
    FormatRule {
        origin: TransactionOrigin::Paybill,
        matches: NarrationParser::is_paybill,
        extract: NarrationParser::extract_paybill,
    },
    FormatRule {
        origin: TransactionOrigin::MobileSwitch,
        matches: NarrationParser::is_mobile_switch,
        extract: NarrationParser::extract_mobile_switch,
    },
    FormatRule {
        origin: TransactionOrigin::Gateway,
        matches: NarrationParser::is_gateway,
        extract: NarrationParser::extract_slash_fields,
    },
    FormatRule {
        origin: TransactionOrigin::Ussd,
        matches: NarrationParser::is_ussd,
        extract: NarrationParser::extract_slash_fields,
    },
    FormatRule {
        origin: TransactionOrigin::FundsTransfer,
        matches: NarrationParser::is_funds_transfer,
        extract: NarrationParser::extract_funds_transfer,
    },
    FormatRule {
        origin: TransactionOrigin::Generic,
        matches: NarrationParser::always,
        extract: NarrationParser::extract_generic,
    },
];

// ── Public parsing API ───────────────────────────────────────────────────────

/// Turns a free-text narration into [`ParsedFields`]. Never fails: anything
/// that cannot be derived with confidence is left as `None`.
#[derive(Debug, Clone)]
pub struct NarrationParser {
    config: ParserConfig,
    phones: PhoneNormalizer,
}

impl Default for NarrationParser {
    fn default() -> Self {
        Self::new(ParserConfig::default())
    }
}

impl NarrationParser {
    pub fn new(config: ParserConfig) -> Self {
        let phones = PhoneNormalizer::new(&config);
        Self { config, phones }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn normalizer(&self) -> &PhoneNormalizer {
        &self.phones
    }

    pub fn classify(&self, narration: &str) -> TransactionOrigin {
        self.rule_for(narration).origin
    }

    pub fn parse(&self, narration: &str) -> ParsedFields {
        let rule = self.rule_for(narration);
        self.run(rule, narration)
    }

    /// Runs one format's extractor regardless of what the dispatcher would pick.
    pub fn parse_as(&self, origin: TransactionOrigin, narration: &str) -> ParsedFields {
        match FORMAT_RULES.iter().find(|r| r.origin == origin) {
            Some(rule) => self.run(rule, narration),
            None => ParsedFields::new(origin),
        }
    }

    fn rule_for(&self, narration: &str) -> &'static FormatRule {
        FORMAT_RULES
            .iter()
            .find(|r| (r.matches)(self, narration))
            .unwrap_or(&FORMAT_RULES[FORMAT_RULES.len() - 1])
    }

    fn run(&self, rule: &FormatRule, narration: &str) -> ParsedFields {
        let mut fields = (rule.extract)(self, narration);
        fields.origin = rule.origin;
        tracing::trace!(
            origin = %fields.origin,
            phones = fields.phones.len(),
            code = ?fields.transaction_code,
            name = ?fields.candidate_name,
            "parsed narration"
        );
        fields
    }

    // ── Predicates ───────────────────────────────────────────────────────────

    fn is_paybill(&self, text: &str) -> bool {
        let upper = collapse(text).to_uppercase();
        self.config
            .paybill_keywords
            .iter()
            .any(|k| upper.contains(&k.to_uppercase()))
    }

    fn is_mobile_switch(&self, text: &str) -> bool {
        re_switch_header()
            .captures(text)
            .is_some_and(|c| self.tag_in(&c[1], &self.config.switch_tags))
    }

    fn is_gateway(&self, text: &str) -> bool {
        self.slash_tag(text)
            .is_some_and(|tag| self.tag_in(tag, &self.config.gateway_tags))
    }

    fn is_ussd(&self, text: &str) -> bool {
        self.slash_tag(text)
            .is_some_and(|tag| self.tag_in(tag, &self.config.ussd_tags))
    }

    fn is_funds_transfer(&self, text: &str) -> bool {
        let upper = collapse(text).to_uppercase();
        self.config
            .funds_transfer_tags
            .iter()
            .any(|t| upper.contains(&t.to_uppercase()))
    }

    fn always(&self, _text: &str) -> bool {
        true
    }

    fn slash_tag<'a>(&self, text: &'a str) -> Option<&'a str> {
        re_slash_header()
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }

    fn tag_in(&self, tag: &str, tags: &[String]) -> bool {
        tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    // ── Extractors ───────────────────────────────────────────────────────────

    fn extract_paybill(&self, text: &str) -> ParsedFields {
        let mut fields = ParsedFields::new(TransactionOrigin::Paybill);
        if let Some(token) = re_paybill_from()
            .captures(text)
            .and_then(|c| self.phones.normalize(&c[1]))
        {
            fields.push_phone(token);
        }
        for token in self.phones.scan(text) {
            fields.push_phone(token);
        }
        fields.transaction_code = self.find_transaction_code(text);
        fields.candidate_name = re_account_name()
            .captures(text)
            .and_then(|c| self.accept_name(&c[1]))
            .or_else(|| {
                re_payer_name()
                    .captures(text)
                    .and_then(|c| self.accept_name(&c[1].replace(self.config.mask_glyph, " ")))
            })
            .or_else(|| self.fallback_name(text));
        fields
    }

    fn extract_mobile_switch(&self, text: &str) -> ParsedFields {
        let mut fields = ParsedFields::new(TransactionOrigin::MobileSwitch);
        if let Some(token) = re_switch_header()
            .captures(text)
            .and_then(|c| self.phones.normalize(&c[2]))
        {
            fields.push_phone(token);
        }
        for token in self.phones.scan(text) {
            fields.push_phone(token);
        }
        fields.member_number = re_member_number().captures(text).map(|c| c[1].to_string());
        fields.transaction_code = self.find_transaction_code(text);
        fields.candidate_name = self.fallback_name(text);
        fields
    }

    /// Gateway and USSD narrations share the `TAG/field/field/...` layout.
    fn extract_slash_fields(&self, text: &str) -> ParsedFields {
        let mut fields = ParsedFields::default();
        for field in text.split('/').skip(1).map(str::trim).filter(|f| !f.is_empty()) {
            if let Some(token) = self.phones.normalize(field) {
                fields.push_phone(token);
            } else if fields.transaction_code.is_none() && self.is_code(field) {
                fields.transaction_code = Some(field.to_uppercase());
            } else if fields.candidate_name.is_none() {
                fields.candidate_name = self.accept_name(field);
            }
        }
        if fields.candidate_name.is_none() {
            fields.candidate_name = self.fallback_name(text);
        }
        fields
    }

    fn extract_funds_transfer(&self, text: &str) -> ParsedFields {
        let mut fields = ParsedFields::new(TransactionOrigin::FundsTransfer);
        for token in self.phones.scan(text) {
            fields.push_phone(token);
        }
        fields.transaction_code = re_tpg_code()
            .captures(text)
            .map(|c| c[1].to_uppercase())
            .filter(|code| self.is_code(code))
            .or_else(|| self.find_transaction_code(text));
        fields.candidate_name = re_sender_name()
            .captures(text)
            .and_then(|c| self.accept_name(&c[1]))
            .or_else(|| {
                re_transfer_name()
                    .captures(text)
                    .and_then(|c| self.accept_name(&c[1]))
            })
            .or_else(|| self.fallback_name(text));
        fields
    }

    fn extract_generic(&self, text: &str) -> ParsedFields {
        let mut fields = ParsedFields::new(TransactionOrigin::Generic);
        for token in self.phones.scan(text) {
            fields.push_phone(token);
        }
        fields.transaction_code = self.find_transaction_code(text);
        fields.candidate_name = self.fallback_name(text);
        fields
    }

    // ── Shared field finders ─────────────────────────────────────────────────

    /// First token that looks like a provider transaction code.
    pub fn find_transaction_code(&self, text: &str) -> Option<String> {
        text.split(|c: char| c.is_whitespace() || c == '/')
            .map(|t| t.trim_matches(|c: char| !c.is_ascii_alphanumeric()))
            .find(|t| self.is_code(t))
            .map(str::to_uppercase)
    }

    /// 8–12 alphanumerics with at least one digit, and not a phone number.
    pub fn is_code(&self, token: &str) -> bool {
        (8..=12).contains(&token.len())
            && token.chars().all(|c| c.is_ascii_alphanumeric())
            && token.chars().any(|c| c.is_ascii_digit())
            && !self.phones.is_phone_shaped(token)
    }

    /// Longest run of capitalized words at the end of the text.
    pub fn trailing_name(&self, text: &str) -> Option<String> {
        let mut run = Vec::new();
        for token in text.split_whitespace().rev() {
            if token.contains('/') {
                break;
            }
            let word = token.trim_matches(|c: char| !c.is_alphabetic());
            let capitalized = word.chars().next().is_some_and(char::is_uppercase)
                && word.chars().all(|c| c.is_alphabetic() || c == '\'' || c == '-');
            if !capitalized || self.config.is_blacklisted(word) {
                break;
            }
            run.push(word);
        }
        if run.is_empty() {
            return None;
        }
        run.reverse();
        self.accept_name(&run.join(" "))
    }

    /// Ordered name fallbacks; the first blacklist-clean result wins.
    fn fallback_name(&self, text: &str) -> Option<String> {
        self.trailing_name(text)
            .or_else(|| {
                re_prefixed_name()
                    .captures(text)
                    .and_then(|c| self.accept_name(&c[1]))
            })
            .or_else(|| {
                re_after_number()
                    .captures(text)
                    .and_then(|c| self.accept_name(&c[1]))
            })
            .or_else(|| {
                re_account_name()
                    .captures(text)
                    .and_then(|c| self.accept_name(&c[1]))
            })
            .or_else(|| {
                re_agent_name()
                    .captures(text)
                    .and_then(|c| self.accept_name(&c[1]))
            })
    }

    /// Trims blacklisted words from both ends; rejects anything with digits,
    /// an interior keyword, or fewer than three characters.
    fn accept_name(&self, candidate: &str) -> Option<String> {
        let words: Vec<&str> = candidate
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '-')))
            .filter(|w| !w.is_empty())
            .collect();
        let start = words.iter().position(|w| !self.config.is_blacklisted(w))?;
        let end = words.iter().rposition(|w| !self.config.is_blacklisted(w))?;
        let kept = &words[start..=end];

        if kept.iter().any(|w| self.config.is_blacklisted(w)) {
            return None;
        }
        if kept
            .iter()
            .any(|w| !w.chars().all(|c| c.is_alphabetic() || c == '\'' || c == '-'))
        {
            return None;
        }
        let name = kept.join(" ");
        (name.chars().filter(|c| c.is_alphabetic()).count() >= 3).then_some(name)
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
