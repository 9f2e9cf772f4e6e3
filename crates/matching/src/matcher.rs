use kitty_core::{Member, MemberId, ParsedFields, PhoneToken};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::MatchError;
use crate::similarity::name_similarity;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatcherConfig {
    pub auto_assign_threshold: f32,
    pub tie_margin: f32,
    pub name_floor: f32,
    /// Name-only scores stay below the code signal.
    pub name_cap: f32,
    pub suffix_len: usize,
    pub full_phone_confidence: f32,
    pub code_confidence: f32,
    pub masked_suffix_confidence: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            auto_assign_threshold: 0.5,
            tie_margin: 0.1,
            name_floor: 0.6,
            name_cap: 0.79,
            suffix_len: 3,
            full_phone_confidence: 1.0,
            code_confidence: 0.8,
            masked_suffix_confidence: 0.6,
        }
    }
}

impl MatcherConfig {
    pub fn from_toml(toml_content: &str) -> Result<Self, MatchError> {
        let config: MatcherConfig =
            toml::from_str(toml_content).map_err(|e| MatchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MatchError> {
        let weights = [
            ("auto_assign_threshold", self.auto_assign_threshold),
            ("tie_margin", self.tie_margin),
            ("name_floor", self.name_floor),
            ("name_cap", self.name_cap),
            ("full_phone_confidence", self.full_phone_confidence),
            ("code_confidence", self.code_confidence),
            ("masked_suffix_confidence", self.masked_suffix_confidence),
        ];
        for (key, value) in weights {
            if !(0.0..=1.0).contains(&value) {
                return Err(MatchError::Config(format!("{key} must be within [0, 1], got {value}")));
            }
        }
        if self.name_cap >= self.code_confidence {
            return Err(MatchError::Config("name_cap must stay below code_confidence".into()));
        }
        if self.suffix_len == 0 {
            return Err(MatchError::Config("suffix_len must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSignal {
    FullPhone,
    MaskedSuffix,
    TransactionCode,
    MemberNumber,
    Name,
}

impl MatchSignal {
    /// Signals that identify a member on their own.
    pub fn is_identifying(self) -> bool {
        matches!(
            self,
            MatchSignal::FullPhone | MatchSignal::TransactionCode | MatchSignal::MemberNumber
        )
    }
}

impl fmt::Display for MatchSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchSignal::FullPhone => write!(f, "full phone"),
            MatchSignal::MaskedSuffix => write!(f, "masked suffix"),
            MatchSignal::TransactionCode => write!(f, "transaction code"),
            MatchSignal::MemberNumber => write!(f, "member number"),
            MatchSignal::Name => write!(f, "name"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub member_id: MemberId,
    pub confidence: f32,
    #[serde(default)]
    pub signals: Vec<MatchSignal>,
}

impl MatchCandidate {
    pub fn has(&self, signal: MatchSignal) -> bool {
        self.signals.contains(&signal)
    }

    pub fn reason(&self) -> String {
        if self.signals.is_empty() {
            return format!("confidence {:.2}", self.confidence);
        }
        let signals: Vec<String> = self.signals.iter().map(|s| s.to_string()).collect();
        format!("{} ({:.2})", signals.join(" + "), self.confidence)
    }

    fn add(&mut self, signal: MatchSignal, confidence: f32) {
        if !self.signals.contains(&signal) {
            self.signals.push(signal);
        }
        // Corroborating signals take the maximum; they never compound.
        self.confidence = self.confidence.max(confidence.clamp(0.0, 1.0));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchDecision {
    AutoAssign(MatchCandidate),
    Ambiguous {
        reason: String,
        candidates: Vec<MatchCandidate>,
    },
    NoMatch {
        reason: String,
    },
}

impl MatchDecision {
    pub fn reason(&self) -> String {
        match self {
            MatchDecision::AutoAssign(c) => c.reason(),
            MatchDecision::Ambiguous { reason, .. } | MatchDecision::NoMatch { reason } => {
                reason.clone()
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemberMatcher {
    config: MatcherConfig,
}

impl MemberMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Scores every active member and returns those with any signal, best first.
    pub fn rank(&self, fields: &ParsedFields, members: &[Member]) -> Vec<MatchCandidate> {
        let mut ranked: Vec<MatchCandidate> = members
            .iter()
            .filter(|m| m.is_active)
            .filter_map(|m| self.score_member(fields, m))
            .collect();
        sort_candidates(&mut ranked);
        ranked
    }

    fn score_member(&self, fields: &ParsedFields, member: &Member) -> Option<MatchCandidate> {
        let cfg = &self.config;
        let mut candidate = MatchCandidate {
            member_id: member.id,
            confidence: 0.0,
            signals: Vec::new(),
        };

        if let Some(phone) = member.phone.as_deref().filter(|p| !p.is_empty()) {
            if fields.full_phones().any(|p| p == phone) {
                candidate.add(MatchSignal::FullPhone, cfg.full_phone_confidence);
            }
            let member_phone = PhoneToken::full(phone);
            let member_suffix = member_phone.suffix(cfg.suffix_len);
            if member_suffix.is_some()
                && fields
                    .masked_phones()
                    .any(|t| t.suffix(cfg.suffix_len) == member_suffix)
            {
                candidate.add(MatchSignal::MaskedSuffix, cfg.masked_suffix_confidence);
            }
        }

        if let Some(code) = fields.transaction_code.as_deref() {
            if member.has_identifier(code) {
                candidate.add(MatchSignal::TransactionCode, cfg.code_confidence);
            }
        }
        if let Some(number) = fields.member_number.as_deref() {
            if member.has_identifier(number) {
                candidate.add(MatchSignal::MemberNumber, cfg.code_confidence);
            }
        }

        if let Some(name) = fields.candidate_name.as_deref() {
            let ratio = name_similarity(name, &member.name);
            if ratio >= cfg.name_floor {
                candidate.add(MatchSignal::Name, ratio.min(cfg.name_cap));
            }
        }

        (!candidate.signals.is_empty()).then_some(candidate)
    }

    /// Applies the threshold, tie margin and masked-suffix ambiguity rules.
    pub fn decide(&self, candidates: &[MatchCandidate]) -> MatchDecision {
        let cfg = &self.config;
        let mut ranked = candidates.to_vec();
        sort_candidates(&mut ranked);

        let Some(best) = ranked.first().cloned() else {
            return MatchDecision::NoMatch {
                reason: "no candidate member".to_string(),
            };
        };

        if best.confidence < cfg.auto_assign_threshold {
            return MatchDecision::NoMatch {
                reason: format!("below threshold ({:.2})", best.confidence),
            };
        }

        let identified = best.signals.iter().any(|s| s.is_identifying());
        if !identified
            && best.has(MatchSignal::MaskedSuffix)
            && ranked[1..].iter().any(|c| c.has(MatchSignal::MaskedSuffix))
        {
            return MatchDecision::Ambiguous {
                reason: "ambiguous suffix".to_string(),
                candidates: ranked,
            };
        }

        if let Some(runner_up) = ranked.get(1) {
            if best.confidence - runner_up.confidence <= cfg.tie_margin + f32::EPSILON {
                return MatchDecision::Ambiguous {
                    reason: "tie within margin".to_string(),
                    candidates: ranked,
                };
            }
        }

        MatchDecision::AutoAssign(best)
    }
}

/// Highest confidence first; member id breaks ties so ordering is stable.
pub fn sort_candidates(candidates: &mut [MatchCandidate]) {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.member_id.cmp(&b.member_id))
    });
}
