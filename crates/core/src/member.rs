use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub i64);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registry entry as seen by the matcher. `phone` is stored in canonical
/// `<country><subscriber>` form when it could be normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub phone: Option<String>,
    pub member_code: Option<String>,
    pub member_number: Option<String>,
    pub is_active: bool,
}

impl Member {
    pub fn new(id: i64, name: &str) -> Self {
        Member {
            id: MemberId(id),
            name: name.to_string(),
            phone: None,
            member_code: None,
            member_number: None,
            is_active: true,
        }
    }

    pub fn with_phone(mut self, phone: &str) -> Self {
        self.phone = Some(phone.to_string());
        self
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.member_code = Some(code.to_string());
        self
    }

    pub fn with_number(mut self, number: &str) -> Self {
        self.member_number = Some(number.to_string());
        self
    }

    /// Case-insensitive comparison against the registered code or number.
    pub fn has_identifier(&self, token: &str) -> bool {
        [self.member_code.as_deref(), self.member_number.as_deref()]
            .into_iter()
            .flatten()
            .any(|id| !id.is_empty() && id.eq_ignore_ascii_case(token))
    }
}
