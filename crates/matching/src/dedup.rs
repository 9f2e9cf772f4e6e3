use std::collections::HashSet;

use kitty_core::{DateRange, DuplicateReason, Payment, ReconciliationStatus, TransactionRecord};
use serde::Serialize;

/// Which retained record a re-ingestion collides with, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DuplicateHit {
    pub original_id: i64,
    pub reason: DuplicateReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterpartKind {
    /// Receipt/code equality, same amount, same day.
    Direct,
    /// Same member and amount within the date window.
    Window,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counterpart {
    pub transaction_id: i64,
    pub kind: CounterpartKind,
}

/// Pure duplicate and counterpart checks. Callers supply the universe of
/// already-stored rows; nothing here touches storage.
#[derive(Debug, Clone)]
pub struct DuplicateDetector {
    window_days: i64,
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self { window_days: 1 }
    }
}

impl DuplicateDetector {
    pub fn new(window_days: i64) -> Self {
        Self { window_days }
    }

    /// Calendar days around a payment's creation date that a window match may span.
    pub fn window_for(&self, payment: &Payment) -> DateRange {
        DateRange::around(payment.created_on(), self.window_days)
    }

    /// Statement path: provider receipt, then the date/narration/credit key.
    pub fn check_record(
        &self,
        candidate: &TransactionRecord,
        existing: &[TransactionRecord],
    ) -> Option<DuplicateHit> {
        let stored = || existing.iter().filter_map(|r| r.id.map(|id| (id, r)));

        if let Some(receipt) = candidate.receipt_code.as_deref() {
            let hit = stored().find(|(_, r)| {
                r.receipt_code
                    .as_deref()
                    .is_some_and(|other| other.eq_ignore_ascii_case(receipt))
            });
            if let Some((id, _)) = hit {
                return Some(DuplicateHit { original_id: id, reason: DuplicateReason::ReceiptNumber });
            }
        }

        let fingerprint = candidate.fingerprint();
        stored()
            .find(|(_, r)| r.fingerprint() == fingerprint)
            .map(|(id, r)| {
                let reason = if candidate.statement_id.is_some() && r.statement_id == candidate.statement_id {
                    DuplicateReason::IntraStatement
                } else {
                    DuplicateReason::CrossStatement
                };
                DuplicateHit { original_id: id, reason }
            })
    }

    /// Payment path. Only payments created before the candidate and not
    /// themselves duplicates can be the retained original.
    pub fn check_payment(&self, candidate: &Payment, existing: &[Payment]) -> Option<DuplicateHit> {
        let earlier: Vec<(i64, &Payment)> = existing
            .iter()
            .filter_map(|p| p.id.map(|id| (id, p)))
            .filter(|(id, p)| {
                Some(*id) != candidate.id
                    && p.reconciliation_status != ReconciliationStatus::Duplicate
                    && (p.created_at, *id) < (candidate.created_at, candidate.id.unwrap_or(i64::MAX))
            })
            .collect();

        let same = |a: &Option<String>, b: &Option<String>| match (a.as_deref(), b.as_deref()) {
            (Some(a), Some(b)) => !a.trim().is_empty() && a.eq_ignore_ascii_case(b),
            _ => false,
        };

        let rules: [(DuplicateReason, &dyn Fn(&Payment) -> bool); 3] = [
            (DuplicateReason::ProviderTransactionId, &|p| {
                same(&p.provider_transaction_id, &candidate.provider_transaction_id)
            }),
            (DuplicateReason::ReceiptNumber, &|p| same(&p.receipt_number, &candidate.receipt_number)),
            (DuplicateReason::ProviderReference, &|p| {
                same(&p.provider_reference, &candidate.provider_reference)
                    && p.member_id.is_some()
                    && p.member_id == candidate.member_id
                    && p.amount == candidate.amount
                    && p.created_on() == candidate.created_on()
            }),
        ];

        rules.iter().find_map(|(reason, hit)| {
            earlier
                .iter()
                .find(|(_, p)| hit(*p))
                .map(|(id, _)| DuplicateHit { original_id: *id, reason: *reason })
        })
    }

    /// The statement transaction a payment settles: a direct code match on
    /// the same day first, then the member/amount window. Transactions in
    /// `consumed` already back another payment and are never reused.
    pub fn find_counterpart(
        &self,
        payment: &Payment,
        transactions: &[TransactionRecord],
        consumed: &HashSet<i64>,
    ) -> Option<Counterpart> {
        let available = || {
            transactions
                .iter()
                .filter(|t| !t.archived && t.credit == payment.amount)
                .filter_map(|t| t.id.map(|id| (id, t)))
                .filter(|(id, _)| !consumed.contains(id))
        };
        let paid_on = payment.created_on();

        let codes: Vec<&str> = [
            payment.receipt_number.as_deref(),
            payment.provider_transaction_id.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|c| !c.trim().is_empty())
        .collect();

        let direct = available()
            .filter(|(_, t)| t.date == paid_on)
            .find(|(_, t)| {
                t.transaction_code()
                    .is_some_and(|code| codes.iter().any(|c| c.eq_ignore_ascii_case(code)))
            });
        if let Some((id, _)) = direct {
            return Some(Counterpart { transaction_id: id, kind: CounterpartKind::Direct });
        }

        let member = payment.member_id?;
        let window = self.window_for(payment);
        available()
            .filter(|(_, t)| t.member_id == Some(member) && window.contains(t.date))
            .min_by_key(|(id, t)| ((t.date - paid_on).num_days().abs(), *id))
            .map(|(id, _)| Counterpart { transaction_id: id, kind: CounterpartKind::Window })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use kitty_core::{Channel, MemberId, Money, ParsedFields, PaymentChannel, RawNarration};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, d).unwrap()
    }

    fn record(id: i64, statement: i64, d: u32, text: &str, cents: i64) -> TransactionRecord {
        let mut r = TransactionRecord::new(
            Some(statement),
            date(d),
            RawNarration::new(text, Channel::StatementLine),
            Money::from_cents(cents),
            Money::zero(),
            ParsedFields::default(),
        );
        r.id = Some(id);
        r
    }

    fn payment(id: i64, d: u32, hour: u32, cents: i64) -> Payment {
        let mut p = Payment::new(
            PaymentChannel::MobileMoney,
            Money::from_cents(cents),
            Utc.with_ymd_and_hms(2024, 12, d, hour, 0, 0).unwrap(),
        );
        p.id = Some(id);
        p
    }

    #[test]
    fn same_line_in_another_statement_is_cross_statement() {
        let detector = DuplicateDetector::default();
        let existing = vec![record(1, 10, 25, "MPS 254721404848 SIA93MAWD9", 100_000)];
        let mut incoming = record(0, 11, 25, "mps 254721404848  sia93mawd9", 100_000);
        incoming.id = None;
        assert_eq!(
            detector.check_record(&incoming, &existing),
            Some(DuplicateHit { original_id: 1, reason: DuplicateReason::CrossStatement })
        );
    }

    #[test]
    fn same_line_within_statement_is_intra() {
        let detector = DuplicateDetector::default();
        let existing = vec![record(1, 10, 25, "APP/JOHN DOE/", 5_000)];
        let mut incoming = record(0, 10, 25, "APP/JOHN DOE/", 5_000);
        incoming.id = None;
        assert_eq!(
            detector.check_record(&incoming, &existing).map(|h| h.reason),
            Some(DuplicateReason::IntraStatement)
        );
    }

    #[test]
    fn receipt_code_wins_over_narration() {
        let detector = DuplicateDetector::default();
        let existing =
            vec![record(7, 10, 24, "first text", 100).with_receipt_code(Some("TKL9X2ABCD".into()))];
        let incoming = record(0, 11, 25, "other text", 200).with_receipt_code(Some("tkl9x2abcd".into()));
        assert_eq!(
            detector.check_record(&incoming, &existing),
            Some(DuplicateHit { original_id: 7, reason: DuplicateReason::ReceiptNumber })
        );
    }

    #[test]
    fn different_amount_is_new() {
        let detector = DuplicateDetector::default();
        let existing = vec![record(1, 10, 25, "APP/JOHN DOE/", 5_000)];
        let incoming = record(0, 10, 25, "APP/JOHN DOE/", 5_100);
        assert_eq!(detector.check_record(&incoming, &existing), None);
    }

    #[test]
    fn payment_receipt_duplicate_points_at_earlier() {
        let detector = DuplicateDetector::default();
        let mut original = payment(1, 25, 8, 100_000);
        original.receipt_number = Some("SIA93MAWD9".into());
        let mut retry = payment(2, 25, 9, 100_000);
        retry.receipt_number = Some("SIA93MAWD9".into());

        let all = vec![original.clone(), retry.clone()];
        assert_eq!(
            detector.check_payment(&retry, &all),
            Some(DuplicateHit { original_id: 1, reason: DuplicateReason::ReceiptNumber })
        );
        // The original is never flagged by its own later copy.
        assert_eq!(detector.check_payment(&original, &all), None);
    }

    #[test]
    fn flagged_duplicates_are_not_originals() {
        let detector = DuplicateDetector::default();
        let mut first = payment(1, 25, 8, 100);
        first.provider_transaction_id = Some("PX1".into());
        first.reconciliation_status = ReconciliationStatus::Duplicate;
        let mut second = payment(2, 25, 9, 100);
        second.provider_transaction_id = Some("PX1".into());
        assert_eq!(detector.check_payment(&second, &[first, second.clone()]), None);
    }

    #[test]
    fn provider_reference_needs_member_amount_and_day() {
        let detector = DuplicateDetector::default();
        let mut a = payment(1, 25, 8, 500);
        a.provider_reference = Some("ACC-1".into());
        a.member_id = Some(MemberId(3));
        let mut b = payment(2, 25, 17, 500);
        b.provider_reference = Some("ACC-1".into());
        b.member_id = Some(MemberId(3));
        assert_eq!(
            detector.check_payment(&b, &[a.clone()]).map(|h| h.reason),
            Some(DuplicateReason::ProviderReference)
        );

        let mut c = b.clone();
        c.created_at = Utc.with_ymd_and_hms(2024, 12, 26, 8, 0, 0).unwrap();
        assert_eq!(detector.check_payment(&c, &[a.clone()]), None);

        let mut d = b.clone();
        d.member_id = Some(MemberId(4));
        assert_eq!(detector.check_payment(&d, &[a]), None);
    }

    #[test]
    fn counterpart_direct_then_window() {
        let detector = DuplicateDetector::default();
        let mut coded = record(1, 10, 25, "MPS 254721404848 SIA93MAWD9", 100_000);
        coded.parsed.transaction_code = Some("SIA93MAWD9".into());
        let mut owned = record(2, 10, 26, "APP/JOHN DOE/", 100_000);
        owned.member_id = Some(MemberId(5));

        let mut p = payment(9, 25, 10, 100_000);
        p.receipt_number = Some("sia93mawd9".into());
        p.member_id = Some(MemberId(5));

        let txs = vec![coded, owned];
        let none = HashSet::new();
        assert_eq!(
            detector.find_counterpart(&p, &txs, &none),
            Some(Counterpart { transaction_id: 1, kind: CounterpartKind::Direct })
        );

        let consumed: HashSet<i64> = [1].into_iter().collect();
        assert_eq!(
            detector.find_counterpart(&p, &txs, &consumed),
            Some(Counterpart { transaction_id: 2, kind: CounterpartKind::Window })
        );

        let consumed: HashSet<i64> = [1, 2].into_iter().collect();
        assert_eq!(detector.find_counterpart(&p, &txs, &consumed), None);
    }

    #[test]
    fn window_excludes_far_dates_and_archived() {
        let detector = DuplicateDetector::default();
        let mut far = record(1, 10, 28, "x", 100);
        far.member_id = Some(MemberId(5));
        let mut archived = record(2, 10, 25, "y", 100);
        archived.member_id = Some(MemberId(5));
        archived.archived = true;
        let mut p = payment(9, 25, 10, 100);
        p.member_id = Some(MemberId(5));
        assert_eq!(detector.find_counterpart(&p, &[far, archived], &HashSet::new()), None);
    }
}
