use chrono::Utc;
use kitty_core::{AllocationRef, Invoice, MemberId, Money};
use kitty_storage::{find_invoices_by_reference, get_outstanding_invoices, mark_invoice_paid};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, info};

/// Which invoices a credit settles in full, and what is left over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationPlan {
    pub invoice_ids: Vec<i64>,
    pub applied: Money,
    pub remainder: Money,
}

/// Outcome of applying a credit to a member's invoices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub reference: AllocationRef,
    pub invoice_ids: Vec<i64>,
    pub applied: Money,
    pub remainder: Money,
    /// True when the reference had already been applied and nothing new was paid.
    pub already_applied: bool,
}

/// Walks outstanding invoices oldest obligation first and pays each one the
/// remaining amount fully covers. Stops at the first invoice it cannot pay;
/// no invoice is ever part-paid.
pub fn plan_allocation(invoices: &[Invoice], amount: Money) -> AllocationPlan {
    let mut ordered: Vec<&Invoice> = invoices
        .iter()
        .filter(|i| i.id.is_some() && i.status.is_outstanding())
        .collect();
    ordered.sort_by_key(|i| (i.due_date, i.issue_date, i.id));

    let mut remaining = if amount.is_positive() { amount } else { Money::zero() };
    let mut invoice_ids = Vec::new();
    for invoice in ordered {
        if remaining < invoice.amount {
            break;
        }
        remaining -= invoice.amount;
        invoice_ids.extend(invoice.id);
    }

    AllocationPlan {
        invoice_ids,
        applied: amount.max(Money::zero()) - remaining,
        remainder: remaining,
    }
}

/// Applies `amount` to `member`'s outstanding invoices under `reference`.
///
/// Idempotent per reference: if any invoice already carries it, the earlier
/// result is reported and nothing new is paid. Callers hold the member's
/// lock and run this inside the transaction that records the credit.
pub async fn allocate(
    conn: &mut SqliteConnection,
    member: MemberId,
    amount: Money,
    reference: AllocationRef,
    auto_matched: bool,
) -> Result<Allocation, sqlx::Error> {
    let existing = find_invoices_by_reference(conn, reference).await?;
    if !existing.is_empty() {
        let applied: Money = existing.iter().map(|i| i.amount).sum();
        debug!(%reference, invoices = existing.len(), "allocation already applied");
        return Ok(Allocation {
            reference,
            invoice_ids: existing.iter().filter_map(|i| i.id).collect(),
            applied,
            remainder: (amount - applied).max(Money::zero()),
            already_applied: true,
        });
    }

    let outstanding = get_outstanding_invoices(conn, member).await?;
    let plan = plan_allocation(&outstanding, amount);
    let now = Utc::now();

    let mut paid = Vec::with_capacity(plan.invoice_ids.len());
    let mut applied = Money::zero();
    for invoice in outstanding.iter().filter(|i| i.id.is_some_and(|id| plan.invoice_ids.contains(&id))) {
        let Some(id) = invoice.id else { continue };
        let mut metadata = invoice.metadata.clone();
        if let Some(map) = metadata.as_object_mut() {
            map.insert("auto_matched".into(), auto_matched.into());
            map.insert("paid_reference".into(), reference.to_string().into());
            map.insert("matched_at".into(), now.to_rfc3339().into());
        }
        if mark_invoice_paid(conn, id, reference, now, &metadata).await? {
            paid.push(id);
            applied += invoice.amount;
        }
    }

    if !paid.is_empty() {
        info!(member = %member, %reference, invoices = ?paid, applied = %applied, "invoices paid");
    }

    Ok(Allocation {
        reference,
        invoice_ids: paid,
        applied,
        remainder: (amount - applied).max(Money::zero()),
        already_applied: false,
    })
}
