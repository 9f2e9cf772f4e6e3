pub mod audit;
pub mod error;
pub mod invoice;
pub mod member;
pub mod money;
pub mod payment;
pub mod period;
pub mod transaction;

pub use audit::{
    AuditEntry, DuplicateEntry, DuplicateReason, DuplicateSnapshot, MatchLog, MatchSource,
    MANUAL_CONFIDENCE, SYSTEM_ACTOR,
};
pub use error::DomainError;
pub use invoice::{AllocationRef, Invoice, InvoiceStatus};
pub use member::{Member, MemberId};
pub use money::Money;
pub use payment::{Payment, PaymentChannel, ReconciliationLog, ReconciliationStatus};
pub use period::DateRange;
pub use transaction::{
    AssignmentStatus, Channel, ParsedFields, PhoneToken, RawNarration, TransactionOrigin,
    TransactionRecord,
};
