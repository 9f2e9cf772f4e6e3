pub mod allocator;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod lock;
pub mod operator;

pub use allocator::{allocate, plan_allocation, Allocation, AllocationPlan};
pub use engine::{ReconcileEngine, ReconcileOutcome};
pub use error::ReconcileError;
pub use ingest::{IngestReport, RematchReport};
pub use lock::{MemberGuard, MemberLocks};
pub use operator::{DeletedStatement, ManualAssignment, ReviewQueue, UnmatchedPayment};
