pub mod audit;
pub mod db;
pub mod invoices;
pub mod ledger;
pub mod members;
pub mod payments;

pub use audit::{count_audit_entries, get_audit_entries, insert_audit};
pub use db::{create_db, DbPool};
pub use invoices::{
    find_invoices_by_reference, get_invoice, get_member_invoices, get_outstanding_invoices,
    insert_invoice, mark_invoice_paid, unwind_invoices,
};
pub use ledger::{
    archive_transaction_row, count_dependent_duplicates, delete_statement_row, find_credits_between,
    find_identity_matches, get_duplicates, get_match_logs, get_review_transactions, get_statements,
    get_transaction, get_transactions_for_statement, insert_duplicate, insert_match_log,
    insert_statement, insert_transaction, total_credited, update_transaction_assignment,
    update_transaction_parsed, StatementRecord,
};
pub use members::{get_active_members, get_all_members, get_member, insert_member, set_member_active};
pub use payments::{
    consumed_transaction_ids, delete_reconciliation_logs, find_payment_identity_matches,
    get_payment, get_payments_by_status, get_reconciliation_logs, insert_payment,
    insert_reconciliation_log, update_payment_status,
};
