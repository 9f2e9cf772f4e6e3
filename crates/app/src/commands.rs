use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Subcommand;
use kitty_core::{AllocationRef, Invoice, Member, MemberId, Money, Payment, PaymentChannel};
use kitty_import::read_statement;
use kitty_match::RemoteBatchMatcher;
use kitty_storage::{
    get_all_members, get_audit_entries, get_member, get_member_invoices, insert_invoice, insert_member,
    set_member_active,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::AppState;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the database and print its location
    Init,
    /// Import members from a CSV with columns name,phone,member_code,member_number
    ImportMembers { csv: PathBuf },
    /// List registered members
    Members,
    /// Stop matching credits to a member
    DeactivateMember { member: i64 },
    /// Add a pending invoice for a member
    AddInvoice {
        member: i64,
        number: String,
        amount: Decimal,
        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: NaiveDate,
        /// Issue date, defaults to the due date
        #[arg(long)]
        issued: Option<NaiveDate>,
    },
    /// List a member's invoices
    Invoices { member: i64 },
    /// Apply a hand-recorded contribution to a member's invoices
    Contribute {
        member: i64,
        amount: Decimal,
        /// Contribution id the credit is filed under
        #[arg(long)]
        reference: i64,
    },
    /// Store an incoming payment as pending
    RecordPayment {
        amount: Decimal,
        #[arg(long, default_value = "mobile_money")]
        channel: PaymentChannel,
        #[arg(long)]
        receipt: Option<String>,
        #[arg(long)]
        reference: Option<String>,
        #[arg(long)]
        provider_id: Option<String>,
        #[arg(long)]
        member: Option<i64>,
        /// Payment time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Parse, de-duplicate and match a statement CSV
    Ingest {
        csv: PathBuf,
        /// Statement name, defaults to the file name
        #[arg(long)]
        statement: Option<String>,
    },
    /// Re-parse and re-match unassigned and draft records
    Rematch,
    /// Reconcile one payment, or every pending payment
    Reconcile {
        #[arg(long)]
        payment: Option<i64>,
    },
    /// Re-run reconciliation for a payment that already has a result
    Retry { payment: i64 },
    /// Assign a statement record to a member
    Assign { transaction: i64, member: i64 },
    /// Archive a statement record
    Archive { transaction: i64 },
    /// Delete a statement and everything derived from it
    DeleteStatement { statement: i64 },
    /// Show records, duplicates and payments waiting on an operator
    Review,
    /// Show the audit trail for a subject such as payment:3
    Audit { subject: String },
    /// Ping the remote matcher
    CheckRemote,
}

#[derive(Debug, Deserialize)]
struct MemberCsvRow {
    name: String,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    member_code: Option<String>,
    #[serde(default)]
    member_number: Option<String>,
}

pub async fn run(state: &AppState, command: Command) -> Result<()> {
    let engine = &state.engine;
    let actor = state.actor.as_str();

    match command {
        Command::Init => {
            println!("{}", state.database.display());
        }
        Command::ImportMembers { csv } => {
            let imported = import_members(state, &csv).await?;
            println!("imported {imported} members");
        }
        Command::Members => {
            let mut conn = engine.pool().acquire().await?;
            print_json(&get_all_members(&mut conn).await?)?;
        }
        Command::DeactivateMember { member } => {
            let mut conn = engine.pool().acquire().await?;
            if !set_member_active(&mut conn, MemberId(member), false).await? {
                bail!("member {member} not found");
            }
            info!(member, actor, "member deactivated");
        }
        Command::AddInvoice { member, number, amount, due, issued } => {
            let member = MemberId(member);
            let mut conn = engine.pool().acquire().await?;
            if get_member(&mut conn, member).await?.is_none() {
                bail!("member {member} not found");
            }
            let amount = positive(amount)?;
            let invoice = Invoice::new(member, &number, amount, issued.unwrap_or(due), due);
            let id = insert_invoice(&mut conn, &invoice).await?;
            println!("{id}");
        }
        Command::Invoices { member } => {
            let mut conn = engine.pool().acquire().await?;
            print_json(&get_member_invoices(&mut conn, MemberId(member)).await?)?;
        }
        Command::Contribute { member, amount, reference } => {
            let allocation = engine
                .allocate_credit(MemberId(member), positive(amount)?, AllocationRef::Contribution(reference), actor)
                .await?;
            print_json(&allocation)?;
        }
        Command::RecordPayment { amount, channel, receipt, reference, provider_id, member, at } => {
            let mut payment = Payment::new(channel, positive(amount)?, at.unwrap_or_else(Utc::now));
            payment.receipt_number = receipt;
            payment.provider_reference = reference;
            payment.provider_transaction_id = provider_id;
            payment.member_id = member.map(MemberId);
            let id = engine.record_payment(&payment, actor).await?;
            println!("{id}");
        }
        Command::Ingest { csv, statement } => {
            let file = File::open(&csv).with_context(|| format!("Failed to open {}", csv.display()))?;
            let rows = read_statement(file, &state.config.statement_csv)
                .with_context(|| format!("Failed to read statement {}", csv.display()))?;
            let name = statement.unwrap_or_else(|| file_name(&csv));
            let source = csv.to_string_lossy();
            let report = engine.ingest_statement(&name, Some(source.as_ref()), &rows).await?;
            print_json(&report)?;
        }
        Command::Rematch => {
            print_json(&engine.rematch_pending(actor).await?)?;
        }
        Command::Reconcile { payment: Some(id) } => {
            print_json(&engine.reconcile_payment(id).await?)?;
        }
        Command::Reconcile { payment: None } => {
            let outcomes: Vec<PaymentOutcome> = engine
                .reconcile_pending()
                .await?
                .into_iter()
                .map(|(payment_id, outcome)| PaymentOutcome { payment_id, outcome })
                .collect();
            print_json(&outcomes)?;
        }
        Command::Retry { payment } => {
            print_json(&engine.retry_payment(payment, actor).await?)?;
        }
        Command::Assign { transaction, member } => {
            print_json(&engine.assign_manually(transaction, MemberId(member), actor).await?)?;
        }
        Command::Archive { transaction } => {
            let unwound = engine.archive_transaction(transaction, actor).await?;
            println!("archived transaction {transaction}, {unwound} invoices back to pending");
        }
        Command::DeleteStatement { statement } => {
            print_json(&engine.delete_statement(statement, actor).await?)?;
        }
        Command::Review => {
            let queue = engine.review_queue().await?;
            if queue.is_empty() {
                println!("nothing to review");
            } else {
                print_json(&queue)?;
            }
        }
        Command::Audit { subject } => {
            let mut conn = engine.pool().acquire().await?;
            print_json(&get_audit_entries(&mut conn, &subject).await?)?;
        }
        Command::CheckRemote => {
            let remote = &state.config.remote_matcher;
            let client = RemoteBatchMatcher::new(&remote.base_url, remote.timeout())?;
            match client.health().await {
                Ok(true) => println!("{} is healthy", client.base_url()),
                Ok(false) => bail!("{} answered with an error status", client.base_url()),
                Err(e) => bail!("{} is unreachable: {e}", client.base_url()),
            }
            if !remote.enabled {
                warn!("remote matcher is reachable but disabled in configuration");
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct PaymentOutcome {
    payment_id: i64,
    #[serde(flatten)]
    outcome: kitty_reconcile::ReconcileOutcome,
}

/// Phones are stored canonical when they normalize, raw otherwise.
async fn import_members(state: &AppState, path: &Path) -> Result<usize> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);
    let normalizer = state.engine.parser().normalizer();

    let mut conn = state.engine.pool().acquire().await?;
    let mut imported = 0;
    for (line, row) in reader.deserialize::<MemberCsvRow>().enumerate() {
        let row = row.with_context(|| format!("Bad member row {}", line + 1))?;
        if row.name.is_empty() {
            warn!(line = line + 1, "skipping member without a name");
            continue;
        }
        let mut member = Member::new(0, &row.name);
        member.phone = row.phone.filter(|p| !p.is_empty()).map(|raw| {
            normalizer
                .normalize(&raw)
                .and_then(|token| token.full_number().map(str::to_string))
                .unwrap_or(raw)
        });
        member.member_code = row.member_code.filter(|c| !c.is_empty());
        member.member_number = row.member_number.filter(|n| !n.is_empty());
        insert_member(&mut conn, &member).await?;
        imported += 1;
    }
    info!(imported, path = %path.display(), "members imported");
    Ok(imported)
}

fn positive(amount: Decimal) -> Result<Money> {
    let money = Money::from_decimal(amount);
    if !money.is_positive() {
        bail!("amount must be positive, got {amount}");
    }
    Ok(money)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
