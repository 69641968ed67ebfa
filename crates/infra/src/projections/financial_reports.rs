//! Financial report read model.
//!
//! One row per `(transaction_id, transaction_type)` pair, merged from the
//! settlement and invoice events of that transaction. The row's
//! `outstanding_minor` is always `invoice − settlement` floored at zero:
//! over-settlement reports as zero outstanding, never as a negative amount
//! (amounts are unsigned minor units throughout).

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

use aurum_core::AggregateId;
use aurum_events::{EventEnvelope, EventHandler, HandlerError};
use aurum_finance::FinanceEvent;

use super::cursor::{CursorCheck, VersionCursors};
use super::{sort_for_rebuild, Paged, ProjectionError, Rebuildable};
use crate::event_store::Pagination;
use crate::read_model::ReadStore;

/// Natural key of a financial report row.
pub type ReportKey = (String, String);

/// Lifecycle of a reported transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReportStatus {
    Created,
    Processed,
    Settled,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Created => "CREATED",
            ReportStatus::Processed => "PROCESSED",
            ReportStatus::Settled => "SETTLED",
        }
    }
}

/// Read model row: the reporting view of one financial transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinancialReportRow {
    /// Surrogate row id, assigned once when the row is first created.
    pub report_id: Uuid,
    pub transaction_id: String,
    pub transaction_type: String,
    pub dealer_id: Option<String>,
    pub currency: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_amount_minor: Option<u64>,
    pub settlement_amount_minor: Option<u64>,
    pub status: ReportStatus,
    pub transaction_date: Option<DateTime<Utc>>,
    /// `invoice − settlement`, floored at zero.
    pub outstanding_minor: u64,
    pub last_updated: DateTime<Utc>,
}

impl FinancialReportRow {
    fn new(transaction_id: String, transaction_type: String, as_of: DateTime<Utc>) -> Self {
        Self {
            report_id: Uuid::now_v7(),
            transaction_id,
            transaction_type,
            dealer_id: None,
            currency: None,
            invoice_number: None,
            invoice_amount_minor: None,
            settlement_amount_minor: None,
            status: ReportStatus::Created,
            transaction_date: None,
            outstanding_minor: 0,
            last_updated: as_of,
        }
    }

    fn recompute_outstanding(&mut self) {
        let invoiced = self.invoice_amount_minor.unwrap_or(0);
        let settled = self.settlement_amount_minor.unwrap_or(0);
        self.outstanding_minor = invoiced.saturating_sub(settled);
    }
}

/// Optional row scoping shared by the listing and aggregate queries.
#[derive(Debug, Clone, Default)]
pub struct ReportScope {
    pub dealer_id: Option<String>,
    pub currency: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl ReportScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dealer(mut self, dealer_id: impl Into<String>) -> Self {
        self.dealer_id = Some(dealer_id.into());
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    /// Inclusive transaction-date window.
    pub fn with_period(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    fn matches(&self, row: &FinancialReportRow) -> bool {
        self.dealer_id
            .as_deref()
            .map_or(true, |d| row.dealer_id.as_deref() == Some(d))
            && self
                .currency
                .as_deref()
                .map_or(true, |c| row.currency.as_deref() == Some(c))
            && self
                .from
                .map_or(true, |from| row.transaction_date.is_some_and(|d| d >= from))
            && self
                .to
                .map_or(true, |to| row.transaction_date.is_some_and(|d| d <= to))
    }
}

/// Builds [`FinancialReportRow`]s from finance events.
pub struct FinancialReportProjection<S> {
    store: S,
    cursors: VersionCursors,
}

impl<S> FinancialReportProjection<S>
where
    S: ReadStore<ReportKey, FinancialReportRow>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: VersionCursors::new(),
        }
    }

    /// Merge one committed envelope into the read model.
    pub fn apply_envelope(&self, envelope: &EventEnvelope) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != "finance.transaction" {
            return Ok(());
        }

        match self.cursors.check(envelope.aggregate_id(), envelope.version())? {
            CursorCheck::AlreadyApplied => return Ok(()),
            CursorCheck::Apply => {}
        }

        let event: FinanceEvent =
            envelope
                .decode()
                .map_err(|source| ProjectionError::Decode {
                    event_type: envelope.event_type().to_string(),
                    source,
                })?;

        if event.transaction_id().as_str() != envelope.aggregate_id().as_str() {
            return Err(ProjectionError::IdMismatch {
                envelope: envelope.aggregate_id().to_string(),
                payload: event.transaction_id().to_string(),
            });
        }

        let key: ReportKey = (
            event.transaction_id().as_str().to_string(),
            event.transaction_type().to_string(),
        );
        let mut row = self.store.get(&key).unwrap_or_else(|| {
            FinancialReportRow::new(key.0.clone(), key.1.clone(), envelope.occurred_at())
        });

        match event {
            FinanceEvent::SettlementCreated(e) => {
                row.settlement_amount_minor = Some(e.settlement_amount_minor);
                row.currency = Some(e.currency);
                if let Some(dealer) = e.dealer_id {
                    row.dealer_id = Some(dealer);
                }
                row.transaction_date = Some(e.settlement_date);
            }
            FinanceEvent::SettlementProcessed(_) => {
                row.status = ReportStatus::Processed;
            }
            FinanceEvent::InvoiceSettled(e) => {
                row.invoice_number = Some(e.invoice_number);
                row.invoice_amount_minor = Some(e.invoice_amount_minor);
                if let Some(settled) = e.settlement_amount_minor {
                    row.settlement_amount_minor = Some(settled);
                }
                row.status = ReportStatus::Settled;
            }
        }

        row.recompute_outstanding();
        row.last_updated = envelope.occurred_at();

        self.store.upsert(key, row);
        self.cursors
            .advance(envelope.aggregate_id(), envelope.version());
        Ok(())
    }

    pub fn find_report(&self, report_id: Uuid) -> Option<FinancialReportRow> {
        self.store
            .list()
            .into_iter()
            .find(|row| row.report_id == report_id)
    }

    pub fn find_by_transaction(
        &self,
        transaction_id: &str,
        transaction_type: &str,
    ) -> Option<FinancialReportRow> {
        self.store
            .get(&(transaction_id.to_string(), transaction_type.to_string()))
    }

    /// All rows in scope, ordered by `(transaction_id, transaction_type)`.
    pub fn find_all_reports(
        &self,
        scope: &ReportScope,
        pagination: Pagination,
    ) -> Paged<FinancialReportRow> {
        let rows = self.scoped_sorted(scope);
        let total = rows.len() as u64;

        let items: Vec<FinancialReportRow> = rows
            .into_iter()
            .skip(pagination.offset() as usize)
            .take(pagination.limit() as usize)
            .collect();
        let has_more = pagination.offset() + (items.len() as u64) < total;

        Paged {
            items,
            total,
            has_more,
        }
    }

    pub fn find_by_dealer(&self, dealer_id: &str) -> Vec<FinancialReportRow> {
        self.scoped_sorted(&ReportScope::new().with_dealer(dealer_id))
    }

    pub fn find_by_currency(&self, currency: &str) -> Vec<FinancialReportRow> {
        self.scoped_sorted(&ReportScope::new().with_currency(currency))
    }

    pub fn find_in_period(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<FinancialReportRow> {
        self.scoped_sorted(&ReportScope::new().with_period(from, to))
    }

    pub fn total_invoiced_minor(&self, scope: &ReportScope) -> u64 {
        self.scoped(scope)
            .map(|row| row.invoice_amount_minor.unwrap_or(0))
            .sum()
    }

    pub fn total_settled_minor(&self, scope: &ReportScope) -> u64 {
        self.scoped(scope)
            .map(|row| row.settlement_amount_minor.unwrap_or(0))
            .sum()
    }

    pub fn total_outstanding_minor(&self, scope: &ReportScope) -> u64 {
        self.scoped(scope).map(|row| row.outstanding_minor).sum()
    }

    pub fn count_by_status(&self, scope: &ReportScope) -> BTreeMap<ReportStatus, u64> {
        let mut counts = BTreeMap::new();
        for row in self.scoped(scope) {
            *counts.entry(row.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn count_by_type(&self, scope: &ReportScope) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        for row in self.scoped(scope) {
            *counts.entry(row.transaction_type).or_insert(0) += 1;
        }
        counts
    }

    fn scoped(&self, scope: &ReportScope) -> impl Iterator<Item = FinancialReportRow> + '_ {
        let scope = scope.clone();
        self.store
            .list()
            .into_iter()
            .filter(move |row| scope.matches(row))
    }

    fn scoped_sorted(&self, scope: &ReportScope) -> Vec<FinancialReportRow> {
        let mut rows: Vec<FinancialReportRow> = self.scoped(scope).collect();
        rows.sort_by(|a, b| {
            (a.transaction_id.as_str(), a.transaction_type.as_str())
                .cmp(&(b.transaction_id.as_str(), b.transaction_type.as_str()))
        });
        rows
    }
}

impl<S> Rebuildable for FinancialReportProjection<S>
where
    S: ReadStore<ReportKey, FinancialReportRow>,
{
    fn projection_name(&self) -> &'static str {
        "financial_reports"
    }

    fn rebuild_from_scratch(&self, mut envelopes: Vec<EventEnvelope>) -> Result<(), ProjectionError> {
        self.store.clear();
        self.cursors.clear();
        sort_for_rebuild(&mut envelopes);
        for envelope in &envelopes {
            self.apply_envelope(envelope)?;
        }
        Ok(())
    }
}

impl<S> EventHandler for FinancialReportProjection<S>
where
    S: ReadStore<ReportKey, FinancialReportRow>,
{
    fn name(&self) -> &'static str {
        "financial_reports"
    }

    fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
        self.apply_envelope(event).map_err(HandlerError::from)
    }
}
