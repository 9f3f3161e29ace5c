//! The reconciler: decide create, update or skip for each canonical record
//! and persist the cursor once the whole cycle is terminal.

use tracing::{debug, error, info, warn};

use crate::cursor::CursorStore;
use crate::error::{MirrorError, MirrorResult};
use crate::record::{CanonicalRecord, Materialization};
use crate::retry::{with_retry, RetryPolicy};
use crate::sink::{Lookup, RecordSink};
use crate::source::EventSource;

/// Terminal outcome of one successfully reconciled record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Created(Materialization),
    Updated(Materialization),
    /// Content already matched; no write was issued.
    Skipped(Materialization),
}

/// A record that ended the cycle in a reported failure.
#[derive(Debug)]
pub struct FailureReport {
    pub external_id: String,
    pub title: String,
    pub error: MirrorError,
}

/// What one cycle did.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    /// Raw source items discarded before reconciliation.
    pub dropped: usize,
    pub failures: Vec<FailureReport>,
    /// False when a failure held the cursor back so the same window is
    /// re-fetched next cycle.
    pub cursor_advanced: bool,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures that force the window to be re-fetched: exhausted transient
    /// retries and auth rejections. Both can succeed on re-delivery once
    /// the outage clears or the credential is fixed.
    fn blocking_failures(&self) -> usize {
        self.failures
            .iter()
            .filter(|f| {
                matches!(
                    f.error,
                    MirrorError::TransientWrite(_) | MirrorError::Auth(_)
                )
            })
            .count()
    }
}

/// Drives one reconciliation cycle: fetch, decide per record, persist the
/// cursor once every record is terminal.
///
/// Records are handled sequentially and independently; one record's
/// failure never aborts the batch. Overlapping invocations of the same
/// engine are not safe and must be serialized by the caller.
pub struct Reconciler<S, K> {
    source: S,
    sink: K,
    cursors: CursorStore,
    retry: RetryPolicy,
}

impl<S: EventSource, K: RecordSink> Reconciler<S, K> {
    pub fn new(source: S, sink: K, cursors: CursorStore, retry: RetryPolicy) -> Self {
        Reconciler {
            source,
            sink,
            cursors,
            retry,
        }
    }

    /// Run one cycle. Per-record failures are absorbed into the report; an
    /// `Err` means the cycle itself could not run (fetch or cursor
    /// persistence failed) and the cursor was not advanced.
    pub async fn run_cycle(&self) -> MirrorResult<CycleReport> {
        let cursor = self.cursors.load()?;

        let batch = match self.source.fetch_changes(cursor.as_ref()).await {
            Err(MirrorError::CursorExpired) if cursor.is_some() => {
                warn!("sync cursor expired; falling back to a full listing");
                self.source.fetch_changes(None).await?
            }
            other => other?,
        };

        let mut report = CycleReport {
            fetched: batch.records.len(),
            dropped: batch.dropped,
            ..CycleReport::default()
        };

        // Every record reaches a terminal outcome before the cursor moves
        for record in &batch.records {
            match self.reconcile_record(record).await {
                Ok(RecordOutcome::Created(m)) => {
                    info!(
                        external_id = %record.external_id,
                        title = %record.title,
                        sink_id = %m.sink_id,
                        "created"
                    );
                    report.created += 1;
                }
                Ok(RecordOutcome::Updated(m)) => {
                    info!(
                        external_id = %record.external_id,
                        title = %record.title,
                        sink_id = %m.sink_id,
                        "updated"
                    );
                    report.updated += 1;
                }
                Ok(RecordOutcome::Skipped(_)) => {
                    debug!(external_id = %record.external_id, "unchanged");
                    report.skipped += 1;
                }
                Err(err) => {
                    error!(
                        external_id = %record.external_id,
                        title = %record.title,
                        error = %err,
                        "record failed"
                    );
                    report.failures.push(FailureReport {
                        external_id: record.external_id.clone(),
                        title: record.title.clone(),
                        error: err,
                    });
                }
            }
        }

        // An exhausted transient retry or a rejected credential means the
        // window must be re-fetched, so the cursor stays put. Deterministic
        // rejections would fail the same way on re-delivery and do not hold
        // it back.
        if report.blocking_failures() == 0 {
            self.cursors.save(&batch.next_cursor)?;
            report.cursor_advanced = true;
        }

        Ok(report)
    }

    /// Look the record up by its join key and apply the decision.
    async fn reconcile_record(&self, record: &CanonicalRecord) -> MirrorResult<RecordOutcome> {
        let lookup = with_retry(&self.retry, "lookup", || {
            self.sink.find_by_external_id(&record.external_id)
        })
        .await?;

        match lookup {
            Lookup::NotFound => {
                let materialized =
                    with_retry(&self.retry, "create", || self.sink.create(record)).await?;
                Ok(RecordOutcome::Created(materialized))
            }
            Lookup::Found(existing) => {
                if record.content_eq(&existing) {
                    return Ok(RecordOutcome::Skipped(Materialization {
                        sink_id: existing.sink_id,
                    }));
                }

                with_retry(&self.retry, "update", || {
                    self.sink.update(&existing.sink_id, record)
                })
                .await?;
                Ok(RecordOutcome::Updated(Materialization {
                    sink_id: existing.sink_id,
                }))
            }
            Lookup::Ambiguous(count) => Err(MirrorError::AmbiguousMatch {
                external_id: record.external_id.clone(),
                count,
            }),
        }
    }
}
