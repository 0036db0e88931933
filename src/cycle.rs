use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::store::{CacheError, CacheStore};
use crate::notify::message::{render, MessageStyle};
use crate::notify::sink::{Audience, NotifySink};
use crate::snapshot::aliases::AliasTable;
use crate::snapshot::differ::{diff_snapshots, ChangeSet};
use crate::snapshot::normalize::{Normalizer, RowError, ValueParser};
use crate::snapshot::schema::RawRow;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Normalizing,
    Comparing,
    Notifying,
    Committing,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    /// Disabled by configuration, nothing to send, or no sink wired up.
    Skipped,
    Failed,
}

#[derive(Debug, Error)]
pub enum CycleError {
    /// Non-empty raw input collapsed to zero records. Almost certainly a
    /// page-structure change upstream, so the cache stays untouched
    /// instead of letting the next cycle re-report the whole history.
    #[error("normalization produced an empty snapshot from {row_count} raw rows")]
    EmptySnapshot { row_count: usize },
    #[error("cache is unusable, refusing to treat existing grades as new")]
    Cache(#[from] CacheError),
    #[error("delivery failed for mandatory audience {audience}")]
    Delivery { audience: Audience },
}

/// What one completed cycle did.
#[derive(Debug)]
pub struct CycleReport {
    pub changes: ChangeSet,
    pub row_errors: Vec<RowError>,
    pub deliveries: Vec<(Audience, DeliveryOutcome)>,
    pub committed: bool,
}

/// Delivery wiring for one audience.
pub struct AudiencePlan {
    pub audience: Audience,
    pub enabled: bool,
    pub mandatory: bool,
    pub sinks: Vec<Box<dyn NotifySink>>,
}

/// Sequences one full pass: normalize, compare against the cached
/// snapshot, notify, and only then commit. Any failure leaves the cache
/// as it was, so the next cycle re-detects the same changes instead of
/// losing them.
pub struct CycleRunner<S: CacheStore> {
    store: S,
    aliases: AliasTable,
    parser: ValueParser,
    style: MessageStyle,
    notify_enabled: bool,
    audiences: Vec<AudiencePlan>,
}

impl<S: CacheStore> CycleRunner<S> {
    pub fn new(
        store: S,
        aliases: AliasTable,
        parser: ValueParser,
        style: MessageStyle,
        notify_enabled: bool,
        audiences: Vec<AudiencePlan>,
    ) -> Self {
        Self {
            store,
            aliases,
            parser,
            style,
            notify_enabled,
            audiences,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn run(&self, rows: &[RawRow]) -> Result<CycleReport, CycleError> {
        let mut state = CycleState::Idle;

        // The cache is read up front so an unusable store fails the
        // cycle before any work happens.
        let cached = match self.store.load() {
            Ok(cached) => cached,
            Err(err) => return Err(fail(state, err.into())),
        };

        state = advance(state, CycleState::Normalizing);
        let observed_at = Utc::now();
        let normalizer = Normalizer::new(&self.aliases, &self.parser);
        let (current, row_errors) = normalizer.normalize(rows, observed_at);
        if !row_errors.is_empty() {
            warn!(
                dropped = row_errors.len(),
                kept = current.len(),
                "some rows failed normalization"
            );
        }
        if current.is_empty() && !rows.is_empty() {
            return Err(fail(
                state,
                CycleError::EmptySnapshot {
                    row_count: rows.len(),
                },
            ));
        }

        state = advance(state, CycleState::Comparing);
        let changes = diff_snapshots(&cached.snapshot, &current);
        info!(changes = changes.len(), "comparison finished");

        state = advance(state, CycleState::Notifying);
        let notification = render(&changes, &self.style);
        let mut deliveries = Vec::new();
        let mut delivered_any = false;
        for plan in &self.audiences {
            let outcome = match &notification {
                _ if !self.notify_enabled || !plan.enabled => DeliveryOutcome::Skipped,
                None => DeliveryOutcome::Skipped,
                Some(_) if plan.sinks.is_empty() => DeliveryOutcome::Skipped,
                Some(notification) => {
                    let text = match plan.audience {
                        Audience::Summary => &notification.summary,
                        Audience::Detail => &notification.detail,
                    };
                    let mut failed = false;
                    for sink in &plan.sinks {
                        if let Err(err) = sink.deliver(plan.audience, text).await {
                            warn!(
                                audience = %plan.audience,
                                sink = sink.name(),
                                error = %err,
                                "delivery failed"
                            );
                            failed = true;
                        }
                    }
                    if failed {
                        DeliveryOutcome::Failed
                    } else {
                        delivered_any = true;
                        DeliveryOutcome::Delivered
                    }
                }
            };
            deliveries.push((plan.audience, outcome));
        }
        if let Some((audience, _)) = deliveries.iter().find(|(audience, outcome)| {
            *outcome == DeliveryOutcome::Failed && self.is_mandatory(*audience)
        }) {
            return Err(fail(
                state,
                CycleError::Delivery {
                    audience: *audience,
                },
            ));
        }

        state = advance(state, CycleState::Committing);
        let last_notified_at = if delivered_any {
            Some(observed_at)
        } else {
            cached.last_notified_at
        };
        if let Err(err) = self.store.commit(&current, last_notified_at) {
            return Err(fail(state, err.into()));
        }

        advance(state, CycleState::Done);
        Ok(CycleReport {
            changes,
            row_errors,
            deliveries,
            committed: true,
        })
    }

    fn is_mandatory(&self, audience: Audience) -> bool {
        self.audiences
            .iter()
            .any(|plan| plan.audience == audience && plan.mandatory)
    }
}

fn advance(from: CycleState, to: CycleState) -> CycleState {
    debug!(?from, ?to, "cycle state");
    to
}

fn fail(from: CycleState, err: CycleError) -> CycleError {
    warn!(?from, to = ?CycleState::Failed, error = %err, "cycle failed");
    err
}
