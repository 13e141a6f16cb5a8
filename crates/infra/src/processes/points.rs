//! Points process: account events → `Collection` projection.
//!
//! Consumes `account.monthly` envelopes (inline from the application or from a
//! bus subscription) and keeps one `Collection` per (group, player, month).
//!
//! - `CollectionAdded` scores the date in isolation and accumulates it, once
//!   per date.
//! - `CollectionUpdated` recomputes the whole month from the account as of
//!   that event and overwrites the totals.
//!
//! Delivery is at-least-once. The `Collection` stores the highest account
//! sequence it has consumed inside its own events, so redeliveries are
//! dropped durably.
//!
//! Account events are folded strictly in stream order. Handling sequence `n`
//! first replays every unconsumed event below it, so a delivery that failed
//! is retried by the next one on the same account instead of being skipped.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

use gamify_accounts::{MonthlyAccount, MonthlyAccountEvent, UpdateReason};
use gamify_core::{AggregateId, GroupId, MonthLabel, PlayerId};
use gamify_events::{EventBus, EventEnvelope};
use gamify_points::{
    AddPoints, Collection, CollectionCommand, DayScore, OverwritePoints, recalculate, score_day,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, StoredEvent};

#[derive(Debug, Error)]
pub enum PointsProcessError {
    /// The account an event refers to cannot be loaded. The projection has
    /// no source of truth, so this is never defaulted.
    #[error("source account {account} not found at sequence {sequence}")]
    ConsistencyViolation { account: AggregateId, sequence: u64 },

    #[error("undecodable account event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// What the process did with one account event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Not a collection event (other stream type, or account creation).
    Ignored,
    /// Already folded into the projection (redelivery).
    Duplicate,
    /// `CollectionAdded` for a date that already contributes to the totals.
    AlreadyProcessed { date: NaiveDate },
    Scored { date: NaiveDate, total: Decimal },
    Recalculated { date: NaiveDate, total: Decimal },
}

#[derive(Debug)]
pub struct PointsProcess<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
}

impl<S, B> Clone for PointsProcess<S, B> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

impl<S, B> PointsProcess<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>) -> Self {
        Self { dispatcher }
    }

    /// Handle one committed event as it came out of the store.
    pub fn handle_stored(&self, stored: &StoredEvent) -> Result<ProcessOutcome, PointsProcessError> {
        self.handle_envelope(&stored.to_envelope())
    }

    /// Handle one envelope from the bus. Other stream types are ignored.
    ///
    /// Unconsumed events that precede it in the account stream are handled
    /// first, in order.
    pub fn handle_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<ProcessOutcome, PointsProcessError> {
        if envelope.aggregate_type() != MonthlyAccount::AGGREGATE_TYPE {
            return Ok(ProcessOutcome::Ignored);
        }

        let account_id = envelope.aggregate_id();
        let sequence = envelope.sequence_number();
        let event = decode(envelope.payload(), account_id, sequence)?;
        let (group, player, month) = account_keys(&event);
        if MonthlyAccount::stream_id(group, player, month) != account_id {
            return Err(PointsProcessError::ConsistencyViolation {
                account: account_id,
                sequence,
            });
        }

        let outcome = self
            .replay(account_id, group, player, month, Some(sequence))?
            .into_iter()
            .find_map(|(seq, outcome)| (seq == sequence).then_some(outcome));

        Ok(outcome.unwrap_or_else(|| {
            debug!(account_id = %account_id, sequence, "redelivered event dropped");
            ProcessOutcome::Duplicate
        }))
    }

    fn handle_event(
        &self,
        account_id: AggregateId,
        sequence: u64,
        event: &MonthlyAccountEvent,
    ) -> Result<ProcessOutcome, PointsProcessError> {
        match event {
            MonthlyAccountEvent::MonthlyAccountCreated(_) => Ok(ProcessOutcome::Ignored),

            MonthlyAccountEvent::CollectionAdded(e) => {
                let collection = self.collection_or_empty(&e.group, &e.player, &e.month)?;
                if collection.has_consumed(sequence) {
                    debug!(account_id = %account_id, sequence, "redelivered event dropped");
                    return Ok(ProcessOutcome::Duplicate);
                }
                if collection.is_processed(e.date) {
                    info!(
                        account_id = %account_id,
                        sequence,
                        date = %e.date,
                        "date already scored, collection added without points change"
                    );
                    return Ok(ProcessOutcome::AlreadyProcessed { date: e.date });
                }

                self.source_account(account_id, sequence, &e.group, &e.player, &e.month)?;

                let score = score_day(e.date, e.amount, e.target, collection.carry());
                warn_if_saturated(account_id, e.date, &score);
                let cmd = CollectionCommand::AddPoints(AddPoints {
                    group: e.group.clone(),
                    player: e.player.clone(),
                    month: e.month.clone(),
                    date: e.date,
                    score,
                    source_sequence: sequence,
                    occurred_at: Utc::now(),
                });

                if self.dispatch_collection(&cmd, &e.group, &e.player, &e.month)? {
                    info!(
                        account_id = %account_id,
                        sequence,
                        date = %e.date,
                        total = %score.total,
                        "points added"
                    );
                    Ok(ProcessOutcome::Scored {
                        date: e.date,
                        total: score.total,
                    })
                } else {
                    Ok(ProcessOutcome::Duplicate)
                }
            }

            MonthlyAccountEvent::CollectionUpdated(e) => {
                let collection = self.collection_or_empty(&e.group, &e.player, &e.month)?;
                if collection.has_consumed(sequence) {
                    debug!(account_id = %account_id, sequence, "redelivered event dropped");
                    return Ok(ProcessOutcome::Duplicate);
                }

                let account = self.source_account(account_id, sequence, &e.group, &e.player, &e.month)?;
                let mut daily = account.daily_collection().clone();
                if e.reason == UpdateReason::TargetChanged {
                    // The amount is committed by the CollectionAdded right after
                    // this event; score the month as the whole command leaves it.
                    *daily.entry(e.date).or_insert(Decimal::ZERO) += e.amount;
                }

                let score = recalculate(&daily, e.target);
                warn_if_saturated(account_id, e.date, &score);
                let cmd = CollectionCommand::OverwritePoints(OverwritePoints {
                    group: e.group.clone(),
                    player: e.player.clone(),
                    month: e.month.clone(),
                    date: e.date,
                    score,
                    source_sequence: sequence,
                    occurred_at: Utc::now(),
                });

                if self.dispatch_collection(&cmd, &e.group, &e.player, &e.month)? {
                    info!(
                        account_id = %account_id,
                        sequence,
                        date = %e.date,
                        days = daily.len(),
                        total = %score.total,
                        "points recalculated"
                    );
                    Ok(ProcessOutcome::Recalculated {
                        date: e.date,
                        total: score.total,
                    })
                } else {
                    Ok(ProcessOutcome::Duplicate)
                }
            }
        }
    }

    /// Re-feed every account event the projection has not consumed yet.
    ///
    /// Used after a failed projection write; the account events stay stored,
    /// so nothing is re-emitted at the source.
    pub fn catch_up(
        &self,
        group: &GroupId,
        player: &PlayerId,
        month: &MonthLabel,
    ) -> Result<Vec<ProcessOutcome>, PointsProcessError> {
        let account_id = MonthlyAccount::stream_id(group, player, month);
        Ok(self
            .replay(account_id, group, player, month, None)?
            .into_iter()
            .map(|(_, outcome)| outcome)
            .collect())
    }

    /// Handle, in sequence order, every account event past the projection's
    /// cursor and up to `until` (the whole stream when `None`).
    ///
    /// Stops at the first failure; nothing after it is folded in.
    fn replay(
        &self,
        account_id: AggregateId,
        group: &GroupId,
        player: &PlayerId,
        month: &MonthLabel,
        until: Option<u64>,
    ) -> Result<Vec<(u64, ProcessOutcome)>, PointsProcessError> {
        let cursor = self.collection_or_empty(group, player, month)?.last_source_sequence();
        let stream = self
            .dispatcher
            .store()
            .load_stream(account_id)
            .map_err(DispatchError::from)?;

        let head = stream.last().map(|e| e.sequence_number).unwrap_or(0);
        let until = match until {
            Some(sequence) if sequence > head => {
                return Err(PointsProcessError::ConsistencyViolation {
                    account: account_id,
                    sequence,
                });
            }
            Some(sequence) => sequence,
            None => head,
        };

        let pending: Vec<&StoredEvent> = stream
            .iter()
            .filter(|e| e.sequence_number > cursor && e.sequence_number <= until)
            .collect();
        debug!(account_id = %account_id, cursor, until, pending = pending.len(), "replaying account");

        pending
            .into_iter()
            .map(|stored| {
                let event = decode(&stored.payload, account_id, stored.sequence_number)?;
                let outcome = self.handle_event(account_id, stored.sequence_number, &event)?;
                Ok((stored.sequence_number, outcome))
            })
            .collect()
    }

    /// The projection, if any points were ever recorded.
    pub fn collection(
        &self,
        group: &GroupId,
        player: &PlayerId,
        month: &MonthLabel,
    ) -> Result<Option<Collection>, PointsProcessError> {
        let loaded = self.dispatcher.load(Collection::stream_id(group, player, month), || {
            Collection::empty(group.clone(), player.clone(), month.clone())
        })?;
        Ok(loaded.map(|(collection, _)| collection))
    }

    /// Total points for the month; zero when nothing was recorded.
    pub fn total_points(
        &self,
        group: &GroupId,
        player: &PlayerId,
        month: &MonthLabel,
    ) -> Result<Decimal, PointsProcessError> {
        Ok(self
            .collection(group, player, month)?
            .map(|c| c.total_points())
            .unwrap_or(Decimal::ZERO))
    }

    /// Scored dates in processing order; empty when nothing was recorded.
    pub fn processed_dates(
        &self,
        group: &GroupId,
        player: &PlayerId,
        month: &MonthLabel,
    ) -> Result<Vec<NaiveDate>, PointsProcessError> {
        Ok(self
            .collection(group, player, month)?
            .map(|c| c.processed_dates().to_vec())
            .unwrap_or_default())
    }

    fn collection_or_empty(
        &self,
        group: &GroupId,
        player: &PlayerId,
        month: &MonthLabel,
    ) -> Result<Collection, PointsProcessError> {
        Ok(self
            .collection(group, player, month)?
            .unwrap_or_else(|| Collection::empty(group.clone(), player.clone(), month.clone())))
    }

    /// The account exactly as of `sequence`.
    fn source_account(
        &self,
        account_id: AggregateId,
        sequence: u64,
        group: &GroupId,
        player: &PlayerId,
        month: &MonthLabel,
    ) -> Result<MonthlyAccount, PointsProcessError> {
        let violation = PointsProcessError::ConsistencyViolation {
            account: account_id,
            sequence,
        };
        if MonthlyAccount::stream_id(group, player, month) != account_id {
            return Err(violation);
        }

        match self.dispatcher.load_until(account_id, sequence, || {
            MonthlyAccount::empty(group.clone(), player.clone(), month.clone())
        })? {
            Some((account, version)) if version == sequence && account.is_opened() => Ok(account),
            _ => Err(violation),
        }
    }

    /// Returns whether the collection accepted the command with a change.
    fn dispatch_collection(
        &self,
        cmd: &CollectionCommand,
        group: &GroupId,
        player: &PlayerId,
        month: &MonthLabel,
    ) -> Result<bool, PointsProcessError> {
        let committed = self.dispatcher.dispatch(Collection::AGGREGATE_TYPE, cmd, || {
            Collection::empty(group.clone(), player.clone(), month.clone())
        })?;
        Ok(!committed.is_empty())
    }
}

fn decode(
    payload: &JsonValue,
    account_id: AggregateId,
    sequence: u64,
) -> Result<MonthlyAccountEvent, PointsProcessError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| PointsProcessError::Deserialize(format!("{account_id} #{sequence}: {e}")))
}

fn account_keys(event: &MonthlyAccountEvent) -> (&GroupId, &PlayerId, &MonthLabel) {
    match event {
        MonthlyAccountEvent::MonthlyAccountCreated(e) => (&e.group, &e.player, &e.month),
        MonthlyAccountEvent::CollectionAdded(e) => (&e.group, &e.player, &e.month),
        MonthlyAccountEvent::CollectionUpdated(e) => (&e.group, &e.player, &e.month),
    }
}

fn warn_if_saturated(account_id: AggregateId, date: NaiveDate, score: &DayScore) {
    if score.saturated {
        warn!(
            account_id = %account_id,
            date = %date,
            actual = %score.actual,
            "points curve saturated at its ceiling"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use gamify_accounts::{AddCollection, AmendCollection, MonthlyAccountCommand};
    use gamify_events::InMemoryEventBus;

    use crate::event_store::InMemoryEventStore;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    struct Fixture {
        dispatcher: Arc<CommandDispatcher<InMemoryEventStore, Bus>>,
        process: PointsProcess<InMemoryEventStore, Bus>,
        group: GroupId,
        player: PlayerId,
        month: MonthLabel,
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn fixture() -> Fixture {
        let dispatcher = Arc::new(CommandDispatcher::new(
            InMemoryEventStore::new(),
            Arc::new(InMemoryEventBus::new()),
        ));
        Fixture {
            process: PointsProcess::new(Arc::clone(&dispatcher)),
            dispatcher,
            group: GroupId::new("g1").unwrap(),
            player: PlayerId::new("p1").unwrap(),
            month: MonthLabel::from_date(date(1)),
        }
    }

    impl Fixture {
        fn account(&self) -> MonthlyAccount {
            MonthlyAccount::empty(self.group.clone(), self.player.clone(), self.month.clone())
        }

        fn add(&self, day: u32, amount: Decimal, target: Decimal) -> Vec<StoredEvent> {
            let cmd = MonthlyAccountCommand::AddCollection(AddCollection {
                group: self.group.clone(),
                player: self.player.clone(),
                month: self.month.clone(),
                date: date(day),
                amount,
                target,
                occurred_at: Utc::now(),
            });
            self.dispatcher
                .dispatch(MonthlyAccount::AGGREGATE_TYPE, &cmd, || self.account())
                .unwrap()
        }

        fn amend(&self, day: u32, amount: Decimal, target: Decimal) -> Vec<StoredEvent> {
            let cmd = MonthlyAccountCommand::AmendCollection(AmendCollection {
                group: self.group.clone(),
                player: self.player.clone(),
                month: self.month.clone(),
                date: date(day),
                amount,
                target,
                occurred_at: Utc::now(),
            });
            self.dispatcher
                .dispatch(MonthlyAccount::AGGREGATE_TYPE, &cmd, || self.account())
                .unwrap()
        }

        fn feed(&self, events: &[StoredEvent]) -> Vec<ProcessOutcome> {
            events.iter().map(|e| self.process.handle_stored(e).unwrap()).collect()
        }

        fn total(&self) -> Decimal {
            self.process
                .total_points(&self.group, &self.player, &self.month)
                .unwrap()
        }
    }

    #[test]
    fn first_record_recalculates_and_skips_the_paired_add() {
        let f = fixture();
        let committed = f.add(5, dec!(500000), dec!(1000000));

        let outcomes = f.feed(&committed);

        assert_eq!(outcomes[0], ProcessOutcome::Ignored);
        assert!(matches!(outcomes[1], ProcessOutcome::Recalculated { .. }));
        assert_eq!(outcomes[2], ProcessOutcome::AlreadyProcessed { date: date(5) });

        let expected = score_day(date(5), dec!(500000), dec!(1000000), Default::default());
        assert_eq!(f.total(), expected.total);
    }

    #[test]
    fn unchanged_target_scores_incrementally() {
        let f = fixture();
        f.feed(&f.add(1, dec!(100), dec!(1000)));

        let outcomes = f.feed(&f.add(2, dec!(200), dec!(1000)));

        let day2 = score_day(date(2), dec!(200), dec!(1000), Default::default());
        assert_eq!(
            outcomes,
            vec![ProcessOutcome::Scored {
                date: date(2),
                total: day2.total
            }]
        );
        let day1 = recalculate(&[(date(1), dec!(100))].into(), dec!(1000));
        assert_eq!(f.total(), day1.total + day2.total);
    }

    #[test]
    fn amendment_overwrites_instead_of_accumulating() {
        let f = fixture();
        f.feed(&f.add(1, dec!(100), dec!(1000)));
        f.feed(&f.add(2, dec!(200), dec!(1000)));

        f.feed(&f.amend(2, dec!(50), dec!(1000)));

        let fresh = recalculate(
            &[(date(1), dec!(100)), (date(2), dec!(50))].into(),
            dec!(1000),
        );
        assert_eq!(f.total(), fresh.total);
        assert_eq!(
            f.process.processed_dates(&f.group, &f.player, &f.month).unwrap(),
            vec![date(1), date(2)]
        );
    }

    #[test]
    fn redelivery_changes_nothing() {
        let f = fixture();
        let first = f.add(1, dec!(100), dec!(1000));
        f.feed(&first);
        let second = f.add(2, dec!(100), dec!(1000));
        f.feed(&second);
        let total = f.total();

        let outcomes = f.feed(&second);

        assert_eq!(outcomes, vec![ProcessOutcome::Duplicate]);
        assert_eq!(f.total(), total);
    }

    #[test]
    fn catch_up_replays_what_was_missed() {
        let f = fixture();
        f.add(1, dec!(100), dec!(1000));
        f.add(2, dec!(100), dec!(1000));

        let outcomes = f.process.catch_up(&f.group, &f.player, &f.month).unwrap();

        assert!(outcomes.iter().any(|o| matches!(o, ProcessOutcome::Scored { .. })));
        assert!(f.total() > Decimal::ZERO);
        assert!(f.process.catch_up(&f.group, &f.player, &f.month).unwrap().iter().all(|o| {
            matches!(o, ProcessOutcome::Duplicate | ProcessOutcome::AlreadyProcessed { .. })
        }));
    }

    #[test]
    fn skipped_delivery_is_folded_in_before_the_next_one() {
        let f = fixture();
        f.feed(&f.add(1, dec!(100), dec!(1000)));
        let _lost = f.add(2, dec!(200), dec!(1000));
        let next = f.add(3, dec!(300), dec!(1000));

        let outcomes = f.feed(&next);

        let day3 = score_day(date(3), dec!(300), dec!(1000), Default::default());
        assert_eq!(
            outcomes,
            vec![ProcessOutcome::Scored {
                date: date(3),
                total: day3.total
            }]
        );
        assert_eq!(
            f.process.processed_dates(&f.group, &f.player, &f.month).unwrap(),
            vec![date(1), date(2), date(3)]
        );
        let day1 = recalculate(&[(date(1), dec!(100))].into(), dec!(1000));
        let day2 = score_day(date(2), dec!(200), dec!(1000), Default::default());
        assert_eq!(f.total(), day1.total + day2.total + day3.total);
    }

    #[test]
    fn missing_source_account_is_a_consistency_violation() {
        let f = fixture();
        let committed = f.add(1, dec!(100), dec!(1000));

        // Same payload, but claimed to come from a sequence the stream never reached.
        let mut forged = committed[2].clone();
        forged.sequence_number = 99;

        let err = f.process.handle_stored(&forged).unwrap_err();
        assert!(matches!(err, PointsProcessError::ConsistencyViolation { sequence: 99, .. }));
    }

    #[test]
    fn absent_projection_queries_default_to_zero() {
        let f = fixture();

        assert_eq!(f.total(), Decimal::ZERO);
        assert!(
            f.process
                .processed_dates(&f.group, &f.player, &f.month)
                .unwrap()
                .is_empty()
        );
    }
}
