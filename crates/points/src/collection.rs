use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gamify_core::{Aggregate, AggregateId, AggregateRoot, DomainError, GroupId, MonthLabel, PlayerId};
use gamify_events::{Command, Event};

use crate::algorithm::{BonusCarry, DayScore};

/// Aggregate root: Collection (points projection).
///
/// One instance per (group, player, month), written only by the points
/// process. Created implicitly by its first event.
///
/// Invariant: `total_points == actual_points + bonus_points`.
///
/// `last_source_sequence` is the highest account-stream sequence already
/// folded in. It travels inside every event so the points change and the
/// consumption cursor commit together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    id: AggregateId,
    group: GroupId,
    player: PlayerId,
    month: MonthLabel,
    total_points: Decimal,
    actual_points: Decimal,
    bonus_points: Decimal,
    processed_dates: Vec<NaiveDate>,
    carry: BonusCarry,
    last_source_sequence: u64,
    version: u64,
}

impl Collection {
    pub const AGGREGATE_TYPE: &'static str = "points.collection";

    pub fn stream_id(group: &GroupId, player: &PlayerId, month: &MonthLabel) -> AggregateId {
        AggregateId::from_natural_key(&format!("/collection/{group}/{player}/{month}"))
    }

    pub fn empty(group: GroupId, player: PlayerId, month: MonthLabel) -> Self {
        Self {
            id: Self::stream_id(&group, &player, &month),
            group,
            player,
            month,
            total_points: Decimal::ZERO,
            actual_points: Decimal::ZERO,
            bonus_points: Decimal::ZERO,
            processed_dates: Vec::new(),
            carry: BonusCarry::default(),
            last_source_sequence: 0,
            version: 0,
        }
    }

    pub fn total_points(&self) -> Decimal {
        self.total_points
    }

    pub fn actual_points(&self) -> Decimal {
        self.actual_points
    }

    pub fn bonus_points(&self) -> Decimal {
        self.bonus_points
    }

    /// Dates contributing to the totals, in processing order.
    pub fn processed_dates(&self) -> &[NaiveDate] {
        &self.processed_dates
    }

    pub fn is_processed(&self, date: NaiveDate) -> bool {
        self.processed_dates.contains(&date)
    }

    pub fn carry(&self) -> BonusCarry {
        self.carry
    }

    pub fn last_source_sequence(&self) -> u64 {
        self.last_source_sequence
    }

    /// Whether the account event at `sequence` has already been folded in.
    pub fn has_consumed(&self, sequence: u64) -> bool {
        sequence <= self.last_source_sequence
    }
}

impl AggregateRoot for Collection {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: AddPoints (first scoring of a date; accumulates).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPoints {
    pub group: GroupId,
    pub player: PlayerId,
    pub month: MonthLabel,
    pub date: NaiveDate,
    pub score: DayScore,
    pub source_sequence: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: OverwritePoints (result of a full recalculation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverwritePoints {
    pub group: GroupId,
    pub player: PlayerId,
    pub month: MonthLabel,
    pub date: NaiveDate,
    pub score: DayScore,
    pub source_sequence: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionCommand {
    AddPoints(AddPoints),
    OverwritePoints(OverwritePoints),
}

impl CollectionCommand {
    fn keys(&self) -> (&GroupId, &PlayerId, &MonthLabel) {
        match self {
            CollectionCommand::AddPoints(c) => (&c.group, &c.player, &c.month),
            CollectionCommand::OverwritePoints(c) => (&c.group, &c.player, &c.month),
        }
    }

    fn score(&self) -> &DayScore {
        match self {
            CollectionCommand::AddPoints(c) => &c.score,
            CollectionCommand::OverwritePoints(c) => &c.score,
        }
    }

    fn source_sequence(&self) -> u64 {
        match self {
            CollectionCommand::AddPoints(c) => c.source_sequence,
            CollectionCommand::OverwritePoints(c) => c.source_sequence,
        }
    }
}

impl Command for CollectionCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        let (group, player, month) = self.keys();
        Collection::stream_id(group, player, month)
    }
}

/// Event: PointsAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsAdded {
    pub group: GroupId,
    pub player: PlayerId,
    pub month: MonthLabel,
    pub date: NaiveDate,
    pub total_points: Decimal,
    pub actual_points: Decimal,
    pub bonus_points: Decimal,
    pub carry: BonusCarry,
    pub source_sequence: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PointsUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsUpdated {
    pub group: GroupId,
    pub player: PlayerId,
    pub month: MonthLabel,
    pub date: NaiveDate,
    pub total_points: Decimal,
    pub actual_points: Decimal,
    pub bonus_points: Decimal,
    pub carry: BonusCarry,
    pub source_sequence: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionEvent {
    PointsAdded(PointsAdded),
    PointsUpdated(PointsUpdated),
}

impl Event for CollectionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CollectionEvent::PointsAdded(_) => "points.collection.points_added",
            CollectionEvent::PointsUpdated(_) => "points.collection.points_updated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CollectionEvent::PointsAdded(e) => e.occurred_at,
            CollectionEvent::PointsUpdated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Collection {
    type Command = CollectionCommand;
    type Event = CollectionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CollectionEvent::PointsAdded(e) => {
                self.processed_dates.push(e.date);
                self.total_points += e.total_points;
                self.actual_points += e.actual_points;
                self.bonus_points += e.bonus_points;
                self.carry = e.carry;
                self.last_source_sequence = e.source_sequence;
            }
            CollectionEvent::PointsUpdated(e) => {
                if !self.processed_dates.contains(&e.date) {
                    self.processed_dates.push(e.date);
                }
                self.total_points = e.total_points;
                self.actual_points = e.actual_points;
                self.bonus_points = e.bonus_points;
                self.carry = e.carry;
                self.last_source_sequence = e.source_sequence;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let (group, player, month) = command.keys();
        if *group != self.group || *player != self.player || *month != self.month {
            return Err(DomainError::invariant("collection key mismatch"));
        }

        // Redelivered source event.
        if self.has_consumed(command.source_sequence()) {
            return Ok(vec![]);
        }

        let score = command.score();
        if score.total != score.actual + score.bonus {
            return Err(DomainError::invariant(format!(
                "total {} != actual {} + bonus {}",
                score.total, score.actual, score.bonus
            )));
        }

        match command {
            CollectionCommand::AddPoints(cmd) => {
                if self.is_processed(cmd.date) {
                    return Ok(vec![]);
                }
                Ok(vec![CollectionEvent::PointsAdded(PointsAdded {
                    group: cmd.group.clone(),
                    player: cmd.player.clone(),
                    month: cmd.month.clone(),
                    date: cmd.date,
                    total_points: score.total,
                    actual_points: score.actual,
                    bonus_points: score.bonus,
                    carry: score.carry,
                    source_sequence: cmd.source_sequence,
                    occurred_at: cmd.occurred_at,
                })])
            }
            CollectionCommand::OverwritePoints(cmd) => {
                Ok(vec![CollectionEvent::PointsUpdated(PointsUpdated {
                    group: cmd.group.clone(),
                    player: cmd.player.clone(),
                    month: cmd.month.clone(),
                    date: cmd.date,
                    total_points: score.total,
                    actual_points: score.actual,
                    bonus_points: score.bonus,
                    carry: score.carry,
                    source_sequence: cmd.source_sequence,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}
