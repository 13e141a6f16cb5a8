use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gamify_core::{Aggregate, AggregateId, AggregateRoot, DomainError, GroupId, MonthLabel, PlayerId};
use gamify_events::{Command, Event};

/// Aggregate root: MonthlyAccount.
///
/// One instance per (group, player, month). Owns the raw daily collection
/// values and the current daily target.
///
/// Invariant: `balance == Σ daily_collection.values()` after every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthlyAccount {
    id: AggregateId,
    group: GroupId,
    player: PlayerId,
    month: MonthLabel,
    daily_collection: BTreeMap<NaiveDate, Decimal>,
    daily_target: Decimal,
    target_history: BTreeMap<NaiveDate, Decimal>,
    collection_history: BTreeMap<NaiveDate, Vec<Decimal>>,
    balance: Decimal,
    version: u64,
    opened: bool,
}

impl MonthlyAccount {
    pub const AGGREGATE_TYPE: &'static str = "account.monthly";

    pub fn stream_id(group: &GroupId, player: &PlayerId, month: &MonthLabel) -> AggregateId {
        AggregateId::from_natural_key(&format!("/MonthlyAccount/{group}/{player}/{month}"))
    }

    /// Create an empty, not-yet-opened aggregate instance for rehydration.
    pub fn empty(group: GroupId, player: PlayerId, month: MonthLabel) -> Self {
        Self {
            id: Self::stream_id(&group, &player, &month),
            group,
            player,
            month,
            daily_collection: BTreeMap::new(),
            daily_target: Decimal::ZERO,
            target_history: BTreeMap::new(),
            collection_history: BTreeMap::new(),
            balance: Decimal::ZERO,
            version: 0,
            opened: false,
        }
    }

    pub fn group(&self) -> &GroupId {
        &self.group
    }

    pub fn player(&self) -> &PlayerId {
        &self.player
    }

    pub fn month(&self) -> &MonthLabel {
        &self.month
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn daily_target(&self) -> Decimal {
        self.daily_target
    }

    /// Recorded values in ascending date order.
    pub fn daily_collection(&self) -> &BTreeMap<NaiveDate, Decimal> {
        &self.daily_collection
    }

    pub fn target_history(&self) -> &BTreeMap<NaiveDate, Decimal> {
        &self.target_history
    }

    /// Every value ever recorded per date, oldest first.
    pub fn collection_history(&self) -> &BTreeMap<NaiveDate, Vec<Decimal>> {
        &self.collection_history
    }

    pub fn collection_on(&self, date: NaiveDate) -> Option<Decimal> {
        self.daily_collection.get(&date).copied()
    }

    fn resum_balance(&mut self) {
        self.balance = self.daily_collection.values().copied().sum();
    }
}

impl AggregateRoot for MonthlyAccount {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenAccount (get-or-create; no-op when already open).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAccount {
    pub group: GroupId,
    pub player: PlayerId,
    pub month: MonthLabel,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddCollection.
///
/// Adds `amount` on top of whatever is already recorded for `date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddCollection {
    pub group: GroupId,
    pub player: PlayerId,
    pub month: MonthLabel,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub target: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AmendCollection (overwrite an existing date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmendCollection {
    pub group: GroupId,
    pub player: PlayerId,
    pub month: MonthLabel,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub target: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonthlyAccountCommand {
    OpenAccount(OpenAccount),
    AddCollection(AddCollection),
    AmendCollection(AmendCollection),
}

impl MonthlyAccountCommand {
    fn keys(&self) -> (&GroupId, &PlayerId, &MonthLabel) {
        match self {
            MonthlyAccountCommand::OpenAccount(c) => (&c.group, &c.player, &c.month),
            MonthlyAccountCommand::AddCollection(c) => (&c.group, &c.player, &c.month),
            MonthlyAccountCommand::AmendCollection(c) => (&c.group, &c.player, &c.month),
        }
    }
}

impl Command for MonthlyAccountCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        let (group, player, month) = self.keys();
        MonthlyAccount::stream_id(group, player, month)
    }
}

/// Event: MonthlyAccountCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyAccountCreated {
    pub group: GroupId,
    pub player: PlayerId,
    pub month: MonthLabel,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CollectionAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionAdded {
    pub group: GroupId,
    pub player: PlayerId,
    pub month: MonthLabel,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub target: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Why a `CollectionUpdated` was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateReason {
    /// A new target arrived with an `AddCollection`; the amount travels in the
    /// `CollectionAdded` that follows.
    TargetChanged,
    /// The value for an existing date was overwritten.
    Amended,
}

/// Event: CollectionUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionUpdated {
    pub group: GroupId,
    pub player: PlayerId,
    pub month: MonthLabel,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub target: Decimal,
    pub reason: UpdateReason,
    /// Value recorded for `date` before this event, if any.
    pub previous_amount: Option<Decimal>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonthlyAccountEvent {
    MonthlyAccountCreated(MonthlyAccountCreated),
    CollectionAdded(CollectionAdded),
    CollectionUpdated(CollectionUpdated),
}

impl Event for MonthlyAccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            MonthlyAccountEvent::MonthlyAccountCreated(_) => "account.monthly.created",
            MonthlyAccountEvent::CollectionAdded(_) => "account.monthly.collection_added",
            MonthlyAccountEvent::CollectionUpdated(_) => "account.monthly.collection_updated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            MonthlyAccountEvent::MonthlyAccountCreated(e) => e.occurred_at,
            MonthlyAccountEvent::CollectionAdded(e) => e.occurred_at,
            MonthlyAccountEvent::CollectionUpdated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for MonthlyAccount {
    type Command = MonthlyAccountCommand;
    type Event = MonthlyAccountEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            MonthlyAccountEvent::MonthlyAccountCreated(e) => {
                self.group = e.group.clone();
                self.player = e.player.clone();
                self.month = e.month.clone();
                self.opened = true;
            }
            MonthlyAccountEvent::CollectionAdded(e) => {
                *self.daily_collection.entry(e.date).or_insert(Decimal::ZERO) += e.amount;
                self.collection_history
                    .entry(e.date)
                    .or_default()
                    .push(e.amount);
                self.daily_target = e.target;
                self.resum_balance();
            }
            MonthlyAccountEvent::CollectionUpdated(e) => {
                if e.reason == UpdateReason::Amended {
                    self.daily_collection.insert(e.date, e.amount);
                    self.collection_history
                        .entry(e.date)
                        .or_default()
                        .push(e.amount);
                    self.resum_balance();
                }
                self.daily_target = e.target;
                self.target_history.insert(e.date, e.target);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let (group, player, month) = command.keys();
        if *group != self.group || *player != self.player || *month != self.month {
            return Err(DomainError::invariant("monthly account key mismatch"));
        }

        match command {
            MonthlyAccountCommand::OpenAccount(cmd) => Ok(self.open_if_needed(cmd.occurred_at)),
            MonthlyAccountCommand::AddCollection(cmd) => self.handle_add(cmd),
            MonthlyAccountCommand::AmendCollection(cmd) => self.handle_amend(cmd),
        }
    }
}

impl MonthlyAccount {
    fn open_if_needed(&self, occurred_at: DateTime<Utc>) -> Vec<MonthlyAccountEvent> {
        if self.opened {
            return vec![];
        }
        vec![MonthlyAccountEvent::MonthlyAccountCreated(MonthlyAccountCreated {
            group: self.group.clone(),
            player: self.player.clone(),
            month: self.month.clone(),
            occurred_at,
        })]
    }

    fn validate_entry(&self, date: NaiveDate, amount: Decimal, target: Decimal) -> Result<(), DomainError> {
        if target < Decimal::ZERO {
            return Err(DomainError::invalid_target(format!("target must be >= 0, got {target}")));
        }
        if amount < Decimal::ZERO {
            return Err(DomainError::validation(format!("amount must be >= 0, got {amount}")));
        }
        if !self.month.contains(date) {
            return Err(DomainError::validation(format!(
                "{date} is outside month {}",
                self.month
            )));
        }
        Ok(())
    }

    fn handle_add(&self, cmd: &AddCollection) -> Result<Vec<MonthlyAccountEvent>, DomainError> {
        self.validate_entry(cmd.date, cmd.amount, cmd.target)?;

        let mut events = self.open_if_needed(cmd.occurred_at);

        if cmd.target != self.daily_target {
            events.push(MonthlyAccountEvent::CollectionUpdated(CollectionUpdated {
                group: self.group.clone(),
                player: self.player.clone(),
                month: self.month.clone(),
                date: cmd.date,
                amount: cmd.amount,
                target: cmd.target,
                reason: UpdateReason::TargetChanged,
                previous_amount: self.collection_on(cmd.date),
                occurred_at: cmd.occurred_at,
            }));
        }

        events.push(MonthlyAccountEvent::CollectionAdded(CollectionAdded {
            group: self.group.clone(),
            player: self.player.clone(),
            month: self.month.clone(),
            date: cmd.date,
            amount: cmd.amount,
            target: cmd.target,
            occurred_at: cmd.occurred_at,
        }));

        Ok(events)
    }

    fn handle_amend(&self, cmd: &AmendCollection) -> Result<Vec<MonthlyAccountEvent>, DomainError> {
        self.validate_entry(cmd.date, cmd.amount, cmd.target)?;

        let previous = self
            .collection_on(cmd.date)
            .ok_or(DomainError::DateNotFound(cmd.date))?;

        Ok(vec![MonthlyAccountEvent::CollectionUpdated(CollectionUpdated {
            group: self.group.clone(),
            player: self.player.clone(),
            month: self.month.clone(),
            date: cmd.date,
            amount: cmd.amount,
            target: cmd.target,
            reason: UpdateReason::Amended,
            previous_amount: Some(previous),
            occurred_at: cmd.occurred_at,
        })])
    }
}
