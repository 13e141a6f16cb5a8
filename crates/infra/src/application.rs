//! Application service: the command and query surface of the gamification core.
//!
//! One `Gamification` is built per process with an injected store, bus and
//! configuration, then shared by reference. Account commands go through the
//! dispatcher; the points process runs inline right after, over everything the
//! projection has not consumed yet.
//!
//! ## Projection Failures
//!
//! Once the account events are committed the command has succeeded, whatever
//! happens to the projection. A failed projection step is logged and left in
//! the log; the next command on the same account (or `catch_up`) replays it.
//! A repeated `record_collection` adds to the stored amount, so a committed
//! command is never reported as failed.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use gamify_accounts::{
    AddCollection, AddPlayer, AmendCollection, CreatePlayer, GroupUserRegistry, ImportRoster,
    MonthlyAccount, MonthlyAccountCommand, MonthlyAccountEvent, Player, PlayerCommand,
    PlayerRegistry, RegistryCommand, RosterCommand, RosterSnapshot,
};
use gamify_core::{AggregateId, DistrictId, DomainError, GroupId, MonthLabel, PlayerId};
use gamify_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::config::GamifyConfig;
use crate::event_store::{EventStore, StoredEvent};
use crate::processes::{PointsProcess, PointsProcessError, ProcessOutcome};

/// Error category a caller can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, rejected before any event was produced.
    Validation,
    /// A referenced player, account or date does not exist.
    NotFound,
    /// A write race that outlived every retry; safe to resubmit.
    VersionConflict,
    /// Stored state contradicts itself; needs an operator.
    ConsistencyViolation,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("player {group}/{player} is not registered")]
    PlayerNotRegistered { group: GroupId, player: PlayerId },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Dispatch(DispatchError),

    #[error("points projection failed: {0}")]
    Points(#[from] PointsProcessError),
}

impl From<DispatchError> for ApplicationError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Domain(e) => ApplicationError::Domain(e),
            other => ApplicationError::Dispatch(other),
        }
    }
}

impl ApplicationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApplicationError::PlayerNotRegistered { .. } => ErrorKind::NotFound,
            ApplicationError::Domain(e) => domain_kind(e),
            ApplicationError::Dispatch(e) => dispatch_kind(e),
            ApplicationError::Points(e) => match e {
                PointsProcessError::ConsistencyViolation { .. } => ErrorKind::ConsistencyViolation,
                PointsProcessError::Deserialize(_) => ErrorKind::Infrastructure,
                PointsProcessError::Dispatch(d) => dispatch_kind(d),
            },
        }
    }
}

fn domain_kind(e: &DomainError) -> ErrorKind {
    match e {
        DomainError::Validation(_)
        | DomainError::InvalidTarget(_)
        | DomainError::InvalidId(_)
        | DomainError::Conflict(_) => ErrorKind::Validation,
        DomainError::NotFound(_) | DomainError::DateNotFound(_) => ErrorKind::NotFound,
        DomainError::InvariantViolation(_) => ErrorKind::ConsistencyViolation,
    }
}

fn dispatch_kind(e: &DispatchError) -> ErrorKind {
    match e {
        DispatchError::Concurrency(_) => ErrorKind::VersionConflict,
        DispatchError::Domain(d) => domain_kind(d),
        DispatchError::InvalidStream(_) => ErrorKind::ConsistencyViolation,
        DispatchError::Deserialize(_) | DispatchError::Store(_) => ErrorKind::Infrastructure,
    }
}

/// Raw monthly data for report rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyRawData {
    pub daily_collection: BTreeMap<NaiveDate, Decimal>,
    pub daily_target_history: BTreeMap<NaiveDate, Decimal>,
    pub collection_history: BTreeMap<NaiveDate, Vec<Decimal>>,
    pub processed_dates: Vec<NaiveDate>,
    pub balance: Decimal,
    pub target: Decimal,
}

#[derive(Debug)]
pub struct Gamification<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    points: PointsProcess<S, B>,
    registry_name: String,
}

impl<S, B> Gamification<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: S, bus: B, config: &GamifyConfig) -> Self {
        let dispatcher = Arc::new(
            CommandDispatcher::new(store, bus).with_max_conflict_retries(config.max_conflict_retries),
        );
        Self {
            points: PointsProcess::new(Arc::clone(&dispatcher)),
            dispatcher,
            registry_name: config.registry_name.clone(),
        }
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher<S, B>> {
        &self.dispatcher
    }

    /// The points process, e.g. to feed it from a `ProcessWorker`.
    pub fn points_process(&self) -> &PointsProcess<S, B> {
        &self.points
    }

    /// Get-or-create the player and make sure the registry lists it.
    #[instrument(skip(self), fields(group = %group, player = %player), err)]
    pub fn register_player(
        &self,
        group: &GroupId,
        player: &PlayerId,
    ) -> Result<AggregateId, ApplicationError> {
        let player_id = Player::stream_id(group, player);

        if !self.player_exists(group, player)? {
            let cmd = PlayerCommand::CreatePlayer(CreatePlayer {
                group: group.clone(),
                player: player.clone(),
                occurred_at: Utc::now(),
            });
            match self.dispatcher.dispatch(Player::AGGREGATE_TYPE, &cmd, || {
                Player::empty(group.clone(), player.clone())
            }) {
                Ok(_) => info!(player_id = %player_id, "player created"),
                // Lost a creation race: the player exists, which is all we need.
                Err(DispatchError::Domain(DomainError::Conflict(_))) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let cmd = RegistryCommand::AddPlayer(AddPlayer {
            registry: self.registry_name.clone(),
            group: group.clone(),
            player: player.clone(),
            occurred_at: Utc::now(),
        });
        let added = self.dispatcher.dispatch(PlayerRegistry::AGGREGATE_TYPE, &cmd, || {
            PlayerRegistry::empty(self.registry_name.clone())
        })?;
        if !added.is_empty() {
            info!(player_id = %player_id, registry = %self.registry_name, "player registered");
        }

        Ok(player_id)
    }

    /// Record the amount collected on `date` against `target`.
    ///
    /// A repeated record for the same date adds to the stored amount.
    #[instrument(skip(self), fields(group = %group, player = %player, date = %date), err)]
    pub fn record_collection(
        &self,
        group: &GroupId,
        player: &PlayerId,
        date: NaiveDate,
        amount: Decimal,
        target: Decimal,
    ) -> Result<(), ApplicationError> {
        if !self.player_exists(group, player)? {
            return Err(ApplicationError::PlayerNotRegistered {
                group: group.clone(),
                player: player.clone(),
            });
        }

        let month = MonthLabel::from_date(date);
        let cmd = MonthlyAccountCommand::AddCollection(AddCollection {
            group: group.clone(),
            player: player.clone(),
            month: month.clone(),
            date,
            amount,
            target,
            occurred_at: Utc::now(),
        });
        let committed = self.dispatch_account(&cmd, group, player, &month)?;
        debug!(events = committed.len(), "collection recorded");

        self.project(group, player, &month);
        Ok(())
    }

    /// Overwrite the amount stored for `date`; returns the value it replaced.
    #[instrument(skip(self), fields(group = %group, player = %player, date = %date), err)]
    pub fn amend_collection(
        &self,
        group: &GroupId,
        player: &PlayerId,
        date: NaiveDate,
        amount: Decimal,
        target: Decimal,
    ) -> Result<Decimal, ApplicationError> {
        let month = MonthLabel::from_date(date);
        let cmd = MonthlyAccountCommand::AmendCollection(AmendCollection {
            group: group.clone(),
            player: player.clone(),
            month: month.clone(),
            date,
            amount,
            target,
            occurred_at: Utc::now(),
        });
        let committed = self.dispatch_account(&cmd, group, player, &month)?;
        let previous = previous_amount(&committed)?;
        info!(previous = %previous, amount = %amount, "collection amended");

        self.project(group, player, &month);
        Ok(previous)
    }

    /// Re-run the points process over account events it has not consumed.
    pub fn catch_up(
        &self,
        group: &GroupId,
        player: &PlayerId,
        month: &MonthLabel,
    ) -> Result<Vec<ProcessOutcome>, ApplicationError> {
        Ok(self.points.catch_up(group, player, month)?)
    }

    /// Total points for the month; zero when nothing was recorded.
    pub fn monthly_points(
        &self,
        group: &GroupId,
        player: &PlayerId,
        month: &MonthLabel,
    ) -> Result<Decimal, ApplicationError> {
        Ok(self.points.total_points(group, player, month)?)
    }

    pub fn processed_dates(
        &self,
        group: &GroupId,
        player: &PlayerId,
        month: &MonthLabel,
    ) -> Result<Vec<NaiveDate>, ApplicationError> {
        Ok(self.points.processed_dates(group, player, month)?)
    }

    /// `None` when the account was never opened.
    pub fn monthly_raw_data(
        &self,
        group: &GroupId,
        player: &PlayerId,
        month: &MonthLabel,
    ) -> Result<Option<MonthlyRawData>, ApplicationError> {
        let Some((account, _)) = self.dispatcher.load(
            MonthlyAccount::stream_id(group, player, month),
            || MonthlyAccount::empty(group.clone(), player.clone(), month.clone()),
        )?
        else {
            return Ok(None);
        };

        Ok(Some(MonthlyRawData {
            daily_collection: account.daily_collection().clone(),
            daily_target_history: account.target_history().clone(),
            collection_history: account.collection_history().clone(),
            processed_dates: self.points.processed_dates(group, player, month)?,
            balance: account.balance(),
            target: account.daily_target(),
        }))
    }

    /// Every registered `(group, player)`, in identity order.
    pub fn list_registered_players(&self) -> Result<Vec<(GroupId, PlayerId)>, ApplicationError> {
        Ok(self
            .registry()?
            .map(|registry| {
                registry
                    .members()
                    .map(|(_, m)| (m.group.clone(), m.player.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Natural key of a registered player identity.
    pub fn registered_player(
        &self,
        player_id: &AggregateId,
    ) -> Result<Option<(GroupId, PlayerId)>, ApplicationError> {
        Ok(self.registry()?.and_then(|registry| {
            registry
                .members()
                .find(|(id, _)| *id == player_id)
                .map(|(_, m)| (m.group.clone(), m.player.clone()))
        }))
    }

    /// Store an already-fetched roster and register every player in it.
    ///
    /// Returns the number of `(group, player)` pairs registered.
    #[instrument(skip(self, roster), fields(groups = roster.len()), err)]
    pub fn import_roster(&self, roster: RosterSnapshot) -> Result<usize, ApplicationError> {
        let cmd = RosterCommand::ImportRoster(ImportRoster {
            groups: roster.clone(),
            occurred_at: Utc::now(),
        });
        self.dispatcher
            .dispatch(GroupUserRegistry::AGGREGATE_TYPE, &cmd, GroupUserRegistry::empty)?;

        let mut registered = 0;
        for (group, players) in &roster {
            for player in players.keys() {
                self.register_player(group, player)?;
                registered += 1;
            }
        }

        info!(registered, "roster imported");
        Ok(registered)
    }

    /// Visit every `(group, player, district)` in the stored roster.
    pub fn for_each_roster_player(
        &self,
        f: impl FnMut(&GroupId, &PlayerId, &DistrictId),
    ) -> Result<(), ApplicationError> {
        if let Some((roster, _)) = self
            .dispatcher
            .load(GroupUserRegistry::stream_id(), GroupUserRegistry::empty)?
        {
            roster.for_each_player(f);
        }
        Ok(())
    }

    /// Run the points process after a committed account command.
    fn project(&self, group: &GroupId, player: &PlayerId, month: &MonthLabel) {
        if let Err(e) = self.points.catch_up(group, player, month) {
            warn!(
                group = %group,
                player = %player,
                month = %month,
                error = %e,
                "points projection failed; account events kept for catch_up"
            );
        }
    }

    fn registry(&self) -> Result<Option<PlayerRegistry>, ApplicationError> {
        let loaded = self.dispatcher.load(PlayerRegistry::stream_id(&self.registry_name), || {
            PlayerRegistry::empty(self.registry_name.clone())
        })?;
        Ok(loaded.map(|(registry, _)| registry))
    }

    fn player_exists(&self, group: &GroupId, player: &PlayerId) -> Result<bool, ApplicationError> {
        let loaded = self.dispatcher.load(Player::stream_id(group, player), || {
            Player::empty(group.clone(), player.clone())
        })?;
        Ok(loaded.is_some_and(|(p, _)| p.is_created()))
    }

    fn dispatch_account(
        &self,
        cmd: &MonthlyAccountCommand,
        group: &GroupId,
        player: &PlayerId,
        month: &MonthLabel,
    ) -> Result<Vec<StoredEvent>, ApplicationError> {
        Ok(self.dispatcher.dispatch(MonthlyAccount::AGGREGATE_TYPE, cmd, || {
            MonthlyAccount::empty(group.clone(), player.clone(), month.clone())
        })?)
    }
}

fn previous_amount(committed: &[StoredEvent]) -> Result<Decimal, ApplicationError> {
    for stored in committed {
        if let Ok(MonthlyAccountEvent::CollectionUpdated(e)) =
            serde_json::from_value::<MonthlyAccountEvent>(stored.payload.clone())
        {
            if let Some(previous) = e.previous_amount {
                return Ok(previous);
            }
        }
    }
    Err(DomainError::invariant("amendment committed without its previous amount").into())
}
