//! Group → player → district roster (`GroupUserRegistry`).
//!
//! The roster is fetched from an external directory by a collaborator outside
//! this crate. Here it is only captured (one bulk snapshot) and then extended
//! pair by pair; nothing is ever removed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gamify_core::{Aggregate, AggregateId, AggregateRoot, DistrictId, DomainError, GroupId, PlayerId};
use gamify_events::{Command, Event};

/// group → (player → district)
pub type RosterSnapshot = BTreeMap<GroupId, BTreeMap<PlayerId, DistrictId>>;

/// Aggregate root: GroupUserRegistry (singleton).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupUserRegistry {
    id: AggregateId,
    groups: RosterSnapshot,
    version: u64,
    captured: bool,
}

impl Default for GroupUserRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

impl GroupUserRegistry {
    pub const AGGREGATE_TYPE: &'static str = "account.group_user_registry";

    pub fn stream_id() -> AggregateId {
        AggregateId::from_natural_key("/groupuserregistry/")
    }

    pub fn empty() -> Self {
        Self {
            id: Self::stream_id(),
            groups: BTreeMap::new(),
            version: 0,
            captured: false,
        }
    }

    pub fn is_captured(&self) -> bool {
        self.captured
    }

    pub fn groups(&self) -> &RosterSnapshot {
        &self.groups
    }

    pub fn district_of(&self, group: &GroupId, player: &PlayerId) -> Option<&DistrictId> {
        self.groups.get(group).and_then(|players| players.get(player))
    }

    /// Visit every (group, player, district) triple in key order.
    pub fn for_each_player(&self, mut f: impl FnMut(&GroupId, &PlayerId, &DistrictId)) {
        for (group, players) in &self.groups {
            for (player, district) in players {
                f(group, player, district);
            }
        }
    }
}

impl AggregateRoot for GroupUserRegistry {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ImportRoster.
///
/// The first import captures the whole snapshot; later imports only append
/// pairs that are not known yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRoster {
    pub groups: RosterSnapshot,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddGroupUser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddGroupUser {
    pub group: GroupId,
    pub player: PlayerId,
    pub district: DistrictId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RosterCommand {
    ImportRoster(ImportRoster),
    AddGroupUser(AddGroupUser),
}

impl Command for RosterCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        GroupUserRegistry::stream_id()
    }
}

/// Event: RosterCaptured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterCaptured {
    pub groups: RosterSnapshot,
    pub occurred_at: DateTime<Utc>,
}

/// Event: GroupUserAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupUserAdded {
    pub group: GroupId,
    pub player: PlayerId,
    pub district: DistrictId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RosterEvent {
    RosterCaptured(RosterCaptured),
    GroupUserAdded(GroupUserAdded),
}

impl Event for RosterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RosterEvent::RosterCaptured(_) => "account.group_user_registry.captured",
            RosterEvent::GroupUserAdded(_) => "account.group_user_registry.user_added",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RosterEvent::RosterCaptured(e) => e.occurred_at,
            RosterEvent::GroupUserAdded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for GroupUserRegistry {
    type Command = RosterCommand;
    type Event = RosterEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RosterEvent::RosterCaptured(e) => {
                self.groups = e.groups.clone();
                self.captured = true;
            }
            RosterEvent::GroupUserAdded(e) => {
                self.groups
                    .entry(e.group.clone())
                    .or_default()
                    .insert(e.player.clone(), e.district.clone());
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RosterCommand::ImportRoster(cmd) => Ok(self.handle_import(cmd)),
            RosterCommand::AddGroupUser(cmd) => self.handle_add(cmd),
        }
    }
}

impl GroupUserRegistry {
    fn handle_import(&self, cmd: &ImportRoster) -> Vec<RosterEvent> {
        if !self.captured {
            return vec![RosterEvent::RosterCaptured(RosterCaptured {
                groups: cmd.groups.clone(),
                occurred_at: cmd.occurred_at,
            })];
        }

        let mut events = Vec::new();
        for (group, players) in &cmd.groups {
            for (player, district) in players {
                if self.district_of(group, player).is_none() {
                    events.push(RosterEvent::GroupUserAdded(GroupUserAdded {
                        group: group.clone(),
                        player: player.clone(),
                        district: district.clone(),
                        occurred_at: cmd.occurred_at,
                    }));
                }
            }
        }
        events
    }

    fn handle_add(&self, cmd: &AddGroupUser) -> Result<Vec<RosterEvent>, DomainError> {
        match self.district_of(&cmd.group, &cmd.player) {
            Some(existing) if *existing == cmd.district => Ok(vec![]),
            Some(existing) => Err(DomainError::conflict(format!(
                "{}/{} already assigned to district {existing}",
                cmd.group, cmd.player
            ))),
            None => Ok(vec![RosterEvent::GroupUserAdded(GroupUserAdded {
                group: cmd.group.clone(),
                player: cmd.player.clone(),
                district: cmd.district.clone(),
                occurred_at: cmd.occurred_at,
            })]),
        }
    }
}
