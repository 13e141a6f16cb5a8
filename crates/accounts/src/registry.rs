use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gamify_core::{Aggregate, AggregateId, AggregateRoot, DomainError, GroupId, PlayerId};
use gamify_events::{Command, Event};

use crate::player::Player;

/// A registry member: the player's aggregate id plus its natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredPlayer {
    pub group: GroupId,
    pub player: PlayerId,
}

/// Aggregate root: PlayerRegistry.
///
/// A named singleton (`players` by default) holding the set of registered
/// player identities. Membership is unique; order is irrelevant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRegistry {
    id: AggregateId,
    name: String,
    members: BTreeMap<AggregateId, RegisteredPlayer>,
    version: u64,
    opened: bool,
}

impl PlayerRegistry {
    pub const AGGREGATE_TYPE: &'static str = "account.player_registry";

    pub fn stream_id(name: &str) -> AggregateId {
        AggregateId::from_natural_key(&format!("/registry/{name}"))
    }

    pub fn empty(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: Self::stream_id(&name),
            name,
            members: BTreeMap::new(),
            version: 0,
            opened: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contains(&self, player_id: &AggregateId) -> bool {
        self.members.contains_key(player_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Registered players; finite and restartable.
    pub fn members(&self) -> impl Iterator<Item = (&AggregateId, &RegisteredPlayer)> {
        self.members.iter()
    }
}

impl AggregateRoot for PlayerRegistry {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: AddPlayer (register if absent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPlayer {
    pub registry: String,
    pub group: GroupId,
    pub player: PlayerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryCommand {
    AddPlayer(AddPlayer),
}

impl Command for RegistryCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        match self {
            RegistryCommand::AddPlayer(c) => PlayerRegistry::stream_id(&c.registry),
        }
    }
}

/// Event: RegistryOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryOpened {
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PlayerAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerAdded {
    pub player_id: AggregateId,
    pub group: GroupId,
    pub player: PlayerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryEvent {
    RegistryOpened(RegistryOpened),
    PlayerAdded(PlayerAdded),
}

impl Event for RegistryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RegistryEvent::RegistryOpened(_) => "account.player_registry.opened",
            RegistryEvent::PlayerAdded(_) => "account.player_registry.player_added",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RegistryEvent::RegistryOpened(e) => e.occurred_at,
            RegistryEvent::PlayerAdded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PlayerRegistry {
    type Command = RegistryCommand;
    type Event = RegistryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RegistryEvent::RegistryOpened(e) => {
                self.name = e.name.clone();
                self.opened = true;
            }
            RegistryEvent::PlayerAdded(e) => {
                self.members.insert(
                    e.player_id,
                    RegisteredPlayer {
                        group: e.group.clone(),
                        player: e.player.clone(),
                    },
                );
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RegistryCommand::AddPlayer(cmd) => self.handle_add(cmd),
        }
    }
}

impl PlayerRegistry {
    fn handle_add(&self, cmd: &AddPlayer) -> Result<Vec<RegistryEvent>, DomainError> {
        if cmd.registry != self.name {
            return Err(DomainError::invariant("registry name mismatch"));
        }

        let player_id = Player::stream_id(&cmd.group, &cmd.player);
        if self.members.contains_key(&player_id) {
            return Ok(vec![]);
        }

        let mut events = Vec::with_capacity(2);
        if !self.opened {
            events.push(RegistryEvent::RegistryOpened(RegistryOpened {
                name: self.name.clone(),
                occurred_at: cmd.occurred_at,
            }));
        }
        events.push(RegistryEvent::PlayerAdded(PlayerAdded {
            player_id,
            group: cmd.group.clone(),
            player: cmd.player.clone(),
            occurred_at: cmd.occurred_at,
        }));
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamify_events::execute;

    fn add(group: &str, player: &str) -> RegistryCommand {
        RegistryCommand::AddPlayer(AddPlayer {
            registry: "players".to_string(),
            group: GroupId::new(group).unwrap(),
            player: PlayerId::new(player).unwrap(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn first_add_opens_the_registry() {
        let mut registry = PlayerRegistry::empty("players");

        let events = execute(&mut registry, &add("g1", "p1")).unwrap();

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], RegistryEvent::RegistryOpened(_)));
        assert!(matches!(events[1], RegistryEvent::PlayerAdded(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn adding_a_member_twice_emits_nothing() {
        let mut registry = PlayerRegistry::empty("players");
        execute(&mut registry, &add("g1", "p1")).unwrap();

        let events = execute(&mut registry, &add("g1", "p1")).unwrap();

        assert!(events.is_empty());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.version(), 2);
    }

    #[test]
    fn members_are_keyed_by_player_identity() {
        let mut registry = PlayerRegistry::empty("players");
        execute(&mut registry, &add("g1", "p1")).unwrap();
        execute(&mut registry, &add("g2", "p1")).unwrap();

        let g1p1 = Player::stream_id(&GroupId::new("g1").unwrap(), &PlayerId::new("p1").unwrap());
        assert!(registry.contains(&g1p1));
        assert_eq!(registry.members().count(), 2);
    }
}
