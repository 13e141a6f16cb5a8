use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gamify_core::{Aggregate, AggregateId, AggregateRoot, DomainError, GroupId, PlayerId};
use gamify_events::{Command, Event};

/// Aggregate root: Player.
///
/// One instance per (group, player). Created on first observation, never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    id: AggregateId,
    group: GroupId,
    player: PlayerId,
    version: u64,
    created: bool,
}

impl Player {
    pub const AGGREGATE_TYPE: &'static str = "account.player";

    pub fn stream_id(group: &GroupId, player: &PlayerId) -> AggregateId {
        AggregateId::from_natural_key(&format!("/player/{group}/{player}"))
    }

    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(group: GroupId, player: PlayerId) -> Self {
        Self {
            id: Self::stream_id(&group, &player),
            group,
            player,
            version: 0,
            created: false,
        }
    }

    pub fn group(&self) -> &GroupId {
        &self.group
    }

    pub fn player(&self) -> &PlayerId {
        &self.player
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Player {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePlayer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePlayer {
    pub group: GroupId,
    pub player: PlayerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerCommand {
    CreatePlayer(CreatePlayer),
}

impl Command for PlayerCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        match self {
            PlayerCommand::CreatePlayer(c) => Player::stream_id(&c.group, &c.player),
        }
    }
}

/// Event: PlayerCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerCreated {
    pub group: GroupId,
    pub player: PlayerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerEvent {
    PlayerCreated(PlayerCreated),
}

impl Event for PlayerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PlayerEvent::PlayerCreated(_) => "account.player.created",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PlayerEvent::PlayerCreated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Player {
    type Command = PlayerCommand;
    type Event = PlayerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PlayerEvent::PlayerCreated(e) => {
                self.group = e.group.clone();
                self.player = e.player.clone();
                self.created = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PlayerCommand::CreatePlayer(cmd) => {
                if self.created {
                    return Err(DomainError::conflict(format!(
                        "player {}/{} already exists",
                        self.group, self.player
                    )));
                }
                if cmd.group != self.group || cmd.player != self.player {
                    return Err(DomainError::invariant("player key mismatch"));
                }
                Ok(vec![PlayerEvent::PlayerCreated(PlayerCreated {
                    group: cmd.group.clone(),
                    player: cmd.player.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}
