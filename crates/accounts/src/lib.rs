//! Player and monthly-account aggregates (event-sourced).
//!
//! Pure, deterministic domain logic: no IO, no storage, no clocks. Callers pass
//! `occurred_at` in on every command.

pub mod monthly_account;
pub mod player;
pub mod registry;
pub mod roster;

pub use monthly_account::{
    AddCollection, AmendCollection, CollectionAdded, CollectionUpdated, MonthlyAccount,
    MonthlyAccountCommand, MonthlyAccountCreated, MonthlyAccountEvent, OpenAccount, UpdateReason,
};
pub use player::{CreatePlayer, Player, PlayerCommand, PlayerCreated, PlayerEvent};
pub use registry::{
    AddPlayer, PlayerAdded, PlayerRegistry, RegisteredPlayer, RegistryCommand, RegistryEvent,
    RegistryOpened,
};
pub use roster::{
    AddGroupUser, GroupUserAdded, GroupUserRegistry, ImportRoster, RosterCaptured, RosterCommand,
    RosterEvent, RosterSnapshot,
};
