//! Points scoring for monthly collection efficiency.
//!
//! `algorithm` is the pure numeric part; `collection` is the projection
//! aggregate the points process writes its results into.

pub mod algorithm;
pub mod collection;

pub use algorithm::{
    ACTUAL_POINTS_CEILING, BonusCarry, DayScore, actual_points, ratio, recalculate, score_day,
};
pub use collection::{
    AddPoints, Collection, CollectionCommand, CollectionEvent, OverwritePoints, PointsAdded,
    PointsUpdated,
};
