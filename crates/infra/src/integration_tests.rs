//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: Command → EventStore → EventBus / inline → PointsProcess → Collection
//!
//! Verifies:
//! - Recorded collections produce the expected monthly points
//! - Target changes overwrite totals instead of adding to them
//! - Redelivered events leave the projection unchanged
//! - Registration and roster import are idempotent
//! - A failed projection write neither fails the command nor double counts
//! - Months whose cumulative ratio leaves the decimal range still score

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use chrono::NaiveDate;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::Value as JsonValue;

    use gamify_accounts::{MonthlyAccount, PlayerRegistry, RosterSnapshot};
    use gamify_core::{DistrictId, GroupId, MonthLabel, PlayerId};
    use gamify_events::{EventEnvelope, InMemoryEventBus};
    use gamify_points::{ACTUAL_POINTS_CEILING, Collection, recalculate, score_day};

    use crate::application::{ApplicationError, Gamification};
    use crate::config::GamifyConfig;
    use crate::event_store::failing::FailingAppends;
    use crate::event_store::{EventStore, InMemoryEventStore};
    use crate::workers::ProcessWorker;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type App = Gamification<InMemoryEventStore, Bus>;

    fn setup() -> (App, Bus) {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let app = Gamification::new(InMemoryEventStore::new(), Arc::clone(&bus), &GamifyConfig::default());
        (app, bus)
    }

    fn failing_setup() -> Gamification<FailingAppends, Bus> {
        Gamification::new(
            FailingAppends::new(Collection::AGGREGATE_TYPE),
            Arc::new(InMemoryEventBus::new()),
            &GamifyConfig::default(),
        )
    }

    fn keys(group: &str, player: &str) -> (GroupId, PlayerId) {
        (GroupId::new(group).unwrap(), PlayerId::new(player).unwrap())
    }

    fn jan(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn assert_close(actual: Decimal, expected: Decimal) {
        assert!(
            (actual - expected).abs() < dec!(0.01),
            "expected ≈ {expected}, got {actual}"
        );
    }

    #[test]
    fn half_target_on_day_five_scores_the_first_bonus_tier() {
        let (app, _bus) = setup();
        let (g, p) = keys("g1", "p1");
        app.register_player(&g, &p).unwrap();

        app.record_collection(&g, &p, jan(5), dec!(500000), dec!(1000000))
            .unwrap();

        let points = app.monthly_points(&g, &p, &MonthLabel::from_date(jan(5))).unwrap();
        assert_close(points, dec!(659.38));
    }

    #[test]
    fn target_change_overwrites_totals() {
        let (app, _bus) = setup();
        let (g, p) = keys("g1", "p1");
        let month = MonthLabel::from_date(jan(1));
        app.register_player(&g, &p).unwrap();

        app.record_collection(&g, &p, jan(1), dec!(100), dec!(1000)).unwrap();
        app.record_collection(&g, &p, jan(2), dec!(200), dec!(1000)).unwrap();
        app.record_collection(&g, &p, jan(3), dec!(300), dec!(2000)).unwrap();

        let daily: BTreeMap<NaiveDate, Decimal> =
            [(jan(1), dec!(100)), (jan(2), dec!(200)), (jan(3), dec!(300))].into();
        let fresh = recalculate(&daily, dec!(2000));

        assert_eq!(app.monthly_points(&g, &p, &month).unwrap(), fresh.total);
        assert_eq!(
            app.processed_dates(&g, &p, &month).unwrap(),
            vec![jan(1), jan(2), jan(3)]
        );
    }

    #[test]
    fn repeated_record_for_a_date_accumulates_without_rescoring() {
        let (app, _bus) = setup();
        let (g, p) = keys("g1", "p1");
        let month = MonthLabel::from_date(jan(4));
        app.register_player(&g, &p).unwrap();

        app.record_collection(&g, &p, jan(4), dec!(100), dec!(1000)).unwrap();
        let after_first = app.monthly_points(&g, &p, &month).unwrap();
        app.record_collection(&g, &p, jan(4), dec!(50), dec!(1000)).unwrap();

        let raw = app.monthly_raw_data(&g, &p, &month).unwrap().unwrap();
        assert_eq!(raw.daily_collection.get(&jan(4)), Some(&dec!(150)));
        assert_eq!(raw.balance, dec!(150));
        assert_eq!(raw.collection_history.get(&jan(4)), Some(&vec![dec!(100), dec!(50)]));
        assert_eq!(app.monthly_points(&g, &p, &month).unwrap(), after_first);
    }

    #[test]
    fn amendment_returns_previous_amount_and_recalculates() {
        let (app, _bus) = setup();
        let (g, p) = keys("g1", "p1");
        let month = MonthLabel::from_date(jan(1));
        app.register_player(&g, &p).unwrap();
        app.record_collection(&g, &p, jan(1), dec!(100), dec!(1000)).unwrap();
        app.record_collection(&g, &p, jan(12), dec!(400), dec!(1000)).unwrap();

        let previous = app
            .amend_collection(&g, &p, jan(12), dec!(250), dec!(1000))
            .unwrap();

        assert_eq!(previous, dec!(400));
        let fresh = recalculate(&[(jan(1), dec!(100)), (jan(12), dec!(250))].into(), dec!(1000));
        assert_eq!(app.monthly_points(&g, &p, &month).unwrap(), fresh.total);
        let raw = app.monthly_raw_data(&g, &p, &month).unwrap().unwrap();
        assert_eq!(raw.balance, dec!(350));
    }

    #[test]
    fn target_change_after_a_month_on_target_still_scores() {
        let (app, _bus) = setup();
        let (g, p) = keys("g1", "p1");
        let month = MonthLabel::from_date(jan(1));
        app.register_player(&g, &p).unwrap();

        for day in 1..=30 {
            app.record_collection(&g, &p, jan(day), dec!(1000), dec!(1000)).unwrap();
        }
        app.record_collection(&g, &p, jan(31), dec!(1000), dec!(1100)).unwrap();

        let daily: BTreeMap<NaiveDate, Decimal> = (1..=31).map(|d| (jan(d), dec!(1000))).collect();
        let expected = recalculate(&daily, dec!(1100));
        assert!(expected.saturated);
        let points = app.monthly_points(&g, &p, &month).unwrap();
        assert_eq!(points, expected.total);
        assert!(points > ACTUAL_POINTS_CEILING);
        assert_eq!(app.processed_dates(&g, &p, &month).unwrap(), (1..=31).map(jan).collect::<Vec<_>>());

        // The account keeps accepting commands afterwards.
        app.amend_collection(&g, &p, jan(31), dec!(500), dec!(1100)).unwrap();
        assert!(app.monthly_points(&g, &p, &month).unwrap() > Decimal::ZERO);
    }

    #[test]
    fn projection_failure_keeps_the_command_committed_once() {
        let app = failing_setup();
        let (g, p) = keys("g1", "p1");
        let month = MonthLabel::from_date(jan(1));
        app.register_player(&g, &p).unwrap();

        app.dispatcher().store().fail_next(1);
        app.record_collection(&g, &p, jan(1), dec!(100), dec!(1000)).unwrap();

        assert_eq!(app.dispatcher().store().pending_failures(), 0);
        let raw = app.monthly_raw_data(&g, &p, &month).unwrap().unwrap();
        assert_eq!(raw.balance, dec!(100));
        assert_eq!(app.monthly_points(&g, &p, &month).unwrap(), Decimal::ZERO);

        // The next command on the account replays the missed projection step.
        app.record_collection(&g, &p, jan(2), dec!(200), dec!(1000)).unwrap();

        let raw = app.monthly_raw_data(&g, &p, &month).unwrap().unwrap();
        assert_eq!(raw.balance, dec!(300));
        assert_eq!(raw.collection_history.get(&jan(1)), Some(&vec![dec!(100)]));
        assert_eq!(raw.processed_dates, vec![jan(1), jan(2)]);
        let expected = recalculate(&[(jan(1), dec!(100))].into(), dec!(1000)).total
            + score_day(jan(2), dec!(200), dec!(1000), Default::default()).total;
        assert_eq!(app.monthly_points(&g, &p, &month).unwrap(), expected);
    }

    #[test]
    fn bus_redelivery_does_not_change_points() {
        let (app, bus) = setup();
        let (g, p) = keys("g1", "p1");
        let month = MonthLabel::from_date(jan(1));

        // A bus-fed worker on top of the inline process: every account event
        // reaches the projection twice.
        let process = app.points_process().clone();
        let worker = ProcessWorker::spawn(
            "points-process",
            &bus,
            Some(MonthlyAccount::AGGREGATE_TYPE),
            move |env: EventEnvelope<JsonValue>| process.handle_envelope(&env).map(|_| ()),
        )
        .unwrap();

        app.register_player(&g, &p).unwrap();
        for (day, amount) in [(1, dec!(120)), (2, dec!(80)), (11, dec!(300)), (21, dec!(50))] {
            app.record_collection(&g, &p, jan(day), amount, dec!(1000)).unwrap();
        }
        thread::sleep(Duration::from_millis(100));
        worker.shutdown();

        let (reference, _bus) = setup();
        reference.register_player(&g, &p).unwrap();
        for (day, amount) in [(1, dec!(120)), (2, dec!(80)), (11, dec!(300)), (21, dec!(50))] {
            reference
                .record_collection(&g, &p, jan(day), amount, dec!(1000))
                .unwrap();
        }

        assert_eq!(
            app.monthly_points(&g, &p, &month).unwrap(),
            reference.monthly_points(&g, &p, &month).unwrap()
        );
    }

    #[test]
    fn registration_is_idempotent() {
        let (app, _bus) = setup();
        let (g, p) = keys("g1", "p1");

        let first = app.register_player(&g, &p).unwrap();
        let second = app.register_player(&g, &p).unwrap();

        assert_eq!(first, second);
        assert_eq!(app.list_registered_players().unwrap(), vec![(g, p)]);
        let registry_stream = app
            .dispatcher()
            .store()
            .load_stream(PlayerRegistry::stream_id("players"))
            .unwrap();
        // RegistryOpened + exactly one PlayerAdded.
        assert_eq!(registry_stream.len(), 2);
    }

    #[test]
    fn roster_import_registers_every_pair_once() {
        let (app, _bus) = setup();
        let (g1, p1) = keys("g1", "p1");
        let (g2, p2) = keys("g2", "p2");
        let district = DistrictId::new("d1").unwrap();
        let roster: RosterSnapshot = BTreeMap::from([
            (g1.clone(), BTreeMap::from([(p1.clone(), district.clone())])),
            (g2.clone(), BTreeMap::from([(p2.clone(), district.clone())])),
        ]);

        assert_eq!(app.import_roster(roster).unwrap(), 2);
        let again: RosterSnapshot =
            BTreeMap::from([(g1.clone(), BTreeMap::from([(p1.clone(), district.clone())]))]);
        app.import_roster(again).unwrap();

        let mut seen = Vec::new();
        app.for_each_roster_player(|g, p, d| seen.push((g.clone(), p.clone(), d.clone())))
            .unwrap();
        assert_eq!(
            seen,
            vec![(g1.clone(), p1.clone(), district.clone()), (g2.clone(), p2.clone(), district)]
        );
        assert_eq!(app.list_registered_players().unwrap().len(), 2);
        app.record_collection(&g2, &p2, jan(1), dec!(1), dec!(10)).unwrap();
    }

    #[test]
    fn parallel_players_and_shared_account_stay_consistent() {
        let (app, _bus) = setup();
        let app = Arc::new(app);
        let month = MonthLabel::from_date(jan(1));
        let (g, shared) = keys("g1", "shared");
        app.register_player(&g, &shared).unwrap();

        let handles: Vec<_> = (1..=8u32)
            .map(|i| {
                let app = Arc::clone(&app);
                let (g, shared) = (g.clone(), shared.clone());
                thread::spawn(move || {
                    let (_, own) = keys("g1", &format!("p{i}"));
                    app.register_player(&g, &own)?;
                    app.record_collection(&g, &own, jan(i), dec!(100), dec!(1000))?;
                    app.record_collection(&g, &shared, jan(i), dec!(10), dec!(1000))
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }

        let raw = app.monthly_raw_data(&g, &shared, &month).unwrap().unwrap();
        assert_eq!(raw.balance, dec!(80));
        assert_eq!(raw.daily_collection.len(), 8);
        assert_eq!(app.list_registered_players().unwrap().len(), 9);
        assert!(app.monthly_points(&g, &shared, &month).unwrap() > Decimal::ZERO);
    }

    #[test]
    fn unregistered_player_leaves_no_trace() {
        let (app, _bus) = setup();
        let (g, p) = keys("g1", "nobody");

        let err = app
            .record_collection(&g, &p, jan(1), dec!(1), dec!(10))
            .unwrap_err();

        assert!(matches!(err, ApplicationError::PlayerNotRegistered { .. }));
        assert_eq!(app.dispatcher().store().stream_count(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn balance_equals_sum_of_daily_collections(
            entries in prop::collection::vec((1u32..=31, 0u64..1_000, 1_000u64..2_000_000), 1..12)
        ) {
            let (app, _bus) = setup();
            let (g, p) = keys("g1", "p1");
            let month = MonthLabel::from_date(jan(1));
            app.register_player(&g, &p).unwrap();

            for (day, amount, target) in entries {
                app.record_collection(&g, &p, jan(day), Decimal::from(amount), Decimal::from(target))
                    .unwrap();

                let raw = app.monthly_raw_data(&g, &p, &month).unwrap().unwrap();
                let sum: Decimal = raw.daily_collection.values().copied().sum();
                prop_assert_eq!(raw.balance, sum);
            }
        }
    }
}
