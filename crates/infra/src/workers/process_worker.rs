use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use gamify_events::{EventBus, StreamScoped, Subscription};

/// Handle to stop and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            if j.join().is_err() {
                warn!("worker thread panicked before shutdown");
            }
        }
    }
}

/// Event-driven process loop on its own thread.
///
/// - Subscribes to the bus before returning, so nothing published afterwards
///   is missed
/// - Skips streams of other aggregate types without decoding them
/// - Logs handler failures and keeps going; the handler must be idempotent
///   (delivery is at-least-once)
#[derive(Debug)]
pub struct ProcessWorker;

impl ProcessWorker {
    /// Spawn a worker thread that feeds bus messages to `handler`.
    ///
    /// `aggregate_type`: when provided, messages from other stream types are
    /// ignored.
    pub fn spawn<M, B, H, E>(
        name: &'static str,
        bus: &B,
        aggregate_type: Option<&'static str>,
        mut handler: H,
    ) -> std::io::Result<WorkerHandle>
    where
        M: StreamScoped + Send + 'static,
        B: EventBus<M>,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, aggregate_type, &mut handler))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<M, H, E>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    aggregate_type: Option<&'static str>,
    handler: &mut H,
) where
    M: StreamScoped,
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => {
                if let Some(t) = aggregate_type {
                    if msg.stream_aggregate_type() != t {
                        continue;
                    }
                }

                let stream = msg.stream_aggregate_id();
                if let Err(err) = handler(msg) {
                    warn!(worker = name, aggregate_id = %stream, error = ?err, "process worker handler failed");
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!(worker = name, "process worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::Value as JsonValue;

    use gamify_accounts::{AddCollection, MonthlyAccount, MonthlyAccountCommand};
    use gamify_core::{GroupId, MonthLabel, PlayerId};
    use gamify_events::{EventEnvelope, InMemoryEventBus};
    use gamify_points::{Collection, recalculate, score_day};

    use crate::command_dispatcher::CommandDispatcher;
    use crate::event_store::InMemoryEventStore;
    use crate::event_store::failing::FailingAppends;
    use crate::processes::PointsProcess;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    fn jan(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn add_collection(
        group: &GroupId,
        player: &PlayerId,
        day: u32,
        amount: Decimal,
    ) -> MonthlyAccountCommand {
        MonthlyAccountCommand::AddCollection(AddCollection {
            group: group.clone(),
            player: player.clone(),
            month: MonthLabel::from_date(jan(day)),
            date: jan(day),
            amount,
            target: dec!(1000),
            occurred_at: Utc::now(),
        })
    }

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        done()
    }

    #[test]
    fn worker_scores_published_account_events() {
        let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
        let dispatcher = Arc::new(CommandDispatcher::new(InMemoryEventStore::new(), Arc::clone(&bus)));
        let process = PointsProcess::new(Arc::clone(&dispatcher));

        let worker_process = process.clone();
        let handle = ProcessWorker::spawn(
            "points-process",
            &bus,
            Some(MonthlyAccount::AGGREGATE_TYPE),
            move |env: EventEnvelope<JsonValue>| worker_process.handle_envelope(&env).map(|_| ()),
        )
        .unwrap();

        let group = GroupId::new("g1").unwrap();
        let player = PlayerId::new("p1").unwrap();
        let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let month = MonthLabel::from_date(date);
        let cmd = MonthlyAccountCommand::AddCollection(AddCollection {
            group: group.clone(),
            player: player.clone(),
            month: month.clone(),
            date,
            amount: dec!(250),
            target: dec!(1000),
            occurred_at: Utc::now(),
        });
        dispatcher
            .dispatch(MonthlyAccount::AGGREGATE_TYPE, &cmd, || {
                MonthlyAccount::empty(group.clone(), player.clone(), month.clone())
            })
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut total = Decimal::ZERO;
        while Instant::now() < deadline {
            total = process.total_points(&group, &player, &month).unwrap();
            if total > Decimal::ZERO {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        handle.shutdown();

        assert!(total > Decimal::ZERO);
    }

    #[test]
    fn failed_delivery_is_recovered_by_the_next_one() {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = Arc::new(CommandDispatcher::new(
            FailingAppends::new(Collection::AGGREGATE_TYPE),
            Arc::clone(&bus),
        ));
        let process = PointsProcess::new(Arc::clone(&dispatcher));

        let worker_process = process.clone();
        let handle = ProcessWorker::spawn(
            "points-process",
            &bus,
            Some(MonthlyAccount::AGGREGATE_TYPE),
            move |env: EventEnvelope<JsonValue>| worker_process.handle_envelope(&env).map(|_| ()),
        )
        .unwrap();

        let group = GroupId::new("g1").unwrap();
        let player = PlayerId::new("p1").unwrap();
        let month = MonthLabel::from_date(jan(1));
        let dates = || process.processed_dates(&group, &player, &month).unwrap();
        let add = |day: u32, amount: Decimal| {
            let cmd = add_collection(&group, &player, day, amount);
            dispatcher
                .dispatch(MonthlyAccount::AGGREGATE_TYPE, &cmd, || {
                    MonthlyAccount::empty(group.clone(), player.clone(), month.clone())
                })
                .unwrap()
        };

        add(1, dec!(100));
        assert!(wait_for(|| dates() == vec![jan(1)]));

        // The worker's write for day 2 fails; day 3's delivery must bring it in.
        dispatcher.store().fail_next(1);
        add(2, dec!(200));
        assert!(wait_for(|| dispatcher.store().pending_failures() == 0));
        add(3, dec!(300));
        let complete = wait_for(|| dates().len() == 3);
        handle.shutdown();

        assert!(complete, "processed dates: {:?}", dates());
        assert_eq!(dates(), vec![jan(1), jan(2), jan(3)]);
        let expected = recalculate(&[(jan(1), dec!(100))].into(), dec!(1000)).total
            + score_day(jan(2), dec!(200), dec!(1000), Default::default()).total
            + score_day(jan(3), dec!(300), dec!(1000), Default::default()).total;
        assert_eq!(process.total_points(&group, &player, &month).unwrap(), expected);
    }
}
