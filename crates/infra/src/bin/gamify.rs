//! Replays newline-delimited JSON commands and prints monthly points.
//!
//! ```text
//! gamify [FILE]        # reads stdin when FILE is absent or "-"
//! ```
//!
//! One command per line:
//!
//! ```text
//! {"command":"register_player","group":"g1","player":"p1"}
//! {"command":"record_collection","group":"g1","player":"p1","date":"2024-01-05","amount":"500000","target":"1000000"}
//! {"command":"amend_collection","group":"g1","player":"p1","date":"2024-01-05","amount":"400000","target":"1000000"}
//! ```

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tracing::{info, warn};

use gamify_core::{GroupId, MonthLabel, PlayerId};
use gamify_events::{EventEnvelope, InMemoryEventBus};
use gamify_infra::event_store::{EventStore, InMemoryEventStore};
use gamify_infra::{Gamification, GamifyConfig};

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum Line {
    RegisterPlayer {
        group: String,
        player: String,
    },
    RecordCollection {
        group: String,
        player: String,
        date: NaiveDate,
        amount: Decimal,
        target: Decimal,
    },
    AmendCollection {
        group: String,
        player: String,
        date: NaiveDate,
        amount: Decimal,
        target: Decimal,
    },
}

fn main() -> anyhow::Result<()> {
    gamify_observability::init();

    let config = GamifyConfig::from_env().context("invalid configuration")?;
    let input: Box<dyn BufRead> = match std::env::args().nth(1).as_deref() {
        None | Some("-") => Box::new(BufReader::new(io::stdin())),
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("cannot open {path}"))?,
        )),
    };
    let bus: Bus = Arc::new(InMemoryEventBus::new());

    #[cfg(feature = "postgres")]
    if let Some(url) = config.database_url.as_deref() {
        let store = gamify_infra::event_store::PostgresEventStore::connect(url)
            .context("cannot connect to the event store")?;
        info!("using postgres event store");
        return run(Gamification::new(store, bus, &config), input);
    }

    if config.database_url.is_some() {
        warn!("DATABASE_URL is set but this build has no postgres support; using memory");
    }
    run(Gamification::new(InMemoryEventStore::new(), bus, &config), input)
}

fn run<S: EventStore>(app: Gamification<S, Bus>, input: Box<dyn BufRead>) -> anyhow::Result<()> {
    let mut touched = BTreeSet::new();
    let mut failures = 0usize;

    for (idx, line) in input.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.with_context(|| format!("cannot read line {line_no}"))?;
        if line.trim().is_empty() {
            continue;
        }

        match apply(&app, &line) {
            Ok(Some(key)) => {
                touched.insert(key);
            }
            Ok(None) => {}
            Err(err) => {
                failures += 1;
                warn!(line = line_no, error = %format!("{err:#}"), "command rejected");
            }
        }
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (group, player, month) in &touched {
        let points = app.monthly_points(group, player, month)?;
        writeln!(
            out,
            "{}",
            json!({
                "group": group.as_str(),
                "player": player.as_str(),
                "month": month.as_str(),
                "points": points.to_string(),
            })
        )?;
    }

    info!(accounts = touched.len(), failures, "replay finished");
    if failures > 0 {
        bail!("{failures} command(s) rejected");
    }
    Ok(())
}

fn apply<S: EventStore>(
    app: &Gamification<S, Bus>,
    line: &str,
) -> anyhow::Result<Option<(GroupId, PlayerId, MonthLabel)>> {
    let parsed: Line = serde_json::from_str(line).context("malformed command")?;

    match parsed {
        Line::RegisterPlayer { group, player } => {
            let (group, player) = keys(&group, &player)?;
            app.register_player(&group, &player)?;
            Ok(None)
        }
        Line::RecordCollection {
            group,
            player,
            date,
            amount,
            target,
        } => {
            let (group, player) = keys(&group, &player)?;
            app.record_collection(&group, &player, date, amount, target)?;
            Ok(Some((group, player, MonthLabel::from_date(date))))
        }
        Line::AmendCollection {
            group,
            player,
            date,
            amount,
            target,
        } => {
            let (group, player) = keys(&group, &player)?;
            let previous = app.amend_collection(&group, &player, date, amount, target)?;
            info!(group = %group, player = %player, date = %date, previous = %previous, "amended");
            Ok(Some((group, player, MonthLabel::from_date(date))))
        }
    }
}

fn keys(group: &str, player: &str) -> anyhow::Result<(GroupId, PlayerId)> {
    Ok((GroupId::new(group)?, PlayerId::new(player)?))
}
