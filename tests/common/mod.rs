//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use hybrid_replay::{
    AggregateSettings, EngineConfig, Event, ProjectionKind, ProjectionService, Projector, StreamPolicy, Transition,
    TransitionTable,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

pub const ROOT: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub owner: String,
    pub balance: i64,
    pub closed: bool,
}

#[derive(Deserialize)]
struct Opened {
    owner: String,
}

#[derive(Deserialize)]
struct Amount {
    amount: i64,
}

/// Bank account aggregate used across the integration tests
pub struct AccountProjector {
    identifier: String,
    table: TransitionTable<Account>,
}

impl AccountProjector {
    pub fn new(identifier: &str) -> Self {
        let table = TransitionTable::new()
            .on("Opened", |_: &Account, data: Opened, _| {
                Transition::Applied(Account {
                    owner: data.owner,
                    ..Account::default()
                })
            })
            .on("Deposited", |account: &Account, data: Amount, _| {
                if account.closed {
                    return Transition::NotApplicable;
                }
                Transition::Applied(Account {
                    balance: account.balance + data.amount,
                    ..account.clone()
                })
            })
            .on("Withdrawn", |account: &Account, data: Amount, _| {
                Transition::Applied(Account {
                    balance: account.balance - data.amount,
                    ..account.clone()
                })
            })
            .on_event("Closed", |account: &Account, _| {
                Transition::Applied(Account {
                    closed: true,
                    ..account.clone()
                })
            });
        Self {
            identifier: identifier.to_string(),
            table,
        }
    }
}

impl Projector for AccountProjector {
    type Payload = Account;

    fn name(&self) -> &str {
        "Account"
    }

    fn stream_kind(&self) -> &str {
        "Account"
    }

    fn payload_version_identifier(&self) -> &str {
        &self.identifier
    }

    fn kind(&self) -> ProjectionKind {
        ProjectionKind::Aggregate
    }

    fn initial_payload(&self) -> Account {
        Account::default()
    }

    fn transitions(&self) -> &TransitionTable<Account> {
        &self.table
    }
}

/// Totals across every account, fed through a consistency window
pub struct LedgerProjector {
    table: TransitionTable<i64>,
}

impl LedgerProjector {
    pub fn new() -> Self {
        Self {
            table: TransitionTable::new()
                .ignore("Opened")
                .ignore("Closed")
                .on("Deposited", |total: &i64, data: Amount, _| Transition::Applied(total + data.amount))
                .on("Withdrawn", |total: &i64, data: Amount, _| Transition::Applied(total - data.amount)),
        }
    }
}

impl Projector for LedgerProjector {
    type Payload = i64;

    fn name(&self) -> &str {
        "Ledger"
    }

    fn stream_kind(&self) -> &str {
        "Account"
    }

    fn payload_version_identifier(&self) -> &str {
        "ledger-v1"
    }

    fn kind(&self) -> ProjectionKind {
        ProjectionKind::MultiProjection
    }

    fn initial_payload(&self) -> i64 {
        0
    }

    fn transitions(&self) -> &TransitionTable<i64> {
        &self.table
    }
}

/// Ordered account history: open, then the given deposits
pub fn account_history(aggregate_id: Uuid, deposits: &[i64]) -> Vec<Event> {
    let mut events = vec![Event::new("Account", aggregate_id, ROOT, "Opened", json!({"owner": "Duyan"}), 1)];
    for (i, amount) in deposits.iter().enumerate() {
        events.push(Event::new(
            "Account",
            aggregate_id,
            ROOT,
            "Deposited",
            json!({"amount": amount}),
            i as u64 + 2,
        ));
    }
    // Strictly increasing keys even when the clock does not move
    let base = chrono::Utc::now();
    events
        .into_iter()
        .enumerate()
        .map(|(i, e)| e.with_created_at(base + chrono::Duration::microseconds(i as i64)))
        .collect()
}

/// Service over a fresh JSONL directory
pub fn service_with(settings: AggregateSettings) -> (TempDir, ProjectionService) {
    let temp_dir = TempDir::new().unwrap();
    let config = EngineConfig::new(temp_dir.path()).with_streams(settings);
    let service = ProjectionService::open(config).unwrap();
    (temp_dir, service)
}

pub fn hybrid_service() -> (TempDir, ProjectionService) {
    service_with(AggregateSettings::with_default(StreamPolicy::hybrid()))
}

pub fn ledger() -> Arc<LedgerProjector> {
    Arc::new(LedgerProjector::new())
}
