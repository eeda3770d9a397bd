// =============================================================================
// Signal store — §6.2: conditional status updates are the selector's
// concurrency anchor (P6, P7).
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use super::{Signal, SignalStatus};

pub trait SignalStore: Send + Sync {
    fn insert_signal(&self, signal: Signal);

    /// Conditional update: returns `false` without mutating anything if the
    /// signal's current status doesn't match `from`.
    fn update_signal_status(&self, id: Uuid, from: SignalStatus, to: SignalStatus) -> bool;

    /// Active signals created at or after `older_than`.
    fn list_active_signals(&self, older_than: DateTime<Utc>) -> Vec<Signal>;

    fn count_signals_today(&self) -> usize;

    fn get(&self, id: Uuid) -> Option<Signal>;

    /// Transitions every `active` signal created before `cutoff` to
    /// `expired` (§3.1). Returns the number of signals transitioned.
    fn expire_stale(&self, cutoff: DateTime<Utc>) -> usize;

    /// Transitions every currently-`active` signal on `symbol` to
    /// `superseded` (§3.1). Called right before a newer signal for the same
    /// symbol is inserted. Returns the number of signals transitioned.
    fn supersede_active(&self, symbol: &str) -> usize;
}

#[derive(Default)]
pub struct InMemorySignalStore {
    signals: RwLock<HashMap<Uuid, Signal>>,
}

impl InMemorySignalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignalStore for InMemorySignalStore {
    fn insert_signal(&self, signal: Signal) {
        self.signals.write().insert(signal.id, signal);
    }

    fn update_signal_status(&self, id: Uuid, from: SignalStatus, to: SignalStatus) -> bool {
        let mut signals = self.signals.write();
        match signals.get_mut(&id) {
            Some(s) if s.status == from => {
                s.status = to;
                true
            }
            _ => false,
        }
    }

    fn list_active_signals(&self, older_than: DateTime<Utc>) -> Vec<Signal> {
        self.signals
            .read()
            .values()
            .filter(|s| s.status == SignalStatus::Active && s.created_at >= older_than)
            .cloned()
            .collect()
    }

    fn count_signals_today(&self) -> usize {
        let today = Utc::now().date_naive();
        self.signals
            .read()
            .values()
            .filter(|s| s.created_at.date_naive() == today)
            .count()
    }

    fn get(&self, id: Uuid) -> Option<Signal> {
        self.signals.read().get(&id).cloned()
    }

    fn expire_stale(&self, cutoff: DateTime<Utc>) -> usize {
        let mut signals = self.signals.write();
        let mut count = 0;
        for s in signals.values_mut() {
            if s.status == SignalStatus::Active && s.created_at < cutoff {
                s.status = SignalStatus::Expired;
                count += 1;
            }
        }
        count
    }

    fn supersede_active(&self, symbol: &str) -> usize {
        let mut signals = self.signals.write();
        let mut count = 0;
        for s in signals.values_mut() {
            if s.status == SignalStatus::Active && s.symbol == symbol {
                s.status = SignalStatus::Superseded;
                count += 1;
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{ConfluenceFlags, MarketRegime, SignalContext};
    use crate::types::Direction;

    fn signal(status: SignalStatus) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            timeframe: "1h".into(),
            direction: Direction::Long,
            score: 0.8,
            entry: 100.0,
            stop_loss: 97.0,
            tp1: 105.0,
            tp2: 110.0,
            tp3: 115.0,
            confluence: ConfluenceFlags::default(),
            context: SignalContext {
                regime: MarketRegime::Trending,
                risk_reward: 1.6,
                indicators: serde_json::Value::Null,
            },
            status,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn conditional_update_succeeds_once() {
        let store = InMemorySignalStore::new();
        let s = signal(SignalStatus::Active);
        let id = s.id;
        store.insert_signal(s);

        assert!(store.update_signal_status(id, SignalStatus::Active, SignalStatus::Consumed));
        // Second attempt from the same `from` state must fail (P7).
        assert!(!store.update_signal_status(id, SignalStatus::Active, SignalStatus::Consumed));
        assert_eq!(store.get(id).unwrap().status, SignalStatus::Consumed);
    }

    #[test]
    fn list_active_excludes_consumed() {
        let store = InMemorySignalStore::new();
        let active = signal(SignalStatus::Active);
        let consumed = signal(SignalStatus::Consumed);
        store.insert_signal(active.clone());
        store.insert_signal(consumed);

        let listed = store.list_active_signals(Utc::now() - chrono::Duration::hours(1));
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, active.id);
    }

    #[test]
    fn count_signals_today() {
        let store = InMemorySignalStore::new();
        store.insert_signal(signal(SignalStatus::Active));
        store.insert_signal(signal(SignalStatus::Consumed));
        assert_eq!(store.count_signals_today(), 2);
    }

    #[test]
    fn update_unknown_id_returns_false() {
        let store = InMemorySignalStore::new();
        assert!(!store.update_signal_status(Uuid::new_v4(), SignalStatus::Active, SignalStatus::Consumed));
    }

    #[test]
    fn expire_stale_transitions_old_active_signals() {
        let store = InMemorySignalStore::new();
        let s = signal(SignalStatus::Active);
        let id = s.id;
        store.insert_signal(s);

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(store.expire_stale(cutoff), 1);
        assert_eq!(store.get(id).unwrap().status, SignalStatus::Expired);
    }

    #[test]
    fn expire_stale_leaves_fresh_signals_active() {
        let store = InMemorySignalStore::new();
        let s = signal(SignalStatus::Active);
        let id = s.id;
        store.insert_signal(s);

        let cutoff = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(store.expire_stale(cutoff), 0);
        assert_eq!(store.get(id).unwrap().status, SignalStatus::Active);
    }

    #[test]
    fn expire_stale_ignores_non_active_signals() {
        let store = InMemorySignalStore::new();
        let s = signal(SignalStatus::Consumed);
        let id = s.id;
        store.insert_signal(s);

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(store.expire_stale(cutoff), 0);
        assert_eq!(store.get(id).unwrap().status, SignalStatus::Consumed);
    }

    #[test]
    fn supersede_active_only_affects_matching_symbol() {
        let store = InMemorySignalStore::new();
        let btc = signal(SignalStatus::Active);
        let btc_id = btc.id;
        let mut eth = signal(SignalStatus::Active);
        eth.symbol = "ETHUSDT".into();
        let eth_id = eth.id;
        store.insert_signal(btc);
        store.insert_signal(eth);

        assert_eq!(store.supersede_active("BTCUSDT"), 1);
        assert_eq!(store.get(btc_id).unwrap().status, SignalStatus::Superseded);
        assert_eq!(store.get(eth_id).unwrap().status, SignalStatus::Active);
    }
}
