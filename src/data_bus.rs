//! Bounded, thread-safe store of parsed records.
//!
//! The bus keeps the most recent `maxlen` records together with the meta block
//! they arrived with. A generation counter changes exactly when the buffer is
//! wiped, so pollers can detect a restarted stream without diffing contents.
//!
//! Listeners are invoked synchronously from [`DataBus::append`] after the
//! internal lock is released.

use crate::frame;
use crate::parameters::{MetaBlock, TelemetryRecord};
use polars::prelude::{DataFrame, PolarsResult};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const DEFAULT_MAXLEN: usize = 10_000;

pub type Listener = Arc<dyn Fn(&MetaBlock, &TelemetryRecord) + Send + Sync>;

/// Returned by [`DataBus::subscribe`], used to unsubscribe again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Default)]
struct BusState {
    records: VecDeque<TelemetryRecord>,
    meta: MetaBlock,
    generation: u64,
}

pub struct DataBus {
    maxlen: usize,
    state: Mutex<BusState>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl Default for DataBus {
    fn default() -> Self {
        Self::new(DEFAULT_MAXLEN)
    }
}

impl std::fmt::Debug for DataBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataBus")
            .field("maxlen", &self.maxlen)
            .field("len", &self.len())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

// A panicking listener runs outside the lock, so poisoning can only come from
// a panic inside our own short critical sections; the data is still coherent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DataBus {
    pub fn new(maxlen: usize) -> Self {
        Self {
            maxlen,
            state: Mutex::new(BusState {
                records: VecDeque::with_capacity(maxlen.min(DEFAULT_MAXLEN)),
                ..BusState::default()
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.maxlen
    }

    /// Store `record`, replace the meta block and notify listeners.
    pub fn append(&self, meta: &MetaBlock, record: &TelemetryRecord) {
        {
            let mut state = lock(&self.state);
            if self.maxlen > 0 {
                if state.records.len() >= self.maxlen {
                    state.records.pop_front();
                }
                state.records.push_back(record.clone());
            }
            state.meta = meta.clone();
        }
        let listeners: Vec<Listener> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(meta, record);
        }
    }

    /// Drop all records and bump the generation. The meta block is kept.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.records.clear();
        state.generation += 1;
        log::debug!("Data bus reset, generation {}", state.generation);
    }

    pub fn snapshot(&self) -> Vec<TelemetryRecord> {
        lock(&self.state).records.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<TelemetryRecord> {
        lock(&self.state).records.back().cloned()
    }

    pub fn meta(&self) -> MetaBlock {
        lock(&self.state).meta.clone()
    }

    pub fn generation(&self) -> u64 {
        lock(&self.state).generation
    }

    pub fn len(&self) -> usize {
        lock(&self.state).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&MetaBlock, &TelemetryRecord) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: ListenerId) {
        lock(&self.listeners).retain(|(existing, _)| *existing != id);
    }

    /// Current records as a table, one column per parameter.
    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        frame::records_to_frame(&self.snapshot())
    }

    pub fn export_csv(&self, path: &Path) -> PolarsResult<()> {
        let mut df = self.to_frame()?;
        frame::write_csv(&mut df, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::Value;
    use std::thread;

    fn meta(strategy: &str) -> MetaBlock {
        MetaBlock::from([("P04".to_string(), strategy.to_string())])
    }

    fn record(runtime: i64) -> TelemetryRecord {
        TelemetryRecord::from([("P06".to_string(), Value::Int(runtime))])
    }

    fn runtimes(bus: &DataBus) -> Vec<i64> {
        bus.snapshot()
            .iter()
            .filter_map(|r| r["P06"].as_i64())
            .collect()
    }

    #[test]
    fn test_reset_clears_records_and_increments_generation() {
        let bus = DataBus::default();
        bus.append(&meta("CC_CV"), &record(1));
        assert!(!bus.snapshot().is_empty());
        let before = bus.generation();

        bus.reset();

        assert!(bus.snapshot().is_empty());
        assert_eq!(bus.generation(), before + 1);
        assert_eq!(bus.meta(), meta("CC_CV"));
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let bus = DataBus::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = bus.subscribe(move |_meta, record| {
            if let Some(v) = record["P06"].as_i64() {
                sink.lock().unwrap().push(v);
            }
        });

        bus.append(&meta("CC"), &record(1));
        assert_eq!(*seen.lock().unwrap(), [1]);

        bus.unsubscribe(id);
        bus.append(&meta("CC"), &record(2));
        assert_eq!(*seen.lock().unwrap(), [1]);

        bus.unsubscribe(id);
        bus.append(&meta("CC"), &record(3));
        assert_eq!(*seen.lock().unwrap(), [1]);
    }

    #[test]
    fn test_listener_sees_exact_pair() {
        let bus = DataBus::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(move |meta, record| {
            sink.lock().unwrap().push((meta["P04"].clone(), record["P06"].clone()));
        });
        bus.append(&meta("A"), &record(1));
        bus.append(&meta("B"), &record(2));
        assert_eq!(
            *seen.lock().unwrap(),
            [
                ("A".to_string(), Value::Int(1)),
                ("B".to_string(), Value::Int(2))
            ]
        );
        assert_eq!(bus.meta(), meta("B"));
    }

    #[test]
    fn test_bounded_fifo_eviction() {
        let bus = DataBus::new(3);
        for i in 0..10 {
            bus.append(&meta("CC"), &record(i));
            assert!(bus.len() <= 3);
        }
        assert_eq!(runtimes(&bus), [7, 8, 9]);
        assert_eq!(bus.latest().unwrap()["P06"], Value::Int(9));
    }

    #[test]
    fn test_zero_capacity_keeps_nothing_but_notifies() {
        let bus = DataBus::new(0);
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        bus.subscribe(move |_, _| *counter.lock().unwrap() += 1);
        bus.append(&meta("CC"), &record(1));
        assert!(bus.is_empty());
        assert_eq!(*hits.lock().unwrap(), 1);
        assert_eq!(bus.meta(), meta("CC"));
    }

    #[test]
    fn test_concurrent_appends_respect_capacity() {
        let bus = Arc::new(DataBus::new(50));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let bus = Arc::clone(&bus);
                thread::spawn(move || {
                    for i in 0..200 {
                        bus.append(&meta("CC"), &record(t * 1000 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(bus.len(), 50);
    }
}
