//! Distinct-sender aggregation over the full message history, run by a pool
//! of worker threads under an explicit [`ScanStrategy`].
//!
//! `Unsynchronized` exists to demonstrate the lost-update hazard of an
//! uncoordinated shared accumulator; it never corrupts memory but may miss
//! senders. `MutexGuarded` serialises every insert behind one lock and is
//! the only strategy fit for answers.

use std::{
  collections::BTreeSet,
  sync::{
    Mutex, PoisonError,
    atomic::{AtomicI64, AtomicUsize, Ordering},
  },
  thread,
};

use natter_core::UserId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStrategy {
  Unsynchronized,
  #[default]
  MutexGuarded,
}

/// The set of distinct ids in `senders`, computed by `workers` threads (at
/// least one) over equal contiguous partitions.
pub fn distinct_senders(senders: &[UserId], strategy: ScanStrategy, workers: usize) -> BTreeSet<UserId> {
  let workers = workers.max(1);
  let chunk = senders.len().div_ceil(workers).max(1);

  match strategy {
    ScanStrategy::Unsynchronized => {
      let acc = RacySlots::with_capacity(senders.len());
      thread::scope(|scope| {
        for part in senders.chunks(chunk) {
          let acc = &acc;
          scope.spawn(move || {
            for &id in part {
              if !acc.contains(id) {
                acc.append(id);
              }
            }
          });
        }
      });
      acc.snapshot().into_iter().collect()
    }
    ScanStrategy::MutexGuarded => {
      let acc = Mutex::new(BTreeSet::new());
      thread::scope(|scope| {
        for part in senders.chunks(chunk) {
          let acc = &acc;
          scope.spawn(move || {
            for &id in part {
              acc.lock().unwrap_or_else(PoisonError::into_inner).insert(id);
            }
          });
        }
      });
      acc.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
  }
}

// ─── Unsynchronized accumulator ──────────────────────────────────────────────

/// A fixed-capacity append-only list whose length update is a plain
/// load-then-store. Two appends that read the same length write the same
/// slot, and one of them is lost.
struct RacySlots {
  slots: Box<[AtomicI64]>,
  len:   AtomicUsize,
}

impl RacySlots {
  fn with_capacity(capacity: usize) -> Self {
    Self {
      slots: (0..capacity).map(|_| AtomicI64::new(0)).collect(),
      len:   AtomicUsize::new(0),
    }
  }

  fn contains(&self, id: UserId) -> bool {
    let len = self.len.load(Ordering::Acquire);
    self.slots[..len.min(self.slots.len())]
      .iter()
      .any(|s| s.load(Ordering::Relaxed) == id.0)
  }

  /// First half of an append: claim the slot at the current length.
  fn begin_append(&self) -> usize { self.len.load(Ordering::Acquire) }

  /// Second half: fill the claimed slot and publish the new length.
  fn finish_append(&self, slot: usize, id: UserId) {
    let Some(cell) = self.slots.get(slot) else {
      return;
    };
    cell.store(id.0, Ordering::Relaxed);
    self.len.store(slot + 1, Ordering::Release);
  }

  fn append(&self, id: UserId) {
    let slot = self.begin_append();
    thread::yield_now();
    self.finish_append(slot, id);
  }

  fn snapshot(&self) -> Vec<UserId> {
    let len = self.len.load(Ordering::Acquire).min(self.slots.len());
    self.slots[..len]
      .iter()
      .map(|s| UserId(s.load(Ordering::Relaxed)))
      .collect()
  }
}
