//! Watch channels and watch sets.
//!
//! A table publishes a single monotonically increasing generation counter,
//! bumped once per commit that touches it. A [`WatchChannel`] captures the
//! generation a reader observed; it is "signalled" once the live generation
//! has moved past that snapshot. This is coarser than a per-key watch -- it
//! fires on *any* write to the table, not just ones touching the read's key
//! range -- but spurious wakeups are explicitly licensed ("no change without
//! signal" is the only hard guarantee), so a table-wide watch is sufficient.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// The sending half lives on the table; one per table, held by the [`crate::db::Db`].
#[derive(Clone)]
pub(crate) struct TableWatch {
    tx: watch::Sender<u64>,
}

impl TableWatch {
    pub(crate) fn new() -> Self {
        TableWatch { tx: watch::Sender::new(0) }
    }

    /// Bumps the generation, signalling every outstanding [`WatchChannel`]
    /// derived from a read that happened before this call.
    pub(crate) fn bump(&self) {
        self.tx.send_modify(|gen| *gen = gen.wrapping_add(1));
    }

    /// The current generation, for a caller snapshotting several tables'
    /// generations alongside a `DbState` read so the two stay consistent.
    pub(crate) fn generation(&self) -> u64 {
        *self.tx.borrow()
    }

    /// Builds a watch channel pinned to a generation captured earlier,
    /// rather than the live one -- see [`generation`](Self::generation).
    pub(crate) fn watch_from(&self, baseline: u64) -> WatchChannel {
        WatchChannel { rx: self.tx.subscribe(), baseline }
    }
}

/// A single watch channel, captured at a point-in-time generation. Once the
/// table's generation has advanced past `baseline`, the channel is
/// considered signalled -- the moral equivalent of closing a channel.
#[derive(Clone)]
pub struct WatchChannel {
    rx: watch::Receiver<u64>,
    baseline: u64,
}

impl WatchChannel {
    pub fn is_signalled(&self) -> bool {
        *self.rx.borrow() != self.baseline
    }
}

/// A collector of watch channels with a bounded wait primitive.
#[derive(Default)]
pub struct WatchSet {
    channels: Vec<WatchChannel>,
}

impl WatchSet {
    pub fn new() -> Self {
        WatchSet { channels: Vec::new() }
    }

    pub fn add(&mut self, channel: WatchChannel) {
        self.channels.push(channel);
    }

    pub fn add_all(&mut self, channels: impl IntoIterator<Item = WatchChannel>) {
        self.channels.extend(channels);
    }

    /// Returns `true` if any channel fires before `deadline`, `false` if the
    /// deadline passes first. Never returns an error: expiry is a normal,
    /// non-exceptional outcome.
    pub async fn watch(&mut self, deadline: Instant) -> bool {
        loop {
            if self.channels.iter().any(WatchChannel::is_signalled) {
                return true;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining == Duration::ZERO {
                return false;
            }

            if self.channels.is_empty() {
                tokio::time::sleep(remaining).await;
                return false;
            }

            let mut pending: Vec<_> = self
                .channels
                .iter_mut()
                .map(|c| Box::pin(c.rx.changed()))
                .collect();

            let wait = async {
                loop {
                    let (result, index, _) = futures::future::select_all(&mut pending).await;
                    if result.is_ok() {
                        return true;
                    }
                    pending.remove(index);
                    if pending.is_empty() {
                        return false;
                    }
                }
            };

            match tokio::time::timeout_at(deadline, wait).await {
                Ok(_) => continue, // recheck which channel actually moved
                Err(_) => return false,
            }
        }
    }
}
