use crate::error::ChannelError;
use async_trait::async_trait;
use model::{position::Position, records::record::Record};
use std::{cmp::Ordering, sync::Arc, time::Duration};

pub mod factory;
pub mod memory;
pub mod multiplex;

/// Receives the position up to which records were committed by the consumer side.
pub type AckCallback = Arc<dyn Fn(Position) + Send + Sync>;

/// Bounded conduit between one dumper and the importers of a task.
///
/// A channel has one or more lanes; each importer consumes exactly one lane.
/// `push` waits while the target lane is full, which is the only backpressure
/// between reading and writing.
#[async_trait]
pub trait PipelineChannel: Send + Sync {
    /// Enqueues `records`, waiting for capacity. Fails once the channel is closed.
    async fn push(&self, records: Vec<Record>) -> Result<(), ChannelError>;

    /// Takes up to `max_records` from `lane`, returning early once `timeout`
    /// elapses. An empty result means nothing arrived in time; a closed and
    /// drained lane yields [`ChannelError::Closed`].
    async fn fetch(
        &self,
        lane: usize,
        max_records: usize,
        timeout: Duration,
    ) -> Result<Vec<Record>, ChannelError>;

    /// Reports `records` fetched from `lane` as committed.
    fn ack(&self, lane: usize, records: &[Record]);

    fn lane_count(&self) -> usize;

    /// Wakes every pending `push` and `fetch`; both fail from then on.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Lowest of `positions`, skipping positions incomparable with the current minimum.
pub(crate) fn min_position<'a>(positions: impl IntoIterator<Item = &'a Position>) -> Option<Position> {
    let mut min: Option<&Position> = None;
    for position in positions {
        min = match min {
            None => Some(position),
            Some(current) => match position.partial_cmp(current) {
                Some(Ordering::Less) => Some(position),
                _ => Some(current),
            },
        };
    }
    min.cloned()
}
