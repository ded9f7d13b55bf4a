use super::{AckCallback, PipelineChannel, memory::MemoryPipelineChannel, min_position};
use crate::error::ChannelError;
use async_trait::async_trait;
use model::{
    position::Position,
    records::record::{DataRecord, Record},
};
use std::time::Duration;
use tokio::sync::watch;

/// Several memory lanes behind one producer.
///
/// Data records go to the lane chosen by a hash of their table and unique key,
/// so changes of one row are always consumed in order by the same importer.
/// Placeholder and finished records reach every lane. The acknowledged
/// position reported upstream is the lowest one across lanes.
pub struct MultiplexPipelineChannel {
    lanes: Vec<MemoryPipelineChannel>,
    acked: Vec<watch::Sender<Position>>,
    ack_callback: Option<AckCallback>,
}

impl MultiplexPipelineChannel {
    pub fn new(lane_count: usize, lane_capacity: usize, ack_callback: Option<AckCallback>) -> Self {
        let lane_count = lane_count.max(1);
        Self {
            lanes: (0..lane_count)
                .map(|_| MemoryPipelineChannel::new(lane_capacity, None))
                .collect(),
            acked: (0..lane_count)
                .map(|_| watch::channel(Position::Placeholder).0)
                .collect(),
            ack_callback,
        }
    }

    /// Lane of a data record.
    pub fn route(&self, record: &DataRecord) -> usize {
        let hash = blake3::hash(record.routing_key().as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash.as_bytes()[..8]);
        (u64::from_le_bytes(head) % self.lanes.len() as u64) as usize
    }

    fn lane(&self, lane: usize) -> Result<&MemoryPipelineChannel, ChannelError> {
        self.lanes.get(lane).ok_or(ChannelError::NoSuchLane {
            lane,
            lanes: self.lanes.len(),
        })
    }
}

#[async_trait]
impl PipelineChannel for MultiplexPipelineChannel {
    async fn push(&self, records: Vec<Record>) -> Result<(), ChannelError> {
        let mut per_lane: Vec<Vec<Record>> = vec![Vec::new(); self.lanes.len()];
        for record in records {
            match &record {
                Record::Data(data) => {
                    let lane = self.route(data);
                    per_lane[lane].push(record);
                }
                Record::Placeholder { .. } | Record::Finished { .. } => {
                    for lane in per_lane.iter_mut() {
                        lane.push(record.clone());
                    }
                }
            }
        }

        for (lane, records) in self.lanes.iter().zip(per_lane) {
            if !records.is_empty() {
                lane.push(records).await?;
            }
        }
        Ok(())
    }

    async fn fetch(
        &self,
        lane: usize,
        max_records: usize,
        timeout: Duration,
    ) -> Result<Vec<Record>, ChannelError> {
        self.lane(lane)?.fetch(0, max_records, timeout).await
    }

    fn ack(&self, lane: usize, records: &[Record]) {
        let (Some(acked), Some(last)) = (self.acked.get(lane), records.last()) else {
            return;
        };
        acked.send_replace(last.position().clone());

        let Some(callback) = &self.ack_callback else {
            return;
        };
        let positions: Vec<Position> = self.acked.iter().map(|p| p.borrow().clone()).collect();
        if let Some(min) = min_position(&positions) {
            callback(min);
        }
    }

    fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    fn close(&self) {
        for lane in &self.lanes {
            lane.close();
        }
    }

    fn is_closed(&self) -> bool {
        self.lanes.iter().all(|lane| lane.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::records::record::{Column, Operation};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn row(id: i64, lsn: u64) -> Record {
        DataRecord::new("t_order", Operation::Insert, Position::Wal { lsn })
            .with_column(Column::new("order_id", json!(id), true))
            .into()
    }

    fn order_id(record: &Record) -> Option<i64> {
        record
            .as_data()
            .and_then(|r| r.column("order_id"))
            .and_then(|c| c.value.as_i64())
    }

    #[tokio::test]
    async fn same_key_lands_in_same_lane_in_order() {
        let channel = MultiplexPipelineChannel::new(4, 100, None);
        let records: Vec<Record> = (0..20).flat_map(|lsn| [row(7, lsn), row(lsn as i64, lsn)]).collect();
        channel.push(records).await.unwrap();

        let mut seen_sevens = Vec::new();
        for lane in 0..channel.lane_count() {
            let fetched = channel.fetch(lane, 100, Duration::from_millis(10)).await.unwrap();
            let sevens: Vec<u64> = fetched
                .iter()
                .filter(|r| order_id(r) == Some(7))
                .map(|r| match r.position() {
                    Position::Wal { lsn } => *lsn,
                    _ => unreachable!(),
                })
                .collect();
            if !sevens.is_empty() {
                seen_sevens.push(sevens);
            }
        }

        assert_eq!(seen_sevens.len(), 1);
        let lsns = &seen_sevens[0];
        assert_eq!(lsns.len(), 21);
        assert!(lsns.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn placeholders_are_broadcast() {
        let channel = MultiplexPipelineChannel::new(3, 10, None);
        channel
            .push(vec![Record::Finished {
                position: Position::Finished,
            }])
            .await
            .unwrap();

        for lane in 0..3 {
            let fetched = channel.fetch(lane, 10, Duration::from_millis(10)).await.unwrap();
            assert_eq!(fetched.len(), 1);
            assert!(fetched[0].is_finished());
        }
    }

    #[tokio::test]
    async fn progress_is_lowest_across_lanes() {
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        let channel = MultiplexPipelineChannel::new(
            2,
            10,
            Some(Arc::new(move |p: Position| sink.lock().unwrap().push(p))),
        );

        let at = |lsn| Record::Placeholder {
            position: Position::Wal { lsn },
        };
        channel.ack(0, &[at(50)]);
        channel.ack(1, &[at(20)]);
        channel.ack(1, &[at(80)]);

        assert_eq!(
            *reported.lock().unwrap(),
            vec![
                Position::Placeholder,
                Position::Wal { lsn: 20 },
                Position::Wal { lsn: 50 },
            ]
        );
    }

    #[tokio::test]
    async fn close_reaches_every_lane() {
        let channel = MultiplexPipelineChannel::new(2, 1, None);
        channel.close();
        assert!(channel.is_closed());
        assert_eq!(channel.push(vec![row(1, 1)]).await, Err(ChannelError::Closed));
        assert_eq!(
            channel.fetch(1, 1, Duration::from_millis(1)).await,
            Err(ChannelError::Closed)
        );
    }
}
