use super::{AckCallback, PipelineChannel};
use crate::error::ChannelError;
use async_trait::async_trait;
use model::records::record::Record;
use std::time::Duration;
use tokio::{
    sync::{Mutex, mpsc},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

/// Single-lane bounded in-process queue.
pub struct MemoryPipelineChannel {
    sender: mpsc::Sender<Record>,
    receiver: Mutex<mpsc::Receiver<Record>>,
    closed: CancellationToken,
    ack_callback: Option<AckCallback>,
}

impl MemoryPipelineChannel {
    pub fn new(capacity: usize, ack_callback: Option<AckCallback>) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(receiver),
            closed: CancellationToken::new(),
            ack_callback,
        }
    }

    fn check_lane(lane: usize) -> Result<(), ChannelError> {
        if lane == 0 {
            Ok(())
        } else {
            Err(ChannelError::NoSuchLane { lane, lanes: 1 })
        }
    }
}

#[async_trait]
impl PipelineChannel for MemoryPipelineChannel {
    async fn push(&self, records: Vec<Record>) -> Result<(), ChannelError> {
        for record in records {
            tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(ChannelError::Closed),
                sent = self.sender.send(record) => sent.map_err(|_| ChannelError::Closed)?,
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
        Self::check_lane(lane)?;
        if max_records == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + timeout;
        let mut receiver = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(ChannelError::Closed),
            guard = self.receiver.lock() => guard,
        };

        let first = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(ChannelError::Closed),
            record = receiver.recv() => record.ok_or(ChannelError::Closed)?,
            _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
        };

        let mut records = Vec::with_capacity(max_records.min(1024));
        records.push(first);
        while records.len() < max_records {
            match receiver.try_recv() {
                Ok(record) => records.push(record),
                Err(_) => break,
            }
        }
        Ok(records)
    }

    fn ack(&self, _lane: usize, records: &[Record]) {
        if let (Some(callback), Some(last)) = (&self.ack_callback, records.last()) {
            callback(last.position().clone());
        }
    }

    fn lane_count(&self) -> usize {
        1
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
