use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Ack, MetricsSink, Point};
use crate::error::WriteError;

/// Keeps the most recent `capacity` points in process.
pub struct MemorySink {
    capacity: usize,
    points: Mutex<VecDeque<Point>>,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            points: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn points(&self) -> Vec<Point> {
        self.points.lock().iter().cloned().collect()
    }

    pub fn measurement(&self, name: &str) -> Vec<Point> {
        self.points
            .lock()
            .iter()
            .filter(|p| p.measurement == name)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MetricsSink for MemorySink {
    async fn write(&self, point: &Point) -> Result<Ack, WriteError> {
        point.validate()?;

        let mut points = self.points.lock();
        if points.len() == self.capacity {
            points.pop_front();
        }
        points.push_back(point.clone());
        Ok(Ack::default())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
