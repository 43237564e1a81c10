use std::collections::HashSet;

use crate::partition::Partition;

/// A partition as requested at one zoom tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub zoom: u8,
    pub low: String,
    pub high: String,
}

impl PartitionKey {
    pub fn new(zoom: u8, partition: &Partition) -> Self {
        Self {
            zoom,
            low: partition.low.clone(),
            high: partition.high.clone(),
        }
    }
}

/// Every `(zoom, range)` pair requested since the last relocation reset.
///
/// Membership is permanent: a range whose query later fails stays recorded
/// and is not requested again at that zoom.
#[derive(Debug, Default)]
pub struct PartitionLedger {
    seen: HashSet<PartitionKey>,
}

impl PartitionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the candidates not seen before at `zoom` and return them, in
    /// input order. Duplicates within `candidates` are returned once.
    pub fn claim(&mut self, zoom: u8, candidates: Vec<Partition>) -> Vec<Partition> {
        candidates
            .into_iter()
            .filter(|p| self.seen.insert(PartitionKey::new(zoom, p)))
            .collect()
    }

    pub fn contains(&self, zoom: u8, partition: &Partition) -> bool {
        self.seen.contains(&PartitionKey::new(zoom, partition))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}
