//! Bounded ledger of local inputs not yet confirmed by the server

use serde::Serialize;
use shared::InputCommand;
use std::collections::VecDeque;

pub const DEFAULT_LEDGER_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub sequence_number: u32,
    pub command: InputCommand,
    /// Wall clock when the prediction was applied locally, epoch milliseconds.
    pub applied_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionLedger {
    entries: VecDeque<Prediction>,
    capacity: usize,
    last_sequence: Option<u32>,
}

impl PredictionLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            last_sequence: None,
        }
    }

    /// Appends a command, evicting the oldest entries past capacity.
    ///
    /// Returns false, leaving the ledger untouched, when the sequence number
    /// does not increase on the last one recorded.
    pub fn record(&mut self, command: InputCommand, applied_at: u64) -> bool {
        let sequence_number = command.sequence_number;
        if matches!(self.last_sequence, Some(last) if sequence_number <= last) {
            return false;
        }

        self.last_sequence = Some(sequence_number);
        self.entries.push_back(Prediction {
            sequence_number,
            command,
            applied_at,
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        true
    }

    /// Drops every entry up to and including `sequence_number`. Returns how many went.
    pub fn acknowledge(&mut self, sequence_number: u32) -> usize {
        let before = self.entries.len();
        while matches!(self.entries.front(), Some(p) if p.sequence_number <= sequence_number) {
            self.entries.pop_front();
        }
        before - self.entries.len()
    }

    /// Empties the ledger. Sequence numbers must still increase afterwards.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last_sequence(&self) -> Option<u32> {
        self.last_sequence
    }

    pub fn oldest(&self) -> Option<&Prediction> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prediction> {
        self.entries.iter()
    }
}

impl Default for PredictionLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Direction, InputKind};

    fn command(sequence_number: u32) -> InputCommand {
        InputCommand {
            sequence_number,
            kind: InputKind::Move {
                direction: Direction::Left,
            },
            client_timestamp: 1_000 + sequence_number as u64,
        }
    }

    #[test]
    fn test_ledger_evicts_oldest_first() {
        let mut ledger = PredictionLedger::default();
        for seq in 1..=250 {
            assert!(ledger.record(command(seq), 0));
            assert!(ledger.len() <= 100);
        }
        assert_eq!(ledger.len(), 100);
        assert_eq!(ledger.oldest().unwrap().sequence_number, 151);
        let sequences: Vec<u32> = ledger.iter().map(|p| p.sequence_number).collect();
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_ledger_rejects_stale_sequence() {
        let mut ledger = PredictionLedger::new(10);
        assert!(ledger.record(command(5), 0));
        assert!(!ledger.record(command(5), 0));
        assert!(!ledger.record(command(3), 0));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.last_sequence(), Some(5));
    }

    #[test]
    fn test_acknowledge_trims_prefix() {
        let mut ledger = PredictionLedger::new(10);
        for seq in [2, 4, 6, 8] {
            ledger.record(command(seq), 0);
        }
        assert_eq!(ledger.acknowledge(5), 2);
        assert_eq!(ledger.oldest().unwrap().sequence_number, 6);
        assert_eq!(ledger.acknowledge(1), 0);
    }

    #[test]
    fn test_clear_keeps_sequence_floor() {
        let mut ledger = PredictionLedger::new(10);
        ledger.record(command(9), 0);
        ledger.clear();
        assert!(ledger.is_empty());
        assert!(!ledger.record(command(9), 0));
        assert!(ledger.record(command(10), 0));
    }
}
