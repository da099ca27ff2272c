//! Checkpoint progress and race ranking

use serde::{Deserialize, Serialize};

use super::circuit::Checkpoint;
use super::ids::UserId;

/// Progress of one user around the circuit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointEntry {
    pub user_id: UserId,
    pub display_name: String,
    /// Index of the last checkpoint crossed
    pub checkpoint_index: usize,
    /// Checkpoints crossed since joining
    pub checkpoints_crossed: u32,
    pub laps: u32,
    /// Monotonic ms of the last crossing (join time until the first one)
    pub last_checkpoint_at: u64,
    /// Time from joining to the last crossing
    pub elapsed_ms: u64,
    #[serde(skip)]
    joined_at: u64,
}

impl CheckpointEntry {
    pub fn new(user_id: UserId, display_name: String, now: u64) -> Self {
        Self {
            user_id,
            display_name,
            checkpoint_index: 0,
            checkpoints_crossed: 0,
            laps: 0,
            last_checkpoint_at: now,
            elapsed_ms: 0,
            joined_at: now,
        }
    }

    /// Index of the checkpoint this user must reach next
    pub fn next_index(&self, checkpoint_count: usize) -> usize {
        if checkpoint_count == 0 {
            return 0;
        }
        (self.checkpoint_index + 1) % checkpoint_count
    }

    /// Record a crossing if `position` reached the next checkpoint.
    /// Returns true when progress changed.
    pub fn observe(&mut self, position: glam::Vec3, checkpoints: &[Checkpoint], now: u64) -> bool {
        if checkpoints.len() < 2 {
            return false;
        }
        let next = self.next_index(checkpoints.len());
        if !checkpoints[next].contains(position) {
            return false;
        }

        self.checkpoint_index = next;
        self.checkpoints_crossed += 1;
        if next == 0 {
            self.laps += 1;
        }
        self.last_checkpoint_at = now;
        self.elapsed_ms = now.saturating_sub(self.joined_at);
        true
    }
}

/// Rank entries: most checkpoints first, earliest crossing wins ties, then user id
pub fn rank(entries: impl IntoIterator<Item = CheckpointEntry>) -> Vec<CheckpointEntry> {
    let mut ranked: Vec<CheckpointEntry> = entries.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.checkpoints_crossed
            .cmp(&a.checkpoints_crossed)
            .then(a.last_checkpoint_at.cmp(&b.last_checkpoint_at))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn square() -> Vec<Checkpoint> {
        [(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]
            .iter()
            .map(|&(x, z)| Checkpoint {
                position: Vec3::new(x, 0.0, z),
                radius: 1.0,
            })
            .collect()
    }

    #[test]
    fn checkpoints_must_be_taken_in_order() {
        let cps = square();
        let mut entry = CheckpointEntry::new(UserId::from("u"), "U".into(), 0);
        // Skipping ahead does nothing
        assert!(!entry.observe(Vec3::new(10.0, 0.0, 10.0), &cps, 5));
        assert!(entry.observe(Vec3::new(10.0, 0.0, 0.0), &cps, 10));
        assert_eq!(entry.checkpoint_index, 1);
        // Standing on the same gate does not count twice
        assert!(!entry.observe(Vec3::new(10.0, 0.0, 0.0), &cps, 11));
    }

    #[test]
    fn returning_to_start_completes_a_lap() {
        let cps = square();
        let mut entry = CheckpointEntry::new(UserId::from("u"), "U".into(), 100);
        for (i, cp) in cps.iter().cycle().skip(1).take(4).enumerate() {
            assert!(entry.observe(cp.position, &cps, 200 + i as u64));
        }
        assert_eq!(entry.laps, 1);
        assert_eq!(entry.checkpoints_crossed, 4);
        assert_eq!(entry.elapsed_ms, 103);
    }

    #[test]
    fn ranking_prefers_progress_then_earlier_time() {
        let mut a = CheckpointEntry::new(UserId::from("a"), "A".into(), 0);
        let mut b = CheckpointEntry::new(UserId::from("b"), "B".into(), 0);
        let mut c = CheckpointEntry::new(UserId::from("c"), "C".into(), 0);
        a.checkpoints_crossed = 3;
        a.last_checkpoint_at = 500;
        b.checkpoints_crossed = 3;
        b.last_checkpoint_at = 400;
        c.checkpoints_crossed = 5;
        c.last_checkpoint_at = 900;

        let ranked: Vec<String> = rank([a, b, c])
            .into_iter()
            .map(|e| e.user_id.to_string())
            .collect();
        assert_eq!(ranked, vec!["c", "b", "a"]);
    }
}
