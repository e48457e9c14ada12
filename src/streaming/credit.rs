//! Credit computation for inbound paths.
//!
//! A manager runs one credit round per incoming batch, per `ack_batch` from downstream and per
//! tick. Each round splits the free downstream capacity between the inbound paths in proportion
//! to their priority weight.

use super::inbound_path::InboundPath;

/// Credit for a freshly accepted path: at most one batch.
pub fn initial_credit(downstream_capacity: usize, path: &InboundPath) -> usize {
    downstream_capacity
        .min(path.desired_batch_size)
        .min(path.max_credit)
}

/// Splits the free capacity between `paths`.
///
/// Returns one grant per path, in order. Capacity already handed out as credit counts against
/// `downstream_capacity`, and no path is pushed above its `max_credit`. Whatever the weighted
/// split leaves over is handed out one element at a time, starting at `offset` so that rounding
/// does not always favour the same path.
pub fn assign_credit(paths: &[InboundPath], downstream_capacity: usize, offset: usize) -> Vec<usize> {
    let mut grants = vec![0; paths.len()];
    if paths.is_empty() {
        return grants;
    }
    let headroom: Vec<usize> = paths
        .iter()
        .map(|p| p.max_credit.saturating_sub(p.assigned_credit))
        .collect();
    let assigned: usize = paths.iter().map(|p| p.assigned_credit).sum();
    let total_headroom: usize = headroom.iter().sum();
    let available = downstream_capacity
        .saturating_sub(assigned)
        .min(total_headroom);
    if available == 0 {
        return grants;
    }
    let total_weight: usize = paths
        .iter()
        .zip(&headroom)
        .filter(|(_, room)| **room > 0)
        .map(|(p, _)| p.priority.weight())
        .sum();
    let mut granted = 0;
    for (i, path) in paths.iter().enumerate() {
        if headroom[i] == 0 {
            continue;
        }
        let share = available * path.priority.weight() / total_weight;
        grants[i] = share.min(headroom[i]);
        granted += grants[i];
    }
    let mut leftover = available - granted;
    let n = paths.len();
    while leftover > 0 {
        let mut progressed = false;
        for k in 0..n {
            let i = (offset + k) % n;
            if leftover > 0 && grants[i] < headroom[i] {
                grants[i] += 1;
                leftover -= 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    grants
}

/// Whether a round granting `grant` to `path` warrants an `ack_batch`.
///
/// Unacknowledged batches always get acknowledged. Otherwise small grants are held back until
/// they add up to a batch, unless the producer is out of credit entirely.
pub fn should_ack(path: &InboundPath, grant: usize) -> bool {
    !path.up_to_date()
        || grant >= path.desired_batch_size
        || (grant > 0 && path.assigned_credit == 0)
}
