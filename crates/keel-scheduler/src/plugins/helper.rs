use crate::framework::status::Status;
use crate::types::NodeScore;

/// Rescale raw scores onto `[0, max_priority]`.
///
/// The range is anchored at zero: `lo = min(0, lowest)`, `hi = highest`,
/// and each score becomes `max_priority * (s - lo) / (hi - lo)`, or
/// `max_priority` minus that when `reverse` is set. When every raw score is
/// the same there is nothing to rank on and every node gets `max_priority`
/// in either mode.
pub fn default_normalize_score(max_priority: i64, reverse: bool, scores: &mut [NodeScore]) -> Status {
    let (lowest, highest) = match (
        scores.iter().map(|s| s.score).min(),
        scores.iter().map(|s| s.score).max(),
    ) {
        (Some(lowest), Some(highest)) => (lowest, highest),
        _ => return Status::success(),
    };

    if lowest == highest {
        for score in scores.iter_mut() {
            score.score = max_priority;
        }
        return Status::success();
    }

    let lo = lowest.min(0) as i128;
    let span = highest as i128 - lo;
    for score in scores.iter_mut() {
        let scaled = (max_priority as i128 * (score.score as i128 - lo) / span) as i64;
        score.score = if reverse {
            max_priority - scaled
        } else {
            scaled
        };
    }

    Status::success()
}
