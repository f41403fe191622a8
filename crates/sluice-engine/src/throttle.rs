//! Rate limiting for data-loss diagnostics.
//!
//! A property that keeps losing primary-source updates to failed
//! consistency matching would otherwise log once per update. The
//! decade-based schedule below decays to roughly one message per
//! million losses.

/// Decide whether the `streak`-th consecutive data loss is logged.
///
/// Emits on every loss up to 10, every 10th up to 100, every 100th up
/// to 1 000, and so on; above one million the interval stays at one
/// million.
pub fn should_log_data_loss(streak: u64) -> bool {
    if streak == 0 {
        return false;
    }
    if streak <= 10 {
        return true;
    }
    let mut interval = 10;
    while interval < 1_000_000 {
        if streak <= interval * 10 {
            return streak % interval == 0;
        }
        interval *= 10;
    }
    streak % 1_000_000 == 0
}
