//! Filters single-frame glitches out of progress telemetry.

use std::collections::VecDeque;

pub const PROGRESS_HISTORY_LEN: usize = 5;
const NOISE_MIN_JUMP: u8 = 10;
/// Jumps this large are a new print (or its completion), never noise.
const NOISE_MAX_JUMP: u8 = 90;
const SMOOTHING_WINDOW: usize = 3;

/// Returns the progress value to accept given the accepted history (oldest first).
pub fn smooth_progress(history: &VecDeque<u8>, raw: u8) -> u8 {
    let raw = raw.min(100);
    let Some(&last) = history.back() else {
        return raw;
    };

    let jump = raw.abs_diff(last);
    if jump <= NOISE_MIN_JUMP || jump >= NOISE_MAX_JUMP || history.len() < SMOOTHING_WINDOW {
        return raw;
    }

    let recent: u32 = history
        .iter()
        .rev()
        .take(SMOOTHING_WINDOW)
        .map(|&v| u32::from(v))
        .sum();
    let average = f64::from(recent) / SMOOTHING_WINDOW as f64;
    let pulled = (f64::from(raw) + 2.0 * average) / 3.0;
    pulled.round().clamp(0.0, 100.0) as u8
}

/// Appends an accepted value, evicting the oldest past the window.
pub fn record_progress(history: &mut VecDeque<u8>, accepted: u8) {
    history.push_back(accepted);
    while history.len() > PROGRESS_HISTORY_LEN {
        history.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(values: &[u8]) -> VecDeque<u8> {
        values.iter().copied().collect()
    }

    #[test]
    fn noisy_jump_is_pulled_toward_recent_average() {
        assert_eq!(smooth_progress(&history(&[70, 72, 71]), 85), 76);
    }

    #[test]
    fn large_drop_below_ninety_is_still_smoothed() {
        // (5 + 2 * 71) / 3 = 49
        assert_eq!(smooth_progress(&history(&[70, 72, 71]), 5), 49);
    }

    #[test]
    fn jump_of_eighty_seven_is_smoothed() {
        // (98 + 2 * 11) / 3 = 40
        assert_eq!(smooth_progress(&history(&[10, 12, 11]), 98), 40);
    }

    #[test]
    fn jump_of_ninety_or_more_is_accepted() {
        assert_eq!(smooth_progress(&history(&[5]), 98), 98);
        assert_eq!(smooth_progress(&history(&[3, 4, 5]), 95), 95);
        assert_eq!(smooth_progress(&history(&[97, 98, 99]), 2), 2);
    }

    #[test]
    fn short_history_accepts_raw_sample() {
        assert_eq!(smooth_progress(&history(&[10, 11]), 40), 40);
    }

    #[test]
    fn small_steps_pass_through() {
        assert_eq!(smooth_progress(&history(&[40, 41, 42]), 52), 52);
        assert_eq!(smooth_progress(&VecDeque::new(), 63), 63);
    }

    #[test]
    fn average_uses_only_last_three_samples() {
        // last three are 20, 21, 22 -> average 21; (40 + 42) / 3 = 27.33
        assert_eq!(smooth_progress(&history(&[90, 90, 20, 21, 22]), 40), 27);
    }

    #[test]
    fn history_keeps_five_newest_values() {
        let mut h = VecDeque::new();
        for value in 1..=7 {
            record_progress(&mut h, value);
        }
        assert_eq!(h, history(&[3, 4, 5, 6, 7]));
    }
}
