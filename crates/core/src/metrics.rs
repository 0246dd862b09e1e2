use serde::{Deserialize, Serialize};

pub const SCORE_CEILING: u32 = 100;

/// Ten points per roast, capped at 100.
pub fn karma_percent(roast_count: u64) -> u32 {
    cap(roast_count.saturating_mul(10))
}

/// floor(3.5 * roast_count), capped at 100. Integer form of the same value.
pub fn cringe_score(roast_count: u64) -> u32 {
    cap(roast_count.saturating_mul(7) / 2)
}

fn cap(raw: u64) -> u32 {
    u32::try_from(raw.min(u64::from(SCORE_CEILING))).unwrap_or(SCORE_CEILING)
}

/// Counter plus the two scores derived from it. Never stored; rebuilt from the count.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scoreboard {
    pub roast_count: u64,
    pub karma_percent: u32,
    pub cringe_score: u32,
}

impl Scoreboard {
    pub fn from_count(roast_count: u64) -> Self {
        Self {
            roast_count,
            karma_percent: karma_percent(roast_count),
            cringe_score: cringe_score(roast_count),
        }
    }
}
