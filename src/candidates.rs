//! Candidate selection for shuffle pools.
//!
//! Pure functions over [`Candidate`] lists: rule filtering, album ordering,
//! memories date windows, anti-repeat thinning and round-robin interleaving
//! across per-year buckets.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Bounds for [`ShuffleRules::minimum_pixel_dimension`].
pub const MIN_PIXEL_DIMENSION_RANGE: (u32, u32) = (200, 4000);

/// Upper bound for per-year candidate limits.
pub const MAX_PER_YEAR_LIMIT: usize = 250;

/// A photo offered by an asset source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub is_favourite: bool,
    pub is_screenshot: bool,
    pub is_hidden: bool,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

impl Candidate {
    pub fn short_side(&self) -> u32 {
        self.pixel_width.min(self.pixel_height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
    Random,
}

/// Which assets may enter an album pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShuffleRules {
    pub include_screenshots: bool,
    /// Shorter side must be at least this many pixels.
    pub minimum_pixel_dimension: u32,
    pub sort_order: SortOrder,
}

impl Default for ShuffleRules {
    fn default() -> Self {
        Self {
            include_screenshots: false,
            minimum_pixel_dimension: 800,
            sort_order: SortOrder::NewestFirst,
        }
    }
}

impl ShuffleRules {
    pub fn normalised(&self) -> Self {
        let (lo, hi) = MIN_PIXEL_DIMENSION_RANGE;
        Self {
            minimum_pixel_dimension: self.minimum_pixel_dimension.clamp(lo, hi),
            ..self.clone()
        }
    }

    /// Hidden assets never pass; screenshots only when allowed; the shorter
    /// side must meet the minimum. Blank ids never pass.
    pub fn admits(&self, candidate: &Candidate) -> bool {
        let rules = self.normalised();
        !candidate.id.trim().is_empty()
            && !candidate.is_hidden
            && (rules.include_screenshots || !candidate.is_screenshot)
            && candidate.short_side() >= rules.minimum_pixel_dimension
    }

    pub fn filter(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        candidates.into_iter().filter(|c| self.admits(c)).collect()
    }
}

/// Order an album pool. Ties on date break by id.
pub fn order_for_album(mut candidates: Vec<Candidate>, order: SortOrder) -> Vec<Candidate> {
    match order {
        SortOrder::NewestFirst => {
            candidates.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)))
        }
        SortOrder::OldestFirst => {
            candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
        }
        SortOrder::Random => candidates.shuffle(&mut rand::rng()),
    }
    candidates
}

// =============================================================================
// Memories
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoriesMode {
    OnThisDay,
    OnThisWeek,
}

impl MemoriesMode {
    pub fn as_str(self) -> &'static str {
        match self {
            MemoriesMode::OnThisDay => "on_this_day",
            MemoriesMode::OnThisWeek => "on_this_week",
        }
    }

    /// `memories:<mode>:<MM-DD>` or `memories:<mode>:weekOf-<MM-DD>`.
    pub fn source_id(self, now: DateTime<Utc>) -> String {
        let md = format!("{:02}-{:02}", now.month(), now.day());
        match self {
            MemoriesMode::OnThisDay => format!("memories:{}:{md}", self.as_str()),
            MemoriesMode::OnThisWeek => format!("memories:{}:weekOf-{md}", self.as_str()),
        }
    }

    /// Captures closer than this to the last kept one are near-duplicates.
    pub fn anti_repeat_window(self) -> Duration {
        match self {
            MemoriesMode::OnThisDay => Duration::minutes(30),
            MemoriesMode::OnThisWeek => Duration::hours(3),
        }
    }

    /// Thinning is abandoned when it would keep fewer than this.
    pub fn min_keep(self, limit: usize) -> usize {
        let floor = match self {
            MemoriesMode::OnThisDay => 6,
            MemoriesMode::OnThisWeek => 10,
        };
        floor.min(clamp_per_year(limit))
    }

    /// Half-open window in `year` for the month/day of `now`: the day
    /// itself, or the Monday-started week containing it. `None` when that
    /// date does not exist in `year`.
    pub fn date_window(
        self,
        year: i32,
        now: DateTime<Utc>,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let day = NaiveDate::from_ymd_opt(year, now.month(), now.day())?;
        let (start, len) = match self {
            MemoriesMode::OnThisDay => (day, Duration::days(1)),
            MemoriesMode::OnThisWeek => {
                let offset = i64::from(day.weekday().num_days_from_monday());
                (day - Duration::days(offset), Duration::days(7))
            }
        };
        let start = Utc.from_utc_datetime(&start.and_hms_opt(0, 0, 0)?);
        Some((start, start + len))
    }
}

impl fmt::Display for MemoriesMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoriesMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "on_this_day" => Ok(MemoriesMode::OnThisDay),
            "week" | "on_this_week" => Ok(MemoriesMode::OnThisWeek),
            other => Err(format!("unknown memories mode '{other}' (expected day or week)")),
        }
    }
}

pub fn clamp_per_year(limit: usize) -> usize {
    limit.clamp(1, MAX_PER_YEAR_LIMIT)
}

/// Favourites first, then newest, then id.
pub fn sort_for_memories(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.is_favourite
            .cmp(&a.is_favourite)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Keep the first candidate, every favourite, and any candidate at least
/// `window` away from the last kept one. Stops at `limit` kept.
pub fn thin_by_window(candidates: &[Candidate], window: Duration, limit: usize) -> Vec<Candidate> {
    let mut kept: Vec<Candidate> = Vec::new();
    let mut last_kept: Option<DateTime<Utc>> = None;

    for candidate in candidates {
        if kept.len() >= limit {
            break;
        }
        let keep = match last_kept {
            None => true,
            Some(_) if candidate.is_favourite => true,
            Some(last) => (last - candidate.created_at).abs() >= window,
        };
        if keep {
            last_kept = Some(candidate.created_at);
            kept.push(candidate.clone());
        }
    }
    kept
}

/// Anti-repeat thinning with the mode's min-keep floor.
///
/// Sparse lists (no longer than the floor) and lists that thinning would
/// leave below the floor come back untouched, capped at the limit.
pub fn thin_for_anti_repeat(
    candidates: &[Candidate],
    mode: MemoriesMode,
    per_year_limit: usize,
) -> Vec<Candidate> {
    let limit = clamp_per_year(per_year_limit);
    let min_keep = mode.min_keep(limit);
    let capped = || candidates.iter().take(limit).cloned().collect();

    if candidates.len() <= min_keep {
        return capped();
    }
    let kept = thin_by_window(candidates, mode.anti_repeat_window(), limit);
    if kept.len() < min_keep {
        return capped();
    }
    kept
}

/// Round-robin across buckets (first bucket first) until `max_entries`,
/// skipping blank and repeated ids.
pub fn interleave_buckets(buckets: &[Vec<String>], max_entries: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let longest = buckets.iter().map(Vec::len).max().unwrap_or(0);

    'rounds: for round in 0..longest {
        for bucket in buckets {
            if out.len() >= max_entries {
                break 'rounds;
            }
            let Some(id) = bucket.get(round).map(|id| id.trim()) else {
                continue;
            };
            if !id.is_empty() && seen.insert(id.to_string()) {
                out.push(id.to_string());
            }
        }
    }
    out
}
