/// Monthly ranking: merge, sort and render.

use crate::pairing::Totals;

/// One line of the ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedEntry {
    pub rank: usize,
    pub author: String,
    /// Month-to-date seconds, this run included.
    pub total_seconds: f64,
    /// Seconds earned in this run alone.
    pub today_seconds: f64,
}

/// Add today's totals into the accumulated month totals.
pub fn merge(mut accumulated: Totals, daily: &Totals) -> Totals {
    accumulated.merge(daily);
    accumulated
}

/// Order authors by total seconds, highest first. Equal totals keep the
/// order they have in `merged`.
pub fn rank(merged: &Totals, daily: &Totals) -> Vec<RankedEntry> {
    let mut entries: Vec<(&str, f64)> = merged.iter().collect();
    // sort_by is stable
    entries.sort_by(|a, b| b.1.total_cmp(&a.1));

    entries
        .into_iter()
        .enumerate()
        .map(|(i, (author, total))| RankedEntry {
            rank: i + 1,
            author: author.to_string(),
            total_seconds: total,
            today_seconds: daily.get(author).unwrap_or(0.0),
        })
        .collect()
}

/// Render as `rank. author: total(+today)`, one line per author.
pub fn render(ranking: &[RankedEntry]) -> String {
    let mut out = String::new();
    for entry in ranking {
        out.push_str(&format!(
            "{}. {}: {}(+{})\n",
            entry.rank,
            entry.author,
            format_duration(entry.total_seconds),
            format_duration(entry.today_seconds)
        ));
    }
    out
}

/// Whole hours and minutes, rounded down; the hour part is dropped when zero.
pub fn format_duration(seconds: f64) -> String {
    let total_minutes = (seconds.max(0.0) / 60.0).floor() as u64;
    let (hours, minutes) = (total_minutes / 60, total_minutes % 60);
    if hours > 0 {
        format!("{hours}時間{minutes}分")
    } else {
        format!("{minutes}分")
    }
}
