//! Contribution calendar, streaks and totals.

use crate::github::{GithubClient, queries};
use anyhow::{Context as _, Result};
use chrono::{Datelike as _, Duration, NaiveDate, Utc};
use tokio::sync::OnceCell;

/// One UTC calendar day of contribution activity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContributionDay {
    pub date: NaiveDate,
    pub count: u64,
}

/// A maximal contiguous run of days with `count > 0`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Streak {
    pub length: u64,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl Streak {
    /// `"Feb 15 - Feb 16, 2026"`, with the start year spelled out when it
    /// differs from the end year; `"No streak"` when empty.
    pub fn range_label(&self) -> String {
        let (Some(start), Some(end)) = (self.start, self.end) else {
            return "No streak".to_string();
        };
        let start_fmt = if start.year() == end.year() {
            start.format("%b %d").to_string()
        } else {
            start.format("%b %d, %Y").to_string()
        };
        format!("{start_fmt} - {}", end.format("%b %d, %Y"))
    }
}

#[derive(Clone, Debug, Default)]
pub struct Calendar {
    pub days: Vec<ContributionDay>,
    pub current: Streak,
    pub longest: Streak,
}

/// Single left-to-right pass over a date-sorted calendar.
///
/// A running streak resets on zero-count days, except that a zero
/// recorded for `today` itself does not break the run that ended
/// yesterday: "no contributions yet today" keeps the current streak
/// alive. A calendar whose last recorded day is strictly before
/// yesterday has no current streak at all.
pub fn compute_streaks(days: &[ContributionDay], today: NaiveDate) -> (Streak, Streak) {
    let mut current = Streak::default();
    let mut longest = Streak::default();
    let mut run: u64 = 0;
    let mut run_start: Option<NaiveDate> = None;
    let mut run_end: Option<NaiveDate> = None;

    for (i, day) in days.iter().enumerate() {
        if day.count > 0 {
            if run == 0 {
                run_start = Some(day.date);
            }
            run += 1;
            run_end = Some(day.date);

            if run > longest.length {
                longest = Streak {
                    length: run,
                    start: run_start,
                    end: run_end,
                };
            }
            if day.date == today || i == days.len() - 1 {
                current = Streak {
                    length: run,
                    start: run_start,
                    end: run_end,
                };
            }
        } else {
            if day.date == today && i == days.len() - 1 && run > 0 {
                // Today recorded with 0: the run ending yesterday is
                // still the current streak.
                current = Streak {
                    length: run,
                    start: run_start,
                    end: run_end,
                };
            }
            run = 0;
            run_start = None;
            run_end = None;
        }
    }

    let yesterday = today - Duration::days(1);
    if days.last().is_some_and(|last| last.date < yesterday) {
        current = Streak::default();
    }

    (current, longest)
}

/// Tracks contribution calendar data and streak information.
pub struct ContributionTracker {
    gh: GithubClient,
    total: OnceCell<u64>,
    calendar: OnceCell<Calendar>,
}

impl ContributionTracker {
    pub fn new(gh: GithubClient) -> Self {
        ContributionTracker {
            gh,
            total: OnceCell::new(),
            calendar: OnceCell::new(),
        }
    }

    async fn contribution_years(&self) -> Result<Vec<i32>> {
        let result = self.gh.graphql(&queries::contribution_years()).await?;
        let years = result
            .pointer("/data/viewer/contributionsCollection/contributionYears")
            .and_then(|v| v.as_array())
            .map(|years| {
                years
                    .iter()
                    .filter_map(|y| y.as_i64().map(|y| y as i32))
                    .collect()
            })
            .unwrap_or_default();
        Ok(years)
    }

    /// Total contributions across every year GitHub knows about.
    pub async fn total_contributions(&self) -> Result<u64> {
        self.total
            .get_or_try_init(|| async {
                let years = self.contribution_years().await?;
                if years.is_empty() {
                    return Ok(0);
                }
                let result = self
                    .gh
                    .graphql(&queries::contribution_totals(&years))
                    .await?;
                let viewer = result
                    .pointer("/data/viewer")
                    .and_then(|v| v.as_object())
                    .cloned()
                    .unwrap_or_default();
                let total = viewer
                    .values()
                    .filter_map(|year| {
                        year.pointer("/contributionCalendar/totalContributions")
                            .and_then(|v| v.as_u64())
                    })
                    .sum();
                Ok(total)
            })
            .await
            .map(|total| *total)
    }

    /// The flattened day-by-day calendar with streaks computed.
    pub async fn calendar(&self) -> Result<&Calendar> {
        self.calendar
            .get_or_try_init(|| async {
                let years = self.contribution_years().await?;
                let mut days = Vec::new();
                for year in years {
                    let result = self
                        .gh
                        .graphql(&queries::contribution_calendar(year))
                        .await?;
                    let weeks = result
                        .pointer(
                            "/data/viewer/contributionsCollection/contributionCalendar/weeks",
                        )
                        .and_then(|v| v.as_array())
                        .cloned()
                        .unwrap_or_default();
                    for week in weeks {
                        for day in week["contributionDays"].as_array().into_iter().flatten() {
                            let date = day["date"]
                                .as_str()
                                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                                .context("contribution day without a parsable date")?;
                            days.push(ContributionDay {
                                date,
                                count: day["contributionCount"].as_u64().unwrap_or(0),
                            });
                        }
                    }
                }
                days.sort_by_key(|d| d.date);

                let today = Utc::now().date_naive();
                let (current, longest) = compute_streaks(&days, today);
                tracing::debug!(
                    days = days.len(),
                    current = current.length,
                    longest = longest.length,
                    "contribution calendar assembled"
                );
                Ok(Calendar {
                    days,
                    current,
                    longest,
                })
            })
            .await
    }

    /// Counts for the trailing 10 recorded days up to today (fewer when
    /// the calendar is shorter), oldest first.
    pub async fn recent_contributions(&self) -> Result<Vec<u64>> {
        let calendar = self.calendar().await?;
        let today = Utc::now().date_naive();
        let past: Vec<u64> = calendar
            .days
            .iter()
            .filter(|d| d.date <= today)
            .map(|d| d.count)
            .collect();
        let start = past.len().saturating_sub(10);
        Ok(past[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn days(entries: &[(&str, u64)]) -> Vec<ContributionDay> {
        entries
            .iter()
            .map(|(date, count)| ContributionDay {
                date: d(date),
                count: *count,
            })
            .collect()
    }

    #[test]
    fn longest_streak_is_the_maximal_run() {
        let cal = days(&[
            ("2026-02-10", 1),
            ("2026-02-11", 2),
            ("2026-02-12", 0),
            ("2026-02-13", 1),
            ("2026-02-14", 1),
            ("2026-02-15", 3),
        ]);
        let (current, longest) = compute_streaks(&cal, d("2026-02-15"));
        assert_eq!(longest.length, 3);
        assert_eq!(longest.start, Some(d("2026-02-13")));
        assert_eq!(longest.end, Some(d("2026-02-15")));
        assert_eq!(current.length, 3);
        assert!(longest.length >= current.length);
    }

    #[test]
    fn zero_count_today_keeps_yesterdays_run_current() {
        // Days ...15:1, 16:1, 17:0 evaluated on the 17th: the run that
        // ended yesterday still counts.
        let cal = days(&[
            ("2026-02-15", 1),
            ("2026-02-16", 1),
            ("2026-02-17", 0),
        ]);
        let (current, longest) = compute_streaks(&cal, d("2026-02-17"));
        assert_eq!(current.length, 2);
        assert_eq!(current.start, Some(d("2026-02-15")));
        assert_eq!(current.end, Some(d("2026-02-16")));
        assert_eq!(longest.length, 2);
    }

    #[test]
    fn stale_calendar_has_no_current_streak() {
        let cal = days(&[("2026-02-10", 5), ("2026-02-11", 5)]);
        let (current, longest) = compute_streaks(&cal, d("2026-02-17"));
        assert_eq!(current.length, 0);
        assert_eq!(current.range_label(), "No streak");
        assert_eq!(longest.length, 2);
    }

    #[test]
    fn run_ending_yesterday_is_still_current() {
        let cal = days(&[("2026-02-15", 1), ("2026-02-16", 2)]);
        let (current, _) = compute_streaks(&cal, d("2026-02-17"));
        assert_eq!(current.length, 2);
    }

    #[test]
    fn empty_calendar_yields_empty_streaks() {
        let (current, longest) = compute_streaks(&[], d("2026-02-17"));
        assert_eq!(current, Streak::default());
        assert_eq!(longest, Streak::default());
    }

    #[test]
    fn range_label_spells_out_differing_years() {
        let streak = Streak {
            length: 40,
            start: Some(d("2025-12-25")),
            end: Some(d("2026-02-02")),
        };
        assert_eq!(streak.range_label(), "Dec 25, 2025 - Feb 02, 2026");

        let same_year = Streak {
            length: 2,
            start: Some(d("2026-02-01")),
            end: Some(d("2026-02-02")),
        };
        assert_eq!(same_year.range_label(), "Feb 01 - Feb 02, 2026");
    }
}
