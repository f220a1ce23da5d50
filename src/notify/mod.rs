//! Notification-time assignment for stored news.
//!
//! Two phases run against already-persisted rows:
//!
//! * **day start** spreads the morning's notify-eligible items over a handful
//!   of fixed slots (11:30, 13:30, 15:30 by default), shuffled;
//! * **day end** picks one afternoon item and gives it a whole-hour slot.
//!
//! Planning is pure; [`NotifyScheduler`] persists each assignment as soon as
//! it is made.

pub mod http_client;

use crate::config::NotifyConfig;
use crate::logging::SourceLog;
use crate::models::NotifyCandidate;
use crate::storage::Repository;
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use rand::seq::{IndexedRandom, IteratorRandom, SliceRandom};
use std::ops::RangeInclusive;

pub use http_client::NotifyClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DayPhase {
    DayStart,
    DayEnd,
}

impl DayPhase {
    /// Phase for a wall-clock hour: the day-start hour itself, or any hour
    /// from the day-end hour on. Other hours have no phase.
    pub fn at(hour: u32, day_start_hour: u32, day_end_hour: u32) -> Option<Self> {
        if hour == day_start_hour {
            Some(DayPhase::DayStart)
        } else if hour >= day_end_hour {
            Some(DayPhase::DayEnd)
        } else {
            None
        }
    }

    pub fn is_day_start(self) -> bool {
        self == DayPhase::DayStart
    }
}

impl std::fmt::Display for DayPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DayPhase::DayStart => "day-start",
            DayPhase::DayEnd => "day-end",
        })
    }
}

/// `start`, `start + step`, … while strictly before `end`, on `day`.
pub fn day_start_slots(day: NaiveDate, start: NaiveTime, end: NaiveTime, step_mins: i64) -> Vec<NaiveDateTime> {
    if step_mins <= 0 {
        return Vec::new();
    }
    let step = Duration::minutes(step_mins);
    let end = day.and_time(end);
    let mut slot = day.and_time(start);
    let mut slots = Vec::new();
    while slot < end {
        slots.push(slot);
        slot += step;
    }
    slots
}

/// Shuffle the slots and pair them with candidates in order. Candidates
/// beyond the slot count get nothing.
pub fn plan_day_start<R>(
    candidates: &[NotifyCandidate],
    mut slots: Vec<NaiveDateTime>,
    rng: &mut R,
) -> Vec<(i64, NaiveDateTime)>
where
    R: rand::Rng + ?Sized,
{
    slots.shuffle(rng);
    candidates.iter().map(|c| c.id).zip(slots).collect()
}

/// One candidate, chosen uniformly, at a random whole hour in `hours`.
pub fn plan_day_end<R>(
    candidates: &[NotifyCandidate],
    day: NaiveDate,
    hours: RangeInclusive<u32>,
    rng: &mut R,
) -> Option<(i64, NaiveDateTime)>
where
    R: rand::Rng + ?Sized,
{
    let pick = candidates.choose(rng)?;
    let hour = hours.choose(rng)?;
    let at = NaiveTime::from_hms_opt(hour, 0, 0)?;
    Some((pick.id, day.and_time(at)))
}

pub struct NotifyScheduler<'a> {
    repo: &'a Repository,
    cfg: &'a NotifyConfig,
    log: &'a SourceLog,
}

impl<'a> NotifyScheduler<'a> {
    pub fn new(repo: &'a Repository, cfg: &'a NotifyConfig, log: &'a SourceLog) -> Self {
        Self { repo, cfg, log }
    }

    /// Assign notify times for `phase` on `now`'s date. Returns how many rows
    /// were updated; a failed update stops the phase, earlier ones stay.
    pub fn run_phase<R>(&self, phase: DayPhase, now: NaiveDateTime, rng: &mut R) -> Result<usize>
    where
        R: rand::Rng + ?Sized,
    {
        let candidates = self
            .repo
            .notify_candidates(phase.is_day_start(), self.cfg.skip_already_scheduled)
            .context("Could not select notify candidates")?;
        self.log.info(format!("Fetched {} rows for {} notifications.", candidates.len(), phase));

        if candidates.is_empty() {
            self.log.info("No results to notify.");
            return Ok(0);
        }

        let day = now.date();
        let plan = match phase {
            DayPhase::DayStart => {
                let slots = day_start_slots(
                    day,
                    self.cfg.day_start_slot_start,
                    self.cfg.day_start_slot_end,
                    self.cfg.day_start_slot_step_mins,
                );
                plan_day_start(&candidates, slots, rng)
            }
            DayPhase::DayEnd => plan_day_end(
                &candidates,
                day,
                self.cfg.day_end_first_hour..=self.cfg.day_end_last_hour,
                rng,
            )
            .into_iter()
            .collect(),
        };

        for (updated, (id, at)) in plan.iter().enumerate() {
            self.repo
                .set_news_notify_time(*id, *at)
                .with_context(|| format!("Stopped after {} of {} assignments", updated, plan.len()))?;
            self.log.info(format!("Updated notify_time for news id {} to {}", id, at));
        }
        Ok(plan.len())
    }
}
