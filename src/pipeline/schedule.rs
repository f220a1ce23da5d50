//! When jobs are due, and the daemon that runs them.
//!
//! The predicates here are pure functions of a wall-clock time so the
//! calendar can be tested without waiting on a real clock. The daemon owns a
//! single interval trigger and asks the [`Planner`] what is due on each tick.

use crate::config::ScheduleConfig;
use anyhow::Result;
use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike, Weekday};
use std::collections::HashMap;
use std::rc::Rc;
use tokio::task::{JoinHandle, LocalSet};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::{Job, Pipeline};

/// Trading days and the intraday session.
#[derive(Debug, Clone)]
pub struct TradingWindow {
    pub days: Vec<Weekday>,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TradingWindow {
    pub fn from_config(cfg: &ScheduleConfig) -> Self {
        Self { days: cfg.trading_days.clone(), start: cfg.trading_start, end: cfg.trading_end }
    }

    pub fn contains(&self, now: NaiveDateTime) -> bool {
        let t = now.time();
        self.days.contains(&now.weekday()) && self.start <= t && t <= self.end
    }
}

/// True when `now` falls in the same hour and minute as one of `times`.
pub fn is_run_minute(now: NaiveDateTime, times: &[NaiveTime]) -> bool {
    times.iter().any(|t| t.hour() == now.hour() && t.minute() == now.minute())
}

fn same_minute(a: NaiveDateTime, b: NaiveDateTime) -> bool {
    a.date() == b.date() && a.hour() == b.hour() && a.minute() == b.minute()
}

/// Decides which jobs fire on a tick. Each clock-time job fires at most once
/// per matching minute; indices fire every `index_poll_secs` inside the
/// trading window.
pub struct Planner {
    cfg: ScheduleConfig,
    window: TradingWindow,
    last_fired: HashMap<&'static str, NaiveDateTime>,
}

impl Planner {
    pub fn new(cfg: &ScheduleConfig) -> Self {
        Self { cfg: cfg.clone(), window: TradingWindow::from_config(cfg), last_fired: HashMap::new() }
    }

    pub fn due(&mut self, now: NaiveDateTime) -> Vec<Job> {
        let timed = [
            (Job::News, &self.cfg.news_times),
            (Job::MarketStatus, &self.cfg.market_status_times),
            (Job::Announcements { symbol: None }, &self.cfg.announcement_times),
            (Job::Eps, &self.cfg.eps_times),
            (Job::Floorsheet { symbol: None, days: None }, &self.cfg.floorsheet_times),
        ];

        let mut due = Vec::new();
        for (job, times) in timed {
            let fired = self.last_fired.get(job.name()).is_some_and(|last| same_minute(*last, now));
            if is_run_minute(now, times) && !fired {
                due.push(job);
            }
        }

        if self.window.contains(now) {
            let poll = Duration::seconds(self.cfg.index_poll_secs.max(1) as i64);
            let recent = self.last_fired.get("indices").is_some_and(|last| now - *last < poll);
            if !recent {
                due.push(Job::Indices { force: false });
            }
        }

        for job in &due {
            self.last_fired.insert(job.name(), now);
        }
        due
    }
}

/// Run due jobs until Ctrl-C. Jobs share this thread only while awaiting the
/// browser; their storage calls run on the blocking pool. A job still running
/// from an earlier trigger is not started twice. On shutdown every in-flight job is aborted, which drops
/// its browser session.
pub async fn run_daemon(pipeline: Pipeline) -> Result<()> {
    let pipeline = Rc::new(pipeline);
    let local = LocalSet::new();

    local
        .run_until(async move {
            let cfg = pipeline.config().schedule.clone();
            let mut planner = Planner::new(&cfg);
            let tick = std::time::Duration::from_secs(cfg.index_poll_secs.clamp(1, 60));
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut running: HashMap<&'static str, JoinHandle<()>> = HashMap::new();

            info!("Scheduler started (tick {:?}, timezone {})", tick, cfg.timezone);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for job in planner.due(pipeline.now()) {
                            if running.get(job.name()).is_some_and(|h| !h.is_finished()) {
                                warn!("{} is still running, trigger skipped", job.name());
                                continue;
                            }
                            let p = Rc::clone(&pipeline);
                            let name = job.name();
                            let handle = tokio::task::spawn_local(async move {
                                match p.run(&job).await {
                                    Ok(stats) => info!("{} done: {}", job.name(), stats),
                                    Err(e) => error!("{} failed: {:#}", job.name(), e),
                                }
                            });
                            running.insert(name, handle);
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupt received, stopping {} job(s)", running.values().filter(|h| !h.is_finished()).count());
                        for (_, handle) in running.drain() {
                            handle.abort();
                        }
                        break;
                    }
                }
            }
        })
        .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn names(jobs: &[Job]) -> Vec<&'static str> {
        jobs.iter().map(Job::name).collect()
    }

    // 2026-10-18 is a Sunday, a trading day; 2026-10-23 is a Friday.

    #[test]
    fn trading_window_is_inclusive_on_trading_days() {
        let w = TradingWindow::from_config(&ScheduleConfig::default());
        assert!(w.contains(at("2026-10-18 11:00:00")));
        assert!(w.contains(at("2026-10-18 15:01:00")));
        assert!(!w.contains(at("2026-10-18 15:01:01")));
        assert!(!w.contains(at("2026-10-18 10:59:59")));
        assert!(!w.contains(at("2026-10-23 12:00:00")));
    }

    #[test]
    fn run_minute_ignores_seconds() {
        let times = [hm(11, 45), hm(17, 29)];
        assert!(is_run_minute(at("2026-10-18 11:45:00"), &times));
        assert!(is_run_minute(at("2026-10-18 17:29:59"), &times));
        assert!(!is_run_minute(at("2026-10-18 11:46:00"), &times));
    }

    #[test]
    fn timed_jobs_fire_once_per_minute() {
        let mut planner = Planner::new(&ScheduleConfig::default());
        assert_eq!(names(&planner.due(at("2026-10-23 11:45:00"))), vec!["news"]);
        assert!(planner.due(at("2026-10-23 11:45:30")).is_empty());
        assert!(planner.due(at("2026-10-23 11:46:00")).is_empty());
        assert_eq!(names(&planner.due(at("2026-10-24 11:45:10"))), vec!["news"]);
        assert_eq!(names(&planner.due(at("2026-10-23 19:00:00"))), vec!["floorsheet"]);
    }

    #[test]
    fn indices_poll_only_inside_the_window() {
        let mut planner = Planner::new(&ScheduleConfig::default());
        assert!(planner.due(at("2026-10-18 10:30:30")).iter().all(|j| j.name() != "indices"));
        assert_eq!(names(&planner.due(at("2026-10-18 12:00:00"))), vec!["indices"]);
        assert!(planner.due(at("2026-10-18 12:00:30")).is_empty());
        assert_eq!(names(&planner.due(at("2026-10-18 12:01:00"))), vec!["indices"]);
        assert!(planner.due(at("2026-10-23 12:05:00")).is_empty());
    }

    #[test]
    fn market_check_and_indices_can_share_a_tick() {
        let cfg = ScheduleConfig { market_status_times: vec![hm(11, 0)], ..ScheduleConfig::default() };
        let mut planner = Planner::new(&cfg);
        assert_eq!(names(&planner.due(at("2026-10-18 11:00:00"))), vec!["market-status", "indices"]);
    }
}
