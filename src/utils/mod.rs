use chrono::NaiveDate;
use std::time::{Duration, Instant};
use tracing::info;

/// Logs when a job starts and, on drop, how long it took.
pub struct Timer {
    job: String,
    start: Instant,
}

impl Timer {
    pub fn start(job: impl Into<String>) -> Self {
        let job = job.into();
        info!(job = %job, "⏱  Starting");
        Self { job, start: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!(job = %self.job, "⏱  Finished (took {:.2?})", self.elapsed());
    }
}

/// Format a count with thousands separators.
pub fn fmt_number(n: i64) -> String {
    let s = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, ch) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

pub fn fmt_date(d: Option<NaiveDate>) -> String {
    d.map(|d| d.to_string()).unwrap_or_else(|| "—".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_number() {
        assert_eq!(fmt_number(1_234_567), "1,234,567");
        assert_eq!(fmt_number(0), "0");
        assert_eq!(fmt_number(-42_000), "-42,000");
        assert_eq!(fmt_number(999), "999");
        assert_eq!(fmt_number(1000), "1,000");
    }

    #[test]
    fn missing_dates_render_as_dash() {
        assert_eq!(fmt_date(None), "—");
        assert_eq!(fmt_date(NaiveDate::from_ymd_opt(2026, 10, 18)), "2026-10-18");
    }
}
