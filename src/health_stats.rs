//! Health statistics for the exporter's own scrape cycles.
//!
//! Tracks how long cycles take, how many pools answer, how often php-fpm's
//! reported counts disagree with its process list, and how busy the HTTP
//! side is. Rendered as a plain-text table on `/health`.

use std::collections::VecDeque;
use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

/// Running statistics for a single metric.
#[derive(Clone, Copy, Default)]
pub struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            *self = RunningStat {
                count: 1,
                sum: value,
                min: value,
                max: value,
                last: value,
            };
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

/// Point-in-time copy of a [`Stat`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatSnapshot {
    pub current: f64,
    pub average: f64,
    pub max: f64,
    pub min: f64,
    pub count: u64,
}

/// Thread-safe wrapper for running statistics.
#[derive(Default)]
pub struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    pub fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    pub fn snapshot(&self) -> StatSnapshot {
        match self.inner.lock() {
            Ok(s) => StatSnapshot {
                current: s.last,
                average: s.avg(),
                max: s.max,
                min: s.min,
                count: s.count,
            },
            Err(_) => StatSnapshot::default(),
        }
    }
}

/// Sliding window of HTTP request timestamps.
pub struct RequestTimestamps {
    inner: Mutex<VecDeque<Instant>>,
}

impl Default for RequestTimestamps {
    fn default() -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(1024)),
        }
    }
}

impl RequestTimestamps {
    const RETENTION: Duration = Duration::from_secs(600);

    pub fn record(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            let now = Instant::now();
            guard.push_back(now);
            while guard
                .front()
                .is_some_and(|&t| now.duration_since(t) > Self::RETENTION)
            {
                guard.pop_front();
            }
        }
    }

    pub fn count_last_minute(&self) -> u64 {
        match self.inner.lock() {
            Ok(guard) => guard
                .iter()
                .filter(|t| t.elapsed() <= Duration::from_secs(60))
                .count() as u64,
            Err(_) => 0,
        }
    }
}

/// Exporter self-monitoring shared between the scrape path and `/health`.
pub struct HealthStats {
    // Scrape cycles
    pub cycle_duration_seconds: Stat,
    pub pools_up: Stat,
    pub total_cycles: AtomicU64,
    pub pool_scrape_success: AtomicU64,
    pub pool_scrape_failure: AtomicU64,
    pub inconsistent_counts: AtomicU64,
    pub worker_panics: AtomicU64,

    // HTTP server
    pub http_request_timestamps: RequestTimestamps,
    pub request_duration_ms: Stat,
    pub lock_wait_duration_ms: Stat,
    pub metrics_response_size_kb: Stat,
    pub metrics_endpoint_calls: AtomicU64,

    pub start_time: Instant,
    pub last_cycle_time: StdRwLock<Option<DateTime<Local>>>,
}

impl Default for HealthStats {
    fn default() -> Self {
        Self {
            cycle_duration_seconds: Stat::default(),
            pools_up: Stat::default(),
            total_cycles: AtomicU64::new(0),
            pool_scrape_success: AtomicU64::new(0),
            pool_scrape_failure: AtomicU64::new(0),
            inconsistent_counts: AtomicU64::new(0),
            worker_panics: AtomicU64::new(0),
            http_request_timestamps: RequestTimestamps::default(),
            request_duration_ms: Stat::default(),
            lock_wait_duration_ms: Stat::default(),
            metrics_response_size_kb: Stat::default(),
            metrics_endpoint_calls: AtomicU64::new(0),
            start_time: Instant::now(),
            last_cycle_time: StdRwLock::new(None),
        }
    }
}

impl HealthStats {
    pub fn new() -> Self {
        Default::default()
    }

    /// Records one finished scrape cycle over `pools_total` pools.
    pub fn record_cycle(&self, duration_seconds: f64, pools_up: u64, pools_total: u64) {
        self.cycle_duration_seconds.add_sample(duration_seconds);
        self.pools_up.add_sample(pools_up as f64);
        self.total_cycles.fetch_add(1, Ordering::Relaxed);
        self.pool_scrape_success
            .fetch_add(pools_up, Ordering::Relaxed);
        self.pool_scrape_failure
            .fetch_add(pools_total.saturating_sub(pools_up), Ordering::Relaxed);
        if let Ok(mut guard) = self.last_cycle_time.write() {
            *guard = Some(Local::now());
        }
    }

    pub fn record_inconsistent_counts(&self, pools: u64) {
        self.inconsistent_counts.fetch_add(pools, Ordering::Relaxed);
    }

    pub fn record_worker_panics(&self, count: u64) {
        self.worker_panics.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_http_request(&self) {
        self.http_request_timestamps.record();
    }

    pub fn record_request_duration(&self, duration_ms: f64) {
        self.request_duration_ms.add_sample(duration_ms);
    }

    pub fn record_lock_wait_duration_ms(&self, duration_ms: f64) {
        self.lock_wait_duration_ms.add_sample(duration_ms);
    }

    pub fn record_metrics_response_size_kb(&self, size_kb: f64) {
        self.metrics_response_size_kb.add_sample(size_kb);
    }

    pub fn record_metrics_endpoint_call(&self) {
        self.metrics_endpoint_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Share of pool scrapes that succeeded, 100% before the first cycle.
    pub fn get_scrape_success_rate(&self) -> f64 {
        let success = self.pool_scrape_success.load(Ordering::Relaxed);
        let failure = self.pool_scrape_failure.load(Ordering::Relaxed);
        let total = success + failure;
        if total == 0 {
            100.0
        } else {
            (success as f64 / total as f64) * 100.0
        }
    }

    pub fn get_uptime_hours(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64() / 3600.0
    }

    pub fn get_last_cycle_time_str(&self) -> String {
        self.last_cycle_time
            .read()
            .ok()
            .and_then(|guard| *guard)
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "N/A".to_string())
    }

    pub fn render_table(&self) -> String {
        let mut table = Table::default();

        table.header();

        table.section("SCRAPE CYCLES");
        table.stat_row("cycle_duration (s)", &self.cycle_duration_seconds.snapshot(), 3);
        table.stat_row("pools_up", &self.pools_up.snapshot(), 0);
        table.value_row(
            "scrape_success_rate (%)",
            format!("{:.1}", self.get_scrape_success_rate()),
        );
        table.counter_row("pool_scrape_failures", &self.pool_scrape_failure);
        table.counter_row("inconsistent_counts", &self.inconsistent_counts);
        table.counter_row("worker_panics", &self.worker_panics);

        table.section("HTTP SERVER");
        table.value_row(
            "http_requests_last_minute",
            self.http_request_timestamps.count_last_minute().to_string(),
        );
        table.stat_row("request_duration (ms)", &self.request_duration_ms.snapshot(), 1);
        table.stat_row("lock_wait_duration (ms)", &self.lock_wait_duration_ms.snapshot(), 1);
        table.stat_row(
            "metrics_response_size (KB)",
            &self.metrics_response_size_kb.snapshot(),
            1,
        );
        table.counter_row("metrics_endpoint_calls", &self.metrics_endpoint_calls);

        let mut out = table.finish();
        writeln!(out).ok();
        writeln!(
            out,
            "number of done cycles: {} | last cycle: {} | uptime: {:.1}h",
            self.total_cycles.load(Ordering::Relaxed),
            self.get_last_cycle_time_str(),
            self.get_uptime_hours()
        )
        .ok();
        out
    }
}

/// Fixed-width text table used by [`HealthStats::render_table`].
#[derive(Default)]
struct Table {
    out: String,
}

impl Table {
    const LEFT: usize = 26;
    const COL: usize = 12;

    fn header(&mut self) {
        writeln!(self.out, "HEALTH ENDPOINT - EXPORTER INTERNAL STATS").ok();
        writeln!(self.out, "==========================================").ok();
        writeln!(self.out).ok();
        self.row("", ["current", "average", "max", "min"].map(String::from));
    }

    fn section(&mut self, title: &str) {
        writeln!(self.out).ok();
        writeln!(self.out, "{}", title).ok();
        writeln!(self.out, "{}", "-".repeat(title.len())).ok();
    }

    fn row(&mut self, label: &str, cells: [String; 4]) {
        writeln!(
            self.out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            label,
            cells[0],
            cells[1],
            cells[2],
            cells[3],
            left = Self::LEFT,
            col = Self::COL
        )
        .ok();
    }

    fn stat_row(&mut self, label: &str, s: &StatSnapshot, precision: usize) {
        let fmt = |v: f64| format!("{:.*}", precision, v);
        let avg_precision = precision.max(1);
        self.row(
            label,
            [
                fmt(s.current),
                format!("{:.*}", avg_precision, s.average),
                fmt(s.max),
                fmt(s.min),
            ],
        );
    }

    fn value_row(&mut self, label: &str, value: String) {
        self.row(label, [value, "N/A".into(), "N/A".into(), "N/A".into()]);
    }

    fn counter_row(&mut self, label: &str, counter: &AtomicU64) {
        self.value_row(label, counter.load(Ordering::Relaxed).to_string());
    }

    fn finish(self) -> String {
        self.out
    }
}
