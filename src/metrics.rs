//! Prometheus metrics definitions for herakles-phpfpm-exporter.
//!
//! All php-fpm families live in the `phpfpm` namespace and carry the `pool`
//! and `scrape_uri` labels. Per-process families add `child` and, for
//! `process_state`, `state`. `child` is the worker's position in the process
//! list, not its pid, so recycled workers reuse their series.

use herakles_phpfpm_exporter::logging::Logger;
use herakles_phpfpm_exporter::phpfpm::{reconcile, CountMode, Pool, ProcessSnapshot, ProcessState};
use prometheus::{CounterVec, GaugeVec, Opts, Registry};

const NAMESPACE: &str = "phpfpm";
const POOL_LABELS: &[&str] = &["pool", "scrape_uri"];
const PROCESS_LABELS: &[&str] = &["pool", "child", "scrape_uri"];
const PROCESS_STATE_LABELS: &[&str] = &["pool", "child", "state", "scrape_uri"];

/// Outcome of publishing one scrape cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub pools_up: u64,
    /// Pools whose reported and computed process counts disagreed.
    pub inconsistent: u64,
}

/// php-fpm metric families.
#[derive(Clone)]
pub struct PhpfpmMetrics {
    pub up: GaugeVec,
    pub scrape_failures: CounterVec,
    pub start_since: CounterVec,
    pub accepted_connections: CounterVec,
    pub listen_queue: GaugeVec,
    pub max_listen_queue: CounterVec,
    pub listen_queue_length: GaugeVec,
    pub idle_processes: GaugeVec,
    pub active_processes: GaugeVec,
    pub total_processes: GaugeVec,
    pub max_active_processes: CounterVec,
    pub max_children_reached: CounterVec,
    pub slow_requests: CounterVec,

    pub process_requests: CounterVec,
    pub process_last_request_memory: GaugeVec,
    pub process_last_request_cpu: GaugeVec,
    pub process_request_duration: GaugeVec,
    pub process_state: GaugeVec,
}

fn gauge(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> prometheus::Result<GaugeVec> {
    let vec = GaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

fn counter(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> prometheus::Result<CounterVec> {
    let vec = CounterVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

/// Sets a counter to an absolute value read from php-fpm. Only valid right
/// after [`PhpfpmMetrics::reset`].
fn set_counter(vec: &CounterVec, labels: &[&str], value: f64) {
    vec.with_label_values(labels).inc_by(value.max(0.0));
}

impl PhpfpmMetrics {
    /// Creates and registers all php-fpm metric families with the registry.
    pub fn new(registry: &Registry) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            up: gauge(
                registry,
                "up",
                "Could php-fpm be reached and its status decoded.",
                POOL_LABELS,
            )?,
            scrape_failures: counter(
                registry,
                "scrape_failures",
                "The number of failures scraping from PHP-FPM.",
                POOL_LABELS,
            )?,
            start_since: counter(
                registry,
                "start_since",
                "Number of seconds since FPM has started.",
                POOL_LABELS,
            )?,
            accepted_connections: counter(
                registry,
                "accepted_connections",
                "The number of requests accepted by the pool.",
                POOL_LABELS,
            )?,
            listen_queue: gauge(
                registry,
                "listen_queue",
                "The number of requests in the queue of pending connections.",
                POOL_LABELS,
            )?,
            max_listen_queue: counter(
                registry,
                "max_listen_queue",
                "The maximum number of requests in the queue of pending connections since FPM has started.",
                POOL_LABELS,
            )?,
            listen_queue_length: gauge(
                registry,
                "listen_queue_length",
                "The size of the socket queue of pending connections.",
                POOL_LABELS,
            )?,
            idle_processes: gauge(
                registry,
                "idle_processes",
                "The number of idle processes.",
                POOL_LABELS,
            )?,
            active_processes: gauge(
                registry,
                "active_processes",
                "The number of active processes.",
                POOL_LABELS,
            )?,
            total_processes: gauge(
                registry,
                "total_processes",
                "The number of idle + active processes.",
                POOL_LABELS,
            )?,
            max_active_processes: counter(
                registry,
                "max_active_processes",
                "The maximum number of active processes since FPM has started.",
                POOL_LABELS,
            )?,
            max_children_reached: counter(
                registry,
                "max_children_reached",
                "The number of times, the process limit has been reached, when pm tries to start more children (works only for pm 'dynamic' and 'ondemand').",
                POOL_LABELS,
            )?,
            slow_requests: counter(
                registry,
                "slow_requests",
                "The number of requests that exceeded your 'request_slowlog_timeout' value.",
                POOL_LABELS,
            )?,
            process_requests: counter(
                registry,
                "process_requests",
                "The number of requests the process has served.",
                PROCESS_LABELS,
            )?,
            process_last_request_memory: gauge(
                registry,
                "process_last_request_memory",
                "The max amount of memory the last request consumed.",
                PROCESS_LABELS,
            )?,
            process_last_request_cpu: gauge(
                registry,
                "process_last_request_cpu",
                "The %cpu the last request consumed.",
                PROCESS_LABELS,
            )?,
            process_request_duration: gauge(
                registry,
                "process_request_duration",
                "The duration in microseconds of the requests.",
                PROCESS_LABELS,
            )?,
            process_state: gauge(
                registry,
                "process_state",
                "The state of the process (Idle, Running, ...).",
                PROCESS_STATE_LABELS,
            )?,
        })
    }

    /// Drops every series so pools and children that disappeared stop being
    /// exported.
    pub fn reset(&self) {
        self.up.reset();
        self.scrape_failures.reset();
        self.start_since.reset();
        self.accepted_connections.reset();
        self.listen_queue.reset();
        self.max_listen_queue.reset();
        self.listen_queue_length.reset();
        self.idle_processes.reset();
        self.active_processes.reset();
        self.total_processes.reset();
        self.max_active_processes.reset();
        self.max_children_reached.reset();
        self.slow_requests.reset();
        self.process_requests.reset();
        self.process_last_request_memory.reset();
        self.process_last_request_cpu.reset();
        self.process_request_duration.reset();
        self.process_state.reset();
    }

    /// Replaces all series with the current state of `pools`.
    ///
    /// Pools whose last scrape failed only export `up` and `scrape_failures`.
    pub fn publish(&self, pools: &[Pool], mode: CountMode, logger: &dyn Logger) -> PublishSummary {
        self.reset();
        let mut summary = PublishSummary::default();

        for pool in pools {
            let status = pool.status();
            let labels = [status.name.as_str(), pool.address()];

            set_counter(&self.scrape_failures, &labels, pool.failure_count() as f64);

            if !pool.is_up() {
                self.up.with_label_values(&labels).set(0.0);
                continue;
            }

            summary.pools_up += 1;
            self.up.with_label_values(&labels).set(1.0);

            let counts = reconcile(status, mode, logger);
            if !counts.consistent {
                summary.inconsistent += 1;
            }

            set_counter(&self.start_since, &labels, status.start_since as f64);
            set_counter(
                &self.accepted_connections,
                &labels,
                status.accepted_connections as f64,
            );
            self.listen_queue
                .with_label_values(&labels)
                .set(status.listen_queue as f64);
            set_counter(&self.max_listen_queue, &labels, status.max_listen_queue as f64);
            self.listen_queue_length
                .with_label_values(&labels)
                .set(status.listen_queue_length as f64);
            self.idle_processes
                .with_label_values(&labels)
                .set(counts.published.idle as f64);
            self.active_processes
                .with_label_values(&labels)
                .set(counts.published.active as f64);
            self.total_processes
                .with_label_values(&labels)
                .set(counts.published.total as f64);
            set_counter(
                &self.max_active_processes,
                &labels,
                status.max_active_processes as f64,
            );
            set_counter(
                &self.max_children_reached,
                &labels,
                status.max_children_reached as f64,
            );
            set_counter(&self.slow_requests, &labels, status.slow_requests as f64);

            self.publish_processes(&status.name, pool.address(), &status.processes);
        }

        summary
    }

    fn publish_processes(&self, pool: &str, address: &str, processes: &[ProcessSnapshot]) {
        for (index, process) in processes.iter().enumerate() {
            let child = index.to_string();
            let labels = [pool, child.as_str(), address];

            set_counter(&self.process_requests, &labels, process.requests as f64);
            self.process_last_request_memory
                .with_label_values(&labels)
                .set(process.last_request_memory as f64);
            self.process_last_request_cpu
                .with_label_values(&labels)
                .set(process.last_request_cpu);
            self.process_request_duration
                .with_label_values(&labels)
                .set(process.request_duration as f64);

            for state in ProcessState::KNOWN.iter() {
                let value = if *state == process.state { 1.0 } else { 0.0 };
                self.process_state
                    .with_label_values(&[pool, child.as_str(), state.as_str(), address])
                    .set(value);
            }
        }
    }
}
