//! Process-state reconciliation.
//!
//! php-fpm reports `active processes` and `idle processes` from its
//! scoreboard, which can disagree with the per-process list on the same page
//! (https://bugs.php.net/bug.php?id=76003). The per-process states are
//! recounted here and compared against the reported aggregates.

use crate::logging::Logger;
use crate::phpfpm::status::{PoolStatus, ProcessSnapshot, ProcessState};

/// Active/idle/total worker counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessCounts {
    pub active: i64,
    pub idle: i64,
    pub total: i64,
}

/// Which counts get published when the two sources disagree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CountMode {
    /// Publish php-fpm's own aggregates and warn on mismatch.
    #[default]
    TrustUpstream,
    /// Publish the counts recomputed from the process list.
    Recompute,
}

impl CountMode {
    pub fn from_fix_flag(fix_process_count: bool) -> Self {
        if fix_process_count {
            CountMode::Recompute
        } else {
            CountMode::TrustUpstream
        }
    }
}

/// Outcome of comparing reported and recomputed counts for one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub computed: ProcessCounts,
    pub reported: ProcessCounts,
    /// Counts to publish, selected by [`CountMode`].
    pub published: ProcessCounts,
    /// Active and idle agree between both sources.
    pub consistent: bool,
}

/// Recounts worker states.
///
/// `Running` and `Reading headers` are active, `Idle` is idle. Transitional
/// states count towards neither bucket. Unknown states are logged at error
/// level and skipped.
pub fn count_process_states(processes: &[ProcessSnapshot], logger: &dyn Logger) -> ProcessCounts {
    let mut counts = ProcessCounts::default();

    for process in processes {
        match &process.state {
            ProcessState::Running | ProcessState::ReadingHeaders => counts.active += 1,
            ProcessState::Idle => counts.idle += 1,
            ProcessState::Finishing | ProcessState::GettingRequestInfo | ProcessState::Ending => {}
            ProcessState::Unknown(raw) => {
                logger.error(&format!(
                    "Unknown process state '{}' for pid {}",
                    raw, process.pid
                ));
            }
        }
    }

    counts.total = counts.active + counts.idle;
    counts
}

/// Compares the reported aggregates of `status` against its process list.
pub fn reconcile(status: &PoolStatus, mode: CountMode, logger: &dyn Logger) -> Reconciliation {
    let computed = count_process_states(&status.processes, logger);
    let reported = ProcessCounts {
        active: status.active_processes,
        idle: status.idle_processes,
        total: status.total_processes,
    };
    let consistent = computed.active == reported.active && computed.idle == reported.idle;

    if !consistent {
        let message = format!(
            "Inconsistent active and idle processes reported for pool '{}': reported active={} idle={}, computed active={} idle={}",
            status.name, reported.active, reported.idle, computed.active, computed.idle
        );
        match mode {
            CountMode::TrustUpstream => logger.warn(&format!(
                "{message}. Set `--phpfpm.fix-process-count` to publish the computed counts instead."
            )),
            CountMode::Recompute => logger.debug(&message),
        }
    }

    let published = match mode {
        CountMode::TrustUpstream => reported,
        CountMode::Recompute => computed,
    };

    Reconciliation {
        computed,
        reported,
        published,
        consistent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::test_support::RecordingLogger;

    fn process(state: ProcessState) -> ProcessSnapshot {
        ProcessSnapshot {
            state,
            ..Default::default()
        }
    }

    fn pool(active: i64, idle: i64, states: Vec<ProcessState>) -> PoolStatus {
        PoolStatus {
            name: "www".into(),
            active_processes: active,
            idle_processes: idle,
            total_processes: active + idle,
            processes: states.into_iter().map(process).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_transitional_states_count_towards_neither_bucket() {
        let logger = RecordingLogger::default();
        let processes: Vec<_> = ProcessState::KNOWN.into_iter().map(process).collect();

        let counts = count_process_states(&processes, &logger);
        assert_eq!(
            counts,
            ProcessCounts {
                active: 2,
                idle: 1,
                total: 3
            }
        );
        assert!(logger.errors().is_empty());
    }

    #[test]
    fn test_unknown_state_is_logged_and_skipped() {
        let logger = RecordingLogger::default();
        let processes = vec![
            process(ProcessState::Idle),
            process(ProcessState::Unknown("Sleeping".into())),
        ];

        let counts = count_process_states(&processes, &logger);
        assert_eq!(counts.total, 1);
        let errors = logger.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Sleeping"));
    }

    #[test]
    fn test_mismatch_warns_and_keeps_reported_counts() {
        let logger = RecordingLogger::default();
        let status = pool(5, 0, vec![ProcessState::Running, ProcessState::Idle]);

        let outcome = reconcile(&status, CountMode::TrustUpstream, &logger);
        assert!(!outcome.consistent);
        assert_eq!(outcome.published.active, 5);
        assert_eq!(outcome.computed.active, 1);

        let warnings = logger.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("www"));
        assert!(warnings[0].contains("--phpfpm.fix-process-count"));
    }

    #[test]
    fn test_recompute_publishes_computed_counts_quietly() {
        let logger = RecordingLogger::default();
        let status = pool(5, 0, vec![ProcessState::Running, ProcessState::Idle]);

        let outcome = reconcile(&status, CountMode::Recompute, &logger);
        assert!(!outcome.consistent);
        assert_eq!(
            outcome.published,
            ProcessCounts {
                active: 1,
                idle: 1,
                total: 2
            }
        );
        assert!(logger.warnings().is_empty());
    }

    #[test]
    fn test_consistent_pool_logs_nothing() {
        let logger = RecordingLogger::default();
        let status = pool(1, 1, vec![ProcessState::Running, ProcessState::Idle]);

        let outcome = reconcile(&status, CountMode::TrustUpstream, &logger);
        assert!(outcome.consistent);
        assert_eq!(outcome.published, outcome.reported);
        assert!(logger.warnings().is_empty());
    }

    #[test]
    fn test_fix_flag_selects_mode() {
        assert_eq!(CountMode::from_fix_flag(true), CountMode::Recompute);
        assert_eq!(CountMode::from_fix_flag(false), CountMode::TrustUpstream);
    }
}
