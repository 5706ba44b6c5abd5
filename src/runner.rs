//! Wave-based load generation.
//!
//! Requests are dispatched in waves of at most `concurrency` requests. Every
//! request of a wave completes before the next wave starts, and the configured
//! delay separates consecutive waves (never after the last one).

use std::io::Write;
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{debug, info};

use crate::analysis::RunStats;
use crate::config::{OutputOptions, RunConfig};
use crate::probes::{RequestExecutor, RequestResult};

/// One batch of concurrently dispatched requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wave {
    /// Zero-based position of this wave.
    pub index: usize,
    /// Contiguous sequence ids, 1-based.
    pub ids: RangeInclusive<usize>,
}

impl Wave {
    pub fn len(&self) -> usize {
        self.ids.end() + 1 - self.ids.start()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Split `total` ids into `ceil(total / concurrency)` contiguous waves.
///
/// `concurrency` must be non-zero.
pub fn plan_waves(total: usize, concurrency: usize) -> Vec<Wave> {
    (0..total.div_ceil(concurrency))
        .map(|index| {
            let start = index * concurrency;
            let size = concurrency.min(total - start);
            Wave {
                index,
                ids: (start + 1)..=(start + size),
            }
        })
        .collect()
}

/// Whether to sleep after wave `index` of `wave_count`.
pub fn should_pause(index: usize, wave_count: usize, delay: Duration) -> bool {
    index + 1 < wave_count && !delay.is_zero()
}

/// Final state of a completed run.
#[derive(Debug)]
pub struct RunOutcome {
    pub stats: RunStats,
    pub wall_time: Duration,
}

pub struct Runner<E> {
    executor: E,
    concurrency: usize,
    total_requests: usize,
    delay: Duration,
    output: OutputOptions,
}

impl<E: RequestExecutor> Runner<E> {
    pub fn new(executor: E, config: &RunConfig) -> Self {
        Self {
            executor,
            concurrency: config.concurrency,
            total_requests: config.total_requests,
            delay: config.delay(),
            output: config.output,
        }
    }

    /// Progress lines go to stdout unless the run is quiet or the summary is JSON.
    fn progress(&self) -> bool {
        !self.output.summary_only && !self.output.json
    }

    pub async fn run(&self) -> RunOutcome {
        // The banner survives --summary-only; only JSON keeps stdout clean.
        if !self.output.json {
            println!(
                "Starting load test with {} total requests, {} concurrent",
                self.total_requests, self.concurrency
            );
        }

        let start = Instant::now();
        let waves = plan_waves(self.total_requests, self.concurrency);
        let wave_count = waves.len();
        let mut stats = RunStats::new();

        for wave in &waves {
            if self.progress() {
                println!(
                    "\nBatch {}/{} (Requests {}-{})",
                    wave.index + 1,
                    wave_count,
                    wave.ids.start(),
                    wave.ids.end()
                );
            }
            debug!(wave = wave.index + 1, size = wave.len(), "dispatching wave");

            let results = join_all(wave.ids.clone().map(|id| self.dispatch(id))).await;

            for result in results {
                if self.output.detailed {
                    info!(
                        "Request {}: {} ({}ms)",
                        result.id,
                        if result.is_success() { "Success" } else { "Failed" },
                        result.elapsed_ms
                    );
                }
                stats.record(result);
            }

            if should_pause(wave.index, wave_count, self.delay) {
                if self.progress() {
                    println!("\nWaiting {}ms before next batch...", self.delay.as_millis());
                }
                tokio::time::sleep(self.delay).await;
            }
        }

        if self.progress() {
            println!();
        }

        RunOutcome {
            stats,
            wall_time: start.elapsed(),
        }
    }

    async fn dispatch(&self, id: usize) -> RequestResult {
        if self.progress() && !self.output.detailed {
            print!(".");
            let _ = std::io::stdout().flush();
        }
        self.executor.execute(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CliArgs, Defaults, EnvOverrides};
    use crate::probes::{ErrorTag, Outcome};
    use clap::Parser;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Sleeps for `work` per request and fails every id divisible by three.
    #[derive(Default)]
    struct FakeExecutor {
        work: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        started: Mutex<Vec<(usize, Instant)>>,
        finished: Mutex<Vec<(usize, Instant)>>,
    }

    #[async_trait::async_trait]
    impl RequestExecutor for FakeExecutor {
        async fn execute(&self, id: usize) -> RequestResult {
            self.started.lock().unwrap().push((id, Instant::now()));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.work).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.finished.lock().unwrap().push((id, Instant::now()));

            let outcome = if id % 3 == 0 {
                Outcome::Failure {
                    tag: ErrorTag::Http(500),
                }
            } else {
                Outcome::Success { status: 200 }
            };
            RequestResult {
                id,
                elapsed_ms: self.work.as_millis() as u64,
                outcome,
            }
        }
    }

    fn config(args: &[&str]) -> RunConfig {
        let mut argv = vec!["authload", "--summary-only"];
        argv.extend_from_slice(args);
        let cli = CliArgs::try_parse_from(argv).unwrap();
        RunConfig::resolve(&Defaults::default(), &EnvOverrides::default(), &cli).unwrap()
    }

    #[test]
    fn test_plan_waves_with_remainder() {
        let waves = plan_waves(25, 10);
        let sizes: Vec<usize> = waves.iter().map(Wave::len).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(waves[0].ids, 1..=10);
        assert_eq!(waves[1].ids, 11..=20);
        assert_eq!(waves[2].ids, 21..=25);
        assert_eq!(waves[2].index, 2);
    }

    #[test]
    fn test_plan_waves_exact_and_small() {
        assert_eq!(plan_waves(20, 10).len(), 2);
        assert_eq!(plan_waves(3, 10), vec![Wave { index: 0, ids: 1..=3 }]);
        assert_eq!(plan_waves(4, 1).len(), 4);
    }

    #[test]
    fn test_no_pause_after_last_wave_or_without_delay() {
        let delay = Duration::from_millis(100);
        assert!(should_pause(0, 3, delay));
        assert!(should_pause(1, 3, delay));
        assert!(!should_pause(2, 3, delay));
        assert!(!should_pause(0, 3, Duration::ZERO));
        assert!(!should_pause(0, 1, delay));
    }

    #[tokio::test]
    async fn test_run_records_every_request() {
        let runner = Runner::new(
            FakeExecutor::default(),
            &config(&["--total", "25", "--concurrent", "10", "--delay", "0"]),
        );
        let outcome = runner.run().await;

        assert_eq!(outcome.stats.total(), 25);
        assert_eq!(outcome.stats.successes() + outcome.stats.failures(), 25);
        assert_eq!(outcome.stats.failures(), 8);
        assert_eq!(outcome.stats.errors()[&ErrorTag::Http(500)], 8);

        let mut ids: Vec<usize> = runner
            .executor
            .started
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=25).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_waves_do_not_overlap() {
        let executor = FakeExecutor {
            work: Duration::from_millis(20),
            ..Default::default()
        };
        let runner = Runner::new(
            executor,
            &config(&["--total", "25", "--concurrent", "10", "--delay", "0"]),
        );
        runner.run().await;

        assert_eq!(runner.executor.max_in_flight.load(Ordering::SeqCst), 10);

        let started = runner.executor.started.lock().unwrap().clone();
        let finished = runner.executor.finished.lock().unwrap().clone();
        for wave in plan_waves(25, 10).windows(2) {
            let last_done = finished
                .iter()
                .filter(|(id, _)| wave[0].ids.contains(id))
                .map(|(_, at)| *at)
                .max()
                .unwrap();
            let first_start = started
                .iter()
                .filter(|(id, _)| wave[1].ids.contains(id))
                .map(|(_, at)| *at)
                .min()
                .unwrap();
            assert!(first_start >= last_done);
        }
    }

    #[tokio::test]
    async fn test_delay_only_between_waves() {
        let runner = Runner::new(
            FakeExecutor::default(),
            &config(&["--total", "2", "--concurrent", "1", "--delay", "150"]),
        );
        let outcome = runner.run().await;

        assert_eq!(outcome.stats.total(), 2);
        assert!(outcome.wall_time >= Duration::from_millis(150));
        assert!(outcome.wall_time < Duration::from_millis(300));
    }
}
