//! Time-bounded parallel search over joint configurations.
//!
//! Every call clamps the seed, returns it at once if it already passes the
//! acceptance test, and otherwise runs one gradient-descent worker per thread
//! until one of them finds a solution or the timeout expires.

mod gradient;

use std::{
    hash::{DefaultHasher, Hash, Hasher},
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    sync::atomic::AtomicBool,
    thread,
    time::{Duration, Instant},
};

use rand::{rngs::StdRng, SeedableRng};
use tracing::{debug, warn};

use crate::{
    cost::{Evaluation, Problem},
    params::Parameters,
};

use gradient::{GradientIk, WorkerOutcome};

/// Settings of one search call.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    /// Wall-clock budget of every worker.
    pub timeout: Duration,
    /// Return the best configuration seen when the timeout expires.
    pub approximate: bool,
    /// Worker threads, 0 for one per available core.
    pub threads: usize,
    pub step_size: f64,
    pub min_cost_delta: f64,
    pub stall_iterations: usize,
    pub restart_radius: f64,
    /// Base seed of the workers' random streams, random when `None`.
    pub rng_seed: Option<u64>,
}

impl SearchConfig {
    /// Default tuning with the given timeout and no approximate solutions.
    pub fn new(timeout: Duration) -> Self {
        Self::from_parameters(&Parameters::default(), timeout, false)
    }

    pub fn from_parameters(params: &Parameters, timeout: Duration, approximate: bool) -> Self {
        Self {
            timeout,
            approximate,
            threads: params.threads,
            step_size: params.gd_step_size,
            min_cost_delta: params.gd_min_cost_delta,
            stall_iterations: params.gd_stall_iterations,
            restart_radius: params.restart_radius,
            rng_seed: params.rng_seed,
        }
    }

    pub fn with_approximate(mut self, approximate: bool) -> Self {
        self.approximate = approximate;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn worker_count(&self) -> usize {
        if self.threads > 0 {
            return self.threads;
        }
        thread::available_parallelism().map_or(1, NonZeroUsize::get)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// A configuration that passed the acceptance test.
    Found { variables: Vec<f64>, cost: f64 },
    /// The lowest-cost configuration seen before the timeout; it did not pass
    /// the acceptance test.
    Approximate { variables: Vec<f64>, cost: f64 },
    NoSolution,
}

impl SearchOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, SearchOutcome::Found { .. })
    }

    pub fn is_approximate(&self) -> bool {
        matches!(self, SearchOutcome::Approximate { .. })
    }

    pub fn variables(&self) -> Option<&[f64]> {
        match self {
            SearchOutcome::Found { variables, .. } | SearchOutcome::Approximate { variables, .. } => {
                Some(variables)
            }
            SearchOutcome::NoSolution => None,
        }
    }

    pub fn cost(&self) -> Option<f64> {
        match self {
            SearchOutcome::Found { cost, .. } | SearchOutcome::Approximate { cost, .. } => Some(*cost),
            SearchOutcome::NoSolution => None,
        }
    }

    pub fn into_variables(self) -> Option<Vec<f64>> {
        match self {
            SearchOutcome::Found { variables, .. } | SearchOutcome::Approximate { variables, .. } => {
                Some(variables)
            }
            SearchOutcome::NoSolution => None,
        }
    }
}

/// Derives the random stream of one worker from the base seed of a search.
pub fn derive_seed(base: u64, worker: usize) -> u64 {
    let mut hasher = DefaultHasher::new();
    base.hash(&mut hasher);
    worker.hash(&mut hasher);
    hasher.finish()
}

/// Searches for a configuration of `problem` that passes its acceptance
/// test, starting from `seed`.
///
/// # Panics
///
/// Panics if `seed.len()` differs from the number of active joints.
pub fn ik_search(problem: &Problem<'_>, seed: &[f64], config: &SearchConfig) -> SearchOutcome {
    let start = Instant::now();
    let robot = problem.robot();
    let seed = robot.enforce_bounds(seed);

    // a caller cost function may panic at the seed only
    let initial = match panic::catch_unwind(AssertUnwindSafe(|| problem.evaluate(&seed))) {
        Ok(evaluation) => evaluation,
        Err(_) => {
            warn!("seed evaluation panicked");
            Evaluation {
                cost: f64::INFINITY,
                accepted: false,
            }
        }
    };
    if initial.accepted {
        debug!(cost = initial.cost, "seed already solves the request");
        return SearchOutcome::Found {
            variables: seed,
            cost: initial.cost,
        };
    }
    if !initial.cost.is_finite() {
        warn!(cost = initial.cost, "seed cost is not finite");
    }

    let workers = config.worker_count();
    let base_seed = config.rng_seed.unwrap_or_else(rand::random);
    let deadline = start.checked_add(config.timeout);
    let found = AtomicBool::new(false);
    debug!(
        timeout = ?config.timeout,
        workers,
        joints = robot.variable_count(),
        "starting search"
    );

    let outcomes: Vec<WorkerOutcome> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|index| {
                let found = &found;
                let rng = StdRng::seed_from_u64(derive_seed(base_seed, index));
                let worker = GradientIk::new(problem, &seed, initial.cost, config, rng);
                scope.spawn(move || worker.run(deadline, found, index > 0))
            })
            .collect();

        handles
            .into_iter()
            .enumerate()
            .filter_map(|(index, handle)| match handle.join() {
                Ok(outcome) => Some(outcome),
                Err(_) => {
                    warn!(worker = index, "search worker panicked");
                    None
                }
            })
            .collect()
    });

    let seed_cost = if initial.cost.is_finite() {
        initial.cost
    } else {
        f64::INFINITY
    };
    let outcome = select(outcomes, &seed, seed_cost, config.approximate);
    debug!(
        elapsed = ?start.elapsed(),
        found = outcome.is_found(),
        approximate = outcome.is_approximate(),
        cost = outcome.cost(),
        "search finished"
    );
    outcome
}

fn select(
    outcomes: Vec<WorkerOutcome>,
    seed: &[f64],
    seed_cost: f64,
    approximate: bool,
) -> SearchOutcome {
    let mut best = (seed.to_vec(), seed_cost);
    for outcome in outcomes {
        match outcome {
            WorkerOutcome::Found { variables, cost } => {
                return SearchOutcome::Found { variables, cost };
            }
            WorkerOutcome::Exhausted { best: variables, best_cost } => {
                if best_cost < best.1 {
                    best = (variables, best_cost);
                }
            }
        }
    }

    if approximate {
        let (variables, cost) = best;
        SearchOutcome::Approximate { variables, cost }
    } else {
        SearchOutcome::NoSolution
    }
}
