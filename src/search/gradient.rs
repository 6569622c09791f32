use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use rand::{rngs::StdRng, Rng};

use crate::cost::Problem;

use super::SearchConfig;

// backtracking halvings of the secant step
const LINE_SEARCH_HALVINGS: usize = 4;
const MIN_RESTART_RADIUS: f64 = 1e-4;

/// Result of one worker once it stops iterating.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WorkerOutcome {
    /// This worker set the shared found-flag with an accepted configuration.
    Found { variables: Vec<f64>, cost: f64 },
    /// Deadline reached or another worker found a solution first.
    Exhausted { best: Vec<f64>, best_cost: f64 },
}

/// Gradient descent with stochastic restarts over one problem.
///
/// Each worker owns one of these; only the problem is shared.
pub(crate) struct GradientIk<'a> {
    problem: &'a Problem<'a>,
    rng: StdRng,
    step_size: f64,
    min_cost_delta: f64,
    stall_iterations: usize,
    restart_radius: f64,

    working: Vec<f64>,
    working_cost: f64,
    best: Vec<f64>,
    best_cost: f64,

    stalls: usize,
    radius: f64,
    improved_since_restart: bool,
}

impl<'a> GradientIk<'a> {
    /// `seed` must already be clamped to the joint limits.
    pub(crate) fn new(
        problem: &'a Problem<'a>,
        seed: &[f64],
        seed_cost: f64,
        config: &SearchConfig,
        rng: StdRng,
    ) -> Self {
        let seed_cost = finite_or_inf(seed_cost);
        Self {
            problem,
            rng,
            step_size: config.step_size,
            min_cost_delta: config.min_cost_delta,
            stall_iterations: config.stall_iterations.max(1),
            restart_radius: config.restart_radius,
            working: seed.to_vec(),
            working_cost: seed_cost,
            best: seed.to_vec(),
            best_cost: seed_cost,
            stalls: 0,
            radius: config.restart_radius,
            // the first restart uses the full radius
            improved_since_restart: true,
        }
    }

    /// Iterates until a solution is found, `found` is raised by another
    /// worker, or `deadline` passes.
    ///
    /// With `diversify` the worker starts from a perturbed seed instead of
    /// the seed itself.
    pub(crate) fn run(
        mut self,
        deadline: Option<Instant>,
        found: &AtomicBool,
        diversify: bool,
    ) -> WorkerOutcome {
        if diversify {
            if let Some(outcome) = self.restart().and_then(|cost| self.claim(found, cost)) {
                return outcome;
            }
        }
        loop {
            if found.load(Ordering::Acquire) {
                break;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break;
            }
            let accepted = if self.stalls >= self.stall_iterations {
                self.restart()
            } else {
                self.step()
            };
            if let Some(cost) = accepted {
                match self.claim(found, cost) {
                    Some(outcome) => return outcome,
                    None => break,
                }
            }
        }
        WorkerOutcome::Exhausted {
            best: self.best,
            best_cost: self.best_cost,
        }
    }

    // single writer: only the worker that flips the flag reports Found
    fn claim(&self, found: &AtomicBool, cost: f64) -> Option<WorkerOutcome> {
        found
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then(|| WorkerOutcome::Found {
                variables: self.working.clone(),
                cost,
            })
    }

    /// One gradient step from the working configuration.
    ///
    /// Returns the cost of the working configuration if it passed the
    /// acceptance test.
    pub(crate) fn step(&mut self) -> Option<f64> {
        let gradient = match self.gradient() {
            Some(gradient) => gradient,
            None => {
                self.stalls += 1;
                return None;
            }
        };

        let minus = self.offset(&gradient, -1.0);
        let plus = self.offset(&gradient, 1.0);
        let (p1, minus_accepted) = self.evaluate(&minus);
        if minus_accepted {
            return Some(self.advance(minus, p1));
        }
        let (p3, plus_accepted) = self.evaluate(&plus);
        if plus_accepted {
            return Some(self.advance(plus, p3));
        }

        // secant toward the zero of the cost along the gradient
        let p2 = 0.5 * (p1 + p3);
        let slope = 0.5 * (p3 - p1);
        let mut joint_diff = p2 / slope;
        if !joint_diff.is_finite() {
            joint_diff = 0.0;
        }

        let mut next: Option<(Vec<f64>, f64)> = None;
        if joint_diff != 0.0 {
            for _ in 0..=LINE_SEARCH_HALVINGS {
                let candidate = self.offset(&gradient, -joint_diff);
                let (cost, accepted) = self.evaluate(&candidate);
                if accepted {
                    return Some(self.advance(candidate, cost));
                }
                if cost < self.working_cost {
                    next = Some((candidate, cost));
                    break;
                }
                joint_diff *= 0.5;
            }
        }

        // the secant assumes a zero minimum; fall back to the vertex of the
        // parabola through the three samples
        let curvature = p1 + p3 - 2.0 * self.working_cost;
        if next.is_none() && curvature > 0.0 {
            let vertex = (p1 - p3) / (2.0 * curvature);
            if vertex.is_finite() && vertex != 0.0 {
                let candidate = self.offset(&gradient, vertex);
                let (cost, accepted) = self.evaluate(&candidate);
                if accepted {
                    return Some(self.advance(candidate, cost));
                }
                if cost < self.working_cost {
                    next = Some((candidate, cost));
                }
            }
        }

        if next.is_none() && p1 < self.working_cost {
            next = Some((minus, p1));
        }

        match next {
            Some((candidate, cost)) => {
                let improvement = self.working_cost - cost;
                self.advance(candidate, cost);
                if improvement < self.min_cost_delta {
                    self.stalls += 1;
                } else {
                    self.stalls = 0;
                }
            }
            None => self.stalls += 1,
        }
        None
    }

    /// Moves to a random configuration around the best one seen so far.
    ///
    /// The move is taken whatever its cost. Returns the new cost if it
    /// passed the acceptance test.
    pub(crate) fn restart(&mut self) -> Option<f64> {
        if self.improved_since_restart {
            self.radius = self.restart_radius;
        } else {
            self.radius *= 0.5;
        }
        if self.radius < MIN_RESTART_RADIUS {
            self.radius = self
                .rng
                .random_range(MIN_RESTART_RADIUS..=self.restart_radius.max(MIN_RESTART_RADIUS));
        }
        self.improved_since_restart = false;
        self.stalls = 0;

        let robot = self.problem.robot();
        let mut candidate = self.best.clone();
        for (value, variable) in candidate.iter_mut().zip(robot.variables()) {
            let noise: f64 = self.rng.random_range(-1.0..=1.0);
            *value += noise * variable.search_span() * self.radius;
        }
        robot.clamp(&mut candidate);

        let (cost, accepted) = self.evaluate(&candidate);
        self.advance(candidate, cost);
        accepted.then_some(cost)
    }

    // central differences, scaled to an L1 norm of `step_size`
    fn gradient(&self) -> Option<Vec<f64>> {
        let h = self.step_size;
        let mut shifted = self.working.clone();
        let mut gradient = vec![0.0; shifted.len()];
        for (i, slope) in gradient.iter_mut().enumerate() {
            let original = shifted[i];
            shifted[i] = original + h;
            let plus = self.problem.cost(&shifted);
            shifted[i] = original - h;
            let minus = self.problem.cost(&shifted);
            shifted[i] = original;
            *slope = plus - minus;
        }

        let norm: f64 = gradient.iter().map(|g| g.abs()).sum();
        if !(norm.is_finite() && norm > 0.0) {
            return None;
        }
        gradient.iter_mut().for_each(|g| *g *= h / norm);
        Some(gradient)
    }

    fn offset(&self, gradient: &[f64], scale: f64) -> Vec<f64> {
        let mut candidate: Vec<f64> = self
            .working
            .iter()
            .zip(gradient)
            .map(|(q, g)| q + scale * g)
            .collect();
        self.problem.robot().clamp(&mut candidate);
        candidate
    }

    // every evaluated candidate counts toward the best, taken or not
    fn evaluate(&mut self, candidate: &[f64]) -> (f64, bool) {
        let evaluation = self.problem.evaluate(candidate);
        let cost = finite_or_inf(evaluation.cost);
        if cost < self.best_cost {
            self.best = candidate.to_vec();
            self.best_cost = cost;
            self.improved_since_restart = true;
        }
        (cost, evaluation.accepted)
    }

    fn advance(&mut self, candidate: Vec<f64>, cost: f64) -> f64 {
        self.working = candidate;
        self.working_cost = cost;
        cost
    }
}

fn finite_or_inf(cost: f64) -> f64 {
    if cost.is_finite() {
        cost
    } else {
        f64::INFINITY
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{MultiBody, Parameters, Robot};
    use rand::SeedableRng;
    use std::time::Duration;

    fn robot(file: &str, tips: &[&str]) -> Robot {
        let multi_body = MultiBody::from_urdf(file).unwrap();
        Robot::from_multi_body(&multi_body, "base_link", tips).unwrap()
    }

    fn worker<'a>(problem: &'a Problem<'a>, seed: &[f64]) -> GradientIk<'a> {
        let config = SearchConfig::new(Duration::from_millis(100));
        let cost = problem.cost(seed);
        GradientIk::new(problem, seed, cost, &config, StdRng::seed_from_u64(7))
    }

    #[test]
    fn test_step_descends() {
        let robot = robot("urdf/planar_arm.urdf", &["tool"]);
        let goal = robot.fk(&[0.2, 0.5, -0.4, 0.3, 0.0]);
        let seed = [0.1, 0.0, 0.0, 0.0, 0.0];
        let problem = Problem::from_goal_frames(&robot, &goal, &Parameters::default(), &seed, None);

        let mut worker = worker(&problem, &seed);
        let start = worker.best_cost;
        let mut previous = start;
        for _ in 0..20 {
            if worker.step().is_some() {
                break;
            }
            // steps never make the working configuration worse
            assert!(worker.working_cost <= previous);
            previous = worker.working_cost;
        }
        assert!(worker.best_cost < start);
    }

    #[test]
    fn test_step_reaches_goal() {
        let robot = robot("urdf/single_revolute.urdf", &["tool"]);
        let goal = robot.fk(&[1.0]);
        let problem = Problem::from_goal_frames(&robot, &goal, &Parameters::default(), &[0.0], None);

        let mut worker = worker(&problem, &[0.0]);
        let cost = (0..10_000).find_map(|_| worker.step());
        assert!(cost.is_some());
        assert!((worker.working[0] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_restart_stays_in_limits() {
        let robot = robot("urdf/planar_arm.urdf", &["tool"]);
        let goal = [nalgebra::Isometry3::translation(5.0, 0.0, 0.0)];
        let seed = [0.5, 2.9, -2.5, 2.0, 3.0];
        let problem = Problem::from_goal_frames(&robot, &goal, &Parameters::default(), &seed, None);

        let mut worker = worker(&problem, &seed);
        let mut radii = vec![];
        for _ in 0..40 {
            assert!(worker.restart().is_none());
            radii.push(worker.radius);
            for (value, variable) in worker.working.iter().zip(robot.variables()) {
                match variable.limits {
                    Some(l) => assert!(l.min <= *value && *value <= l.max),
                    None => assert!(value.abs() <= std::f64::consts::PI),
                }
            }
        }
        assert!(radii.iter().all(|r| *r >= MIN_RESTART_RADIUS && *r <= 0.2));
        // the best never gets worse, whatever the restarts do
        assert!(worker.best_cost <= problem.cost(&seed));
    }

    #[test]
    fn test_first_restart_uses_full_radius() {
        let robot = robot("urdf/planar_arm.urdf", &["tool"]);
        let goal = [nalgebra::Isometry3::translation(5.0, 0.0, 0.0)];
        let seed = [0.5, 0.0, 0.0, 0.0, 0.0];
        let problem = Problem::from_goal_frames(&robot, &goal, &Parameters::default(), &seed, None);

        let mut worker = worker(&problem, &seed);
        worker.restart();
        assert_eq!(worker.radius, 0.2);
    }

    #[test]
    fn test_dropped_candidate_updates_best() {
        let robot = robot("urdf/single_revolute.urdf", &["tool"]);
        let goal = robot.fk(&[1.0]);
        let problem = Problem::from_goal_frames(&robot, &goal, &Parameters::default(), &[0.0], None);

        let mut worker = worker(&problem, &[0.0]);
        let seed_cost = worker.working_cost;
        let (cost, accepted) = worker.evaluate(&[0.9]);
        assert!(!accepted);
        assert!(cost < seed_cost);
        // the working configuration stays put, the best follows the sample
        assert_eq!(worker.working, vec![0.0]);
        assert_eq!(worker.working_cost, seed_cost);
        assert_eq!(worker.best, vec![0.9]);
        assert_eq!(worker.best_cost, cost);
        assert!(worker.improved_since_restart);

        // a worse sample leaves the best alone
        worker.evaluate(&[-0.5]);
        assert_eq!(worker.best, vec![0.9]);
    }

    #[test]
    fn test_run_respects_found_flag() {
        let robot = robot("urdf/single_revolute.urdf", &["tool"]);
        let goal = [nalgebra::Isometry3::translation(2.0, 0.0, 0.0)];
        let problem = Problem::from_goal_frames(&robot, &goal, &Parameters::default(), &[0.0], None);

        let found = AtomicBool::new(true);
        let outcome = worker(&problem, &[0.0]).run(None, &found, false);
        assert_eq!(
            outcome,
            WorkerOutcome::Exhausted {
                best: vec![0.0],
                best_cost: problem.cost(&[0.0]),
            }
        );
    }

    #[test]
    fn test_run_claims_found_flag() {
        let robot = robot("urdf/single_revolute.urdf", &["tool"]);
        let goal = robot.fk(&[-0.6]);
        let problem = Problem::from_goal_frames(&robot, &goal, &Parameters::default(), &[0.0], None);

        let found = AtomicBool::new(false);
        let deadline = Instant::now() + Duration::from_secs(5);
        let outcome = worker(&problem, &[0.0]).run(Some(deadline), &found, false);
        assert!(found.load(Ordering::Acquire));
        match outcome {
            WorkerOutcome::Found { variables, .. } => {
                assert!(problem.evaluate(&variables).accepted);
            }
            other => panic!("expected a solution, got {other:?}"),
        }
    }
}
