//! Online optimizers driving an optimize scan.
//!
//! The traversal engine treats the optimizer as a black box behind the
//! [`Optimizer`] trait: feed it every sample measured so far, get the next
//! point to try. Heavyweight strategies (Bayesian optimization and friends)
//! plug in from outside; the crate ships a compass-style [`HillClimb`] that
//! is good enough for peaking up signals, plus a scripted [`FixedSequence`]
//! for rehearsing runs without randomness.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Strategy interface for an optimize scan.
///
/// `inputs` holds one row per sampled input name (aligned samples of the
/// measured quantities fed back to the optimizer); `outputs` holds the
/// objective sample per point, to be maximized. `propose` returns the next
/// values to apply, one per swept device, in declaration order.
pub trait Optimizer: Send {
    /// Propose the next point from everything measured so far.
    fn propose(&mut self, inputs: &[Vec<f64>], outputs: &[f64]) -> Vec<f64>;

    /// False once converged; the scan finishes its current point and stops.
    fn is_running(&self) -> bool;
}

/// Seeded hill climber moving one axis at a time with step decay.
///
/// Each proposal nudges the best point seen so far along a single dimension;
/// a sweep visits every dimension in both directions, in a seed-shuffled
/// order. Only a whole sweep without improvement shrinks the steps, and the
/// climber converges once every step has dropped below a fraction of its
/// search span.
pub struct HillClimb {
    bounds: Vec<(f64, f64)>,
    step: Vec<f64>,
    shrink: f64,
    min_step: Vec<f64>,
    best: Option<(Vec<f64>, f64)>,
    order: Vec<usize>,
    cursor: usize,
    rng: StdRng,
    running: bool,
}

impl HillClimb {
    /// Climber over `bounds` (one `(lo, hi)` pair per swept device), seeded
    /// for reproducibility. Starts from the center of the box with a step of
    /// a quarter span per dimension.
    pub fn new(bounds: Vec<(f64, f64)>, seed: u64) -> Self {
        let step = bounds.iter().map(|(lo, hi)| (hi - lo) / 4.0).collect();
        let min_step = bounds.iter().map(|(lo, hi)| (hi - lo) * 1e-3).collect();
        let order = (0..bounds.len()).collect();
        Self {
            bounds,
            step,
            shrink: 0.7,
            min_step,
            best: None,
            order,
            cursor: 0,
            rng: StdRng::seed_from_u64(seed),
            running: true,
        }
    }

    /// Override the step decay factor (default 0.7).
    #[must_use]
    pub fn with_shrink(mut self, shrink: f64) -> Self {
        self.shrink = shrink;
        self
    }

    /// Best `(point, objective)` seen so far.
    pub fn best(&self) -> Option<(&[f64], f64)> {
        self.best.as_ref().map(|(p, v)| (p.as_slice(), *v))
    }

    fn center(&self) -> Vec<f64> {
        self.bounds.iter().map(|(lo, hi)| (lo + hi) / 2.0).collect()
    }

    fn restart_sweep(&mut self) {
        self.order.shuffle(&mut self.rng);
        self.cursor = 0;
    }
}

impl Optimizer for HillClimb {
    fn propose(&mut self, inputs: &[Vec<f64>], outputs: &[f64]) -> Vec<f64> {
        let center = self.center();

        if let Some(&last_out) = outputs.last() {
            let last_point: Vec<f64> = center
                .iter()
                .enumerate()
                .map(|(d, &c)| inputs.get(d).and_then(|row| row.last()).copied().unwrap_or(c))
                .collect();

            let improved = self
                .best
                .as_ref()
                .map_or(true, |(_, best_out)| last_out > *best_out);
            if improved {
                self.best = Some((last_point, last_out));
                self.restart_sweep();
            } else {
                self.cursor += 1;
                if self.cursor >= 2 * self.order.len() {
                    // A whole sweep failed to improve: decay every step,
                    // converge once all of them are below their floor.
                    for step in &mut self.step {
                        *step *= self.shrink;
                    }
                    if self.step.iter().zip(&self.min_step).all(|(s, m)| s < m) {
                        self.running = false;
                    }
                    self.restart_sweep();
                }
            }
        }

        let mut proposal = match &self.best {
            Some((point, _)) => point.clone(),
            None => center,
        };
        if let Some(&d) = self.order.get(self.cursor / 2) {
            let nudge = if self.cursor % 2 == 0 {
                self.step[d]
            } else {
                -self.step[d]
            };
            let (lo, hi) = self.bounds[d];
            proposal[d] = (proposal[d] + nudge).clamp(lo, hi);
        }
        proposal
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

/// Scripted optimizer replaying a fixed list of proposals.
///
/// Reports converged once the script is exhausted, which lets tests drive an
/// optimize scan through an exact, reproducible trajectory.
pub struct FixedSequence {
    proposals: Vec<Vec<f64>>,
    cursor: usize,
}

impl FixedSequence {
    /// Replay `proposals` in order.
    pub fn new(proposals: Vec<Vec<f64>>) -> Self {
        Self {
            proposals,
            cursor: 0,
        }
    }
}

impl Optimizer for FixedSequence {
    fn propose(&mut self, _inputs: &[Vec<f64>], _outputs: &[f64]) -> Vec<f64> {
        let proposal = self
            .proposals
            .get(self.cursor)
            .or_else(|| self.proposals.last())
            .cloned()
            .unwrap_or_default();
        self.cursor += 1;
        proposal
    }

    fn is_running(&self) -> bool {
        self.cursor < self.proposals.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Feed the climber a smooth 1-D objective and let it run.
    fn climb(mut opt: HillClimb, objective: impl Fn(f64) -> f64, steps: usize) -> HillClimb {
        let mut xs: Vec<f64> = Vec::new();
        let mut ys: Vec<f64> = Vec::new();
        for _ in 0..steps {
            let p = opt.propose(&[xs.clone()], &ys);
            xs.push(p[0]);
            ys.push(objective(p[0]));
            if !opt.is_running() {
                break;
            }
        }
        opt
    }

    #[test]
    fn hill_climb_finds_a_quadratic_peak() {
        let opt = HillClimb::new(vec![(0.0, 6.0)], 7);
        let opt = climb(opt, |x| -(x - 3.0) * (x - 3.0), 200);
        let (point, value) = opt.best().unwrap();
        assert!(
            (point[0] - 3.0).abs() < 0.5,
            "best x = {}, objective = {}",
            point[0],
            value
        );
    }

    #[test]
    fn hill_climb_converges_and_stops() {
        let opt = HillClimb::new(vec![(-1.0, 1.0)], 11).with_shrink(0.3);
        let opt = climb(opt, |x| -x.abs(), 500);
        assert!(!opt.is_running());
    }

    #[test]
    fn proposals_stay_inside_bounds() {
        let mut opt = HillClimb::new(vec![(0.0, 1.0), (10.0, 20.0)], 3);
        let mut inputs = vec![Vec::new(), Vec::new()];
        let mut outputs = Vec::new();
        for k in 0..50 {
            let p = opt.propose(&inputs, &outputs);
            assert!((0.0..=1.0).contains(&p[0]));
            assert!((10.0..=20.0).contains(&p[1]));
            inputs[0].push(p[0]);
            inputs[1].push(p[1]);
            outputs.push(f64::from(k % 5)); // bumpy, non-improving stretches
        }
    }

    #[test]
    fn fixed_sequence_replays_and_converges() {
        let mut opt = FixedSequence::new(vec![vec![1.0], vec![2.0]]);
        assert!(opt.is_running());
        assert_eq!(opt.propose(&[], &[]), vec![1.0]);
        assert_eq!(opt.propose(&[], &[]), vec![2.0]);
        assert!(!opt.is_running());
        // Exhausted scripts keep replaying the last proposal.
        assert_eq!(opt.propose(&[], &[]), vec![2.0]);
    }
}
