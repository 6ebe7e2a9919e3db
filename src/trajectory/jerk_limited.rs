// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains a jerk-limited online trajectory generator.
//!
//! Every call to [`JerkLimitedGenerator::update`] advances all joints by one timestep towards
//! their target state. The joints are synchronized: they are planned with a common duration, the
//! shortest one for which a quintic polynomial from the current to the target state respects the
//! velocity, acceleration and jerk limits of every joint.
//!
//! The remainder of a feasible plan is feasible again after one step, so the planned duration
//! shrinks by at least one timestep per call and the target is always reached.

/// Longest duration which is planned for a single target in \[s\].
pub static MAX_PLANNING_DURATION: f64 = 1000.;
/// Factor between consecutive durations of the coarse search.
static DURATION_GROWTH: f64 = 1.5;
/// Resolution of the fine search in \[s\].
static DURATION_RESOLUTION: f64 = 1e-7;
static ROOT_ITERATIONS: usize = 50;
static LIMIT_TOLERANCE: f64 = 1e-9;

/// Outcome of one [`JerkLimitedGenerator::update`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StepResult {
    /// A step towards the target was made.
    Working,
    /// The target state was reached with this step.
    Finished,
    /// The input is invalid or the target cannot be reached within the limits.
    Error,
}

/// Current state, target state and limits of all joints.
#[derive(Debug, Clone, PartialEq)]
pub struct StepInput {
    pub current_position: Vec<f64>,
    pub current_velocity: Vec<f64>,
    pub current_acceleration: Vec<f64>,
    pub target_position: Vec<f64>,
    pub target_velocity: Vec<f64>,
    pub target_acceleration: Vec<f64>,
    pub max_velocity: Vec<f64>,
    pub max_acceleration: Vec<f64>,
    pub max_jerk: Vec<f64>,
}

impl StepInput {
    /// Creates an input for `num_dof` joints at rest at zero, with unit limits.
    pub fn new(num_dof: usize) -> Self {
        StepInput {
            current_position: vec![0.; num_dof],
            current_velocity: vec![0.; num_dof],
            current_acceleration: vec![0.; num_dof],
            target_position: vec![0.; num_dof],
            target_velocity: vec![0.; num_dof],
            target_acceleration: vec![0.; num_dof],
            max_velocity: vec![1.; num_dof],
            max_acceleration: vec![1.; num_dof],
            max_jerk: vec![1.; num_dof],
        }
    }

    pub fn num_dof(&self) -> usize {
        self.current_position.len()
    }

    fn is_valid(&self) -> bool {
        let num_dof = self.num_dof();
        let states = [
            &self.current_position,
            &self.current_velocity,
            &self.current_acceleration,
            &self.target_position,
            &self.target_velocity,
            &self.target_acceleration,
        ];
        let limits = [&self.max_velocity, &self.max_acceleration, &self.max_jerk];
        states
            .iter()
            .all(|values| values.len() == num_dof && values.iter().all(|x| x.is_finite()))
            && limits.iter().all(|values| {
                values.len() == num_dof && values.iter().all(|x| x.is_finite() && *x > 0.)
            })
    }

    fn target_reached(&self) -> bool {
        self.current_position == self.target_position
            && self.current_velocity == self.target_velocity
            && self.current_acceleration == self.target_acceleration
    }
}

/// State of all joints after one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub new_position: Vec<f64>,
    pub new_velocity: Vec<f64>,
    pub new_acceleration: Vec<f64>,
}

impl StepOutput {
    pub fn new(num_dof: usize) -> Self {
        StepOutput {
            new_position: vec![0.; num_dof],
            new_velocity: vec![0.; num_dof],
            new_acceleration: vec![0.; num_dof],
        }
    }

    /// Uses the new state as current state of `input`.
    pub fn pass_to_input(&self, input: &mut StepInput) {
        input.current_position.clone_from(&self.new_position);
        input.current_velocity.clone_from(&self.new_velocity);
        input.current_acceleration.clone_from(&self.new_acceleration);
    }
}

/// Quintic polynomial of one joint, `p(t) = sum c[i] * t^i`.
#[derive(Debug, Copy, Clone)]
struct Quintic {
    c: [f64; 6],
}

impl Quintic {
    #[allow(clippy::too_many_arguments)]
    fn new(p0: f64, v0: f64, a0: f64, p1: f64, v1: f64, a1: f64, duration: f64) -> Self {
        let t = duration;
        let h = p1 - p0;
        Quintic {
            c: [
                p0,
                v0,
                a0 / 2.,
                (20. * h - (8. * v1 + 12. * v0) * t - (3. * a0 - a1) * t.powi(2))
                    / (2. * t.powi(3)),
                (-30. * h + (14. * v1 + 16. * v0) * t + (3. * a0 - 2. * a1) * t.powi(2))
                    / (2. * t.powi(4)),
                (12. * h - 6. * (v1 + v0) * t + (a1 - a0) * t.powi(2)) / (2. * t.powi(5)),
            ],
        }
    }

    fn position(&self, t: f64) -> f64 {
        let c = &self.c;
        c[0] + t * (c[1] + t * (c[2] + t * (c[3] + t * (c[4] + t * c[5]))))
    }

    fn velocity(&self, t: f64) -> f64 {
        let c = &self.c;
        c[1] + t * (2. * c[2] + t * (3. * c[3] + t * (4. * c[4] + t * 5. * c[5])))
    }

    fn acceleration(&self, t: f64) -> f64 {
        let c = &self.c;
        2. * c[2] + t * (6. * c[3] + t * (12. * c[4] + t * 20. * c[5]))
    }

    fn jerk(&self, t: f64) -> f64 {
        let c = &self.c;
        6. * c[3] + t * (24. * c[4] + t * 60. * c[5])
    }

    /// Roots of the jerk in (0, duration), sorted.
    fn jerk_roots(&self, duration: f64) -> Vec<f64> {
        let (a, b, c) = (60. * self.c[5], 24. * self.c[4], 6. * self.c[3]);
        let mut roots = Vec::with_capacity(2);
        if a.abs() < f64::EPSILON * (b.abs() + c.abs() + 1.) {
            if b != 0. {
                roots.push(-c / b);
            }
        } else {
            let discriminant = b * b - 4. * a * c;
            if discriminant >= 0. {
                let sqrt = discriminant.sqrt();
                roots.push((-b - sqrt) / (2. * a));
                roots.push((-b + sqrt) / (2. * a));
            }
        }
        roots.retain(|t| *t > 0. && *t < duration);
        roots.sort_by(|x, y| x.total_cmp(y));
        roots
    }

    /// Points in (0, duration) where the acceleration changes sign.
    fn acceleration_roots(&self, duration: f64, jerk_roots: &[f64]) -> Vec<f64> {
        let mut bounds = vec![0.];
        bounds.extend_from_slice(jerk_roots);
        bounds.push(duration);
        let mut roots = Vec::new();
        // the acceleration is monotonic between two roots of the jerk
        for window in bounds.windows(2) {
            let (mut low, mut high) = (window[0], window[1]);
            let (a_low, a_high) = (self.acceleration(low), self.acceleration(high));
            if a_low == 0. || a_low.signum() == a_high.signum() {
                continue;
            }
            for _ in 0..ROOT_ITERATIONS {
                let middle = 0.5 * (low + high);
                if self.acceleration(middle).signum() == a_low.signum() {
                    low = middle;
                } else {
                    high = middle;
                }
            }
            roots.push(0.5 * (low + high));
        }
        roots
    }

    fn respects_limits(&self, duration: f64, max_velocity: f64, max_acceleration: f64, max_jerk: f64) -> bool {
        let within = |value: f64, limit: f64| value.abs() <= limit * (1. + LIMIT_TOLERANCE) + 1e-12;
        let jerk_roots = self.jerk_roots(duration);
        let jerk_vertex = if self.c[5] != 0. {
            let t = -self.c[4] / (5. * self.c[5]);
            if t > 0. && t < duration {
                Some(t)
            } else {
                None
            }
        } else {
            None
        };
        let jerk_points = [Some(0.), Some(duration), jerk_vertex];
        if !jerk_points
            .iter()
            .flatten()
            .all(|t| within(self.jerk(*t), max_jerk))
        {
            return false;
        }
        if !jerk_roots
            .iter()
            .chain([0., duration].iter())
            .all(|t| within(self.acceleration(*t), max_acceleration))
        {
            return false;
        }
        self.acceleration_roots(duration, &jerk_roots)
            .iter()
            .chain(jerk_roots.iter())
            .chain([0., duration].iter())
            .all(|t| within(self.velocity(*t), max_velocity))
    }
}

/// The plan of the last update, reused if the next update continues it.
#[derive(Debug, Clone)]
struct Plan {
    position: Vec<f64>,
    velocity: Vec<f64>,
    acceleration: Vec<f64>,
    target: StepInput,
    remaining_duration: f64,
}

/// Jerk-limited online trajectory generator with a fixed timestep.
#[derive(Debug, Clone)]
pub struct JerkLimitedGenerator {
    num_dof: usize,
    timestep: f64,
    plan: Option<Plan>,
}

impl JerkLimitedGenerator {
    /// Creates a generator for `num_dof` joints which advances `timestep` seconds per update.
    pub fn new(num_dof: usize, timestep: f64) -> Self {
        JerkLimitedGenerator {
            num_dof,
            timestep,
            plan: None,
        }
    }

    pub fn timestep(&self) -> f64 {
        self.timestep
    }

    fn quintics(&self, input: &StepInput, duration: f64) -> Vec<Quintic> {
        (0..input.num_dof())
            .map(|i| {
                Quintic::new(
                    input.current_position[i],
                    input.current_velocity[i],
                    input.current_acceleration[i],
                    input.target_position[i],
                    input.target_velocity[i],
                    input.target_acceleration[i],
                    duration,
                )
            })
            .collect()
    }

    fn is_feasible(&self, input: &StepInput, duration: f64) -> bool {
        self.quintics(input, duration)
            .iter()
            .enumerate()
            .all(|(i, quintic)| {
                quintic.respects_limits(
                    duration,
                    input.max_velocity[i],
                    input.max_acceleration[i],
                    input.max_jerk[i],
                )
            })
    }

    /// Remaining duration of the previous plan if `input` continues it.
    fn continued_plan(&self, input: &StepInput) -> Option<f64> {
        let plan = self.plan.as_ref()?;
        let continues = plan.position == input.current_position
            && plan.velocity == input.current_velocity
            && plan.acceleration == input.current_acceleration
            && plan.target.target_position == input.target_position
            && plan.target.target_velocity == input.target_velocity
            && plan.target.target_acceleration == input.target_acceleration
            && plan.target.max_velocity == input.max_velocity
            && plan.target.max_acceleration == input.max_acceleration
            && plan.target.max_jerk == input.max_jerk;
        if continues {
            Some(plan.remaining_duration)
        } else {
            None
        }
    }

    /// Shortest feasible common duration, found by a coarse geometric search followed by
    /// bisection.
    fn minimal_duration(&self, input: &StepInput) -> Option<f64> {
        let continued = self.continued_plan(input);
        let search_limit = continued.unwrap_or(MAX_PLANNING_DURATION);
        let mut infeasible = 0.;
        let mut candidate = self.timestep;
        while candidate < search_limit {
            if self.is_feasible(input, candidate) {
                if candidate <= self.timestep {
                    return Some(candidate);
                }
                let mut feasible = candidate;
                while feasible - infeasible > DURATION_RESOLUTION {
                    let middle = 0.5 * (feasible + infeasible);
                    if self.is_feasible(input, middle) {
                        feasible = middle;
                    } else {
                        infeasible = middle;
                    }
                }
                return Some(feasible);
            }
            infeasible = candidate;
            candidate *= DURATION_GROWTH;
        }
        match continued {
            Some(remaining) => Some(remaining),
            None if self.is_feasible(input, MAX_PLANNING_DURATION) => Some(MAX_PLANNING_DURATION),
            None => None,
        }
    }

    /// Advances the state in `input` by one timestep and writes it to `output`.
    pub fn update(&mut self, input: &StepInput, output: &mut StepOutput) -> StepResult {
        if input.num_dof() != self.num_dof || !input.is_valid() || !(self.timestep > 0.) {
            self.plan = None;
            return StepResult::Error;
        }
        let finish = |output: &mut StepOutput| {
            output.new_position.clone_from(&input.target_position);
            output.new_velocity.clone_from(&input.target_velocity);
            output.new_acceleration.clone_from(&input.target_acceleration);
        };
        if input.target_reached() {
            self.plan = None;
            finish(output);
            return StepResult::Finished;
        }
        let duration = match self.minimal_duration(input) {
            Some(duration) => duration,
            None => {
                self.plan = None;
                return StepResult::Error;
            }
        };
        if duration <= self.timestep {
            self.plan = None;
            finish(output);
            return StepResult::Finished;
        }
        let quintics = self.quintics(input, duration);
        output.new_position = quintics.iter().map(|q| q.position(self.timestep)).collect();
        output.new_velocity = quintics.iter().map(|q| q.velocity(self.timestep)).collect();
        output.new_acceleration = quintics
            .iter()
            .map(|q| q.acceleration(self.timestep))
            .collect();
        self.plan = Some(Plan {
            position: output.new_position.clone(),
            velocity: output.new_velocity.clone(),
            acceleration: output.new_acceleration.clone(),
            target: input.clone(),
            remaining_duration: duration - self.timestep,
        });
        StepResult::Working
    }
}
