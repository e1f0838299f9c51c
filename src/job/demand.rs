//! Demand model: how fast a job's tree wants to grow, and how "hot" the
//! job still is for preemption decisions.

/// Growth parameters, merged from the process config and the job
/// description at start time.
#[derive(Debug, Clone, Copy)]
pub struct GrowthPolicy {
    /// Seconds per growth period; <= 0 means immediate full growth.
    pub growth_period: f64,
    /// Grow continuously instead of in discrete period steps.
    pub continuous: bool,
    /// Demand cap; 0 = unbounded.
    pub max_demand: usize,
}

impl GrowthPolicy {
    /// Upper bound on the job's volume at `elapsed` seconds on the clock.
    ///
    /// Active jobs grow along a doubling curve (a full binary tree gains
    /// one level per period); frozen jobs keep their previous volume.
    pub fn demand(
        &self,
        active: bool,
        comm_size: usize,
        prev_volume: usize,
        time_of_activation: f64,
        elapsed: f64,
    ) -> usize {
        if !active {
            return prev_volume;
        }
        let mut demand = if self.growth_period <= 0.0 {
            comm_size
        } else if time_of_activation <= 0.0 {
            1
        } else {
            let num_periods = (elapsed - time_of_activation) / self.growth_period;
            if self.continuous {
                // d(0) = 1; d := 2d+1 every growth period.
                let grown = 2f64.powf(num_periods + 1.0) - 1.0;
                comm_size.min(grown as usize)
            } else {
                let levels = num_periods.floor() as u32;
                comm_size.min((1usize << (levels + 1).min(63)) - 1)
            }
        };
        if self.max_demand > 0 {
            demand = demand.min(self.max_demand);
        }
        demand.max(1)
    }
}

const BASE_TEMPERATURE: f64 = 0.95;
const DECAY: f64 = 0.99;

/// Strictly decreasing per-job scalar used as a preemption tiebreaker.
///
/// Starts at 1.0 and converges exponentially toward 0.95. Once the
/// exponential step falls below machine precision, cooling continues
/// linearly by epsilon per second so strict monotonicity is preserved.
#[derive(Debug, Clone)]
pub struct Temperature {
    last: f64,
    age_of_const_cooldown: Option<f64>,
}

impl Default for Temperature {
    fn default() -> Self {
        Self::new()
    }
}

impl Temperature {
    pub fn new() -> Self {
        Self {
            last: 1.0,
            age_of_const_cooldown: None,
        }
    }

    /// Temperature at `age` seconds since activation. Ages must be
    /// queried in non-decreasing order.
    pub fn at_age(&mut self, age: f64) -> f64 {
        let eps = 2.0 * f64::EPSILON;
        let temp = BASE_TEMPERATURE + (1.0 - BASE_TEMPERATURE) * DECAY.powf(age + 1.0);

        if self.age_of_const_cooldown.is_none() && self.last - temp <= eps {
            self.age_of_const_cooldown = Some(age);
        }
        match self.age_of_const_cooldown {
            Some(cooldown_age) => {
                BASE_TEMPERATURE + (1.0 - BASE_TEMPERATURE) * DECAY.powf(cooldown_age + 1.0)
                    - (age - cooldown_age + 1.0) * eps
            }
            None => {
                self.last = temp;
                temp
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(period: f64, continuous: bool, max_demand: usize) -> GrowthPolicy {
        GrowthPolicy {
            growth_period: period,
            continuous,
            max_demand,
        }
    }

    #[test]
    fn immediate_growth_fills_comm_size() {
        let p = policy(0.0, false, 0);
        assert_eq!(p.demand(true, 13, 1, 5.0, 6.0), 13);
    }

    #[test]
    fn discrete_growth_doubles_per_period() {
        let p = policy(1.0, false, 0);
        // One period elapsed: two levels of the tree, 3 nodes.
        assert_eq!(p.demand(true, 100, 1, 0.0, 0.5), 1);
        assert_eq!(p.demand(true, 100, 1, 1.0, 2.5), 3);
        assert_eq!(p.demand(true, 100, 1, 1.0, 3.5), 7);
    }

    #[test]
    fn continuous_growth_is_monotone_between_periods() {
        let p = policy(1.0, true, 0);
        let d1 = p.demand(true, 1000, 1, 0.0, 0.0);
        let d2 = p.demand(true, 1000, 1, 0.0, 0.9);
        assert!(d2 >= d1);
    }

    #[test]
    fn max_demand_caps_growth() {
        let p = policy(0.0, false, 5);
        assert_eq!(p.demand(true, 100, 1, 1.0, 50.0), 5);
    }

    #[test]
    fn frozen_jobs_keep_previous_volume() {
        let p = policy(0.0, false, 0);
        assert_eq!(p.demand(false, 100, 7, 1.0, 50.0), 7);
    }

    #[test]
    fn temperature_is_strictly_decreasing() {
        let mut temp = Temperature::new();
        let mut last = f64::INFINITY;
        // Push far past the machine-precision stagnation point.
        for age in 0..5000 {
            let t = temp.at_age(age as f64);
            assert!(t < last, "temperature must strictly decrease (age {age})");
            last = t;
        }
    }
}
