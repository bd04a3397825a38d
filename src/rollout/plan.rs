use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use crate::models::stage::Stage;

/// Rejected rollout schedules. Raised at plan construction, before any
/// stage has run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("rollout plan is empty")]
    Empty,
    #[error("stage percentage {0} is outside (0, 100]")]
    OutOfRange(u8),
    #[error("stage percentages must be strictly increasing: {prev} then {next}")]
    NotIncreasing { prev: u8, next: u8 },
    #[error("rollout plan must end at 100%, ends at {0}")]
    Incomplete(u8),
    #[error("total capital must be positive, got {0}")]
    NonPositiveCapital(Decimal),
}

/// Validated, immutable escalation schedule.
#[derive(Debug, Clone)]
pub struct RolloutPlan {
    stages: Vec<Stage>,
    total_capital: Decimal,
}

impl RolloutPlan {
    /// Build a plan from (percentage, risk_level) pairs, computing each
    /// stage's planned capital share of the total.
    pub fn build(schedule: &[(u8, u8)], total_capital: Decimal) -> Result<Self, PlanError> {
        if schedule.is_empty() {
            return Err(PlanError::Empty);
        }
        if total_capital <= Decimal::ZERO {
            return Err(PlanError::NonPositiveCapital(total_capital));
        }

        let mut prev: Option<u8> = None;
        for &(percentage, _) in schedule {
            if percentage == 0 || percentage > 100 {
                return Err(PlanError::OutOfRange(percentage));
            }
            if let Some(prev) = prev {
                if percentage <= prev {
                    return Err(PlanError::NotIncreasing {
                        prev,
                        next: percentage,
                    });
                }
            }
            prev = Some(percentage);
        }

        let last = schedule[schedule.len() - 1].0;
        if last != 100 {
            return Err(PlanError::Incomplete(last));
        }

        let stages = schedule
            .iter()
            .map(|&(percentage, risk_level)| Stage {
                percentage,
                capital: stage_capital(total_capital, percentage),
                risk_level,
            })
            .collect();

        Ok(Self {
            stages,
            total_capital,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_capital(&self) -> Decimal {
        self.total_capital
    }
}

/// Capital committed once a stage of the given percentage completes.
pub fn stage_capital(total_capital: Decimal, percentage: u8) -> Decimal {
    total_capital * Decimal::from(u32::from(percentage)) / dec!(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_plan() {
        let plan =
            RolloutPlan::build(&[(5, 1), (25, 2), (50, 2), (100, 3)], dec!(100_000)).unwrap();
        assert_eq!(plan.stages().len(), 4);
        assert_eq!(plan.stages()[0].capital, dec!(5000));
        assert_eq!(plan.stages()[2].capital, dec!(50_000));
        assert_eq!(plan.stages()[3].capital, dec!(100_000));
    }

    #[test]
    fn test_empty_plan_rejected() {
        assert_eq!(
            RolloutPlan::build(&[], dec!(1000)).unwrap_err(),
            PlanError::Empty
        );
    }

    #[test]
    fn test_non_increasing_rejected() {
        let err = RolloutPlan::build(&[(5, 1), (25, 1), (25, 1), (100, 1)], dec!(1000))
            .unwrap_err();
        assert_eq!(err, PlanError::NotIncreasing { prev: 25, next: 25 });

        let err = RolloutPlan::build(&[(50, 1), (25, 1), (100, 1)], dec!(1000)).unwrap_err();
        assert_eq!(err, PlanError::NotIncreasing { prev: 50, next: 25 });
    }

    #[test]
    fn test_incomplete_schedule_rejected() {
        let err = RolloutPlan::build(&[(5, 1), (25, 1), (50, 1)], dec!(1000)).unwrap_err();
        assert_eq!(err, PlanError::Incomplete(50));
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert_eq!(
            RolloutPlan::build(&[(0, 1), (100, 1)], dec!(1000)).unwrap_err(),
            PlanError::OutOfRange(0)
        );
    }

    #[test]
    fn test_non_positive_capital_rejected() {
        assert_eq!(
            RolloutPlan::build(&[(100, 1)], Decimal::ZERO).unwrap_err(),
            PlanError::NonPositiveCapital(Decimal::ZERO)
        );
        assert_eq!(
            RolloutPlan::build(&[(100, 1)], dec!(-5)).unwrap_err(),
            PlanError::NonPositiveCapital(dec!(-5))
        );
    }

    #[test]
    fn test_single_stage_plan() {
        let plan = RolloutPlan::build(&[(100, 3)], dec!(500)).unwrap();
        assert_eq!(plan.stages().len(), 1);
        assert_eq!(plan.stages()[0].capital, dec!(500));
    }
}
