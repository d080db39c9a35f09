//! Configuration passed explicitly through the solver pipeline.

use chrono::Duration;
use std::str::FromStr;
use std::time::Duration as StdDuration;

/// How the first pipeline stage seeds the individual-carer solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirstStageStrategy {
    #[default]
    Teams,
    SoftTimeWindows,
    None,
}

impl FromStr for FirstStageStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "default" | "teams" => Ok(Self::Teams),
            "soft-time-windows" | "soft_time_windows" => Ok(Self::SoftTimeWindows),
            "none" => Ok(Self::None),
            other => Err(format!("unknown first stage strategy {:?}", other)),
        }
    }
}

/// Objective of the refinement stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThirdStageStrategy {
    #[default]
    Distance,
    VehicleReduction,
    DelayReduction,
    None,
}

impl FromStr for ThirdStageStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "default" | "distance" => Ok(Self::Distance),
            "vehicle-reduction" | "vehicle_reduction" => Ok(Self::VehicleReduction),
            "delay-reduction" | "delay_reduction" => Ok(Self::DelayReduction),
            "none" => Ok(Self::None),
            other => Err(format!("unknown third stage strategy {:?}", other)),
        }
    }
}

/// Console output style selected with `--console-format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleFormat {
    #[default]
    Txt,
    Json,
    /// Plain console output plus a daily-rolling log file.
    Log,
}

impl FromStr for ConsoleFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "txt" => Ok(Self::Txt),
            "json" => Ok(Self::Json),
            "log" => Ok(Self::Log),
            other => Err(format!("unknown console format {:?}", other)),
        }
    }
}

/// Immutable solver settings shared by every stage.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Half-width of the window around each visit's preferred start.
    pub visit_time_window: Duration,
    /// How far an interior break may slide from its diary position.
    pub break_time_window: Duration,
    /// Slack tolerated at shift boundaries.
    pub shift_adjustment: Duration,
    pub opt_time_limit: Option<StdDuration>,
    pub no_progress_time_limit: Option<StdDuration>,
    /// Wall-clock budget of the refinement stage.
    pub post_opt_time_limit: Option<StdDuration>,
    pub first_stage: FirstStageStrategy,
    pub third_stage: ThirdStageStrategy,
    /// Number of sampled duration scenarios for the risk model.
    pub scenario_count: usize,
    pub seed: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            visit_time_window: Duration::minutes(90),
            break_time_window: Duration::minutes(15),
            shift_adjustment: Duration::minutes(15),
            opt_time_limit: None,
            no_progress_time_limit: None,
            post_opt_time_limit: None,
            first_stage: FirstStageStrategy::default(),
            third_stage: ThirdStageStrategy::default(),
            scenario_count: 100,
            seed: 0,
        }
    }
}

impl SolverConfig {
    pub fn visit_time_window_seconds(&self) -> i64 {
        self.visit_time_window.num_seconds()
    }

    pub fn break_time_window_seconds(&self) -> i64 {
        self.break_time_window.num_seconds()
    }

    pub fn shift_adjustment_seconds(&self) -> i64 {
        self.shift_adjustment.num_seconds()
    }

    /// The team stage forbids break drift so paired carers rest together.
    pub fn with_zero_break_window(&self) -> Self {
        Self {
            break_time_window: Duration::zero(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_stage_strategy_parsing() {
        assert_eq!(
            "teams".parse::<FirstStageStrategy>().unwrap(),
            FirstStageStrategy::Teams
        );
        assert_eq!(
            "soft-time-windows".parse::<FirstStageStrategy>().unwrap(),
            FirstStageStrategy::SoftTimeWindows
        );
        assert_eq!(
            "none".parse::<FirstStageStrategy>().unwrap(),
            FirstStageStrategy::None
        );
        assert!("bogus".parse::<FirstStageStrategy>().is_err());
    }

    #[test]
    fn test_third_stage_strategy_parsing() {
        assert_eq!(
            "vehicle-reduction".parse::<ThirdStageStrategy>().unwrap(),
            ThirdStageStrategy::VehicleReduction
        );
        assert_eq!(
            "default".parse::<ThirdStageStrategy>().unwrap(),
            ThirdStageStrategy::Distance
        );
    }

    #[test]
    fn test_console_format_parsing() {
        assert_eq!("json".parse::<ConsoleFormat>().unwrap(), ConsoleFormat::Json);
        assert_eq!("log".parse::<ConsoleFormat>().unwrap(), ConsoleFormat::Log);
        assert!("yaml".parse::<ConsoleFormat>().is_err());
    }

    #[test]
    fn test_zero_break_window_preserves_other_fields() {
        let config = SolverConfig {
            visit_time_window: Duration::minutes(30),
            ..Default::default()
        };
        let team_config = config.with_zero_break_window();
        assert_eq!(team_config.break_time_window, Duration::zero());
        assert_eq!(team_config.visit_time_window, Duration::minutes(30));
    }
}
