//! Traffic scenarios for the simulation harness.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Free-flowing traffic on the main lanes, bounded jitter
    SteadyFlow,

    /// A slow zone mid-road produces a congested band of sections
    CongestionWave,

    /// Stragglers delayed past the watermark must be counted as late
    LateBurst,

    /// On-ramp traffic on lanes 7 and 8 merges into lane 6
    RampMerge,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SteadyFlow,
            ScenarioId::CongestionWave,
            ScenarioId::LateBurst,
            ScenarioId::RampMerge,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SteadyFlow => "steady_flow",
            ScenarioId::CongestionWave => "congestion_wave",
            ScenarioId::LateBurst => "late_burst",
            ScenarioId::RampMerge => "ramp_merge",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SteadyFlow => "40 vehicles at cruise speed, jitter below the watermark, no late drops",
            ScenarioId::CongestionWave => "Slow zone over sections 8-12, velocity drop must show in the matrix",
            ScenarioId::LateBurst => "5% of samples delayed past the watermark, late drops must be accounted",
            ScenarioId::RampMerge => "Ramp lanes 7/8 fold into lane 6, ramp row excluded when disabled",
        }
    }

    /// Returns true if the scenario deliberately produces late data.
    pub fn expects_late_data(&self) -> bool {
        matches!(self, ScenarioId::LateBurst)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "steady_flow" | "steadyflow" | "steady" => Ok(ScenarioId::SteadyFlow),
            "congestion_wave" | "congestionwave" | "congestion" => Ok(ScenarioId::CongestionWave),
            "late_burst" | "lateburst" | "late" => Ok(ScenarioId::LateBurst),
            "ramp_merge" | "rampmerge" | "ramp" => Ok(ScenarioId::RampMerge),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
            assert_eq!(scenario.to_string(), scenario.name());
        }
    }

    #[test]
    fn test_aliases_and_unknown() {
        assert_eq!("RAMP".parse::<ScenarioId>(), Ok(ScenarioId::RampMerge));
        assert!("gridlock".parse::<ScenarioId>().is_err());
    }
}
