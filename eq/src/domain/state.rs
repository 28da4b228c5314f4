//! Module operating states

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Operating state of a hardware module, ordered by severity
///
/// The derived ordering follows declaration order, so `max` over a set of
/// states yields the most severe one and `min` the least progressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    /// Sentinel for an unknown module
    NoState,
    #[default]
    Safe,
    Setup,
    Shutdown,
    Standby,
    Start,
    Stop,
    Normal,
    /// Sentinel for a module reporting a fault
    Error,
}

impl ModuleState {
    pub const ALL: [ModuleState; 9] = [
        ModuleState::NoState,
        ModuleState::Safe,
        ModuleState::Setup,
        ModuleState::Shutdown,
        ModuleState::Standby,
        ModuleState::Start,
        ModuleState::Stop,
        ModuleState::Normal,
        ModuleState::Error,
    ];

    /// Severity level: NoState is -1, Safe is 0, Error is 7
    pub fn level(self) -> i32 {
        self as i32 - 1
    }

    pub fn from_level(level: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.level() == level)
    }

    pub fn is_sentinel(self) -> bool {
        matches!(self, ModuleState::NoState | ModuleState::Error)
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleState::NoState => "nostate",
            ModuleState::Safe => "safe",
            ModuleState::Setup => "setup",
            ModuleState::Shutdown => "shutdown",
            ModuleState::Standby => "standby",
            ModuleState::Start => "start",
            ModuleState::Stop => "stop",
            ModuleState::Normal => "normal",
            ModuleState::Error => "error",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ModuleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_lowercase();
        if let Some(state) = Self::ALL.iter().copied().find(|state| state.to_string() == lowered) {
            return Ok(state);
        }
        match lowered.as_str() {
            "no-state" | "no_state" => Ok(ModuleState::NoState),
            _ => match s.parse::<i32>().ok().and_then(Self::from_level) {
                Some(state) => Ok(state),
                None => Err(format!("Unknown module state: {}", s)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_matches_severity() {
        assert!(ModuleState::NoState < ModuleState::Safe);
        assert!(ModuleState::Safe < ModuleState::Setup);
        assert!(ModuleState::Standby < ModuleState::Normal);
        assert!(ModuleState::Normal < ModuleState::Error);
        assert_eq!(ModuleState::ALL.iter().max(), Some(&ModuleState::Error));
    }

    #[test]
    fn test_levels() {
        assert_eq!(ModuleState::NoState.level(), -1);
        assert_eq!(ModuleState::Safe.level(), 0);
        assert_eq!(ModuleState::Error.level(), 7);
        for state in ModuleState::ALL {
            assert_eq!(ModuleState::from_level(state.level()), Some(state));
        }
        assert_eq!(ModuleState::from_level(8), None);
    }

    #[test]
    fn test_parse() {
        assert_eq!("Normal".parse::<ModuleState>().unwrap(), ModuleState::Normal);
        assert_eq!("no-state".parse::<ModuleState>().unwrap(), ModuleState::NoState);
        assert_eq!("4".parse::<ModuleState>().unwrap(), ModuleState::Start);
        assert!("bogus".parse::<ModuleState>().is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&ModuleState::Standby).unwrap();
        assert_eq!(json, r#""standby""#);
        let parsed: ModuleState = serde_json::from_str(r#""nostate""#).unwrap();
        assert_eq!(parsed, ModuleState::NoState);
    }
}
