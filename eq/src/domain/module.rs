//! Hardware module records

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::ModuleState;

/// Cell-scoped module identifier
pub type ModuleId = u32;

/// Kind of hardware a module drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleType {
    DeltaRobot,
    Gripper,
    Camera,
    Sensor,
    Conveyor,
    Generic,
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleType::DeltaRobot => "delta-robot",
            ModuleType::Gripper => "gripper",
            ModuleType::Camera => "camera",
            ModuleType::Sensor => "sensor",
            ModuleType::Conveyor => "conveyor",
            ModuleType::Generic => "generic",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ModuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "delta-robot" | "deltarobot" => Ok(ModuleType::DeltaRobot),
            "gripper" => Ok(ModuleType::Gripper),
            "camera" => Ok(ModuleType::Camera),
            "sensor" => Ok(ModuleType::Sensor),
            "conveyor" => Ok(ModuleType::Conveyor),
            "generic" => Ok(ModuleType::Generic),
            _ => Err(format!("Unknown module type: {}", s)),
        }
    }
}

/// Package/executable pair the supervisor launches for a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bootstrap {
    pub package: String,
    pub executable: String,
}

impl Bootstrap {
    pub fn new(package: impl Into<String>, executable: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            executable: executable.into(),
        }
    }

    /// Bootstrap descriptor from wire fields; blank fields mean "do not launch"
    pub fn from_fields(package: &str, executable: &str) -> Option<Self> {
        if package.trim().is_empty() || executable.trim().is_empty() {
            None
        } else {
            Some(Self::new(package.trim(), executable.trim()))
        }
    }
}

/// A hardware module attached to the cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareModule {
    pub id: ModuleId,
    pub module_type: ModuleType,
    pub current_state: ModuleState,
    /// Can affect physical safety
    pub is_actor: bool,
    /// Required by the active service
    pub is_needed: bool,
    pub bootstrap: Option<Bootstrap>,
    pub error: bool,
    pub last_error_code: Option<i32>,
    pub registered_at: DateTime<Utc>,
}

impl HardwareModule {
    pub fn new(
        id: ModuleId,
        module_type: ModuleType,
        is_actor: bool,
        is_needed: bool,
        bootstrap: Option<Bootstrap>,
    ) -> Self {
        Self {
            id,
            module_type,
            current_state: ModuleState::Safe,
            is_actor,
            is_needed,
            bootstrap,
            error: false,
            last_error_code: None,
            registered_at: Utc::now(),
        }
    }

    pub fn summary(&self) -> ModuleSummary {
        ModuleSummary {
            id: self.id,
            module_type: self.module_type,
            current_state: self.current_state,
            is_actor: self.is_actor,
            is_needed: self.is_needed,
            error: self.error,
        }
    }
}

/// One row of a `GetAllModules` answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSummary {
    pub id: ModuleId,
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    pub current_state: ModuleState,
    pub is_actor: bool,
    pub is_needed: bool,
    pub error: bool,
}

/// Cell-wide signals derived from the registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellState {
    /// Most severe state among actor modules
    pub safety: ModuleState,
    /// Least progressed state among needed actor modules
    pub operation: ModuleState,
}

impl fmt::Display for CellState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "safety={} operation={}", self.safety, self.operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_module_starts_safe() {
        let module = HardwareModule::new(1, ModuleType::Gripper, true, false, None);
        assert_eq!(module.current_state, ModuleState::Safe);
        assert!(!module.error);
        assert!(module.last_error_code.is_none());
    }

    #[test]
    fn test_summary_wire_names() {
        let module = HardwareModule::new(3, ModuleType::DeltaRobot, true, true, None);
        let json = serde_json::to_value(module.summary()).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["type"], "delta-robot");
        assert_eq!(json["currentState"], "safe");
        assert_eq!(json["isActor"], true);
        assert_eq!(json["isNeeded"], true);
        assert_eq!(json["error"], false);
    }

    #[test]
    fn test_bootstrap_from_blank_fields() {
        assert!(Bootstrap::from_fields("", "gripper_node").is_none());
        assert!(Bootstrap::from_fields("gripper", "  ").is_none());
        assert_eq!(
            Bootstrap::from_fields("gripper", "gripper_node"),
            Some(Bootstrap::new("gripper", "gripper_node"))
        );
    }

    #[test]
    fn test_module_type_parse() {
        assert_eq!("DeltaRobot".parse::<ModuleType>().unwrap(), ModuleType::DeltaRobot);
        assert_eq!("delta_robot".parse::<ModuleType>().unwrap(), ModuleType::DeltaRobot);
        assert!("laser".parse::<ModuleType>().is_err());
    }
}
