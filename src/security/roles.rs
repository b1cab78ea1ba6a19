use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role assigned to an agent process within the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Leader,
    Follower,
    Simulation,
    Client,
    Admin,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Leader => "leader",
            AgentRole::Follower => "follower",
            AgentRole::Simulation => "simulation",
            AgentRole::Client => "client",
            AgentRole::Admin => "admin",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "leader" => Ok(AgentRole::Leader),
            "follower" => Ok(AgentRole::Follower),
            "simulation" => Ok(AgentRole::Simulation),
            "client" => Ok(AgentRole::Client),
            "admin" => Ok(AgentRole::Admin),
            other => Err(format!("unknown agent role: {other}")),
        }
    }
}

/// Operations an agent may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    GenerateThemes,
    DevelopStrategies,
    AccessAgentCards,
    ExecuteSimulations,
    ManageAgents,
    ViewMetrics,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::GenerateThemes => "generate_themes",
            Permission::DevelopStrategies => "develop_strategies",
            Permission::AccessAgentCards => "access_agent_cards",
            Permission::ExecuteSimulations => "execute_simulations",
            Permission::ManageAgents => "manage_agents",
            Permission::ViewMetrics => "view_metrics",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generate_themes" => Ok(Permission::GenerateThemes),
            "develop_strategies" => Ok(Permission::DevelopStrategies),
            "access_agent_cards" => Ok(Permission::AccessAgentCards),
            "execute_simulations" => Ok(Permission::ExecuteSimulations),
            "manage_agents" => Ok(Permission::ManageAgents),
            "view_metrics" => Ok(Permission::ViewMetrics),
            other => Err(format!("unknown permission: {other}")),
        }
    }
}
