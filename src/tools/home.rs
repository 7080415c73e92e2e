//! Home Assistant integration.
//!
//! A thin REST client plus the `home_automation_action` tool. The client
//! is shared with the prompt assembler, which appends a digest of
//! available switches and scenes so the model uses real entity names.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{Tool, optional_str, require_str, status};
use crate::error::{AssistantError, Result};
use crate::session::Session;

/// One entity state row from `/api/states`.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityState {
    /// Domain-qualified id, e.g. `switch.espresso_machine`.
    pub entity_id: String,
    /// Current state string.
    #[serde(default)]
    pub state: String,
}

/// Minimal Home Assistant REST client.
pub struct HomeAssistantClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl HomeAssistantClient {
    /// Create a client for the given API base (e.g. `http://ha.lan:8123/api`).
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Fetch all entity states.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Tool`] on transport or HTTP failure.
    pub async fn get_states(&self) -> Result<Vec<EntityState>> {
        let url = format!("{}/states", self.base_url);
        self.client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| AssistantError::Tool(format!("Home Assistant unreachable: {e}")))?
            .error_for_status()
            .map_err(|e| AssistantError::Tool(format!("Home Assistant error: {e}")))?
            .json()
            .await
            .map_err(|e| AssistantError::Tool(format!("Home Assistant bad response: {e}")))
    }

    /// Call a service on an entity, e.g. (`switch`, `turn_on`).
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Tool`] on transport or HTTP failure.
    pub async fn call_service(&self, domain: &str, service: &str, entity_id: &str) -> Result<()> {
        let url = format!("{}/services/{domain}/{service}", self.base_url);
        self.client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({"entity_id": entity_id}))
            .send()
            .await
            .map_err(|e| AssistantError::Tool(format!("Home Assistant unreachable: {e}")))?
            .error_for_status()
            .map_err(|e| AssistantError::Tool(format!("Home Assistant error: {e}")))?;
        Ok(())
    }

    /// Textual enumeration of available switches and scenes for the prompt.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Tool`] when the states cannot be fetched.
    pub async fn entity_digest(&self) -> Result<String> {
        let states = self.get_states().await?;
        let switches: Vec<&str> = states
            .iter()
            .filter_map(|s| s.entity_id.strip_prefix("switch."))
            .collect();
        let scenes: Vec<&str> = states
            .iter()
            .filter_map(|s| s.entity_id.strip_prefix("scene."))
            .collect();

        let mut digest = String::from("Available Home Automation Entities for use with tools:\n");
        digest.push_str("Available Switch entity_id:\n");
        for switch in switches {
            digest.push_str(&format!(" - {switch}\n"));
        }
        digest.push_str("\nAvailable Scene entity_id:\n");
        for scene in scenes {
            digest.push_str(&format!(" - {scene}\n"));
        }
        Ok(digest)
    }
}

/// Switch and scene control via Home Assistant.
pub struct HomeAutomationAction {
    client: Option<std::sync::Arc<HomeAssistantClient>>,
}

impl HomeAutomationAction {
    /// Create the tool. `client = None` yields a spoken configuration
    /// error instead of a request.
    pub fn new(client: Option<std::sync::Arc<HomeAssistantClient>>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for HomeAutomationAction {
    fn name(&self) -> &str {
        "home_automation_action"
    }

    fn description(&self) -> &str {
        "Perform actions in the home automation system (set a switch, activate a scene) as requested by the user"
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action_type": {
                    "type": "string",
                    "description": "The type of action (options: \"set_switch\", \"activate_scene\")."
                },
                "entity_id": {
                    "type": "string",
                    "description": "The ID of the switch or scene entity, without the domain prefix."
                },
                "state": {
                    "type": "string",
                    "description": "The desired state for switches (either \"on\" or \"off\"). Required if action_type is \"set_switch\"."
                }
            },
            "required": ["action_type", "entity_id"]
        })
    }

    async fn execute(&self, params: &Value, session: &Session) -> Result<Value> {
        let action_type = require_str(params, "action_type")?;
        let entity_id = require_str(params, "entity_id")?;

        let Some(client) = self.client.as_deref() else {
            return Ok(serde_json::json!({
                "text": "Home automation is not configured."
            }));
        };

        let outcome = match action_type {
            "set_switch" => {
                let state = optional_str(params, "state").unwrap_or("on");
                status(session, format!("{entity_id} {state}.")).await;
                let service = if state == "on" { "turn_on" } else { "turn_off" };
                client
                    .call_service("switch", service, &format!("switch.{entity_id}"))
                    .await
                    .map(|()| format!("Successfully switched {entity_id} {state}"))
            }
            "activate_scene" => {
                status(session, format!("Activating Scene '{entity_id}'.")).await;
                client
                    .call_service("scene", "turn_on", &format!("scene.{entity_id}"))
                    .await
                    .map(|()| format!("Successfully activated scene scene.{entity_id}"))
            }
            _ => {
                return Ok(serde_json::json!({
                    "text": "Error: Invalid action type specified. Use \"set_switch\" or \"activate_scene\" with this tool."
                }));
            }
        };

        match outcome {
            Ok(text) => Ok(serde_json::json!({"text": text})),
            Err(e) => Ok(serde_json::json!({
                "text": format!(
                    "Error performing {action_type} on {entity_id}: {e}. Consider the names of the entities you are trying to control."
                )
            })),
        }
    }
}
