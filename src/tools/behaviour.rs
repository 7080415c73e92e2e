//! Behaviour override tools.
//!
//! Let the user steer future responses by voice: "from now on keep
//! answers under ten words". Rules persist in the behaviour store and are
//! appended to every assembled prompt.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{Tool, require_str, status};
use crate::error::Result;
use crate::session::Session;
use crate::store::BehaviourStore;

/// Adds a behaviour rule.
pub struct UpdateBehaviour {
    store: Arc<BehaviourStore>,
}

impl UpdateBehaviour {
    /// Create the tool over a shared store.
    pub fn new(store: Arc<BehaviourStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for UpdateBehaviour {
    fn name(&self) -> &str {
        "update_behaviour"
    }

    fn description(&self) -> &str {
        "Remember a standing behaviour rule the user wants applied to all future responses"
    }

    fn schema(&self) -> Value {
        rule_schema("The behaviour rule to remember, as a short imperative sentence.")
    }

    async fn execute(&self, params: &Value, session: &Session) -> Result<Value> {
        status(session, "Updating behaviour.").await;
        let rule = require_str(params, "rule")?;
        let text = if self.store.add(rule)? {
            "Rule added"
        } else {
            "Rule already present"
        };
        Ok(serde_json::json!({"text": text}))
    }
}

/// Removes a behaviour rule.
pub struct RemoveBehaviour {
    store: Arc<BehaviourStore>,
}

impl RemoveBehaviour {
    /// Create the tool over a shared store.
    pub fn new(store: Arc<BehaviourStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for RemoveBehaviour {
    fn name(&self) -> &str {
        "remove_behaviour"
    }

    fn description(&self) -> &str {
        "Forget a standing behaviour rule. Use list_behaviour first to get the exact wording"
    }

    fn schema(&self) -> Value {
        rule_schema("The exact rule text to remove.")
    }

    async fn execute(&self, params: &Value, session: &Session) -> Result<Value> {
        status(session, "Updating behaviour.").await;
        let rule = require_str(params, "rule")?;
        let text = if self.store.remove(rule)? {
            "Rule removed"
        } else {
            "No matching rule"
        };
        Ok(serde_json::json!({"text": text}))
    }
}

/// Lists the current behaviour rules.
pub struct ListBehaviour {
    store: Arc<BehaviourStore>,
}

impl ListBehaviour {
    /// Create the tool over a shared store.
    pub fn new(store: Arc<BehaviourStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ListBehaviour {
    fn name(&self) -> &str {
        "list_behaviour"
    }

    fn description(&self) -> &str {
        "List the standing behaviour rules currently in effect"
    }

    fn schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: &Value, _session: &Session) -> Result<Value> {
        Ok(serde_json::json!({"rules": self.store.list()}))
    }
}

fn rule_schema(description: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "rule": {"type": "string", "description": description}
        },
        "required": ["rule"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStore;

    fn fixtures() -> (tempfile::TempDir, Arc<BehaviourStore>, Arc<Session>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(BehaviourStore::new(dir.path().join("behaviour.json")));
        let sessions = SessionStore::new();
        let session = sessions.create("s");
        (dir, store, session)
    }

    #[tokio::test]
    async fn add_list_remove_cycle() {
        let (_dir, store, session) = fixtures();
        let rule = "Keep voice replies under ten words.";

        let added = UpdateBehaviour::new(Arc::clone(&store))
            .execute(&serde_json::json!({"rule": rule}), &session)
            .await
            .expect("add");
        assert_eq!(added["text"], "Rule added");

        let listed = ListBehaviour::new(Arc::clone(&store))
            .execute(&serde_json::json!({}), &session)
            .await
            .expect("list");
        assert_eq!(listed["rules"], serde_json::json!([rule]));

        let removed = RemoveBehaviour::new(Arc::clone(&store))
            .execute(&serde_json::json!({"rule": rule}), &session)
            .await
            .expect("remove");
        assert_eq!(removed["text"], "Rule removed");
    }

    #[tokio::test]
    async fn duplicate_add_reports_already_present() {
        let (_dir, store, session) = fixtures();
        let params = serde_json::json!({"rule": "Be brief."});
        let tool = UpdateBehaviour::new(Arc::clone(&store));
        tool.execute(&params, &session).await.expect("add");
        let second = tool.execute(&params, &session).await.expect("add again");
        assert_eq!(second["text"], "Rule already present");
        assert_eq!(store.list().len(), 1);
    }

    #[tokio::test]
    async fn remove_missing_rule_reports_no_match() {
        let (_dir, store, session) = fixtures();
        let result = RemoveBehaviour::new(store)
            .execute(&serde_json::json!({"rule": "ghost"}), &session)
            .await
            .expect("remove");
        assert_eq!(result["text"], "No matching rule");
    }
}
