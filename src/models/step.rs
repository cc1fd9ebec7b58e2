//! Steps and preparations
//!
//! A [`Step`] is content-addressed: its id is a hash of its parent id and its
//! (cumulative) action list, so two steps with the same parent and the same action
//! content are the same step. A [`Preparation`] is a mutable pointer (`head_step_id`)
//! into a chain of steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::action::Action;

/// Well-known id of the root step
pub const ROOT_STEP_ID: &str = "f6e172c33bdacbc69bca9d32b2bd78174712a171";

/// Immutable, content-addressed element of a preparation's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    /// `None` only for the root step
    pub parent_id: Option<String>,
    /// Every action from the root up to and including this step's own action
    pub actions: Vec<Action>,
    /// Column ids created by this step's own action
    #[serde(default)]
    pub created_column_ids: Vec<String>,
    /// Id of the row schema snapshot computed for this step, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_schema_ref: Option<String>,
}

impl Step {
    /// The root step: no parent, no action
    pub fn root() -> Self {
        Self {
            id: ROOT_STEP_ID.to_string(),
            parent_id: None,
            actions: Vec::new(),
            created_column_ids: Vec::new(),
            row_schema_ref: None,
        }
    }

    /// Create a step with its content hash as id
    pub fn new(parent_id: impl Into<String>, actions: Vec<Action>) -> Self {
        let parent_id = parent_id.into();
        let id = step_hash(&parent_id, &actions);
        Self {
            id,
            parent_id: Some(parent_id),
            actions,
            created_column_ids: Vec::new(),
            row_schema_ref: None,
        }
    }

    /// Record the columns created by this step's action
    pub fn with_created_columns(mut self, created: Vec<String>) -> Self {
        self.created_column_ids = created;
        self
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_STEP_ID
    }

    /// This step's own action (the last of the cumulative list)
    pub fn own_action(&self) -> Option<&Action> {
        if self.is_root() {
            None
        } else {
            self.actions.last()
        }
    }

    /// Whether the stored id matches the content
    pub fn is_consistent(&self) -> bool {
        match &self.parent_id {
            None => self.is_root(),
            Some(parent) => self.id == step_hash(parent, &self.actions),
        }
    }
}

#[derive(Serialize)]
struct CanonicalStep<'a> {
    parent: &'a str,
    actions: &'a [Action],
}

/// Content hash of `(parent_id, actions)` over a canonical JSON encoding
///
/// Action parameters are kept in a sorted map, so logically identical content always
/// yields identical bytes.
pub fn step_hash(parent_id: &str, actions: &[Action]) -> String {
    let canonical = CanonicalStep {
        parent: parent_id,
        actions,
    };
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

/// Named, owned pointer into a step chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preparation {
    pub id: String,
    pub dataset_id: String,
    pub head_step_id: String,
    pub name: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Preparation {
    /// New preparation pointing at the root step
    pub fn new(dataset_id: impl Into<String>, name: impl Into<String>, owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            dataset_id: dataset_id.into(),
            head_step_id: ROOT_STEP_ID.to_string(),
            name: name.into(),
            owner: owner.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move the head pointer
    pub fn set_head(&mut self, step_id: impl Into<String>) {
        self.head_step_id = step_id.into();
        self.updated_at = Utc::now();
    }
}
