use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::VersionToken;
use crate::{QueueError, QueueResult};

/// Field-level partial update applied atomically by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    /// Set (or add) the value at `path`
    Set { path: String, value: Value },

    /// Remove the value at `path`; removing an absent field is a no-op
    Remove { path: String },
}

impl PatchOperation {
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Set { path: path.into(), value: value.into() }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self::Remove { path: path.into() }
    }

    /// Path pointing at a top-level document field
    pub fn field_path(field: &str) -> String {
        format!("/{}", field)
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Set { path, .. } | Self::Remove { path } => path,
        }
    }

    /// Apply this operation to a JSON document in place
    pub fn apply(&self, document: &mut Value) -> QueueResult<()> {
        let (parent_path, key) = split_path(self.path())?;
        let parent = document
            .pointer_mut(parent_path)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| QueueError::invalid(format!("patch path has no object parent: {}", self.path())))?;

        match self {
            Self::Set { value, .. } => {
                parent.insert(key.to_string(), value.clone());
            }
            Self::Remove { .. } => {
                parent.remove(key);
            }
        }
        Ok(())
    }
}

fn split_path(path: &str) -> QueueResult<(&str, &str)> {
    if !path.starts_with('/') || path.len() < 2 {
        return Err(QueueError::invalid(format!("invalid patch path: {}", path)));
    }
    // rsplit_once always succeeds thanks to the leading slash
    let (parent, key) = path.rsplit_once('/').unwrap_or(("", path));
    if key.is_empty() {
        return Err(QueueError::invalid(format!("invalid patch path: {}", path)));
    }
    Ok((parent, key))
}

/// Precondition of a conditional write
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WriteCondition {
    /// Write unconditionally
    #[default]
    Always,

    /// Write only if the stored etag still equals this token
    IfMatch(VersionToken),
}

impl WriteCondition {
    pub fn is_satisfied_by(&self, current: &VersionToken) -> bool {
        match self {
            Self::Always => true,
            Self::IfMatch(expected) => expected == current,
        }
    }
}
