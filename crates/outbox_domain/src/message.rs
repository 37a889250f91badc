use crate::WorkspaceId;

/// One pending user message. Serialized with the camelCase field names of the
/// persisted queue layout.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: String,
    pub text: String,
    pub created_at: u64,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<WorkspaceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collaboration_mode: Option<String>,
}

impl QueuedMessage {
    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            model: self.model.clone(),
            effort: self.effort.clone(),
            collaboration_mode: self.collaboration_mode.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSettings {
    pub model: Option<String>,
    pub effort: Option<String>,
    pub collaboration_mode: Option<String>,
}

impl RunSettings {
    pub fn is_empty(&self) -> bool {
        self.model.is_none() && self.effort.is_none() && self.collaboration_mode.is_none()
    }

    /// Fills every unset field from `fallback`.
    pub fn or(self, fallback: &RunSettings) -> RunSettings {
        RunSettings {
            model: self.model.or_else(|| fallback.model.clone()),
            effort: self.effort.or_else(|| fallback.effort.clone()),
            collaboration_mode: self
                .collaboration_mode
                .or_else(|| fallback.collaboration_mode.clone()),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SendOptions {
    pub force_steer: bool,
    pub model: Option<String>,
    pub effort: Option<String>,
    pub collaboration_mode: Option<String>,
}

impl SendOptions {
    pub fn from_settings(settings: RunSettings, force_steer: bool) -> Self {
        Self {
            force_steer,
            model: settings.model,
            effort: settings.effort,
            collaboration_mode: settings.collaboration_mode,
        }
    }
}
