//! Domain models for the workshop library
//!
//! Units, their painting steps and attachments, plus the mutation records
//! that carry local edits to the server. Everything serializes in the
//! camelCase wire shape the workshop backend speaks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{LibraryError, Result};

// =============================================================================
// Sync State
// =============================================================================

/// Whether the locally held copy of a unit is known to match the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Local,
    Syncing,
    Synced,
    Conflict,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Local => "local",
            SyncState::Syncing => "syncing",
            SyncState::Synced => "synced",
            SyncState::Conflict => "conflict",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(SyncState::Local),
            "syncing" => Ok(SyncState::Syncing),
            "synced" => Ok(SyncState::Synced),
            "conflict" => Ok(SyncState::Conflict),
            other => Err(LibraryError::InvalidInput {
                field: "sync_state".to_string(),
                message: format!("unknown sync state '{}'", other),
            }),
        }
    }
}

// =============================================================================
// Painting Materials
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paint {
    pub id: String,
    pub brand: String,
    pub color_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hex_color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixComponent {
    pub paint: Paint,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixMedium {
    pub name: String,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterRatio {
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaintMix {
    pub id: String,
    pub name: String,
    pub base_color: Paint,
    #[serde(default)]
    pub additional_colors: Vec<MixComponent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub water: Option<WaterRatio>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mediums: Option<Vec<MixMedium>>,
    pub consistency: String,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brush {
    pub id: String,
    /// e.g. "Round", "Flat", "Detail"
    #[serde(rename = "type")]
    pub kind: String,
    /// e.g. "0", "2", "10/0"
    pub size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
}

// =============================================================================
// Photos and Steps
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoKind {
    Detail,
    FullModel,
    UnitOverview,
}

/// Photo metadata. Image bytes live outside the library database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: String,
    pub opfs_path: String,
    pub thumbnail_path: String,
    #[serde(rename = "type")]
    pub kind: PhotoKind,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub step_number: u32,
    #[serde(default)]
    pub technique: Vec<String>,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub paints: Vec<Paint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paint_mix: Option<PaintMix>,
    #[serde(default)]
    pub brushes: Vec<Brush>,
    #[serde(default)]
    pub other_tools: Vec<String>,
    #[serde(default)]
    pub photos: Vec<Photo>,
    /// Model ids within the unit this step applies to
    #[serde(default)]
    pub applied_to_models: Vec<String>,
}

/// Input for appending a step; id, number and timestamp are assigned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewStep {
    pub technique: Vec<String>,
    pub description: String,
    pub paints: Vec<Paint>,
    pub paint_mix: Option<PaintMix>,
    pub brushes: Vec<Brush>,
    pub other_tools: Vec<String>,
    pub photos: Vec<Photo>,
    pub applied_to_models: Vec<String>,
}

// =============================================================================
// Unit
// =============================================================================

/// A work item: one squad of miniatures and the steps used to paint it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// e.g. "Warhammer 40k", "Age of Sigmar"
    pub game_system: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faction: Option<String>,
    #[serde(default = "default_model_count")]
    pub model_count: u32,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_photo_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(rename = "syncStatus", default)]
    pub sync_state: SyncState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Owning identity. Unset until the unit is created under a session.
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

fn default_model_count() -> u32 {
    1
}

impl Unit {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Unit id cannot be empty".to_string());
        }

        if self.name.trim().is_empty() {
            return Err("Unit name cannot be empty".to_string());
        }

        if self.game_system.trim().is_empty() {
            return Err("Game system cannot be empty".to_string());
        }

        if self.model_count == 0 {
            return Err("Model count must be at least 1".to_string());
        }

        Ok(())
    }

    pub fn photo_count(&self) -> usize {
        self.steps.iter().map(|step| step.photos.len()).sum()
    }
}

/// Input for creating a unit; identity, timestamps and sync state are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUnit {
    pub name: String,
    pub description: String,
    pub game_system: String,
    pub faction: Option<String>,
    pub model_count: u32,
    pub is_public: bool,
}

impl Default for NewUnit {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            game_system: String::new(),
            faction: None,
            model_count: 1,
            is_public: false,
        }
    }
}

// =============================================================================
// Mutation Records
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Unit,
    Step,
    Photo,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Unit => "unit",
            EntityType::Step => "step",
            EntityType::Photo => "photo",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unit" => Ok(EntityType::Unit),
            "step" => Ok(EntityType::Step),
            "photo" => Ok(EntityType::Photo),
            other => Err(LibraryError::InvalidInput {
                field: "entity_type".to_string(),
                message: format!("unknown entity type '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationAction {
    Create,
    Update,
    Delete,
}

impl MutationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationAction::Create => "create",
            MutationAction::Update => "update",
            MutationAction::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationAction {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(MutationAction::Create),
            "update" => Ok(MutationAction::Update),
            "delete" => Ok(MutationAction::Delete),
            other => Err(LibraryError::InvalidInput {
                field: "action".to_string(),
                message: format!("unknown mutation action '{}'", other),
            }),
        }
    }
}

/// A queued intent to change an entity on the server.
///
/// The payload is a full snapshot of the entity at enqueue time, never a
/// diff. Several records for the same entity may sit in the queue; the
/// server applies them idempotently per id, so the last one drained wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub action: MutationAction,
    #[serde(rename = "data")]
    pub payload: Value,
    #[serde(rename = "timestamp")]
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl MutationRecord {
    /// Snapshot a unit for a create or update.
    pub fn for_unit(action: MutationAction, unit: &Unit, now: DateTime<Utc>) -> Result<Self> {
        let payload =
            serde_json::to_value(unit).map_err(|e| LibraryError::serialization("unit", e))?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            entity_type: EntityType::Unit,
            action,
            payload,
            enqueued_at: now,
            retry_count: 0,
        })
    }

    /// A delete carries only the id (and owner, when known).
    pub fn for_unit_delete(unit_id: &str, owner_id: Option<&str>, now: DateTime<Utc>) -> Self {
        let mut payload = serde_json::json!({ "id": unit_id });
        if let Some(owner) = owner_id {
            payload["userId"] = Value::String(owner.to_string());
        }
        Self {
            id: Uuid::new_v4().to_string(),
            entity_type: EntityType::Unit,
            action: MutationAction::Delete,
            payload,
            enqueued_at: now,
            retry_count: 0,
        }
    }

    /// The id of the entity this record targets.
    pub fn entity_id(&self) -> Option<&str> {
        self.payload.get("id").and_then(Value::as_str)
    }

    /// The owner the payload claims, if any.
    pub fn declared_owner(&self) -> Option<&str> {
        self.payload.get("userId").and_then(Value::as_str)
    }

    /// Decode the unit snapshot carried by a unit create or update.
    pub fn unit_snapshot(&self) -> Result<Option<Unit>> {
        if self.entity_type != EntityType::Unit || self.action == MutationAction::Delete {
            return Ok(None);
        }
        serde_json::from_value(self.payload.clone())
            .map(Some)
            .map_err(|e| LibraryError::serialization("unit snapshot", e))
    }
}

/// Entity-side half of a local mutation, applied together with its queue
/// record.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalChange {
    Upsert(Unit),
    Delete(String),
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub unit_count: usize,
    pub step_count: usize,
    pub photo_count: usize,
    pub pending_mutations: usize,
}

/// Units per [`SyncState`] in the local store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStateSummary {
    pub total: usize,
    pub local: usize,
    pub syncing: usize,
    pub synced: usize,
    pub conflict: usize,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl SyncStateSummary {
    pub fn from_units<'a>(units: impl IntoIterator<Item = &'a Unit>) -> Self {
        let mut summary = Self::default();
        for unit in units {
            summary.total += 1;
            match unit.sync_state {
                SyncState::Local => summary.local += 1,
                SyncState::Syncing => summary.syncing += 1,
                SyncState::Synced => summary.synced += 1,
                SyncState::Conflict => summary.conflict += 1,
            }
            summary.last_sync_at = summary.last_sync_at.max(unit.last_sync_at);
        }
        summary
    }
}
