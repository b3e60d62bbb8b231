//! Conflict and merge-rule model.
//!
//! A `SyncConflict` captures a detected divergence between a local record and
//! its remote counterpart. Resolution is driven by per-field `MergeRule`s and
//! always produces an auditable `MergeResult` enumerating every field that
//! was touched — conflict resolution is unverifiable after the fact without
//! that trail.

use crate::ids::{ConflictId, RecordId, SyncRecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// How a divergence came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides edited within a short window of each other.
    ConcurrentEdit,
    /// Local created a record the remote already has.
    CreateDuplicate,
    /// Local deleted a record the remote still holds a version of.
    DeleteModified,
    /// Generic version divergence.
    Version,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConcurrentEdit => write!(f, "concurrent_edit"),
            Self::CreateDuplicate => write!(f, "create_duplicate"),
            Self::DeleteModified => write!(f, "delete_modified"),
            Self::Version => write!(f, "version"),
        }
    }
}

/// Whole-conflict resolution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    LocalWins,
    RemoteWins,
    Merge,
    Manual,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalWins => write!(f, "local_wins"),
            Self::RemoteWins => write!(f, "remote_wins"),
            Self::Merge => write!(f, "merge"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Per-field merge strategy applied by a `MergeRule`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    LocalWins,
    RemoteWins,
    /// Take the value from whichever full record was modified most recently.
    NewestWins,
    Merge,
    /// Delegate to a named resolver registered with the conflict resolver.
    Custom,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalWins => write!(f, "local_wins"),
            Self::RemoteWins => write!(f, "remote_wins"),
            Self::NewestWins => write!(f, "newest_wins"),
            Self::Merge => write!(f, "merge"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// The table scope a merge rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    /// The rule applies to one specific table.
    Table(String),
    /// The rule applies to every table (the `*` scope).
    Any,
}

impl RuleScope {
    /// Whether this scope covers the given table.
    #[must_use]
    pub fn matches(&self, table: &str) -> bool {
        match self {
            Self::Table(name) => name == table,
            Self::Any => true,
        }
    }

    /// Whether this is a table-specific (non-wildcard) scope. Table-specific
    /// rules take precedence over wildcard rules at equal field match.
    #[must_use]
    pub fn is_specific(&self) -> bool {
        matches!(self, Self::Table(_))
    }
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table(name) => write!(f, "{name}"),
            Self::Any => write!(f, "*"),
        }
    }
}

/// A declarative per-field resolution policy.
///
/// When several rules match the same field, table scope beats the wildcard
/// scope, and among remaining ties the lowest priority number wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRule {
    /// Which table(s) the rule applies to.
    pub scope: RuleScope,

    /// The field the rule decides.
    pub field: String,

    /// How the field is resolved.
    pub strategy: MergeStrategy,

    /// Name of the custom resolver, when `strategy` is `Custom`.
    pub resolver: Option<String>,

    /// Precedence among matching rules; lower numbers win.
    pub priority: u32,
}

impl MergeRule {
    /// Creates a rule scoped to one table.
    #[must_use]
    pub fn for_table(
        table: impl Into<String>,
        field: impl Into<String>,
        strategy: MergeStrategy,
        priority: u32,
    ) -> Self {
        Self {
            scope: RuleScope::Table(table.into()),
            field: field.into(),
            strategy,
            resolver: None,
            priority,
        }
    }

    /// Creates a wildcard rule applying to every table.
    #[must_use]
    pub fn for_any(field: impl Into<String>, strategy: MergeStrategy, priority: u32) -> Self {
        Self {
            scope: RuleScope::Any,
            field: field.into(),
            strategy,
            resolver: None,
            priority,
        }
    }

    /// Names the custom resolver to delegate to.
    #[must_use]
    pub fn with_resolver(mut self, name: impl Into<String>) -> Self {
        self.resolver = Some(name.into());
        self
    }
}

/// A detected divergence between a local record and its remote counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Unique identifier for this conflict.
    pub id: ConflictId,

    /// The sync record whose upload surfaced the divergence.
    pub sync_record_id: SyncRecordId,

    /// Table the conflicting record belongs to.
    pub table_name: String,

    /// Identity of the conflicting record.
    pub record_id: RecordId,

    /// The local data snapshot at detection time.
    pub local_data: Value,

    /// The remote data snapshot at detection time.
    pub remote_data: Value,

    /// How the divergence came to be.
    pub kind: ConflictKind,

    /// The strategy assigned for resolution.
    pub strategy: ResolutionStrategy,

    /// Whether the conflict has been resolved.
    pub resolved: bool,

    /// The authoritative data once resolved. Non-null whenever `resolved`
    /// is true; it is the only value subsequently propagated.
    pub resolved_data: Option<Value>,

    /// Who resolved the conflict (an operator name for manual resolutions,
    /// the strategy name for automatic ones).
    pub resolved_by: Option<String>,

    /// When the conflict was detected.
    pub created_at: DateTime<Utc>,

    /// When the conflict was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl SyncConflict {
    /// Creates a new unresolved conflict.
    #[must_use]
    pub fn new(
        sync_record_id: SyncRecordId,
        table_name: impl Into<String>,
        record_id: RecordId,
        local_data: Value,
        remote_data: Value,
        kind: ConflictKind,
        strategy: ResolutionStrategy,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            sync_record_id,
            table_name: table_name.into(),
            record_id,
            local_data,
            remote_data,
            kind,
            strategy,
            resolved: false,
            resolved_data: None,
            resolved_by: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// Marks the conflict resolved with the authoritative data. This is the
    /// only mutator, so `resolved == true` always implies `resolved_data`
    /// is present.
    pub fn resolve(&mut self, data: Value, by: impl Into<String>) {
        self.resolved = true;
        self.resolved_data = Some(data);
        self.resolved_by = Some(by.into());
        self.resolved_at = Some(Utc::now());
    }
}

/// The decision made for a single field during a merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldResolution {
    /// The field that differed.
    pub field: String,

    /// The local value, if the field existed locally.
    pub local: Option<Value>,

    /// The remote value, if the field existed remotely.
    pub remote: Option<Value>,

    /// The value that won.
    pub resolved: Value,

    /// The strategy that decided it.
    pub strategy: MergeStrategy,
}

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    /// The authoritative merged data, absent when manual resolution is
    /// required.
    pub merged_data: Option<Value>,

    /// Number of differing fields found.
    pub conflicts_found: usize,

    /// Number of differing fields resolved automatically.
    pub conflicts_resolved: usize,

    /// Whether an operator must supply resolved data explicitly.
    pub manual_resolution_required: bool,

    /// The whole-conflict strategy that produced this result.
    pub strategy_used: ResolutionStrategy,

    /// Audit trail of every field touched.
    pub field_resolutions: Vec<FieldResolution>,
}

impl MergeResult {
    /// A whole-record resolution taking one side verbatim.
    #[must_use]
    pub fn whole_record(data: Value, strategy: ResolutionStrategy) -> Self {
        Self {
            merged_data: Some(data),
            conflicts_found: 1,
            conflicts_resolved: 1,
            manual_resolution_required: false,
            strategy_used: strategy,
            field_resolutions: Vec::new(),
        }
    }

    /// An unresolved result awaiting operator input.
    #[must_use]
    pub fn manual() -> Self {
        Self {
            merged_data: None,
            conflicts_found: 1,
            conflicts_resolved: 0,
            manual_resolution_required: true,
            strategy_used: ResolutionStrategy::Manual,
            field_resolutions: Vec::new(),
        }
    }
}
