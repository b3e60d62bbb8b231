//! Conflict detection and field-level merge resolution.
//!
//! When a local record and its remote counterpart diverge, the resolver
//! decides the authoritative value — whole-record for trivial strategies,
//! field by field under merge rules, or deferred to an operator. Every merge
//! emits a full audit trail of the fields it touched.
//!
//! Detection and merging are CPU-bound and synchronous; only the surrounding
//! pipeline suspends.

use crate::error::{SyncError, SyncResult};
use crate::event::{EventBus, SyncEvent};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tillpoint_storage::LocalStore;
use tillpoint_types::{
    ConflictId, ConflictKind, FieldResolution, MergeResult, MergeRule, MergeStrategy, Operation,
    ResolutionStrategy, RuleScope, SyncConflict, SyncRecord,
};
use tracing::{debug, info, warn};

/// A registered custom field resolver: `(local, remote, conflict) -> value`.
pub type CustomResolver = Arc<dyn Fn(&Value, &Value, &SyncConflict) -> Value + Send + Sync>;

/// Configuration for conflict detection and resolution.
#[derive(Clone)]
pub struct ResolverConfig {
    /// Two timestamps within this window are considered potentially
    /// concurrent; records further apart are plain version divergence and
    /// are not flagged.
    pub concurrency_window: Duration,
    /// Edits within this window of each other classify as concurrent edits.
    pub concurrent_edit_window: Duration,
    /// Fields excluded from comparison; they legitimately differ per device.
    pub volatile_fields: Vec<String>,
    /// Default whole-conflict strategy per table; unlisted tables are manual.
    pub default_strategies: HashMap<String, ResolutionStrategy>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        let mut default_strategies = HashMap::new();
        default_strategies.insert("orders".to_string(), ResolutionStrategy::Merge);
        default_strategies.insert("payments".to_string(), ResolutionStrategy::LocalWins);
        default_strategies.insert("inventory".to_string(), ResolutionStrategy::Merge);
        default_strategies.insert("products".to_string(), ResolutionStrategy::RemoteWins);
        default_strategies.insert("categories".to_string(), ResolutionStrategy::RemoteWins);

        Self {
            concurrency_window: Duration::minutes(5),
            concurrent_edit_window: Duration::minutes(1),
            volatile_fields: vec![
                "updated_at".to_string(),
                "sync_status".to_string(),
                "device_id".to_string(),
            ],
            default_strategies,
        }
    }
}

/// Detects divergence between local and remote records and resolves it via
/// per-field merge rules, deterministically and auditable.
pub struct ConflictResolver {
    config: ResolverConfig,
    rules: RwLock<Vec<MergeRule>>,
    resolvers: RwLock<HashMap<String, CustomResolver>>,
    store: Arc<LocalStore>,
    bus: EventBus,
}

impl ConflictResolver {
    /// Creates a resolver with the default rules and built-in custom
    /// resolvers, then layers any persisted rule overrides on top.
    pub fn new(store: Arc<LocalStore>, bus: EventBus) -> SyncResult<Self> {
        let resolver = Self {
            config: ResolverConfig::default(),
            rules: RwLock::new(default_rules()),
            resolvers: RwLock::new(HashMap::new()),
            store,
            bus,
        };
        resolver.register_builtin_resolvers();

        for rule in resolver.store.load_merge_rules()? {
            resolver.install_rule(rule);
        }
        Ok(resolver)
    }

    /// Creates a resolver with a custom configuration.
    pub fn with_config(
        config: ResolverConfig,
        store: Arc<LocalStore>,
        bus: EventBus,
    ) -> SyncResult<Self> {
        let resolver = Self {
            config,
            rules: RwLock::new(default_rules()),
            resolvers: RwLock::new(HashMap::new()),
            store,
            bus,
        };
        resolver.register_builtin_resolvers();

        for rule in resolver.store.load_merge_rules()? {
            resolver.install_rule(rule);
        }
        Ok(resolver)
    }

    // ── Detection ────────────────────────────────────────────────

    /// Returns a conflict if the local record and the remote copy were
    /// modified within the concurrency window of each other AND at least one
    /// non-volatile field differs. Returns `None` otherwise.
    ///
    /// The detected conflict is recorded in the history and announced on the
    /// event bus before being returned.
    pub fn detect_conflict(
        &self,
        local: &SyncRecord,
        remote: &Value,
    ) -> SyncResult<Option<SyncConflict>> {
        let local_ts = record_timestamp(&local.payload).unwrap_or(local.created_at);

        // A remote copy without a readable timestamp is treated as
        // concurrent: flagging is the conservative failure mode.
        let within_window = match record_timestamp(remote) {
            Some(remote_ts) => {
                let gap = (local_ts - remote_ts).abs();
                gap < self.config.concurrency_window
            }
            None => true,
        };

        if !within_window {
            return Ok(None);
        }
        if !self.has_data_conflicts(&local.payload, remote) {
            return Ok(None);
        }

        let kind = self.classify(local, remote);
        let strategy = self.default_strategy(&local.table_name);
        let conflict = SyncConflict::new(
            local.id,
            local.table_name.clone(),
            local.record_id,
            local.payload.clone(),
            remote.clone(),
            kind,
            strategy,
        );

        warn!(
            "conflict detected: {}/{} ({})",
            conflict.table_name, conflict.record_id, conflict.kind
        );
        self.store.save_conflict(&conflict)?;
        self.bus.emit(SyncEvent::ConflictDetected {
            conflict_id: conflict.id,
            table: conflict.table_name.clone(),
        });
        if strategy == ResolutionStrategy::Manual {
            self.bus.emit(SyncEvent::ManualResolutionRequired {
                conflict_id: conflict.id,
                table: conflict.table_name.clone(),
            });
        }

        Ok(Some(conflict))
    }

    /// Whether any non-volatile field differs between the two payloads.
    fn has_data_conflicts(&self, local: &Value, remote: &Value) -> bool {
        let (Some(local_map), Some(remote_map)) = (local.as_object(), remote.as_object()) else {
            return local != remote;
        };

        local_map.iter().any(|(field, local_value)| {
            if self.config.volatile_fields.iter().any(|v| v == field) {
                return false;
            }
            match remote_map.get(field) {
                Some(remote_value) => local_value != remote_value,
                None => false,
            }
        })
    }

    fn classify(&self, local: &SyncRecord, remote: &Value) -> ConflictKind {
        if local.operation == Operation::Delete {
            return ConflictKind::DeleteModified;
        }
        if local.operation == Operation::Create {
            return ConflictKind::CreateDuplicate;
        }

        let local_ts = record_timestamp(&local.payload).unwrap_or(local.created_at);
        if let Some(remote_ts) = record_timestamp(remote) {
            if (local_ts - remote_ts).abs() < self.config.concurrent_edit_window {
                return ConflictKind::ConcurrentEdit;
            }
        }
        ConflictKind::Version
    }

    fn default_strategy(&self, table: &str) -> ResolutionStrategy {
        self.config
            .default_strategies
            .get(table)
            .copied()
            .unwrap_or(ResolutionStrategy::Manual)
    }

    // ── Resolution ───────────────────────────────────────────────

    /// Resolves a conflict according to its assigned strategy. Automatic
    /// resolutions are marked resolved in the history; manual ones are left
    /// untouched until an operator supplies data.
    pub fn resolve_conflict(&self, conflict: &SyncConflict) -> SyncResult<MergeResult> {
        debug!(
            "resolving conflict {}/{} via {}",
            conflict.table_name, conflict.record_id, conflict.strategy
        );

        let result = match conflict.strategy {
            ResolutionStrategy::LocalWins => MergeResult::whole_record(
                conflict.local_data.clone(),
                ResolutionStrategy::LocalWins,
            ),
            ResolutionStrategy::RemoteWins => MergeResult::whole_record(
                conflict.remote_data.clone(),
                ResolutionStrategy::RemoteWins,
            ),
            ResolutionStrategy::Merge => self.merge(conflict),
            ResolutionStrategy::Manual => MergeResult::manual(),
        };

        if let Some(merged) = &result.merged_data {
            let mut resolved = conflict.clone();
            resolved.resolve(merged.clone(), conflict.strategy.to_string());
            self.store.save_conflict(&resolved)?;
            info!(
                "conflict resolved: {}/{}",
                conflict.table_name, conflict.record_id
            );
        }

        Ok(result)
    }

    /// Field-by-field merge under the rule set. Every differing field and
    /// every remote-only field appears in the audit trail.
    fn merge(&self, conflict: &SyncConflict) -> MergeResult {
        let empty = serde_json::Map::new();
        let local_map = conflict.local_data.as_object().unwrap_or(&empty);
        let remote_map = conflict.remote_data.as_object().unwrap_or(&empty);

        let mut merged = local_map.clone();
        let mut field_resolutions = Vec::new();
        let mut conflicts_found = 0;
        let mut conflicts_resolved = 0;

        let rules = self.rules.read().unwrap();

        for (field, local_value) in local_map {
            let Some(remote_value) = remote_map.get(field) else {
                continue;
            };
            if local_value == remote_value {
                continue;
            }
            conflicts_found += 1;

            let rule = find_rule(&rules, &conflict.table_name, field);
            let (resolved_value, strategy) = self.apply_rule(
                rule,
                local_value,
                remote_value,
                conflict,
            );

            merged.insert(field.clone(), resolved_value.clone());
            conflicts_resolved += 1;
            field_resolutions.push(FieldResolution {
                field: field.clone(),
                local: Some(local_value.clone()),
                remote: Some(remote_value.clone()),
                resolved: resolved_value,
                strategy,
            });
        }

        // Remote-only fields are copied in with remote-wins provenance.
        for (field, remote_value) in remote_map {
            if !merged.contains_key(field) {
                merged.insert(field.clone(), remote_value.clone());
                field_resolutions.push(FieldResolution {
                    field: field.clone(),
                    local: None,
                    remote: Some(remote_value.clone()),
                    resolved: remote_value.clone(),
                    strategy: MergeStrategy::RemoteWins,
                });
            }
        }

        MergeResult {
            merged_data: Some(Value::Object(merged)),
            conflicts_found,
            conflicts_resolved,
            manual_resolution_required: false,
            strategy_used: ResolutionStrategy::Merge,
            field_resolutions,
        }
    }

    /// Applies one rule to a differing field. With no matching rule the
    /// records' own timestamps decide (newest wins).
    fn apply_rule(
        &self,
        rule: Option<&MergeRule>,
        local_value: &Value,
        remote_value: &Value,
        conflict: &SyncConflict,
    ) -> (Value, MergeStrategy) {
        let Some(rule) = rule else {
            return (
                newest_of(conflict, local_value, remote_value),
                MergeStrategy::NewestWins,
            );
        };

        let value = match rule.strategy {
            MergeStrategy::LocalWins => local_value.clone(),
            MergeStrategy::RemoteWins => remote_value.clone(),
            MergeStrategy::NewestWins | MergeStrategy::Merge => {
                newest_of(conflict, local_value, remote_value)
            }
            MergeStrategy::Custom => {
                let resolvers = self.resolvers.read().unwrap();
                match rule.resolver.as_deref().and_then(|name| resolvers.get(name)) {
                    Some(resolver) => resolver(local_value, remote_value, conflict),
                    None => {
                        warn!(
                            "custom resolver {:?} not registered for field {}; keeping local",
                            rule.resolver, rule.field
                        );
                        local_value.clone()
                    }
                }
            }
        };
        (value, rule.strategy)
    }

    // ── Manual resolution ────────────────────────────────────────

    /// Records an operator-supplied resolution for a conflict.
    pub fn resolve_manually(
        &self,
        conflict_id: &ConflictId,
        data: Value,
        resolved_by: impl Into<String>,
    ) -> SyncResult<SyncConflict> {
        let mut conflict = self
            .store
            .get_conflict(conflict_id)?
            .ok_or_else(|| SyncError::ConflictUnresolved(*conflict_id))?;

        conflict.resolve(data, resolved_by);
        self.store.save_conflict(&conflict)?;
        info!(
            "conflict manually resolved: {}/{} by {}",
            conflict.table_name,
            conflict.record_id,
            conflict.resolved_by.as_deref().unwrap_or("?")
        );
        Ok(conflict)
    }

    // ── Rules & resolvers ────────────────────────────────────────

    /// Adds (or replaces) a merge rule and persists it as an override.
    pub fn add_rule(&self, rule: MergeRule) -> SyncResult<()> {
        self.store.save_merge_rule(&rule)?;
        self.install_rule(rule);
        Ok(())
    }

    /// Removes the rule for `(scope, field)`. Returns whether one existed.
    pub fn remove_rule(&self, scope: &RuleScope, field: &str) -> SyncResult<bool> {
        let existed = {
            let mut rules = self.rules.write().unwrap();
            let before = rules.len();
            rules.retain(|rule| !(rule.scope == *scope && rule.field == field));
            rules.len() < before
        };
        self.store.remove_merge_rule(scope, field)?;
        Ok(existed)
    }

    /// Rules applying to the given table, most specific first.
    pub fn rules_for_table(&self, table: &str) -> Vec<MergeRule> {
        let rules = self.rules.read().unwrap();
        let mut matching: Vec<MergeRule> = rules
            .iter()
            .filter(|rule| rule.scope.matches(table))
            .cloned()
            .collect();
        matching.sort_by_key(|rule| (!rule.scope.is_specific(), rule.priority));
        matching
    }

    /// Registers a named custom resolver for `MergeStrategy::Custom` rules.
    pub fn register_resolver(&self, name: impl Into<String>, resolver: CustomResolver) {
        self.resolvers.write().unwrap().insert(name.into(), resolver);
    }

    fn install_rule(&self, rule: MergeRule) {
        let mut rules = self.rules.write().unwrap();
        rules.retain(|existing| !(existing.scope == rule.scope && existing.field == rule.field));
        rules.push(rule);
    }

    fn register_builtin_resolvers(&self) {
        // Order line items merge by product, summing quantities and totals.
        self.register_resolver(
            "merge_order_items",
            Arc::new(|local, remote, _conflict| merge_order_items(local, remote)),
        );
        // Stock merges take the lower of the two observations so synchronized
        // inventory never reports more stock than either side actually saw.
        self.register_resolver(
            "conservative_stock",
            Arc::new(|local, remote, _conflict| conservative_stock(local, remote)),
        );
    }

    // ── History & stats ──────────────────────────────────────────

    /// Conflicts still awaiting resolution.
    pub fn unresolved_conflicts(&self) -> SyncResult<Vec<SyncConflict>> {
        Ok(self
            .store
            .load_conflicts()?
            .into_iter()
            .filter(|conflict| !conflict.resolved)
            .collect())
    }

    /// All recorded conflicts for a table.
    pub fn conflicts_for_table(&self, table: &str) -> SyncResult<Vec<SyncConflict>> {
        Ok(self
            .store
            .load_conflicts()?
            .into_iter()
            .filter(|conflict| conflict.table_name == table)
            .collect())
    }

    /// Conflict counts by resolution state, kind and table.
    pub fn statistics(&self) -> SyncResult<ConflictStatistics> {
        let conflicts = self.store.load_conflicts()?;
        let mut by_kind: HashMap<String, usize> = HashMap::new();
        let mut by_table: HashMap<String, usize> = HashMap::new();
        let mut resolved = 0;

        for conflict in &conflicts {
            if conflict.resolved {
                resolved += 1;
            }
            *by_kind.entry(conflict.kind.to_string()).or_default() += 1;
            *by_table.entry(conflict.table_name.clone()).or_default() += 1;
        }

        Ok(ConflictStatistics {
            total: conflicts.len(),
            resolved,
            unresolved: conflicts.len() - resolved,
            by_kind,
            by_table,
        })
    }

    /// Removes resolved conflicts older than the cutoff. Returns the number
    /// removed.
    pub fn purge_resolved(&self, cutoff: DateTime<Utc>) -> SyncResult<usize> {
        Ok(self.store.purge_resolved_conflicts(cutoff)?)
    }
}

/// Conflict counts by resolution state, kind and table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictStatistics {
    pub total: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub by_kind: HashMap<String, usize>,
    pub by_table: HashMap<String, usize>,
}

// ── Rule lookup ──────────────────────────────────────────────────

/// Finds the most specific rule for a field: table scope beats wildcard,
/// lowest priority number wins among ties.
fn find_rule<'a>(rules: &'a [MergeRule], table: &str, field: &str) -> Option<&'a MergeRule> {
    rules
        .iter()
        .filter(|rule| rule.field == field && rule.scope.matches(table))
        .min_by_key(|rule| (!rule.scope.is_specific(), rule.priority))
}

/// The canonical `updated_at` of a record payload.
fn record_timestamp(payload: &Value) -> Option<DateTime<Utc>> {
    payload
        .get("updated_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Picks the value from whichever full record was modified most recently.
/// Per-field timestamps are never consulted; `updated_at` on the records is
/// the one canonical recency signal.
fn newest_of(conflict: &SyncConflict, local_value: &Value, remote_value: &Value) -> Value {
    let local_ts = record_timestamp(&conflict.local_data);
    let remote_ts = record_timestamp(&conflict.remote_data);
    match (local_ts, remote_ts) {
        (Some(local), Some(remote)) if remote > local => remote_value.clone(),
        (None, Some(_)) => remote_value.clone(),
        _ => local_value.clone(),
    }
}

// ── Built-in custom resolvers ────────────────────────────────────

/// Merges two order-item arrays by `product_id`, summing `quantity` and
/// `line_total` for products present on both sides.
fn merge_order_items(local: &Value, remote: &Value) -> Value {
    let empty = Vec::new();
    let local_items = local.as_array().unwrap_or(&empty);
    let remote_items = remote.as_array().unwrap_or(&empty);

    let mut merged: Vec<Value> = Vec::new();
    let mut index_by_product: HashMap<String, usize> = HashMap::new();

    for item in local_items.iter().chain(remote_items) {
        let Some(product_id) = item.get("product_id").and_then(Value::as_str) else {
            merged.push(item.clone());
            continue;
        };

        match index_by_product.get(product_id) {
            Some(&index) => {
                if let Some(existing) = merged[index].as_object_mut() {
                    sum_field(existing, item, "quantity");
                    sum_field(existing, item, "line_total");
                }
            }
            None => {
                index_by_product.insert(product_id.to_string(), merged.len());
                merged.push(item.clone());
            }
        }
    }

    Value::Array(merged)
}

fn sum_field(target: &mut serde_json::Map<String, Value>, source: &Value, field: &str) {
    let addition = source.get(field).and_then(Value::as_f64).unwrap_or(0.0);
    let current = target.get(field).and_then(Value::as_f64).unwrap_or(0.0);
    if let Some(number) = serde_json::Number::from_f64(current + addition) {
        target.insert(field.to_string(), Value::Number(number));
    }
}

/// Takes the lower of two stock observations. Monotonically conservative:
/// the result is never greater than either input, so merged inventory can't
/// oversell.
fn conservative_stock(local: &Value, remote: &Value) -> Value {
    match (local.as_f64(), remote.as_f64()) {
        (Some(local_stock), Some(remote_stock)) => {
            if local_stock <= remote_stock {
                local.clone()
            } else {
                remote.clone()
            }
        }
        _ => local.clone(),
    }
}

// ── Default rule set ─────────────────────────────────────────────

fn default_rules() -> Vec<MergeRule> {
    vec![
        // Orders
        MergeRule::for_table("orders", "status", MergeStrategy::NewestWins, 1),
        MergeRule::for_table("orders", "payment_status", MergeStrategy::NewestWins, 1),
        MergeRule::for_table("orders", "completed_at", MergeStrategy::NewestWins, 1),
        MergeRule::for_table("orders", "order_items", MergeStrategy::Custom, 1)
            .with_resolver("merge_order_items"),
        MergeRule::for_table("orders", "total_amount", MergeStrategy::LocalWins, 2),
        MergeRule::for_table("orders", "customer_name", MergeStrategy::RemoteWins, 3),
        // Payments
        MergeRule::for_table("payments", "payment_status", MergeStrategy::NewestWins, 1),
        MergeRule::for_table("payments", "transaction_id", MergeStrategy::RemoteWins, 1),
        MergeRule::for_table("payments", "payment_date", MergeStrategy::NewestWins, 1),
        MergeRule::for_table("payments", "amount", MergeStrategy::LocalWins, 2),
        // Inventory
        MergeRule::for_table("inventory", "current_stock", MergeStrategy::Custom, 1)
            .with_resolver("conservative_stock"),
        MergeRule::for_table("inventory", "last_restocked", MergeStrategy::NewestWins, 1),
        MergeRule::for_table("inventory", "minimum_stock", MergeStrategy::RemoteWins, 2),
        MergeRule::for_table("inventory", "cost_per_unit", MergeStrategy::NewestWins, 2),
        MergeRule::for_table("inventory", "supplier_name", MergeStrategy::RemoteWins, 3),
        // Products
        MergeRule::for_table("products", "price", MergeStrategy::RemoteWins, 1),
        MergeRule::for_table("products", "is_available", MergeStrategy::LocalWins, 1),
        MergeRule::for_table("products", "name", MergeStrategy::RemoteWins, 2),
        MergeRule::for_table("products", "recipe_items", MergeStrategy::RemoteWins, 2),
        MergeRule::for_table("products", "description", MergeStrategy::RemoteWins, 3),
        // Categories
        MergeRule::for_table("categories", "name", MergeStrategy::RemoteWins, 1),
        MergeRule::for_table("categories", "is_active", MergeStrategy::RemoteWins, 1),
        MergeRule::for_table("categories", "sort_order", MergeStrategy::RemoteWins, 2),
        // Every table
        MergeRule::for_any("id", MergeStrategy::LocalWins, 1),
        MergeRule::for_any("created_at", MergeStrategy::LocalWins, 1),
        MergeRule::for_any("updated_at", MergeStrategy::NewestWins, 1),
    ]
}
