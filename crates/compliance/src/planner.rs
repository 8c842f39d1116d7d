//! Remediation planner - turns deviations into ordered actions

use crate::error::{Error, Result};
use crate::registry::{Registry, UpdateMode};
use crate::types::{Action, Deviation, DeviationKind, HostId, Snapshot};
use crate::value::{FIELD_SEPARATOR, deep_merge, set_path, top_segment};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Planned actions plus the deviations no operation can fix
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub actions: Vec<Action>,
    pub unplannable: Vec<Deviation>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.unplannable.is_empty()
    }

    /// Actions for one host, in planned order
    pub fn actions_for<'a>(&'a self, host: &'a HostId) -> impl Iterator<Item = &'a Action> {
        self.actions.iter().filter(move |a| &a.host_id == host)
    }
}

/// Ordering key: host, category rank, category, entry
type GroupKey = (HostId, usize, String, String);

/// Builds remediation plans from deviations
pub struct Planner<'a> {
    registry: &'a Registry,
    snapshots: Vec<&'a Snapshot>,
}

impl<'a> Planner<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            snapshots: Vec::new(),
        }
    }

    /// Live state used as the base of whole-object and per-entry payloads
    pub fn with_snapshot(mut self, snapshot: &'a Snapshot) -> Self {
        self.snapshots.push(snapshot);
        self
    }

    /// Plan all deviations, collecting the unplannable ones.
    ///
    /// Actions are ordered by host, then by category dependency rank, then
    /// by entry, so each host's actions are contiguous.
    pub fn plan(&self, deviations: &[Deviation]) -> Plan {
        let mut groups: BTreeMap<GroupKey, Vec<&Deviation>> = BTreeMap::new();
        let mut plan = Plan::default();

        for deviation in deviations {
            let Some(remediation) = self
                .registry
                .get(&deviation.category)
                .and_then(|c| c.remediation.as_ref())
            else {
                log::warn!(
                    "{}: no remediation for {}/{}",
                    deviation.host_id,
                    deviation.category,
                    deviation.field
                );
                plan.unplannable.push(deviation.clone());
                continue;
            };

            let entry = match remediation.mode {
                UpdateMode::Whole | UpdateMode::Delta => String::new(),
                UpdateMode::PerEntry => top_segment(&deviation.field).to_string(),
                UpdateMode::PerField => deviation.field.clone(),
            };
            groups
                .entry((
                    deviation.host_id.clone(),
                    self.registry.rank(&deviation.category),
                    deviation.category.clone(),
                    entry,
                ))
                .or_default()
                .push(deviation);
        }

        for ((host_id, _, category, entry), group) in groups {
            let Some(remediation) = self
                .registry
                .get(&category)
                .and_then(|c| c.remediation.as_ref())
            else {
                continue;
            };
            let payload = self.payload(&host_id, &category, remediation.mode, &entry, &group);
            plan.actions.push(Action {
                host_id,
                category,
                operation: remediation.operation.clone(),
                mode: remediation.mode,
                payload,
                preconditions: remediation.preconditions.clone(),
                blocking: remediation.blocking,
                fields: group.iter().map(|d| d.field.clone()).collect(),
            });
        }

        log::debug!(
            "Planned {} actions ({} unplannable deviations)",
            plan.actions.len(),
            plan.unplannable.len()
        );
        plan
    }

    /// Plan, failing at the first unplannable deviation.
    pub fn plan_strict(&self, deviations: &[Deviation]) -> Result<Vec<Action>> {
        let plan = self.plan(deviations);
        match plan.unplannable.into_iter().next() {
            Some(d) => Err(Error::UnplannableDeviation {
                host: d.host_id.to_string(),
                category: d.category,
                field: d.field,
            }),
            None => Ok(plan.actions),
        }
    }

    fn live_category(&self, host: &HostId, category: &str) -> Map<String, Value> {
        self.snapshots
            .iter()
            .find(|s| s.host_id.as_ref() == Some(host))
            .and_then(|s| s.category(category))
            .cloned()
            .unwrap_or_default()
    }

    fn payload(
        &self,
        host: &HostId,
        category: &str,
        mode: UpdateMode,
        entry: &str,
        group: &[&Deviation],
    ) -> Value {
        match mode {
            UpdateMode::Whole => {
                let mut payload = Value::Object(self.live_category(host, category));
                for deviation in group {
                    set_path(&mut payload, &deviation.field, wanted(deviation));
                }
                payload
            }
            // Explicit nulls mark removals.
            UpdateMode::Delta | UpdateMode::PerField => {
                let mut payload = Value::Object(Map::new());
                for deviation in group {
                    set_path(
                        &mut payload,
                        &deviation.field,
                        Some(wanted(deviation).unwrap_or(Value::Null)),
                    );
                }
                payload
            }
            UpdateMode::PerEntry => {
                let live = self.live_category(host, category);
                let mut merged = live.get(entry).cloned().unwrap_or(Value::Null);
                for deviation in group {
                    match deviation.field.split_once(FIELD_SEPARATOR) {
                        // The whole entry is added, replaced, or removed.
                        None => match wanted(deviation) {
                            Some(value) if merged.is_object() && value.is_object() => {
                                deep_merge(&mut merged, value);
                            }
                            Some(value) => merged = value,
                            None => merged = Value::Null,
                        },
                        Some((_, rest)) => set_path(&mut merged, rest, wanted(deviation)),
                    }
                }
                let mut payload = Map::new();
                payload.insert(entry.to_string(), merged);
                Value::Object(payload)
            }
        }
    }
}

/// Desired value with nested nulls stripped; `None` for removals
fn wanted(deviation: &Deviation) -> Option<Value> {
    if deviation.action == DeviationKind::Remove {
        return None;
    }
    deviation.desired_value.clone().map(strip_nulls)
}

fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        other => other,
    }
}
