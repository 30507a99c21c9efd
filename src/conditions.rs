// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Status conditions and the readiness aggregation shared by every owner kind.
//!
//! Each owner declares a [`ConditionSet`]: one happy condition (`Ready`) plus
//! the dependent condition types it tracks. The happy condition is never set
//! directly, it is recomputed from the dependents after every mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    pub fn new(type_: impl Into<String>, status: ConditionStatus) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: String::new(),
            message: String::new(),
            last_transition_time: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>, message: impl Into<String>) -> Self {
        self.reason = reason.into();
        self.message = message.into();
        self
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Find a condition by type in a child's condition list
pub fn find<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// The fixed set of condition types an owner kind tracks.
#[derive(Debug)]
pub struct ConditionSet {
    happy: &'static str,
    dependents: &'static [&'static str],
}

impl ConditionSet {
    /// Dependents are evaluated in the declared order when deriving the happy condition.
    pub const fn new(happy: &'static str, dependents: &'static [&'static str]) -> Self {
        Self { happy, dependents }
    }

    pub fn happy(&self) -> &'static str {
        self.happy
    }

    pub fn manage<'a>(&'a self, conditions: &'a mut Vec<Condition>) -> ConditionManager<'a> {
        ConditionManager {
            set: self,
            conditions,
        }
    }
}

/// Mutates one owner's condition list on behalf of a [`ConditionSet`].
pub struct ConditionManager<'a> {
    set: &'a ConditionSet,
    conditions: &'a mut Vec<Condition>,
}

impl ConditionManager<'_> {
    /// Add an `Unknown` condition for every tracked type that is missing.
    /// Existing conditions are left as they are.
    pub fn initialize(&mut self) {
        let tracked = std::iter::once(self.set.happy).chain(self.set.dependents.iter().copied());
        for type_ in tracked {
            if find(self.conditions, type_).is_none() {
                let mut condition = Condition::new(type_, ConditionStatus::Unknown);
                condition.last_transition_time = Some(Utc::now());
                self.conditions.push(condition);
            }
        }
        self.conditions.sort_by(|a, b| a.type_.cmp(&b.type_));
    }

    pub fn get(&self, type_: &str) -> Option<&Condition> {
        find(self.conditions, type_)
    }

    pub fn is_happy(&self) -> bool {
        self.get(self.set.happy).is_some_and(Condition::is_true)
    }

    pub fn mark_true(&mut self, type_: &str) {
        self.set_dependent(Condition::new(type_, ConditionStatus::True));
    }

    pub fn mark_false(&mut self, type_: &str, reason: &str, message: &str) {
        self.set_dependent(Condition::new(type_, ConditionStatus::False).with_reason(reason, message));
    }

    pub fn mark_unknown(&mut self, type_: &str, reason: &str, message: &str) {
        self.set_dependent(Condition::new(type_, ConditionStatus::Unknown).with_reason(reason, message));
    }

    /// Copy a child's readiness onto `type_`. Status, reason and message pass
    /// through verbatim; a child without the condition counts as `Unknown`.
    pub fn propagate(&mut self, type_: &str, child: Option<&Condition>) {
        match child {
            Some(child) => self.set_dependent(
                Condition::new(type_, child.status).with_reason(&child.reason, &child.message),
            ),
            None => self.mark_unknown(type_, "", ""),
        }
    }

    fn set_dependent(&mut self, condition: Condition) {
        debug_assert_ne!(condition.type_, self.set.happy, "the happy condition is derived");
        self.set(condition);
        self.recompute_happy();
    }

    fn set(&mut self, mut condition: Condition) {
        match self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                // only a status change moves the transition time
                condition.last_transition_time = if existing.status == condition.status {
                    existing.last_transition_time
                } else {
                    Some(Utc::now())
                };
                *existing = condition;
            }
            None => {
                condition.last_transition_time = Some(Utc::now());
                self.conditions.push(condition);
                self.conditions.sort_by(|a, b| a.type_.cmp(&b.type_));
            }
        }
    }

    fn recompute_happy(&mut self) {
        let mut first_unknown: Option<(String, String)> = None;
        let mut first_false: Option<(String, String)> = None;

        for type_ in self.set.dependents {
            match find(self.conditions, type_) {
                Some(c) if c.status == ConditionStatus::False => {
                    first_false = Some((c.reason.clone(), c.message.clone()));
                    break;
                }
                Some(c) if c.status == ConditionStatus::True => {}
                Some(c) => {
                    first_unknown.get_or_insert_with(|| (c.reason.clone(), c.message.clone()));
                }
                None => {
                    first_unknown.get_or_insert_with(Default::default);
                }
            }
        }

        let happy = match (first_false, first_unknown) {
            (Some((reason, message)), _) => {
                Condition::new(self.set.happy, ConditionStatus::False).with_reason(reason, message)
            }
            (None, Some((reason, message))) => {
                Condition::new(self.set.happy, ConditionStatus::Unknown).with_reason(reason, message)
            }
            (None, None) => Condition::new(self.set.happy, ConditionStatus::True),
        };
        self.set(happy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SET: ConditionSet = ConditionSet::new("Ready", &["ConfigurationReady", "RouteReady"]);

    fn status_of(conditions: &[Condition], type_: &str) -> ConditionStatus {
        find(conditions, type_).map(|c| c.status).unwrap()
    }

    #[test]
    fn test_initialize_adds_unknown_conditions_sorted() {
        let mut conditions = vec![];
        SET.manage(&mut conditions).initialize();

        let types: Vec<&str> = conditions.iter().map(|c| c.type_.as_str()).collect();
        assert_eq!(types, vec!["ConfigurationReady", "Ready", "RouteReady"]);
        assert!(conditions.iter().all(|c| c.status == ConditionStatus::Unknown));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut conditions = vec![];
        SET.manage(&mut conditions).initialize();
        SET.manage(&mut conditions).mark_true("RouteReady");
        let before = conditions.clone();

        SET.manage(&mut conditions).initialize();

        assert_eq!(conditions, before);
        assert_eq!(status_of(&conditions, "RouteReady"), ConditionStatus::True);
    }

    #[test]
    fn test_ready_when_all_dependents_true() {
        let mut conditions = vec![];
        let mut manager = SET.manage(&mut conditions);
        manager.initialize();
        manager.mark_true("ConfigurationReady");
        assert!(!manager.is_happy());
        manager.mark_true("RouteReady");
        assert!(manager.is_happy());
    }

    #[test]
    fn test_single_false_dependent_drives_ready_false() {
        for failing in ["ConfigurationReady", "RouteReady"] {
            let mut conditions = vec![];
            let mut manager = SET.manage(&mut conditions);
            manager.initialize();
            manager.mark_true("ConfigurationReady");
            manager.mark_true("RouteReady");
            manager.mark_false(failing, "TestReason", "a human readable message");

            let ready = manager.get("Ready").unwrap();
            assert_eq!(ready.status, ConditionStatus::False, "failing {failing}");
            assert_eq!(ready.reason, "TestReason");
            assert_eq!(ready.message, "a human readable message");
        }
    }

    #[test]
    fn test_first_false_in_declared_order_wins() {
        let mut conditions = vec![];
        let mut manager = SET.manage(&mut conditions);
        manager.initialize();
        manager.mark_false("RouteReady", "RouteReason", "route");
        manager.mark_false("ConfigurationReady", "ConfigReason", "config");

        assert_eq!(manager.get("Ready").unwrap().reason, "ConfigReason");
    }

    #[test]
    fn test_unknown_dependent_keeps_ready_unknown() {
        let mut conditions = vec![];
        let mut manager = SET.manage(&mut conditions);
        manager.initialize();
        manager.mark_true("ConfigurationReady");

        assert_eq!(manager.get("Ready").unwrap().status, ConditionStatus::Unknown);
    }

    #[test]
    fn test_reason_change_keeps_transition_time() {
        let mut conditions = vec![];
        SET.manage(&mut conditions).mark_false("RouteReady", "First", "first");
        let stamped = find(&conditions, "RouteReady").unwrap().last_transition_time;

        SET.manage(&mut conditions).mark_false("RouteReady", "Second", "second");

        let route = find(&conditions, "RouteReady").unwrap();
        assert_eq!(route.reason, "Second");
        assert_eq!(route.last_transition_time, stamped);
    }

    #[test]
    fn test_propagate_copies_child_condition() {
        let child = Condition::new("Ready", ConditionStatus::False).with_reason("RevisionFailed", "boom");
        let mut conditions = vec![];
        let mut manager = SET.manage(&mut conditions);
        manager.initialize();
        manager.propagate("ConfigurationReady", Some(&child));

        let propagated = manager.get("ConfigurationReady").unwrap();
        assert_eq!(propagated.status, ConditionStatus::False);
        assert_eq!(propagated.reason, "RevisionFailed");
        assert_eq!(propagated.message, "boom");
    }

    #[test]
    fn test_propagate_missing_child_condition_is_unknown() {
        let mut conditions = vec![];
        let mut manager = SET.manage(&mut conditions);
        manager.mark_true("ConfigurationReady");
        manager.propagate("ConfigurationReady", None);

        assert_eq!(
            manager.get("ConfigurationReady").unwrap().status,
            ConditionStatus::Unknown
        );
    }

    #[test]
    fn test_serializes_with_kubernetes_field_names() {
        let condition = Condition::new("Ready", ConditionStatus::True);
        let json = serde_json::to_value(&condition).unwrap();

        assert_eq!(json["type"], "Ready");
        assert_eq!(json["status"], "True");
        assert!(json.get("reason").is_none());
    }
}
