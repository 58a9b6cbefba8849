//! The field plan builder: partitions a grouped field set according to which
//! `@defer` scopes each field is visible under, deciding what belongs in the
//! current level's result versus a later sub-plan.

use indexmap::IndexMap;
use indexmap::IndexSet;
use std::collections::HashSet;

use crate::defer_usage::DeferUsageArena;
use crate::defer_usage::DeferUsageId;

/// One field reference contributing to a response key. `F` is the
/// executor's opaque field-node handle; this crate never inspects it.
#[derive(Debug, Clone)]
pub struct FieldDetails<F> {
    pub field: F,
    pub defer_usage: Option<DeferUsageId>,
}

/// A list of field references sharing one response key, tagged with the set
/// of defer-usages it is visible under (empty means "in the original,
/// non-deferred result").
#[derive(Debug, Clone)]
pub struct FieldGroup<F> {
    pub fields: Vec<FieldDetails<F>>,
    pub defer_usages: Vec<DeferUsageId>,
}

/// Response-key-ordered mapping of field groups. Order matters: it is the
/// order fields are written into the final response.
pub type GroupedFieldSet<F> = IndexMap<String, FieldGroup<F>>;

/// A sub-`GroupedFieldSet` keyed by a defer-usage set. The key is compared
/// structurally (selection sets have small arity, so a linear scan for the
/// canonical key is cheap).
pub struct NewGroupedFieldSetEntry<F> {
    key: Vec<DeferUsageId>,
    pub grouped_field_set: GroupedFieldSet<F>,
    pub should_initiate_defer: bool,
}

impl<F> NewGroupedFieldSetEntry<F> {
    /// The defer-usage set this sub-plan is keyed by, in canonical
    /// (sorted) order.
    pub fn defer_usages(&self) -> &[DeferUsageId] {
        &self.key
    }
}

pub struct FieldPlan<F> {
    pub grouped_field_set: GroupedFieldSet<F>,
    pub new_grouped_field_sets: Vec<NewGroupedFieldSetEntry<F>>,
    pub new_defer_usages: Vec<DeferUsageId>,
}

fn canonical_key(usages: &[DeferUsageId]) -> Vec<DeferUsageId> {
    let mut key = usages.to_vec();
    key.sort_unstable();
    key.dedup();
    key
}

fn same_set(a: &[DeferUsageId], b: &[DeferUsageId]) -> bool {
    canonical_key(a) == canonical_key(b)
}

/// Remove any defer-usage from `usages` that has an ancestor also present in
/// `usages` — the ancestor already covers it.
fn trim_to_ancestors(usages: &HashSet<DeferUsageId>, arena: &DeferUsageArena) -> Vec<DeferUsageId> {
    usages
        .iter()
        .copied()
        .filter(|&usage| {
            !usages
                .iter()
                .any(|&other| other != usage && arena.is_ancestor(other, usage))
        })
        .collect()
}

fn insert_field<F: Clone>(
    grouped_field_set: &mut GroupedFieldSet<F>,
    response_key: &str,
    details: &[FieldDetails<F>],
    defer_usages: Vec<DeferUsageId>,
) {
    grouped_field_set
        .entry(response_key.to_owned())
        .and_modify(|group| group.fields.extend(details.iter().cloned()))
        .or_insert_with(|| FieldGroup {
            fields: details.to_vec(),
            defer_usages,
        });
}

/// Partition `fields` by defer-usage relative to `parent_defer_usages`: fields
/// that agree with the parent scope stay in `grouped_field_set`, others are
/// grouped into `new_grouped_field_sets` keyed by their (ancestor-trimmed)
/// defer-usage set, one sub-plan per distinct set, in first-seen order.
pub fn build_field_plan<F: Clone>(
    fields: &IndexMap<String, Vec<FieldDetails<F>>>,
    parent_defer_usages: &[DeferUsageId],
    arena: &DeferUsageArena,
    known_defer_usages: &HashSet<DeferUsageId>,
) -> FieldPlan<F> {
    let mut grouped_field_set: GroupedFieldSet<F> = IndexMap::new();
    let mut new_grouped_field_sets: Vec<NewGroupedFieldSetEntry<F>> = Vec::new();
    let mut new_defer_usages: IndexSet<DeferUsageId> = IndexSet::new();
    let parent_set: HashSet<DeferUsageId> = parent_defer_usages.iter().copied().collect();

    for (response_key, details) in fields {
        let mut in_original_result = false;
        let mut usage_set: HashSet<DeferUsageId> = HashSet::new();
        for detail in details {
            match detail.defer_usage {
                None => in_original_result = true,
                Some(usage) => {
                    usage_set.insert(usage);
                }
            }
        }

        let usages = if in_original_result {
            Vec::new()
        } else {
            trim_to_ancestors(&usage_set, arena)
        };

        if same_set(&usages, parent_defer_usages) {
            insert_field(&mut grouped_field_set, response_key, details, usages);
            continue;
        }

        let key = canonical_key(&usages);
        let entry_index = new_grouped_field_sets
            .iter()
            .position(|entry| entry.key == key);
        let entry_index = entry_index.unwrap_or_else(|| {
            let should_initiate_defer = usages.iter().any(|u| !parent_set.contains(u));
            new_grouped_field_sets.push(NewGroupedFieldSetEntry {
                key: key.clone(),
                grouped_field_set: IndexMap::new(),
                should_initiate_defer,
            });
            new_grouped_field_sets.len() - 1
        });

        insert_field(
            &mut new_grouped_field_sets[entry_index].grouped_field_set,
            response_key,
            details,
            usages.clone(),
        );

        for usage in usages {
            if !known_defer_usages.contains(&usage) {
                new_defer_usages.insert(usage);
            }
        }
    }

    FieldPlan {
        grouped_field_set,
        new_grouped_field_sets,
        new_defer_usages: new_defer_usages.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Path;

    fn plan_fixture() -> (DeferUsageArena, DeferUsageId, DeferUsageId) {
        let mut arena = DeferUsageArena::new();
        let outer = arena.create(Path::root().push("a"), Some("outer".into()), None);
        let inner = arena.create(Path::root().push("a").push("b"), Some("inner".into()), Some(outer));
        (arena, outer, inner)
    }

    #[test]
    fn undeferred_field_goes_to_current_scope() {
        let (arena, _outer, _inner) = plan_fixture();
        let mut fields = IndexMap::new();
        fields.insert(
            "a".to_string(),
            vec![FieldDetails {
                field: "a-node",
                defer_usage: None,
            }],
        );
        let plan = build_field_plan(&fields, &[], &arena, &HashSet::new());
        assert!(plan.grouped_field_set.contains_key("a"));
        assert!(plan.new_grouped_field_sets.is_empty());
        assert!(plan.new_defer_usages.is_empty());
    }

    #[test]
    fn deferred_field_goes_to_sub_plan() {
        let (arena, outer, _inner) = plan_fixture();
        let mut fields = IndexMap::new();
        fields.insert(
            "bio".to_string(),
            vec![FieldDetails {
                field: "bio-node",
                defer_usage: Some(outer),
            }],
        );
        let plan = build_field_plan(&fields, &[], &arena, &HashSet::new());
        assert!(plan.grouped_field_set.is_empty());
        assert_eq!(plan.new_grouped_field_sets.len(), 1);
        assert_eq!(plan.new_defer_usages, vec![outer]);
        assert!(plan.new_grouped_field_sets[0].should_initiate_defer);
    }

    #[test]
    fn ancestor_trims_redundant_child_usage() {
        let (arena, outer, inner) = plan_fixture();
        let mut fields = IndexMap::new();
        // A field visible under both outer and inner: inner is redundant
        // because outer already covers it.
        fields.insert(
            "both".to_string(),
            vec![
                FieldDetails {
                    field: "n1",
                    defer_usage: Some(outer),
                },
                FieldDetails {
                    field: "n2",
                    defer_usage: Some(inner),
                },
            ],
        );
        let plan = build_field_plan(&fields, &[], &arena, &HashSet::new());
        assert_eq!(plan.new_grouped_field_sets.len(), 1);
        assert_eq!(plan.new_grouped_field_sets[0].defer_usages(), &[outer]);
    }

    #[test]
    fn matching_parent_scope_is_not_new() {
        let (arena, outer, _inner) = plan_fixture();
        let mut fields = IndexMap::new();
        fields.insert(
            "bio".to_string(),
            vec![FieldDetails {
                field: "bio-node",
                defer_usage: Some(outer),
            }],
        );
        let plan = build_field_plan(&fields, &[outer], &arena, &HashSet::from([outer]));
        assert!(plan.grouped_field_set.contains_key("bio"));
        assert!(plan.new_grouped_field_sets.is_empty());
    }

    #[test]
    fn sub_plan_roundtrip_reproduces_full_field_set() {
        let (arena, outer, inner) = plan_fixture();
        let mut fields = IndexMap::new();
        fields.insert(
            "a".to_string(),
            vec![FieldDetails {
                field: "a",
                defer_usage: None,
            }],
        );
        fields.insert(
            "b".to_string(),
            vec![FieldDetails {
                field: "b",
                defer_usage: Some(outer),
            }],
        );
        fields.insert(
            "c".to_string(),
            vec![FieldDetails {
                field: "c",
                defer_usage: Some(inner),
            }],
        );

        let top = build_field_plan(&fields, &[], &arena, &HashSet::new());
        let mut reproduced: Vec<&str> = top.grouped_field_set.keys().map(String::as_str).collect();
        let mut known = HashSet::new();
        known.extend(top.new_defer_usages.iter().copied());
        for sub in &top.new_grouped_field_sets {
            reproduced.extend(sub.grouped_field_set.keys().map(String::as_str));
        }
        reproduced.sort_unstable();
        assert_eq!(reproduced, vec!["a", "b", "c"]);
    }
}
