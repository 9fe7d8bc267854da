//! Include/exclude list semantics shared by backups, restores and item actions

use std::collections::BTreeSet;

/// Wildcard entry matching everything
pub const WILDCARD: &str = "*";

/// A pair of include and exclude lists
///
/// An empty include list, or one containing `*`, includes everything.
/// Excludes always win over includes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IncludesExcludes {
    includes: BTreeSet<String>,
    excludes: BTreeSet<String>,
}

impl IncludesExcludes {
    pub fn new<I, E>(includes: I, excludes: E) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            includes: includes.into_iter().map(Into::into).collect(),
            excludes: excludes.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the item passes both lists
    pub fn should_include(&self, item: &str) -> bool {
        if self.excludes.contains(item) {
            return false;
        }
        self.includes_all() || self.includes.contains(item)
    }

    /// Like [`IncludesExcludes::should_include`] for a `plural.group` resource
    ///
    /// A bare plural in either list also matches the resource in any group.
    pub fn should_include_resource(&self, group_resource: &str) -> bool {
        let plural = group_resource.split('.').next().unwrap_or(group_resource);
        if self.excludes.contains(group_resource) || self.excludes.contains(plural) {
            return false;
        }
        self.includes_all() || self.includes.contains(group_resource) || self.includes.contains(plural)
    }

    /// Whether the include list covers everything
    pub fn includes_all(&self) -> bool {
        self.includes.is_empty() || self.includes.contains(WILDCARD)
    }

    /// Whether every item passes (nothing narrowed, nothing excluded)
    pub fn is_unrestricted(&self) -> bool {
        self.includes_all() && self.excludes.is_empty()
    }

    pub fn includes(&self) -> impl Iterator<Item = &str> {
        self.includes.iter().map(String::as_str)
    }

    pub fn excludes(&self) -> impl Iterator<Item = &str> {
        self.excludes.iter().map(String::as_str)
    }
}

/// Check that an include and an exclude list are mutually consistent
///
/// Returns one message per problem; an empty vector means the lists are valid.
pub fn validate_includes_excludes(includes: &[String], excludes: &[String]) -> Vec<String> {
    let mut errors = Vec::new();

    let includes_set: BTreeSet<&str> = includes.iter().map(String::as_str).collect();
    let excludes_set: BTreeSet<&str> = excludes.iter().map(String::as_str).collect();

    if includes_set.contains(WILDCARD) && includes_set.len() > 1 {
        errors.push("includes list must either contain '*' only, or a non-empty list of items".to_string());
    }

    if excludes_set.contains(WILDCARD) {
        errors.push("excludes list cannot contain '*'".to_string());
    }

    for item in &excludes_set {
        if *item != WILDCARD && includes_set.contains(item) {
            errors.push(format!("excludes list cannot contain an item in the includes list: {}", item));
        }
    }

    errors
}

/// Union `extra` into `list`, keeping the original order and skipping duplicates
pub fn union_into(list: &mut Vec<String>, extra: &[&str]) {
    for item in extra {
        if !list.iter().any(|existing| existing == item) {
            list.push((*item).to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_includes_mean_everything() {
        let ie = IncludesExcludes::new(Vec::<String>::new(), vec!["secrets"]);
        assert!(ie.should_include("pods"));
        assert!(!ie.should_include("secrets"));
        assert!(ie.includes_all());
        assert!(!ie.is_unrestricted());
    }

    #[test]
    fn explicit_includes_narrow() {
        let ie = IncludesExcludes::new(vec!["ns-1"], Vec::<String>::new());
        assert!(ie.should_include("ns-1"));
        assert!(!ie.should_include("ns-2"));
        assert!(!ie.includes_all());
    }

    #[test]
    fn wildcard_includes_everything() {
        let ie = IncludesExcludes::new(vec!["*"], Vec::<String>::new());
        assert!(ie.should_include("anything"));
        assert!(ie.is_unrestricted());
    }

    #[test]
    fn resources_match_by_plural_or_full_name() {
        let ie = IncludesExcludes::new(vec!["deployments", "configmaps"], vec!["events.events.k8s.io"]);
        assert!(ie.should_include_resource("deployments.apps"));
        assert!(ie.should_include_resource("configmaps"));
        assert!(!ie.should_include_resource("secrets"));

        let ie = IncludesExcludes::new(Vec::<String>::new(), vec!["nodes", "events.events.k8s.io"]);
        assert!(!ie.should_include_resource("nodes"));
        assert!(!ie.should_include_resource("events.events.k8s.io"));
        assert!(ie.should_include_resource("pods"));
    }

    #[test]
    fn overlap_is_a_validation_error() {
        let errors = validate_includes_excludes(&strings(&["foo", "bar"]), &strings(&["foo"]));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("foo"));
    }

    #[test]
    fn wildcard_rules() {
        let errors = validate_includes_excludes(&strings(&["*", "pods"]), &strings(&["*"]));
        assert_eq!(errors.len(), 2);
        assert!(validate_includes_excludes(&strings(&["*"]), &strings(&["pods"])).is_empty());
        assert!(validate_includes_excludes(&[], &[]).is_empty());
    }

    #[test]
    fn union_deduplicates() {
        let mut list = strings(&["nodes", "secrets"]);
        union_into(&mut list, &["nodes", "events"]);
        assert_eq!(list, strings(&["nodes", "secrets", "events"]));
    }
}
