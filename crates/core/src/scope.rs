//! Scope and visibility rules
//!
//! Every chunk carries exactly one scope. Visibility is decided by the
//! scope variant plus the orthogonal sigilo sub-level: a restricted chunk
//! is only visible to users on its allowed list, regardless of scope.
//! A chunk's scope is immutable after ingestion; promotion is a new write
//! plus deletion of the old chunk.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Visibility scope of a chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum Scope {
    /// Visible to all tenants
    Global,
    /// Requires tenant match
    Private { tenant_id: String },
    /// Requires tenant match and a non-empty group intersection
    Group {
        tenant_id: String,
        group_ids: Vec<String>,
    },
    /// Case-bound, tenant + case match required, TTL honored
    Local { tenant_id: String, case_id: String },
}

impl Scope {
    /// Stable payload tag, case-sensitive across both backends
    pub fn tag(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Private { .. } => "private",
            Scope::Group { .. } => "group",
            Scope::Local { .. } => "local",
        }
    }

    pub fn tenant_id(&self) -> Option<&str> {
        match self {
            Scope::Global => None,
            Scope::Private { tenant_id }
            | Scope::Group { tenant_id, .. }
            | Scope::Local { tenant_id, .. } => Some(tenant_id),
        }
    }

    /// Scope-level visibility for a caller described by a [`ScopeFilter`].
    /// Sigilo is checked separately.
    pub fn visible_to(&self, filter: &ScopeFilter) -> bool {
        match self {
            Scope::Global => filter.include_global,
            Scope::Private { tenant_id } => {
                filter.include_private && tenant_id == &filter.tenant_id
            },
            Scope::Group {
                tenant_id,
                group_ids,
            } => {
                filter.include_group
                    && tenant_id == &filter.tenant_id
                    && group_ids.iter().any(|g| filter.group_ids.contains(g))
            },
            Scope::Local { tenant_id, case_id } => {
                filter.include_local
                    && tenant_id == &filter.tenant_id
                    && filter.case_id.as_deref() == Some(case_id.as_str())
            },
        }
    }
}

/// Caller-side scope restriction, resolved by the outer layers before a
/// request reaches the core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeFilter {
    pub tenant_id: String,
    #[serde(default)]
    pub case_id: Option<String>,
    #[serde(default)]
    pub group_ids: Vec<String>,
    /// Absent user_id restricts results to sigilo=public
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_true")]
    pub include_global: bool,
    #[serde(default = "default_true")]
    pub include_private: bool,
    #[serde(default = "default_true")]
    pub include_group: bool,
    #[serde(default = "default_true")]
    pub include_local: bool,
}

fn default_true() -> bool {
    true
}

impl ScopeFilter {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            case_id: None,
            group_ids: Vec::new(),
            user_id: None,
            include_global: true,
            include_private: true,
            include_group: true,
            include_local: true,
        }
    }

    pub fn case_id(mut self, case_id: impl Into<String>) -> Self {
        self.case_id = Some(case_id.into());
        self
    }

    pub fn group_ids(mut self, group_ids: Vec<String>) -> Self {
        self.group_ids = group_ids;
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Whether the group clause can actually match anything
    pub fn group_clause_active(&self) -> bool {
        self.include_group && !self.group_ids.is_empty()
    }

    /// Whether the local clause can actually match anything
    pub fn local_clause_active(&self) -> bool {
        self.include_local && self.case_id.is_some()
    }

    /// Reject combinations that cannot match any chunk. A filter that
    /// includes only LOCAL but carries no case_id (or only GROUP with no
    /// groups) is inconsistent rather than merely empty.
    pub fn validate(&self) -> Result<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(Error::InvalidInput("tenant_id must not be empty".into()));
        }
        let any_active = self.include_global
            || self.include_private
            || self.group_clause_active()
            || self.local_clause_active();
        if !any_active {
            if self.include_local && self.case_id.is_none() {
                return Err(Error::ScopeDenied(
                    "LOCAL scope requires a case_id".into(),
                ));
            }
            if self.include_group && self.group_ids.is_empty() {
                return Err(Error::ScopeDenied(
                    "GROUP scope requires at least one group_id".into(),
                ));
            }
            return Err(Error::ScopeDenied(
                "no scope variant selected".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> ScopeFilter {
        ScopeFilter::new("T1")
            .case_id("C1")
            .group_ids(vec!["g1".into(), "g2".into()])
    }

    #[test]
    fn test_global_visible_to_all_tenants() {
        assert!(Scope::Global.visible_to(&filter()));
        assert!(Scope::Global.visible_to(&ScopeFilter::new("other")));
    }

    #[test]
    fn test_private_requires_tenant_match() {
        let scope = Scope::Private {
            tenant_id: "T1".into(),
        };
        assert!(scope.visible_to(&filter()));
        assert!(!scope.visible_to(&ScopeFilter::new("T2")));
    }

    #[test]
    fn test_group_requires_intersection() {
        let scope = Scope::Group {
            tenant_id: "T1".into(),
            group_ids: vec!["g2".into(), "g9".into()],
        };
        assert!(scope.visible_to(&filter()));

        let disjoint = Scope::Group {
            tenant_id: "T1".into(),
            group_ids: vec!["g7".into()],
        };
        assert!(!disjoint.visible_to(&filter()));
    }

    #[test]
    fn test_local_requires_case_match() {
        let scope = Scope::Local {
            tenant_id: "T1".into(),
            case_id: "C1".into(),
        };
        assert!(scope.visible_to(&filter()));

        let other_case = Scope::Local {
            tenant_id: "T1".into(),
            case_id: "C2".into(),
        };
        assert!(!other_case.visible_to(&filter()));
    }

    #[test]
    fn test_local_only_without_case_is_denied() {
        let mut f = ScopeFilter::new("T1");
        f.include_global = false;
        f.include_private = false;
        f.include_group = false;
        assert!(matches!(f.validate(), Err(Error::ScopeDenied(_))));

        f.case_id = Some("C1".into());
        assert!(f.validate().is_ok());
    }

    #[test]
    fn test_empty_tenant_rejected() {
        let f = ScopeFilter::new("  ");
        assert!(matches!(f.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_scope_tag_stability() {
        assert_eq!(Scope::Global.tag(), "global");
        assert_eq!(
            Scope::Local {
                tenant_id: "t".into(),
                case_id: "c".into()
            }
            .tag(),
            "local"
        );
    }
}
