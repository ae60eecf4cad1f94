//! Hook annotations
//!
//! Two annotation namespaces are accepted and folded into one [`HookSpec`]:
//!
//! | Annotation | Values |
//! |---|---|
//! | `keel.io/hook` | `pre-deploy`, `post-deploy`, plus `-initial` / `-upgrade` variants |
//! | `helm.sh/hook` | `pre-install`, `pre-upgrade`, `post-install`, `post-upgrade` |
//! | `keel.io/hook-deletion-policy` | `before-hook-creation`, `hook-succeeded`, `hook-failed` |
//! | `helm.sh/hook-delete-policy` | same as above |
//! | `keel.io/hook-wait` | `true` (default) / `false` |
//!
//! `keel.io` wins when both namespaces are present.

use crate::error::{KeelError, KeelResult};
use crate::manifest::Resource;
use std::fmt;

const KEEL_HOOK: &str = "keel.io/hook";
const KEEL_DELETE_POLICY: &str = "keel.io/hook-deletion-policy";
const KEEL_WAIT: &str = "keel.io/hook-wait";
const HELM_HOOK: &str = "helm.sh/hook";
const HELM_DELETE_POLICY: [&str; 2] = ["helm.sh/hook-delete-policy", "helm.sh/hook-deletion-policy"];

/// Helm phases with no deploy-time meaning
const HELM_IGNORED: [&str; 6] = [
    "pre-delete",
    "post-delete",
    "pre-rollback",
    "post-rollback",
    "test",
    "test-success",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    PreDeploy,
    PostDeploy,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PreDeploy => "pre-deploy",
            Self::PostDeploy => "post-deploy",
        })
    }
}

/// When a tag applies relative to the hook resource's prior existence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Qualifier {
    Always,
    Initial,
    Upgrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhaseTag {
    pub phase: Phase,
    pub qualifier: Qualifier,
}

impl PhaseTag {
    pub fn parse(s: &str) -> Option<Self> {
        let (phase, rest) = if let Some(rest) = s.strip_prefix("pre-deploy") {
            (Phase::PreDeploy, rest)
        } else if let Some(rest) = s.strip_prefix("post-deploy") {
            (Phase::PostDeploy, rest)
        } else {
            return None;
        };

        let qualifier = match rest {
            "" => Qualifier::Always,
            "-initial" => Qualifier::Initial,
            "-upgrade" => Qualifier::Upgrade,
            _ => return None,
        };

        Some(Self { phase, qualifier })
    }

    fn from_helm(s: &str) -> Option<Self> {
        let (phase, qualifier) = match s {
            "pre-install" => (Phase::PreDeploy, Qualifier::Initial),
            "pre-upgrade" => (Phase::PreDeploy, Qualifier::Upgrade),
            "post-install" => (Phase::PostDeploy, Qualifier::Initial),
            "post-upgrade" => (Phase::PostDeploy, Qualifier::Upgrade),
            _ => return None,
        };
        Some(Self { phase, qualifier })
    }

    /// Whether this tag fires given whether the resource already existed
    pub fn applies(&self, existed: bool) -> bool {
        match self.qualifier {
            Qualifier::Always => true,
            Qualifier::Initial => !existed,
            Qualifier::Upgrade => existed,
        }
    }
}

impl fmt::Display for PhaseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.phase)?;
        match self.qualifier {
            Qualifier::Always => Ok(()),
            Qualifier::Initial => f.write_str("-initial"),
            Qualifier::Upgrade => f.write_str("-upgrade"),
        }
    }
}

/// Deletion policies; each is checked at its own trigger point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletePolicies {
    pub before_hook_creation: bool,
    pub hook_succeeded: bool,
    pub hook_failed: bool,
}

impl Default for DeletePolicies {
    fn default() -> Self {
        Self {
            before_hook_creation: true,
            hook_succeeded: false,
            hook_failed: false,
        }
    }
}

impl DeletePolicies {
    fn parse(value: &str) -> Result<Self, String> {
        let mut policies = Self {
            before_hook_creation: false,
            hook_succeeded: false,
            hook_failed: false,
        };

        for item in split_list(value) {
            match item {
                "before-hook-creation" => policies.before_hook_creation = true,
                "hook-succeeded" => policies.hook_succeeded = true,
                "hook-failed" => policies.hook_failed = true,
                other => return Err(format!("unknown deletion policy '{}'", other)),
            }
        }

        if !(policies.before_hook_creation || policies.hook_succeeded || policies.hook_failed) {
            return Err("empty deletion policy".to_string());
        }
        Ok(policies)
    }
}

/// Normalized hook declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookSpec {
    /// Deploy tags, sorted and deduplicated. Empty for Helm-only hooks.
    pub tags: Vec<PhaseTag>,
    pub delete: DeletePolicies,
    /// Block on readiness after apply
    pub wait: bool,
}

impl HookSpec {
    /// Classify a resource. `Ok(None)` means it is an ordinary resource.
    pub fn from_resource(resource: &Resource) -> KeelResult<Option<Self>> {
        let invalid = |reason: String| KeelError::InvalidHookSpec {
            resource: resource.key().to_string(),
            reason,
        };

        let tags = if let Some(value) = resource.annotation(KEEL_HOOK) {
            parse_tags(value, KEEL_HOOK, |item| PhaseTag::parse(item).map(Some)).map_err(invalid)?
        } else if let Some(value) = resource.annotation(HELM_HOOK) {
            parse_tags(value, HELM_HOOK, |item| {
                if HELM_IGNORED.contains(&item) {
                    Some(None)
                } else {
                    PhaseTag::from_helm(item).or_else(|| PhaseTag::parse(item)).map(Some)
                }
            })
            .map_err(invalid)?
        } else {
            return Ok(None);
        };

        let delete = match resource
            .annotation(KEEL_DELETE_POLICY)
            .or_else(|| HELM_DELETE_POLICY.iter().find_map(|k| resource.annotation(k)))
        {
            Some(value) => DeletePolicies::parse(value).map_err(invalid)?,
            None => DeletePolicies::default(),
        };

        let wait = match resource.annotation(KEEL_WAIT).map(str::trim) {
            None | Some("true") => true,
            Some("false") => false,
            Some(other) => {
                return Err(invalid(format!(
                    "{} must be \"true\" or \"false\", got '{}'",
                    KEEL_WAIT, other
                )))
            }
        };

        Ok(Some(Self { tags, delete, wait }))
    }

    /// Whether any tag names `phase`, regardless of qualifier
    pub fn declares(&self, phase: Phase) -> bool {
        self.tags.iter().any(|t| t.phase == phase)
    }

    /// Whether the hook runs in `phase` given its prior existence
    pub fn applies(&self, phase: Phase, existed: bool) -> bool {
        self.tags
            .iter()
            .any(|t| t.phase == phase && t.applies(existed))
    }
}

/// Parse a comma list, where `map` returns `None` for an unknown item and
/// `Some(None)` for a known item to ignore
fn parse_tags(
    value: &str,
    annotation: &str,
    map: impl Fn(&str) -> Option<Option<PhaseTag>>,
) -> Result<Vec<PhaseTag>, String> {
    let mut tags = Vec::new();
    let mut seen_any = false;

    for item in split_list(value) {
        seen_any = true;
        match map(item) {
            Some(Some(tag)) => tags.push(tag),
            Some(None) => {}
            None => return Err(format!("unknown phase '{}' in {}", item, annotation)),
        }
    }

    if !seen_any {
        return Err(format!("{} is empty", annotation));
    }

    tags.sort();
    tags.dedup();
    Ok(tags)
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}
