//! Free-text failure classification.
//!
//! Remote tooling reports these conditions only through message text, so the
//! heuristics live in one table instead of being scattered across call sites.

/// Classification of a failure message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    /// The target container has no usable shell.
    ShellMissing,
    /// Admission rejected a root/capability-bearing container.
    RestrictivePolicy,
}

/// Which failure source a rule applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureSource {
    /// stderr of a normal `exec` in the target container.
    Exec,
    /// Error text from debug container provisioning.
    Provision,
}

pub struct Rule {
    pub source: FailureSource,
    pub needle: &'static str,
    pub class: FailureClass,
}

pub const RULES: &[Rule] = &[
    Rule {
        source: FailureSource::Exec,
        needle: "executable file not found",
        class: FailureClass::ShellMissing,
    },
    Rule {
        source: FailureSource::Exec,
        needle: "OCI runtime exec failed",
        class: FailureClass::ShellMissing,
    },
    Rule {
        source: FailureSource::Provision,
        needle: "runAsNonRoot",
        class: FailureClass::RestrictivePolicy,
    },
    Rule {
        source: FailureSource::Provision,
        needle: "runAsUser=0",
        class: FailureClass::RestrictivePolicy,
    },
    Rule {
        source: FailureSource::Provision,
        needle: "PodSecurity",
        class: FailureClass::RestrictivePolicy,
    },
];

pub fn classify(source: FailureSource, message: &str) -> Option<FailureClass> {
    RULES
        .iter()
        .find(|rule| rule.source == source && message.contains(rule.needle))
        .map(|rule| rule.class)
}

pub fn is_shell_missing(stderr: &str) -> bool {
    classify(FailureSource::Exec, stderr) == Some(FailureClass::ShellMissing)
}

pub fn is_restrictive_policy(message: &str) -> bool {
    classify(FailureSource::Provision, message) == Some(FailureClass::RestrictivePolicy)
}
