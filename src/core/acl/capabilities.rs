// src/core/acl/capabilities.rs

//! Capability sets granted by policies.

use bitflags::bitflags;

bitflags! {
    /// Fine-grained capabilities within a namespace.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct NamespaceCapability: u32 {
        /// Poison bit: any check against a set containing DENY fails.
        const DENY            = 1 << 0;
        const LIST_JOBS       = 1 << 1;
        const READ_JOB        = 1 << 2;
        const SUBMIT_JOB      = 1 << 3;
        const DISPATCH_JOB    = 1 << 4;
        const READ_LOGS       = 1 << 5;
        const READ_FS         = 1 << 6;
        const ALLOC_EXEC      = 1 << 7;
        const ALLOC_LIFECYCLE = 1 << 8;
        const SUBMIT_RECOMMENDATION = 1 << 9;
    }
}

impl NamespaceCapability {
    /// The capability set granted by a coarse policy disposition.
    pub fn from_policy(policy: &str) -> Option<Self> {
        match policy {
            "deny" => Some(Self::DENY),
            "read" => Some(Self::LIST_JOBS | Self::READ_JOB),
            "write" => Some(
                Self::LIST_JOBS
                    | Self::READ_JOB
                    | Self::SUBMIT_JOB
                    | Self::DISPATCH_JOB
                    | Self::READ_LOGS
                    | Self::READ_FS
                    | Self::ALLOC_EXEC
                    | Self::ALLOC_LIFECYCLE,
            ),
            _ => None,
        }
    }

    /// Parses a single named capability as written in policy source.
    pub fn from_capability_name(name: &str) -> Option<Self> {
        match name {
            "deny" => Some(Self::DENY),
            "list-jobs" => Some(Self::LIST_JOBS),
            "read-job" => Some(Self::READ_JOB),
            "submit-job" => Some(Self::SUBMIT_JOB),
            "dispatch-job" => Some(Self::DISPATCH_JOB),
            "read-logs" => Some(Self::READ_LOGS),
            "read-fs" => Some(Self::READ_FS),
            "alloc-exec" => Some(Self::ALLOC_EXEC),
            "alloc-lifecycle" => Some(Self::ALLOC_LIFECYCLE),
            "submit-recommendation" => Some(Self::SUBMIT_RECOMMENDATION),
            _ => None,
        }
    }

    /// Whether this set permits the given capability. The DENY bit poisons
    /// the whole set.
    pub fn allows(&self, cap: NamespaceCapability) -> bool {
        !self.contains(Self::DENY) && self.contains(cap)
    }
}

/// Coarse read/write permission used for the node, agent, and operator
/// scopes, where no finer capabilities exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoarsePolicy {
    #[default]
    None,
    Deny,
    Read,
    Write,
}

impl CoarsePolicy {
    pub fn parse(policy: &str) -> Option<Self> {
        match policy {
            "deny" => Some(Self::Deny),
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            _ => None,
        }
    }

    pub fn allows_read(&self) -> bool {
        matches!(self, Self::Read | Self::Write)
    }

    pub fn allows_write(&self) -> bool {
        matches!(self, Self::Write)
    }

    /// Merges grants from multiple policies. An explicit deny wins; writes
    /// otherwise dominate reads.
    pub fn merge(self, other: Self) -> Self {
        use CoarsePolicy::*;
        match (self, other) {
            (Deny, _) | (_, Deny) => Deny,
            (Write, _) | (_, Write) => Write,
            (Read, _) | (_, Read) => Read,
            (None, None) => None,
        }
    }
}
