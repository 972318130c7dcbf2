//! Lock → validate → authorize → core.
//!
//! Every public node operation runs through [`run`]. What each layer does
//! is looked up in one table, [`Operation::rule`], instead of being spread
//! over per-operation wrappers.

use crate::error::{StoreError, StoreResult};
use crate::lock::{LockMode, LockSet, LockTarget};
use crate::node::NodeBase;
use crate::path;
use crate::types::{CHMOD, CHOWN, NodeKind, READ, WRITE};
use crate::workspace::Workspace;

/// Public node operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Create,
    Read,
    ReadRevision,
    Update,
    Delete,
    Touch,
    Copy,
    Move,
    GetMetadata,
    GetPermissions,
    Chown,
    SetPermission,
    UnsetPermission,
}

/// What must be true of the target before the core runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Presence {
    Present,
    Absent,
    Any,
}

/// Whose permission record is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Subject {
    Target,
    /// The parent directory; skipped for the root.
    Parent,
    /// The target if it exists, otherwise its closest existing ancestor.
    NearestExisting,
}

/// One row of the operation table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Rule {
    pub lock: Option<LockMode>,
    /// Lock every ancestor too, not just the target.
    pub structural: bool,
    pub permission: &'static str,
    pub subject: Subject,
    pub presence: Presence,
    pub forbid_root: bool,
}

const fn rule(
    lock: Option<LockMode>,
    structural: bool,
    permission: &'static str,
    subject: Subject,
    presence: Presence,
    forbid_root: bool,
) -> Rule {
    Rule {
        lock,
        structural,
        permission,
        subject,
        presence,
        forbid_root,
    }
}

impl Operation {
    #[rustfmt::skip]
    pub(crate) const fn rule(self) -> Rule {
        use LockMode::{Exclusive, Shared};
        use Presence::{Absent, Any, Present};
        use Subject::{NearestExisting, Parent, Target};

        match self {
            //                                  lock             chain  permission  subject          presence  no root
            Operation::Create          => rule(Some(Exclusive), true,  WRITE, Parent,          Absent,  false),
            Operation::Read            => rule(Some(Shared),    true,  READ,  Target,          Present, false),
            Operation::ReadRevision    => rule(Some(Shared),    true,  READ,  NearestExisting, Any,     false),
            Operation::Update          => rule(Some(Exclusive), true,  WRITE, Target,          Present, false),
            Operation::Delete          => rule(Some(Exclusive), true,  WRITE, Target,          Present, true),
            Operation::Touch           => rule(Some(Exclusive), true,  READ,  Target,          Present, false),
            Operation::Copy            => rule(None,            false, READ,  Target,          Present, false),
            Operation::Move            => rule(Some(Exclusive), true,  WRITE, Target,          Present, true),
            Operation::GetMetadata     => rule(Some(Shared),    true,  READ,  Target,          Present, false),
            Operation::GetPermissions  => rule(Some(Shared),    true,  READ,  Target,          Present, false),
            Operation::Chown           => rule(Some(Exclusive), false, CHOWN, Target,          Present, false),
            Operation::SetPermission   => rule(Some(Exclusive), false, CHMOD, Target,          Present, false),
            Operation::UnsetPermission => rule(Some(Exclusive), false, CHMOD, Target,          Present, false),
        }
    }
}

/// Which locks [`run_scoped`] takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockScope {
    /// The target and every ancestor.
    Chain,
    /// The target only.
    Node,
}

/// Run `op` on `node` with the table's default lock scope.
pub(crate) fn run<T>(
    node: &NodeBase,
    op: Operation,
    body: impl FnOnce() -> StoreResult<T>,
) -> StoreResult<T> {
    let scope = if op.rule().structural {
        LockScope::Chain
    } else {
        LockScope::Node
    };
    run_scoped(node, op, scope, body)
}

/// Run `op` on `node`; locks are released when this returns.
///
/// Nodes that don't exist yet are locked only once validation and
/// authorization have passed, so a rejected call leaves no lock files behind.
pub(crate) fn run_scoped<T>(
    node: &NodeBase,
    op: Operation,
    scope: LockScope,
    body: impl FnOnce() -> StoreResult<T>,
) -> StoreResult<T> {
    let rule = op.rule();
    let mut locks = match rule.lock {
        Some(mode) => lock(node.workspace(), lock_targets(node, mode, scope))?,
        None => LockSet::default(),
    };
    check(node, op)?;
    if let (Some(mode), Presence::Absent) = (rule.lock, rule.presence) {
        // the parent is held exclusively, nobody else can reach the new node
        locks.claim(
            &node.lock_target(mode).provisioned(),
            node.workspace().config().lock_timeout(),
        )?;
    }
    tracing::trace!(path = %node.path(), %op, "running");
    body()
}

/// Validation and authorization without locking.
pub(crate) fn check(node: &NodeBase, op: Operation) -> StoreResult<()> {
    let rule = op.rule();
    validate(node, op, &rule)?;
    authorize(node, &rule)
}

/// Locks for `node` in `mode`, with its ancestors under [`LockScope::Chain`].
pub(crate) fn lock_targets(node: &NodeBase, mode: LockMode, scope: LockScope) -> Vec<LockTarget> {
    let mut targets = Vec::new();
    if scope == LockScope::Chain {
        targets.extend(node.ancestors().iter().map(|a| a.lock_target(mode)));
    }
    targets.push(node.lock_target(mode));
    targets
}

/// Acquire `targets` as one set.
pub(crate) fn lock(workspace: &Workspace, targets: Vec<LockTarget>) -> StoreResult<LockSet> {
    LockSet::acquire(targets, workspace.config().lock_timeout())
}

fn validate(node: &NodeBase, op: Operation, rule: &Rule) -> StoreResult<()> {
    if rule.presence == Presence::Absent && !node.is_root() {
        let parent_kind = match node.parent_base() {
            Some(parent) => parent.kind_on_disk()?,
            None => NodeKind::Virtual,
        };
        if !parent_kind.is_dir() {
            return Err(StoreError::invalid_path(format!(
                "parent directory not found: {}",
                node.path()
            )));
        }
    }

    let on_disk = node.kind_on_disk()?;
    match rule.presence {
        Presence::Present if on_disk.is_virtual() || node.kind().is_virtual() => {
            return Err(StoreError::invalid_path(format!(
                "object not found: {}",
                node.path()
            )));
        }
        Presence::Present if !node.kind().is_virtual() && on_disk != node.kind() => {
            return Err(StoreError::invalid_path(format!(
                "{} is a {}, not a {}",
                node.path(),
                on_disk,
                node.kind()
            )));
        }
        Presence::Absent if !on_disk.is_virtual() => {
            return Err(StoreError::invalid_path(format!(
                "object already exists: {}",
                node.path()
            )));
        }
        _ => {}
    }

    if rule.forbid_root && node.is_root() {
        return Err(StoreError::invalid_path(format!("can't {} root node", op)));
    }

    validate_name(node)
}

/// Reject sidecar and lock file extensions and reserved names as the final
/// segment.
pub(crate) fn validate_name(node: &NodeBase) -> StoreResult<()> {
    let basename = path::basename(node.path());
    if basename.is_empty() {
        return Ok(());
    }
    let config = node.workspace().config();
    // a directory named like a sibling's lock file would share its path
    let lock_extension = format!("{}.lock", config.metadata_extension);
    for extension in [
        config.metadata_extension.as_str(),
        config.permission_extension.as_str(),
        lock_extension.as_str(),
    ] {
        if basename.ends_with(extension) {
            return Err(StoreError::invalid_path(format!(
                "extension '{}' is reserved",
                extension
            )));
        }
    }
    if node.workspace().is_reserved_name(basename) {
        return Err(StoreError::invalid_path(format!(
            "filename '{}' is reserved",
            basename
        )));
    }
    Ok(())
}

fn authorize(node: &NodeBase, rule: &Rule) -> StoreResult<()> {
    let subject = match rule.subject {
        Subject::Target => Some(node.clone()),
        Subject::Parent => node.parent_base(),
        Subject::NearestExisting => nearest_existing(node)?,
    };
    match subject {
        Some(subject) => subject.authorize(rule.permission),
        None => Ok(()),
    }
}

/// Closest existing node at or above `node`, typed by what is on disk so
/// the right sidecars are consulted.
fn nearest_existing(node: &NodeBase) -> StoreResult<Option<NodeBase>> {
    let mut current = Some(node.clone());
    while let Some(candidate) = current {
        let on_disk = candidate.kind_on_disk()?;
        if !on_disk.is_virtual() {
            return Ok(Some(candidate.with_kind(on_disk)));
        }
        current = candidate.parent_base();
    }
    Ok(None)
}
