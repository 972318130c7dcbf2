//! Permission sidecars and evaluation.
//!
//! ```json
//! {
//!   "users": {
//!     "foo": {"read": true, "write": true},
//!     "org": {"read": true, "bar": {"write": false}}
//!   },
//!   "guest": {"read": false}
//! }
//! ```
//!
//! `users` nests one level per component of a composite identifier, so
//! `["org", "bar"]` reads `users.org.bar`. A level may hold both permission
//! flags and deeper identifiers. The superuser is never stored here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::attachment::Sidecar;
use crate::error::{StoreError, StoreResult};
use crate::node::NodeBase;
use crate::types::PermissionSet;
use crate::user::{Identifier, User};

/// Permission record as stored in a `.perm` sidecar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionRecord {
    #[serde(default)]
    pub users: Map<String, Value>,
    #[serde(default)]
    pub guest: PermissionSet,
}

impl PermissionRecord {
    /// Record for a node created by `creator`.
    ///
    /// The creator's canonical identifier gets `owner_permission` unless the
    /// creator is the superuser or the guest.
    pub fn initial(creator: &User, owner_permission: &PermissionSet, guest: &PermissionSet) -> Self {
        let mut record = Self {
            users: Map::new(),
            guest: guest.clone(),
        };
        if !(creator.is_superuser() || creator.is_guest()) {
            let entry = nested_entry(&mut record.users, creator.identifier().components());
            if let Some(entry) = entry {
                for (name, value) in owner_permission {
                    entry.insert(name.clone(), Value::Bool(*value));
                }
            }
        }
        record
    }

    /// Explicit value of `permission` for exactly `identifier`.
    pub fn lookup(&self, identifier: &Identifier, permission: &str) -> Option<bool> {
        let entry = find_entry(&self.users, identifier.components())?;
        entry.get(permission).and_then(Value::as_bool)
    }

    /// Evaluate `permission` for `user`.
    ///
    /// The chain is walked from the canonical identifier back to the
    /// broadest; the first explicit entry decides. Otherwise the guest
    /// bucket decides, and a missing guest entry denies.
    pub fn allows(&self, user: &User, permission: &str) -> bool {
        if user.is_superuser() {
            return true;
        }
        user.identifiers()
            .iter()
            .rev()
            .find_map(|identifier| self.lookup(identifier, permission))
            .unwrap_or_else(|| self.guest.get(permission).copied().unwrap_or(false))
    }

    /// Merge `values` into the entry of `identifier`. Returns false when
    /// there was nothing to merge.
    pub fn set(&mut self, identifier: &Identifier, values: &PermissionSet) -> StoreResult<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        let entry = nested_entry(&mut self.users, identifier.components()).ok_or_else(|| {
            StoreError::invalid_identifier(format!(
                "{} collides with a permission flag",
                identifier
            ))
        })?;
        for (name, value) in values {
            entry.insert(name.clone(), Value::Bool(*value));
        }
        Ok(true)
    }

    /// Remove `names` from the entry of `identifier` and prune branches
    /// left empty. Returns false when the identifier had no entry.
    pub fn unset(&mut self, identifier: &Identifier, names: &[String]) -> bool {
        let components = identifier.components();
        let Some(entry) = find_entry_mut(&mut self.users, components) else {
            return false;
        };
        for name in names {
            entry.remove(name);
        }
        sweep(&mut self.users, components);
        true
    }
}

/// Walk (creating as needed) to the entry of `components`.
///
/// `None` if a component is already used by a non-object value.
fn nested_entry<'a>(
    mut map: &'a mut Map<String, Value>,
    components: &[String],
) -> Option<&'a mut Map<String, Value>> {
    for component in components {
        map = map
            .entry(component.clone())
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()?;
    }
    Some(map)
}

fn find_entry<'a>(map: &'a Map<String, Value>, components: &[String]) -> Option<&'a Map<String, Value>> {
    let (first, rest) = components.split_first()?;
    let next = map.get(first)?.as_object()?;
    if rest.is_empty() {
        Some(next)
    } else {
        find_entry(next, rest)
    }
}

fn find_entry_mut<'a>(
    map: &'a mut Map<String, Value>,
    components: &[String],
) -> Option<&'a mut Map<String, Value>> {
    let (first, rest) = components.split_first()?;
    let next = map.get_mut(first)?.as_object_mut()?;
    if rest.is_empty() {
        Some(next)
    } else {
        find_entry_mut(next, rest)
    }
}

/// Drop empty objects along `components`, deepest first.
fn sweep(map: &mut Map<String, Value>, components: &[String]) {
    let Some((first, rest)) = components.split_first() else {
        return;
    };
    let empty = match map.get_mut(first).and_then(Value::as_object_mut) {
        Some(next) => {
            sweep(next, rest);
            next.is_empty()
        }
        None => false,
    };
    if empty {
        map.remove(first);
    }
}

/// Permission sidecar of one node.
#[derive(Debug)]
pub(crate) struct Permission {
    node: NodeBase,
    sidecar: Sidecar<PermissionRecord>,
}

impl Permission {
    pub(crate) fn new(node: &NodeBase) -> Self {
        Self {
            sidecar: Sidecar::new(node.workspace().clone(), node.permission_path()),
            node: node.clone(),
        }
    }

    fn initial(node: &NodeBase) -> PermissionRecord {
        let workspace = node.workspace();
        PermissionRecord::initial(
            workspace.user(),
            &node.initial_permission(),
            &workspace.config().default_guest_permission,
        )
    }

    pub(crate) fn data(&mut self) -> StoreResult<&mut PermissionRecord> {
        let node = &self.node;
        self.sidecar.data_or_init(|| Ok(Self::initial(node)))
    }

    /// Whether the acting user holds `permission` here.
    pub(crate) fn allow(&mut self, permission: &str) -> StoreResult<bool> {
        let user = self.node.workspace().user().clone();
        Ok(self.data()?.allows(&user, permission))
    }

    pub(crate) fn create(&mut self) -> StoreResult<()> {
        self.sidecar.set(Self::initial(&self.node));
        self.sidecar.save()
    }

    pub(crate) fn set(&mut self, identifier: &Identifier, values: &PermissionSet) -> StoreResult<()> {
        if self.data()?.set(identifier, values)? {
            self.sidecar.save()?;
        }
        Ok(())
    }

    pub(crate) fn unset(&mut self, identifier: &Identifier, names: &[String]) -> StoreResult<()> {
        if self.data()?.unset(identifier, names) {
            self.sidecar.save()?;
        }
        Ok(())
    }

    pub(crate) fn delete(&mut self) -> StoreResult<()> {
        self.sidecar.delete(self.node.is_dir_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::types::{CHMOD, READ, WRITE, permission_set};

    fn config() -> StoreConfig {
        StoreConfig::default()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_initial_grants_creator() {
        let config = config();
        let foo = User::new(["foo"], &config).unwrap();
        let record = PermissionRecord::initial(
            &foo,
            &config.default_owner_permission,
            &permission_set([(READ, true)]),
        );
        assert_eq!(record.lookup(&Identifier::from("foo"), CHMOD), Some(true));
        assert_eq!(record.guest.get(READ), Some(&true));
    }

    #[test]
    fn test_initial_nests_composite_creator() {
        let config = config();
        let user = User::new([Identifier::composite(["org", "foo"])], &config).unwrap();
        let record =
            PermissionRecord::initial(&user, &permission_set([(READ, true)]), &PermissionSet::new());
        assert_eq!(
            serde_json::to_value(&record.users).unwrap(),
            serde_json::json!({"org": {"foo": {"read": true}}})
        );
    }

    #[test]
    fn test_initial_skips_special_users() {
        let config = config();
        for user in [User::superuser(&config), User::guest(&config)] {
            let record = PermissionRecord::initial(
                &user,
                &config.default_owner_permission,
                &PermissionSet::new(),
            );
            assert!(record.users.is_empty());
        }
    }

    #[test]
    fn test_precedence_walks_chain_backwards() {
        let config = config();
        let mut record = PermissionRecord::default();
        record
            .set(&Identifier::from("a"), &permission_set([(READ, true)]))
            .unwrap();
        record.guest = permission_set([(READ, false), (WRITE, true)]);

        let ab = User::new(["a", "b"], &config).unwrap();
        assert!(record.allows(&ab, READ));

        let c = User::new(["c"], &config).unwrap();
        assert!(!record.allows(&c, READ));
        assert!(record.allows(&c, WRITE));

        // the most specific entry wins even when it denies
        record
            .set(&Identifier::from("b"), &permission_set([(READ, false)]))
            .unwrap();
        assert!(!record.allows(&ab, READ));
    }

    #[test]
    fn test_superuser_ignores_data() {
        let config = config();
        let record = PermissionRecord::default();
        assert!(record.allows(&User::superuser(&config), CHMOD));
        assert!(!record.allows(&User::guest(&config), READ));
    }

    #[test]
    fn test_composite_lookup_descends() {
        let config = config();
        let mut record = PermissionRecord::default();
        let org_bar = Identifier::composite(["org", "bar"]);
        record
            .set(&org_bar, &permission_set([(WRITE, true)]))
            .unwrap();
        record
            .set(&Identifier::from("org"), &permission_set([(READ, true)]))
            .unwrap();

        let user = User::new([Identifier::from("org"), org_bar.clone()], &config).unwrap();
        assert!(record.allows(&user, WRITE));
        // falls back to the broader "org" entry
        assert!(record.allows(&user, READ));
        assert_eq!(record.lookup(&Identifier::from("bar"), WRITE), None);
    }

    #[test]
    fn test_unset_sweeps_empty_branches() {
        let mut record = PermissionRecord::default();
        let id = Identifier::composite(["org", "team", "bar"]);
        record.set(&id, &permission_set([(READ, true)])).unwrap();
        record
            .set(&Identifier::from("keep"), &permission_set([(READ, true)]))
            .unwrap();

        assert!(record.unset(&id, &names(&[READ])));
        assert_eq!(
            serde_json::to_value(&record.users).unwrap(),
            serde_json::json!({"keep": {"read": true}})
        );
        assert!(!record.unset(&id, &names(&[READ])));
    }

    #[test]
    fn test_unset_keeps_sibling_flags() {
        let mut record = PermissionRecord::default();
        let org = Identifier::from("org");
        let org_bar = Identifier::composite(["org", "bar"]);
        record.set(&org, &permission_set([(READ, true)])).unwrap();
        record.set(&org_bar, &permission_set([(WRITE, true)])).unwrap();

        record.unset(&org_bar, &names(&[WRITE]));
        assert_eq!(
            serde_json::to_value(&record.users).unwrap(),
            serde_json::json!({"org": {"read": true}})
        );
    }

    #[test]
    fn test_set_empty_is_noop() {
        let mut record = PermissionRecord::default();
        assert!(!record.set(&Identifier::from("a"), &PermissionSet::new()).unwrap());
        assert!(record.users.is_empty());
    }

    #[test]
    fn test_set_rejects_flag_collision() {
        let mut record = PermissionRecord::default();
        record
            .set(&Identifier::from("org"), &permission_set([(READ, true)]))
            .unwrap();
        let result = record.set(
            &Identifier::composite(["org", "read"]),
            &permission_set([(WRITE, true)]),
        );
        assert!(matches!(result, Err(StoreError::InvalidIdentifier(_))));
    }
}
