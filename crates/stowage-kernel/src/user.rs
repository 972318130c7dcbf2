//! Acting identities.
//!
//! A [`User`] carries an ordered identifier chain. The last entry is the
//! canonical identifier; earlier entries are broader identities (a group,
//! an organization) consulted when the canonical one has no explicit
//! permission entry.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};

/// A flat identifier or a composite (namespaced) one such as `[group, user]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Flat(String),
    Composite(Vec<String>),
}

impl Identifier {
    /// Build from components; a single component collapses to [`Identifier::Flat`].
    pub fn composite<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut components: Vec<String> = components.into_iter().map(Into::into).collect();
        if components.len() == 1 {
            if let Some(only) = components.pop() {
                return Identifier::Flat(only);
            }
        }
        Identifier::Composite(components)
    }

    /// Components in lookup order, one per nesting level.
    pub fn components(&self) -> &[String] {
        match self {
            Identifier::Flat(id) => std::slice::from_ref(id),
            Identifier::Composite(ids) => ids,
        }
    }

    /// Check every component against the naming rules.
    pub fn validate(&self, config: &StoreConfig) -> StoreResult<()> {
        if self.components().is_empty() {
            return Err(StoreError::invalid_identifier("composite identifier is empty"));
        }
        self.components()
            .iter()
            .try_for_each(|component| validate_component(component, config))
    }
}

fn validate_component(component: &str, config: &StoreConfig) -> StoreResult<()> {
    if component.is_empty() {
        return Err(StoreError::invalid_identifier("identifier is empty"));
    }
    if component.contains('/') {
        return Err(StoreError::invalid_identifier(format!(
            "{} includes '/'",
            component
        )));
    }
    if component == config.superuser_identifier {
        return Err(StoreError::invalid_identifier(format!(
            "{} is reserved for superuser",
            component
        )));
    }
    if component == config.guest_identifier {
        return Err(StoreError::invalid_identifier(format!(
            "{} is reserved for guest",
            component
        )));
    }
    Ok(())
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Flat(id) => f.write_str(id),
            Identifier::Composite(ids) => write!(f, "[{}]", ids.join(", ")),
        }
    }
}

impl From<&str> for Identifier {
    fn from(id: &str) -> Self {
        Identifier::Flat(id.to_string())
    }
}

impl From<String> for Identifier {
    fn from(id: String) -> Self {
        Identifier::Flat(id)
    }
}

impl From<Vec<String>> for Identifier {
    fn from(ids: Vec<String>) -> Self {
        Identifier::composite(ids)
    }
}

impl From<Vec<&str>> for Identifier {
    fn from(ids: Vec<&str>) -> Self {
        Identifier::composite(ids)
    }
}

/// Which special treatment an identity gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum UserKind {
    Regular,
    /// Passes every permission check.
    Superuser,
    /// Only sees the guest bucket.
    Guest,
}

/// The actor on whose behalf workspace operations run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    identifiers: Vec<Identifier>,
    kind: UserKind,
}

impl User {
    /// A regular user with a validated identifier chain.
    pub fn new<I, T>(identifiers: I, config: &StoreConfig) -> StoreResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<Identifier>,
    {
        let identifiers: Vec<Identifier> = identifiers.into_iter().map(Into::into).collect();
        if identifiers.is_empty() {
            return Err(StoreError::invalid_identifier("identifier(s) required"));
        }
        for identifier in &identifiers {
            identifier.validate(config)?;
        }
        Ok(Self {
            identifiers,
            kind: UserKind::Regular,
        })
    }

    /// The superuser.
    pub fn superuser(config: &StoreConfig) -> Self {
        Self {
            identifiers: vec![Identifier::Flat(config.superuser_identifier.clone())],
            kind: UserKind::Superuser,
        }
    }

    /// The guest.
    pub fn guest(config: &StoreConfig) -> Self {
        Self {
            identifiers: vec![Identifier::Flat(config.guest_identifier.clone())],
            kind: UserKind::Guest,
        }
    }

    /// Whole chain, broadest first.
    pub fn identifiers(&self) -> &[Identifier] {
        &self.identifiers
    }

    /// Canonical identifier (the last chain entry).
    pub fn identifier(&self) -> &Identifier {
        // new() rejects empty chains and the special constructors build one entry
        &self.identifiers[self.identifiers.len() - 1]
    }

    pub fn kind(&self) -> UserKind {
        self.kind
    }

    pub fn is_superuser(&self) -> bool {
        self.kind == UserKind::Superuser
    }

    pub fn is_guest(&self) -> bool {
        self.kind == UserKind::Guest
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chain: Vec<String> = self.identifiers.iter().map(|id| id.to_string()).collect();
        write!(f, "{}", chain.join(" > "))
    }
}
