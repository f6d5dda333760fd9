use derive_more::Display;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

///
/// Reserved presentation-model types
///
/// Models carrying one of these types are protocol meta-models; the event
/// dispatcher never materializes beans for them.
///

/// Type-registration meta-model (wire schema handshake).
pub const BEAN_SCHEMA_TYPE: &str = "@remodel/bean-schema";
/// Controller action call expressed as a presentation model.
pub const ACTION_CALL_TYPE: &str = "@remodel/action-call";
/// One-shot internal attribute exchange.
pub const INTERNAL_ATTRIBUTES_TYPE: &str = "@remodel/internal-attributes";
/// List splice meta-model.
pub const LIST_SPLICE_TYPE: &str = "@remodel/list-splice";

///
/// SystemId
///
/// Identity of one peer. Used to tell locally-originated changes from
/// remotely-originated ones.
///

#[derive(Clone, Debug, Display, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct SystemId(String);

impl SystemId {
    /// Generate a fresh peer identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

///
/// ModelId
///

#[derive(Clone, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct ModelId(String);

impl ModelId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

///
/// AttributeId
///

#[derive(Clone, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct AttributeId(String);

impl AttributeId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

///
/// ClassId
///
/// Small integer assigned during the type-registration handshake. Stable
/// only for the lifetime of one connection, never across reconnects.
///

#[derive(
    Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub struct ClassId(pub u32);

///
/// BeanHandle
///
/// Opaque arena handle for one managed bean. Identity-keyed maps from the
/// source design become handle-keyed maps here.
///

#[derive(
    Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub struct BeanHandle(pub u64);

///
/// Source
///
/// Tag distinguishing whether a change originated from this side's own
/// mutation (`Local`) or from an applied remote command (`Remote`).
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Source {
    Local,
    Remote,
}

///
/// IdGenerator
///
/// Generates model and attribute ids. Every id carries the generator's ULID
/// prefix, which origin-tags it: ids minted by this peer share the prefix,
/// ids minted by the remote peer never do.
///

#[derive(Debug)]
pub struct IdGenerator {
    prefix: String,
    seq: u64,
}

impl IdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            prefix: Ulid::new().to_string(),
            seq: 0,
        }
    }

    /// Seed the prefix explicitly (deterministic ids for tests).
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            seq: 0,
        }
    }

    fn next(&mut self) -> String {
        self.seq += 1;
        format!("{}-{}", self.prefix, self.seq)
    }

    pub fn next_model_id(&mut self) -> ModelId {
        ModelId::new(self.next())
    }

    pub fn next_attribute_id(&mut self) -> AttributeId {
        AttributeId::new(self.next())
    }

    /// Controller instance ids share the origin-tagged id space.
    pub fn next_controller_id(&mut self) -> String {
        self.next()
    }

    /// True when `id` was minted by this generator.
    #[must_use]
    pub fn is_local(&self, id: &str) -> bool {
        id.strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_origin_tagged() {
        let mut ids = IdGenerator::with_prefix("peer");
        let a = ids.next_model_id();
        let b = ids.next_model_id();

        assert_ne!(a, b, "sequential ids must differ");
        assert!(ids.is_local(a.as_str()));
        assert!(ids.is_local(b.as_str()));
    }

    #[test]
    fn foreign_ids_are_not_local() {
        let ids = IdGenerator::with_prefix("peer");
        assert!(!ids.is_local("other-1"));
        assert!(!ids.is_local("peer1"), "prefix match must be exact");
    }

    #[test]
    fn fresh_generators_use_distinct_prefixes() {
        let mut a = IdGenerator::new();
        let b = IdGenerator::new();
        assert!(!b.is_local(a.next_model_id().as_str()));
    }
}
