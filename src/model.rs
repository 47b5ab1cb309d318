//! # Data Model
//!
//! Identifiers and the four kinds of clusterable records: items, holdings,
//! equivalence rules, and retention commitments.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use time::Date;
use uuid::Uuid;

/// Work-level catalog identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ocn(pub u64);

impl fmt::Display for Ocn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ocn:{}", self.0)
    }
}

impl From<u64> for Ocn {
    fn from(value: u64) -> Self {
        Ocn(value)
    }
}

/// The set of OCNs one record declares as co-occurring.
pub type Tuple = BTreeSet<Ocn>;

/// Build a tuple from raw identifier values.
pub fn tuple_of<I>(values: I) -> Tuple
where
    I: IntoIterator,
    I::Item: Into<Ocn>,
{
    values.into_iter().map(Into::into).collect()
}

/// Store-assigned cluster identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId(pub u64);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

/// Discriminant for the clusterable record variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Item,
    Holding,
    EquivalenceRule,
    Commitment,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Item => "item",
            RecordKind::Holding => "holding",
            RecordKind::EquivalenceRule => "equivalence_rule",
            RecordKind::Commitment => "commitment",
        }
    }

    /// Whether adding or updating a record of this kind can disconnect a cluster.
    ///
    /// Only items qualify: an item seen again may carry a different tuple than
    /// the copy already attached. Holdings and commitments carry one OCN and
    /// rules only ever add an edge.
    pub fn reclusters_on_attach(self) -> bool {
        matches!(self, RecordKind::Item)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common behaviour of the record kinds stored on a cluster.
pub trait Clusterable: Clone + PartialEq + fmt::Debug {
    /// Identity used to tell "same record, updated" from "new record".
    type Key: Clone + Eq + std::hash::Hash + fmt::Debug;

    const KIND: RecordKind;

    fn key(&self) -> Self::Key;

    fn ocns(&self) -> Tuple;

    /// Key the store indexes this record under for direct lookups.
    fn record_ref(&self) -> RecordRef;
}

/// A digitized catalog item. May carry zero, one, or several OCNs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub item_id: String,
    pub ocns: Tuple,
    pub rights: Option<String>,
    pub access: Option<String>,
    pub collection_code: Option<String>,
}

impl Item {
    pub fn new(item_id: impl Into<String>, ocns: Tuple) -> Self {
        Self {
            item_id: item_id.into(),
            ocns,
            rights: None,
            access: None,
            collection_code: None,
        }
    }

    pub fn with_rights(mut self, rights: impl Into<String>) -> Self {
        self.rights = Some(rights.into());
        self
    }

    pub fn with_access(mut self, access: impl Into<String>) -> Self {
        self.access = Some(access.into());
        self
    }

    pub fn with_collection(mut self, code: impl Into<String>) -> Self {
        self.collection_code = Some(code.into());
        self
    }
}

impl Clusterable for Item {
    type Key = String;
    const KIND: RecordKind = RecordKind::Item;

    fn key(&self) -> String {
        self.item_id.clone()
    }

    fn ocns(&self) -> Tuple {
        self.ocns.clone()
    }

    fn record_ref(&self) -> RecordRef {
        RecordRef::Item(self.item_id.clone())
    }
}

/// Fields that identify a holding across re-submissions by its owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HoldingKey {
    pub ocn: Ocn,
    pub organization: String,
    pub local_id: String,
    pub enum_chron: String,
    pub status: Option<String>,
    pub condition: Option<String>,
    pub mono_multi_serial: Option<String>,
}

/// A member organization's claim to hold a copy of a work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub ocn: Ocn,
    pub organization: String,
    pub local_id: String,
    pub enum_chron: String,
    pub status: Option<String>,
    pub condition: Option<String>,
    pub mono_multi_serial: Option<String>,
    pub date_received: Date,
    /// Owner-scoped uniqueness id.
    pub uuid: Uuid,
}

impl Holding {
    pub fn new(
        ocn: Ocn,
        organization: impl Into<String>,
        local_id: impl Into<String>,
        date_received: Date,
    ) -> Self {
        Self {
            ocn,
            organization: organization.into(),
            local_id: local_id.into(),
            enum_chron: String::new(),
            status: None,
            condition: None,
            mono_multi_serial: None,
            date_received,
            uuid: Uuid::new_v4(),
        }
    }

    pub fn with_enum_chron(mut self, enum_chron: impl Into<String>) -> Self {
        self.enum_chron = enum_chron.into();
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn update_key(&self) -> HoldingKey {
        HoldingKey {
            ocn: self.ocn,
            organization: self.organization.clone(),
            local_id: self.local_id.clone(),
            enum_chron: self.enum_chron.clone(),
            status: self.status.clone(),
            condition: self.condition.clone(),
            mono_multi_serial: self.mono_multi_serial.clone(),
        }
    }
}

impl Clusterable for Holding {
    type Key = HoldingKey;
    const KIND: RecordKind = RecordKind::Holding;

    fn key(&self) -> HoldingKey {
        self.update_key()
    }

    fn ocns(&self) -> Tuple {
        Tuple::from([self.ocn])
    }

    fn record_ref(&self) -> RecordRef {
        RecordRef::Holding(self.uuid)
    }
}

/// Declared alias: `variant` and `canonical` identify the same work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EquivalenceRule {
    pub variant: Ocn,
    pub canonical: Ocn,
}

impl EquivalenceRule {
    pub fn new(variant: Ocn, canonical: Ocn) -> Self {
        Self { variant, canonical }
    }
}

impl Clusterable for EquivalenceRule {
    type Key = (Ocn, Ocn);
    const KIND: RecordKind = RecordKind::EquivalenceRule;

    fn key(&self) -> (Ocn, Ocn) {
        (self.variant, self.canonical)
    }

    fn ocns(&self) -> Tuple {
        Tuple::from([self.variant, self.canonical])
    }

    fn record_ref(&self) -> RecordRef {
        RecordRef::EquivalenceRule(self.variant, self.canonical)
    }
}

/// A retention commitment made by an organization for one copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub id: Uuid,
    pub ocn: Ocn,
    pub organization: String,
    pub local_id: String,
    pub policies: BTreeSet<String>,
    pub committed_date: Date,
    pub deprecation_status: Option<String>,
}

impl Commitment {
    pub fn new(
        ocn: Ocn,
        organization: impl Into<String>,
        local_id: impl Into<String>,
        committed_date: Date,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ocn,
            organization: organization.into(),
            local_id: local_id.into(),
            policies: BTreeSet::new(),
            committed_date,
            deprecation_status: None,
        }
    }

    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policies.insert(policy.into());
        self
    }
}

impl Clusterable for Commitment {
    type Key = Uuid;
    const KIND: RecordKind = RecordKind::Commitment;

    fn key(&self) -> Uuid {
        self.id
    }

    fn ocns(&self) -> Tuple {
        Tuple::from([self.ocn])
    }

    fn record_ref(&self) -> RecordRef {
        RecordRef::Commitment(self.id)
    }
}

/// Direct-lookup key for a record, independent of its cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordRef {
    Item(String),
    Holding(Uuid),
    EquivalenceRule(Ocn, Ocn),
    Commitment(Uuid),
}

impl RecordRef {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordRef::Item(_) => RecordKind::Item,
            RecordRef::Holding(_) => RecordKind::Holding,
            RecordRef::EquivalenceRule(..) => RecordKind::EquivalenceRule,
            RecordRef::Commitment(_) => RecordKind::Commitment,
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordRef::Item(id) => write!(f, "item:{id}"),
            RecordRef::Holding(uuid) => write!(f, "holding:{uuid}"),
            RecordRef::EquivalenceRule(variant, canonical) => {
                write!(f, "rule:{}->{}", variant.0, canonical.0)
            }
            RecordRef::Commitment(id) => write!(f, "commitment:{id}"),
        }
    }
}

/// Any record that can be attached to a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterableRecord {
    Item(Item),
    Holding(Holding),
    EquivalenceRule(EquivalenceRule),
    Commitment(Commitment),
}

impl ClusterableRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            ClusterableRecord::Item(_) => RecordKind::Item,
            ClusterableRecord::Holding(_) => RecordKind::Holding,
            ClusterableRecord::EquivalenceRule(_) => RecordKind::EquivalenceRule,
            ClusterableRecord::Commitment(_) => RecordKind::Commitment,
        }
    }

    pub fn ocns(&self) -> Tuple {
        match self {
            ClusterableRecord::Item(record) => record.ocns(),
            ClusterableRecord::Holding(record) => record.ocns(),
            ClusterableRecord::EquivalenceRule(record) => record.ocns(),
            ClusterableRecord::Commitment(record) => record.ocns(),
        }
    }

    pub fn record_ref(&self) -> RecordRef {
        match self {
            ClusterableRecord::Item(record) => record.record_ref(),
            ClusterableRecord::Holding(record) => record.record_ref(),
            ClusterableRecord::EquivalenceRule(record) => record.record_ref(),
            ClusterableRecord::Commitment(record) => record.record_ref(),
        }
    }
}

impl From<Item> for ClusterableRecord {
    fn from(record: Item) -> Self {
        ClusterableRecord::Item(record)
    }
}

impl From<Holding> for ClusterableRecord {
    fn from(record: Holding) -> Self {
        ClusterableRecord::Holding(record)
    }
}

impl From<EquivalenceRule> for ClusterableRecord {
    fn from(record: EquivalenceRule) -> Self {
        ClusterableRecord::EquivalenceRule(record)
    }
}

impl From<Commitment> for ClusterableRecord {
    fn from(record: Commitment) -> Self {
        ClusterableRecord::Commitment(record)
    }
}
