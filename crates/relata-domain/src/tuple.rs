//! Canonical forms for relation tuples, subjects, and tuple filters.
//!
//! Textual forms follow the documented convention
//! `entity_type:entity_id#relation@subject_type:subject_id[#subject_relation]`,
//! with the ellipsis sentinel standing in for a concrete subject.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Terminal sentinel marking a concrete (non-userset) subject in textual
/// tuple forms.
pub const ELLIPSIS: &str = "...";

/// A typed entity reference (e.g. `doc:1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: String,
    pub id: String,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Parses `type:id`.
    pub fn parse(value: &str) -> Result<Self> {
        match value.split_once(':') {
            Some((entity_type, id)) if !entity_type.is_empty() && !id.is_empty() => {
                Ok(Self::new(entity_type, id))
            }
            _ => Err(Error::TypeConversion),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

/// An entity paired with one of its relations (e.g. `doc:1#owner`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityAndRelation {
    pub entity: Entity,
    pub relation: String,
}

impl EntityAndRelation {
    pub fn new(entity: Entity, relation: impl Into<String>) -> Self {
        Self {
            entity,
            relation: relation.into(),
        }
    }
}

impl fmt::Display for EntityAndRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.relation)
    }
}

/// The subject of a relationship: either a concrete member or a userset
/// reference denoting every subject holding `relation` on the entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subject {
    Concrete { subject_type: String, id: String },
    Userset {
        subject_type: String,
        id: String,
        relation: String,
    },
}

impl Subject {
    pub fn concrete(subject_type: impl Into<String>, id: impl Into<String>) -> Self {
        Subject::Concrete {
            subject_type: subject_type.into(),
            id: id.into(),
        }
    }

    pub fn userset(
        subject_type: impl Into<String>,
        id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Subject::Userset {
            subject_type: subject_type.into(),
            id: id.into(),
            relation: relation.into(),
        }
    }

    pub fn subject_type(&self) -> &str {
        match self {
            Subject::Concrete { subject_type, .. } | Subject::Userset { subject_type, .. } => {
                subject_type
            }
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Subject::Concrete { id, .. } | Subject::Userset { id, .. } => id,
        }
    }

    /// The userset relation, if any.
    pub fn relation(&self) -> Option<&str> {
        match self {
            Subject::Concrete { .. } => None,
            Subject::Userset { relation, .. } => Some(relation),
        }
    }

    /// The entity this subject refers to.
    pub fn entity(&self) -> Entity {
        Entity::new(self.subject_type(), self.id())
    }

    /// Parses `type:id`, `type:id#relation`, or `type:id#...`; the
    /// ellipsis and an absent relation both denote a concrete subject.
    pub fn parse(value: &str) -> Result<Self> {
        let (entity_part, relation) = match value.split_once('#') {
            Some((entity, relation)) => (entity, Some(relation)),
            None => (value, None),
        };
        let entity = Entity::parse(entity_part)?;
        match relation {
            None | Some("") | Some(ELLIPSIS) | Some("\u{2026}") => {
                Ok(Subject::concrete(entity.entity_type, entity.id))
            }
            Some(relation) => Ok(Subject::userset(entity.entity_type, entity.id, relation)),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Concrete { subject_type, id } => write!(f, "{}:{}", subject_type, id),
            Subject::Userset {
                subject_type,
                id,
                relation,
            } => write!(f, "{}:{}#{}", subject_type, id, relation),
        }
    }
}

/// A relationship assertion: `entity#relation@subject`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tuple {
    pub entity: Entity,
    pub relation: String,
    pub subject: Subject,
}

impl Tuple {
    pub fn new(entity: Entity, relation: impl Into<String>, subject: Subject) -> Self {
        Self {
            entity,
            relation: relation.into(),
            subject,
        }
    }

    /// Parses the textual form, e.g. `doc:1#owner@user:2` or
    /// `doc:1#parent@folder:1#...`.
    pub fn parse(value: &str) -> Result<Self> {
        let (left, subject_part) = value.split_once('@').ok_or(Error::TypeConversion)?;
        let (entity_part, relation) = left.split_once('#').ok_or(Error::TypeConversion)?;
        if relation.is_empty() {
            return Err(Error::TypeConversion);
        }
        Ok(Self {
            entity: Entity::parse(entity_part)?,
            relation: relation.to_string(),
            subject: Subject::parse(subject_part)?,
        })
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.entity, self.relation, self.subject)
    }
}

/// Entity side of a [`TupleFilter`]; empty fields are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityFilter {
    pub entity_type: String,
    pub ids: Vec<String>,
}

/// Subject side of a [`TupleFilter`]; empty fields are wildcards. A
/// relation of [`ELLIPSIS`] matches only concrete subjects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectFilter {
    pub subject_type: String,
    pub ids: Vec<String>,
    pub relation: String,
}

/// Filter over stored tuples; any empty field is a wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleFilter {
    pub entity: EntityFilter,
    pub relation: String,
    pub subject: SubjectFilter,
}

impl TupleFilter {
    /// Filter selecting tuples of one entity and relation.
    pub fn entity_relation(entity: &Entity, relation: &str) -> Self {
        Self {
            entity: EntityFilter {
                entity_type: entity.entity_type.clone(),
                ids: vec![entity.id.clone()],
            },
            relation: relation.to_string(),
            subject: SubjectFilter::default(),
        }
    }

    /// Tests a tuple against the filter.
    pub fn matches(&self, tuple: &Tuple) -> bool {
        if !self.entity.entity_type.is_empty() && self.entity.entity_type != tuple.entity.entity_type
        {
            return false;
        }
        if !self.entity.ids.is_empty() && !self.entity.ids.contains(&tuple.entity.id) {
            return false;
        }
        if !self.relation.is_empty() && self.relation != tuple.relation {
            return false;
        }
        if !self.subject.subject_type.is_empty()
            && self.subject.subject_type != tuple.subject.subject_type()
        {
            return false;
        }
        if !self.subject.ids.is_empty()
            && !self.subject.ids.iter().any(|id| id == tuple.subject.id())
        {
            return false;
        }
        if !self.subject.relation.is_empty() {
            match tuple.subject.relation() {
                None => {
                    if self.subject.relation != ELLIPSIS {
                        return false;
                    }
                }
                Some(relation) => {
                    if self.subject.relation != relation {
                        return false;
                    }
                }
            }
        }
        true
    }
}

/// Tuples read under one snapshot, in storage order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleCollection {
    tuples: Vec<Tuple>,
}

impl TupleCollection {
    pub fn new(tuples: Vec<Tuple>) -> Self {
        Self { tuples }
    }

    pub fn add(&mut self, tuple: Tuple) {
        self.tuples.push(tuple);
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn tuples(&self) -> &[Tuple] {
        &self.tuples
    }

    pub fn into_iterator(self) -> TupleIterator {
        TupleIterator {
            inner: self.tuples.into_iter(),
        }
    }
}

impl IntoIterator for TupleCollection {
    type Item = Tuple;
    type IntoIter = TupleIterator;

    fn into_iter(self) -> TupleIterator {
        self.into_iterator()
    }
}

/// Owning iterator over a [`TupleCollection`].
#[derive(Debug)]
pub struct TupleIterator {
    inner: std::vec::IntoIter<Tuple>,
}

impl Iterator for TupleIterator {
    type Item = Tuple;

    fn next(&mut self) -> Option<Tuple> {
        self.inner.next()
    }
}
