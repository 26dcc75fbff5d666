use super::EntityDescriptor;
use crate::filter::Predicate;

/// How many related rows one primary row joins to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// Static declaration of a joined entity.
///
/// The join is `target.foreign_key = primary.local_key`.
#[derive(Debug, Clone)]
pub struct RelationDescriptor {
    pub alias: &'static str,
    /// Resolved lazily so entities may reference each other
    pub target: fn() -> &'static EntityDescriptor,
    pub local_key: &'static str,
    pub foreign_key: &'static str,
    pub cardinality: Cardinality,
    /// Primary rows without a matching related row are excluded
    pub required: bool,
    /// Restricts which related rows participate in the join
    pub extra_filter: Option<Predicate>,
}

impl RelationDescriptor {
    /// The primary row holds `local_key` pointing at `target.id`
    pub fn belongs_to(
        alias: &'static str,
        target: fn() -> &'static EntityDescriptor,
        local_key: &'static str,
    ) -> Self {
        Self {
            alias,
            target,
            local_key,
            foreign_key: super::ID,
            cardinality: Cardinality::One,
            required: false,
            extra_filter: None,
        }
    }

    /// The target holds `foreign_key` pointing at the primary row's id
    pub fn has_one(
        alias: &'static str,
        target: fn() -> &'static EntityDescriptor,
        foreign_key: &'static str,
    ) -> Self {
        Self {
            alias,
            target,
            local_key: super::ID,
            foreign_key,
            cardinality: Cardinality::One,
            required: false,
            extra_filter: None,
        }
    }

    pub fn has_many(
        alias: &'static str,
        target: fn() -> &'static EntityDescriptor,
        foreign_key: &'static str,
    ) -> Self {
        Self { cardinality: Cardinality::Many, ..Self::has_one(alias, target, foreign_key) }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn filtered(mut self, predicate: Predicate) -> Self {
        self.extra_filter = Some(predicate);
        self
    }

    pub fn target(&self) -> &'static EntityDescriptor {
        (self.target)()
    }
}
