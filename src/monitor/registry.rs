use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{InstanceId, Style, SubjectKind};

/// Outcome of registering an instance under a subject kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// First time this instance is seen.
    New,
    /// Already known under the same kind.
    Known,
    /// Already owned by another kind; nothing changed.
    Conflict(SubjectKind),
    /// The kind was not declared when the group started.
    UnknownKind,
    /// The operation is not part of the kind's style. Only produced by
    /// the correlator, which checks before registering.
    Unsupported,
}

impl Registration {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::New | Self::Known)
    }
}

#[derive(Debug)]
struct KindEntry {
    style: Style,
    instances: BTreeSet<InstanceId>,
}

/// Subject kind → instances seen so far. Grows for the whole session;
/// dead instances stay listed and simply stop producing activity.
#[derive(Debug, Default)]
pub struct SubjectRegistry {
    kinds: BTreeMap<SubjectKind, KindEntry>,
    owners: HashMap<InstanceId, SubjectKind>,
}

impl SubjectRegistry {
    /// Declare the kinds this registry accepts instances for.
    pub fn new(kinds: impl IntoIterator<Item = (SubjectKind, Style)>) -> Self {
        let kinds = kinds
            .into_iter()
            .map(|(kind, style)| {
                (
                    kind,
                    KindEntry {
                        style,
                        instances: BTreeSet::new(),
                    },
                )
            })
            .collect();
        Self {
            kinds,
            owners: HashMap::new(),
        }
    }

    /// Idempotent insert. An instance belongs to exactly one kind, so a
    /// registration under a second kind is refused.
    pub fn register(&mut self, kind: &SubjectKind, instance: &InstanceId) -> Registration {
        if let Some(owner) = self.owners.get(instance) {
            return if owner == kind {
                Registration::Known
            } else {
                Registration::Conflict(owner.clone())
            };
        }

        let Some(entry) = self.kinds.get_mut(kind) else {
            return Registration::UnknownKind;
        };
        entry.instances.insert(instance.clone());
        self.owners.insert(instance.clone(), kind.clone());
        Registration::New
    }

    /// Instances of `kind` in ascending order.
    pub fn instances_of<'a>(
        &'a self,
        kind: &SubjectKind,
    ) -> impl Iterator<Item = &'a InstanceId> + 'a {
        self.kinds
            .get(kind)
            .into_iter()
            .flat_map(|entry| entry.instances.iter())
    }

    /// Every declared kind with its style, in ascending kind order.
    pub fn kinds(&self) -> impl Iterator<Item = (&SubjectKind, Style)> {
        self.kinds.iter().map(|(kind, entry)| (kind, entry.style))
    }

    pub fn style_of(&self, kind: &SubjectKind) -> Option<Style> {
        self.kinds.get(kind).map(|entry| entry.style)
    }

    pub fn kind_of(&self, instance: &InstanceId) -> Option<&SubjectKind> {
        self.owners.get(instance)
    }

    pub fn instance_count(&self) -> usize {
        self.owners.len()
    }
}
