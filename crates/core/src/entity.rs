//! Child entities: identity owned by an aggregate.

/// A record with its own identity that only exists under a parent aggregate
/// (a defect or measurement under its inspection).
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;
    type Parent: Copy + Eq + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// The aggregate this record belongs to.
    fn parent(&self) -> Self::Parent;
}

/// The children of `parent`, in their original order.
pub fn children_of<'a, E>(
    items: impl IntoIterator<Item = &'a E>,
    parent: E::Parent,
) -> impl Iterator<Item = &'a E>
where
    E: Entity + 'a,
{
    items.into_iter().filter(move |e| e.parent() == parent)
}
