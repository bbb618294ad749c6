//! Entity trait: identity that survives state changes.

/// Something addressed by a stable id (locations, suppliers, reasons).
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
