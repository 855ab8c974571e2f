//! Action creators.
//!
//! A creator is bound to one [`ActionType`] and one payload type. It builds
//! actions and, by its type, keys reducer registrations and stream filters.

use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;

use super::{Action, ActionType, Meta, Namespace, Qualifier, QualifierStack};

/// Builds actions of a single type.
///
/// Scoped copies made by [`namespace_action_creator`](super::namespace_action_creator)
/// and [`qualify`](super::qualify) keep the same [`ActionType`], so reducers
/// registered against the original creator still match.
///
/// # Example
///
/// ```rust
/// use rivulet_core::action::ActionCreator;
///
/// let increment_by = ActionCreator::<i64>::new("increment by");
/// let action = increment_by.create(5);
///
/// assert!(increment_by.matches(&action));
/// assert_eq!(action.payload_as::<i64>(), Some(&5));
/// ```
pub struct ActionCreator<P> {
    action_type: ActionType,
    namespace: Option<Namespace>,
    qualifiers: QualifierStack,
    _payload: PhantomData<fn(P)>,
}

impl<P> ActionCreator<P>
where
    P: Serialize + Send + Sync + 'static,
{
    /// Create a creator with a fresh action type.
    ///
    /// `label` is only used for debugging and serialization.
    pub fn new(label: &str) -> Self {
        Self {
            action_type: ActionType::new(label),
            namespace: None,
            qualifiers: QualifierStack::new(),
            _payload: PhantomData,
        }
    }

    /// Build an action carrying `payload`.
    pub fn create(&self, payload: P) -> Action {
        let meta = Meta {
            namespace: self.namespace.clone(),
            qualifiers: self.qualifiers.clone(),
        };
        Action::from_parts(self.action_type.clone(), payload, meta)
    }
}

impl ActionCreator<()> {
    /// Build a payload-less action.
    pub fn empty(&self) -> Action {
        self.create(())
    }
}

impl<P> ActionCreator<P> {
    /// The type every action this creator builds carries.
    pub fn action_type(&self) -> &ActionType {
        &self.action_type
    }

    /// Check whether `action` was built by this creator (or a scoped copy).
    pub fn matches(&self, action: &Action) -> bool {
        action.is(&self.action_type)
    }

    pub(super) fn with_namespace(&self, namespace: Namespace) -> Self {
        let mut next = self.clone();
        next.namespace = Some(namespace);
        next
    }

    pub(super) fn with_qualifier(&self, token: Qualifier) -> Self {
        let mut next = self.clone();
        next.qualifiers.insert(0, token);
        next
    }
}

impl<P> Clone for ActionCreator<P> {
    fn clone(&self) -> Self {
        Self {
            action_type: self.action_type.clone(),
            namespace: self.namespace.clone(),
            qualifiers: self.qualifiers.clone(),
            _payload: PhantomData,
        }
    }
}

impl<P> fmt::Debug for ActionCreator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionCreator")
            .field("type", &self.action_type)
            .field("namespace", &self.namespace)
            .field("qualifiers", &self.qualifiers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creator_stamps_its_type() {
        let add = ActionCreator::<u32>::new("add");
        let action = add.create(3);
        assert!(add.matches(&action));
        assert_eq!(action.action_type(), add.action_type());
        assert_eq!(action.payload_as::<u32>(), Some(&3));
        assert!(action.payload_as::<i64>().is_none());
    }

    #[test]
    fn empty_creator_has_no_payload() {
        let reset = ActionCreator::<()>::new("reset");
        let action = reset.empty();
        assert!(!action.has_payload());
        assert!(action.meta().qualifiers().is_empty());
    }

    #[test]
    fn scoped_copies_share_type() {
        let add = ActionCreator::<u32>::new("add");
        let scoped = add.with_namespace(Namespace::new("ns"));
        assert!(add.matches(&scoped.create(1)));
    }
}
