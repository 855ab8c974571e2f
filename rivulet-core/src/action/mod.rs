//! Actions
//!
//! An action is an immutable event record travelling over the bus. It
//! carries a type, an optional payload and scoping metadata.
//!
//! # Identity
//!
//! Every [`ActionType`] gets a process-unique id when its creator is built.
//! Two creators with the same debug label are still different types, so
//! reducers and filters keyed by a creator never collide by accident.
//!
//! # Scoping
//!
//! [`Meta`] holds two orthogonal scope tags:
//!
//! - a flat, replaceable [`Namespace`]
//! - a stack of [`Qualifier`] tokens, innermost first, used for nested
//!   per-instance routing
//!
//! # Immutability
//!
//! Fields are private and there are no mutators. Rescoping produces a new
//! action:
//!
//! ```compile_fail
//! use rivulet_core::action::ActionCreator;
//!
//! let creator = ActionCreator::<u32>::new("set");
//! let action = creator.create(1);
//! action.meta = Default::default();
//! ```

mod creator;
mod scope;

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use smallvec::SmallVec;

use crate::error::{Error, Result};

pub use creator::ActionCreator;
pub use scope::{
    create_child_action_stream, create_child_dispatcher, namespace_action_creator,
    namespace_action_dispatcher, qualify, ActionStreamExt,
};

/// Unique identifier of an action type.
///
/// Equality and hashing use the numeric id only; the label is for humans.
#[derive(Clone)]
pub struct ActionType {
    id: u64,
    label: Arc<str>,
}

impl ActionType {
    /// Allocate a new, never-before-seen action type.
    pub fn new(label: &str) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            label: Arc::from(label),
        }
    }

    /// Process-unique numeric id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Human-readable label, for logs and inspection only.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl PartialEq for ActionType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ActionType {}

impl std::hash::Hash for ActionType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.label, self.id)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl Serialize for ActionType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}#{}", self.label, self.id))
    }
}

macro_rules! scope_token {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, PartialEq, Eq, Hash)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Wrap a token string.
            pub fn new(token: &str) -> Self {
                Self(Arc::from(token))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(token: &str) -> Self {
                Self::new(token)
            }
        }

        impl From<String> for $name {
            fn from(token: String) -> Self {
                Self(Arc::from(token))
            }
        }

        impl From<&$name> for $name {
            fn from(token: &$name) -> Self {
                token.clone()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), &*self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }
    };
}

scope_token!(
    /// Flat scope tag. Dispatching under a namespace replaces any previous one.
    Namespace
);

scope_token!(
    /// One level of nested scope. Qualifiers stack; the head is the token
    /// pushed by the wrapper closest to the bus.
    Qualifier
);

/// Qualifier stack storage. Nesting is rarely deeper than a couple of levels.
pub type QualifierStack = SmallVec<[Qualifier; 4]>;

/// Scoping metadata attached to every action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Meta {
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<Namespace>,
    qualifiers: QualifierStack,
}

impl Meta {
    /// The namespace this action was dispatched under, if any.
    pub fn namespace(&self) -> Option<&Namespace> {
        self.namespace.as_ref()
    }

    /// Qualifier tokens, outermost first.
    pub fn qualifiers(&self) -> &[Qualifier] {
        &self.qualifiers
    }
}

/// Type-erased payload plus the encoder captured from the creator that
/// built it.
#[derive(Clone)]
struct Payload {
    value: Arc<dyn Any + Send + Sync>,
    encode: fn(&dyn Any) -> serde_json::Result<serde_json::Value>,
    present: bool,
}

/// An immutable event record.
#[derive(Clone)]
pub struct Action {
    action_type: ActionType,
    payload: Payload,
    meta: Meta,
}

impl Action {
    pub(crate) fn from_parts<P>(action_type: ActionType, payload: P, meta: Meta) -> Self
    where
        P: Serialize + Send + Sync + 'static,
    {
        let present = std::any::TypeId::of::<P>() != std::any::TypeId::of::<()>();
        Self {
            action_type,
            payload: Payload {
                value: Arc::new(payload),
                encode: encode_payload::<P>,
                present,
            },
            meta,
        }
    }

    pub fn action_type(&self) -> &ActionType {
        &self.action_type
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Shorthand for `self.meta().namespace()`.
    pub fn namespace(&self) -> Option<&Namespace> {
        self.meta.namespace.as_ref()
    }

    /// Shorthand for `self.meta().qualifiers()`.
    pub fn qualifiers(&self) -> &[Qualifier] {
        &self.meta.qualifiers
    }

    /// Check whether this action has the given type.
    pub fn is(&self, action_type: &ActionType) -> bool {
        self.action_type == *action_type
    }

    /// Borrow the payload as `P`.
    ///
    /// Returns `None` when the action was built by a creator with a different
    /// payload type.
    pub fn payload_as<P: 'static>(&self) -> Option<&P> {
        self.payload.value.downcast_ref::<P>()
    }

    /// Whether the creator attached a payload (anything other than `()`).
    pub fn has_payload(&self) -> bool {
        self.payload.present
    }

    /// Encode the payload as JSON for inspection tooling.
    pub fn payload_json(&self) -> Result<serde_json::Value> {
        let any: &dyn Any = &*self.payload.value;
        (self.payload.encode)(any).map_err(|error| Error::Payload {
            action: self.action_type.label().to_string(),
            error,
        })
    }

    /// Copy of this action stamped with `namespace`, replacing any existing one.
    pub fn with_namespace(&self, namespace: impl Into<Namespace>) -> Self {
        let mut next = self.clone();
        next.meta.namespace = Some(namespace.into());
        next
    }

    /// Copy of this action with `token` pushed to the front of the qualifier
    /// stack.
    pub fn qualified(&self, token: impl Into<Qualifier>) -> Self {
        let mut next = self.clone();
        next.meta.qualifiers.insert(0, token.into());
        next
    }

    /// Copy of this action with the qualifier stack head removed.
    ///
    /// The head must equal `token`. Stripping from an empty stack is a
    /// protocol violation.
    pub fn strip_qualifier(&self, token: &Qualifier) -> Result<Self> {
        match self.meta.qualifiers.first() {
            None => Err(Error::EmptyQualifierStack(token.clone())),
            Some(head) if head != token => Err(Error::QualifierMismatch {
                expected: token.clone(),
                found: head.clone(),
            }),
            Some(_) => {
                let mut next = self.clone();
                next.meta.qualifiers.remove(0);
                Ok(next)
            }
        }
    }

    /// True when the action has no namespace or carries exactly `namespace`.
    pub fn in_namespace(&self, namespace: &Namespace) -> bool {
        match &self.meta.namespace {
            None => true,
            Some(ns) => ns == namespace,
        }
    }
}

fn encode_payload<P>(value: &dyn Any) -> serde_json::Result<serde_json::Value>
where
    P: Serialize + 'static,
{
    match value.downcast_ref::<P>() {
        Some(payload) => serde_json::to_value(payload),
        None => Ok(serde_json::Value::Null),
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = self
            .payload_json()
            .map(|value| value.to_string())
            .unwrap_or_else(|_| "<unencodable>".to_string());
        f.debug_struct("Action")
            .field("type", &self.action_type)
            .field("payload", &payload)
            .field("meta", &self.meta)
            .finish()
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let fields = if self.payload.present { 3 } else { 2 };
        let mut out = serializer.serialize_struct("Action", fields)?;
        out.serialize_field("type", &self.action_type)?;
        if self.payload.present {
            let payload = self.payload_json().map_err(serde::ser::Error::custom)?;
            out.serialize_field("payload", &payload)?;
        } else {
            out.skip_field("payload")?;
        }
        out.serialize_field("meta", &self.meta)?;
        out.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_types_are_unique_even_with_same_label() {
        let a = ActionType::new("save");
        let b = ActionType::new("save");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(a.label(), "save");
    }

    #[test]
    fn namespace_is_replaced_not_nested() {
        let action = Action::from_parts(ActionType::new("x"), 1u8, Meta::default());
        let first = action.with_namespace("a");
        let second = first.with_namespace("b");
        assert_eq!(first.namespace(), Some(&Namespace::new("a")));
        assert_eq!(second.namespace(), Some(&Namespace::new("b")));
        assert!(action.namespace().is_none());
    }

    #[test]
    fn qualifiers_stack_innermost_first() {
        let action = Action::from_parts(ActionType::new("x"), (), Meta::default());
        let wrapped = action.qualified("inner").qualified("outer");
        let tokens: Vec<_> = wrapped.qualifiers().iter().map(|q| q.as_str()).collect();
        assert_eq!(tokens, vec!["outer", "inner"]);

        let stripped = wrapped.strip_qualifier(&Qualifier::new("outer")).unwrap();
        assert_eq!(stripped.qualifiers(), &[Qualifier::new("inner")]);
    }

    #[test]
    fn strip_qualifier_rejects_empty_and_mismatched_stacks() {
        let action = Action::from_parts(ActionType::new("x"), (), Meta::default());
        let token = Qualifier::new("q");
        assert!(matches!(
            action.strip_qualifier(&token),
            Err(Error::EmptyQualifierStack(_))
        ));

        let other = action.qualified("other");
        assert!(matches!(
            other.strip_qualifier(&token),
            Err(Error::QualifierMismatch { .. })
        ));
    }

    #[test]
    fn in_namespace_accepts_unset_or_equal() {
        let ns = Namespace::new("left");
        let action = Action::from_parts(ActionType::new("x"), (), Meta::default());
        assert!(action.in_namespace(&ns));
        assert!(action.with_namespace("left").in_namespace(&ns));
        assert!(!action.with_namespace("right").in_namespace(&ns));
    }

    #[test]
    fn serializes_payload_and_meta() {
        let action = Action::from_parts(ActionType::new("add"), 5u32, Meta::default())
            .with_namespace("ns")
            .qualified("q");
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["payload"], serde_json::json!(5));
        assert_eq!(json["meta"]["namespace"], serde_json::json!("ns"));
        assert_eq!(json["meta"]["qualifiers"], serde_json::json!(["q"]));
        assert!(json["type"].as_str().unwrap().starts_with("add#"));

        let empty = Action::from_parts(ActionType::new("reset"), (), Meta::default());
        let json = serde_json::to_value(&empty).unwrap();
        assert!(json.get("payload").is_none());
    }
}
