//! Namespace and qualifier scoping helpers.
//!
//! Namespaces are flat: stamping replaces whatever was there, so wrappers
//! do not nest. Qualifiers stack: each wrapper pushes its token to the
//! front, and each child stream pops exactly one token.

use serde::Serialize;

use crate::bus::Dispatcher;
use crate::error::Error;
use crate::marker::{Marker, MarkerKind};
use crate::stream::{ErrorChannel, Stream};

use super::{Action, ActionCreator, Namespace, Qualifier};

/// Routing filters over a stream of actions.
pub trait ActionStreamExt {
    /// Pass actions whose namespace is unset or equal to `namespace`.
    fn with_namespace(&self, namespace: impl Into<Namespace>) -> Stream<Action>;

    /// With `None`, pass only actions that have no namespace. With
    /// `Some(ns)`, pass actions whose namespace is unset or differs from `ns`.
    fn without_namespace(&self, namespace: Option<Namespace>) -> Stream<Action>;

    /// Pass only actions built by `creator`.
    fn of_type<P>(&self, creator: &ActionCreator<P>) -> Stream<Action>;
}

impl ActionStreamExt for Stream<Action> {
    fn with_namespace(&self, namespace: impl Into<Namespace>) -> Stream<Action> {
        let namespace = namespace.into();
        self.filter(move |action| action.in_namespace(&namespace))
    }

    fn without_namespace(&self, namespace: Option<Namespace>) -> Stream<Action> {
        self.filter(move |action| match (&namespace, action.namespace()) {
            (None, own) => own.is_none(),
            (Some(_), None) => true,
            (Some(excluded), Some(own)) => own != excluded,
        })
    }

    fn of_type<P>(&self, creator: &ActionCreator<P>) -> Stream<Action> {
        let action_type = creator.action_type().clone();
        let marker = Marker::named(
            MarkerKind::Action,
            action_type.label(),
            vec![self.marker().cloned()],
        );
        self.filter(move |action| action.is(&action_type))
            .with_marker(Some(marker))
    }
}

/// Creator copy that stamps `namespace`, replacing any existing namespace.
pub fn namespace_action_creator<P>(
    namespace: impl Into<Namespace>,
    creator: &ActionCreator<P>,
) -> ActionCreator<P> {
    creator.with_namespace(namespace.into())
}

/// Dispatcher that stamps `namespace` onto every action before forwarding.
///
/// Wrapping an already namespaced dispatcher does not nest: the wrapper
/// closest to the bus wins.
pub fn namespace_action_dispatcher(
    namespace: impl Into<Namespace>,
    dispatcher: &Dispatcher,
) -> Dispatcher {
    let namespace = namespace.into();
    let inner = dispatcher.clone();
    Dispatcher::new(move |action| inner.dispatch(action.with_namespace(namespace.clone())))
}

/// Creator copy that pushes `token` to the front of the qualifier stack.
pub fn qualify<P>(creator: &ActionCreator<P>, token: impl Into<Qualifier>) -> ActionCreator<P>
where
    P: Serialize + Send + Sync + 'static,
{
    creator.with_qualifier(token.into())
}

/// Dispatcher that pushes `token` onto each action's qualifier stack.
/// Nesting accumulates tokens.
pub fn create_child_dispatcher(dispatcher: &Dispatcher, token: impl Into<Qualifier>) -> Dispatcher {
    let token = token.into();
    let inner = dispatcher.clone();
    Dispatcher::new(move |action| inner.dispatch(action.qualified(token.clone())))
}

/// Stream of actions addressed to `token`, with that token popped.
///
/// Only actions whose qualifier stack head equals `token` pass, with the
/// remaining stack entries in order. Actions addressed to a sibling are
/// dropped. An action with an empty stack reaching a child stream breaks
/// the child's precondition: it is dropped and
/// [`Error::EmptyQualifierStack`] goes to `errors`.
pub fn create_child_action_stream(
    stream: &Stream<Action>,
    token: impl Into<Qualifier>,
    errors: &ErrorChannel,
) -> Stream<Action> {
    let token = token.into();
    let errors = errors.clone();
    stream.filter_map(move |action| match action.strip_qualifier(&token) {
        Ok(stripped) => Some(stripped),
        Err(Error::QualifierMismatch { .. }) => None,
        Err(error) => {
            errors.send(error);
            None
        }
    })
}
