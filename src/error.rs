//! Error types.
//!
//! Only structural problems surface as [`Result`] errors. Attach conflicts, expression failures and promise correlation misses
//! degrade gracefully and are merely logged.

use crate::tree::NodeId;
use thiserror::Error;

/// The state tree and DOM disagree in a way the protocol doesn't allow. Aborts the current bind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BindError {
	#[error("no binding strategy is applicable to state node {node}")]
	NoApplicableStrategy { node: NodeId },
	#[error("more than one binding strategy is applicable to state node {node}")]
	AmbiguousStrategy { node: NodeId },
	#[error("state node {node} has tag `{expected}` but the DOM element is `{actual}`")]
	TagMismatch { node: NodeId, expected: String, actual: String },
	#[error("state node {node} has no tag to create an element for")]
	MissingTag { node: NodeId },
	#[error("the `{name}` attribute of state node {node} has an unsupported structured value")]
	UnsupportedAttributeValue { node: NodeId, name: String },
	#[error("state node {node} has no DOM node to bind")]
	MissingDomNode { node: NodeId },
	#[error("the binder was dropped")]
	BinderDropped,
}

/// Parsing or evaluating an event data expression failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExpressionError {
	#[error("unexpected {found} at offset {offset} in `{expression}`")]
	Syntax { expression: String, offset: usize, found: String },
	#[error("unknown identifier `{0}`")]
	UnknownIdentifier(String),
	#[error("cannot read `{member}` of null or undefined")]
	NullMember { member: String },
	#[error("no element is in scope")]
	NoElement,
}

/// Invoking a `$server` method failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
	#[error("`{0}` is not a server method of this element")]
	UnknownMethod(String),
	#[error("the element's state node is gone")]
	Detached,
}
