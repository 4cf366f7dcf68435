//! Event data expressions.
//!
//! The server declares which data to send along with an event as small expressions over `event` and `element`,
//! like `event.key` or `element.value`. [`ExpressionEvaluator`] is the pluggable seam; [`SimpleEvaluator`] implements a safe subset:
//!
//! * literals: numbers, single- or double-quoted strings, `true`, `false`, `null`, `undefined`,
//! * the roots `event` and `element`,
//! * member access `a.b` and `a['b']`,
//! * unary `!` and `-`,
//! * binary `===`, `!==`, `==`, `!=`, `<`, `<=`, `>`, `>=`, `&&` and `||` with the usual precedence,
//! * parentheses.
//!
//! On DOM nodes, `parentNode`, `parentElement`, `tagName`, `localName` and `id` are structural. Any other member reads the DOM property.

use crate::{
	dom::{DomEvent, DomHost, DomId, NodeKind},
	error::ExpressionError,
};
use core::cell::RefCell;
use hashbrown::HashMap;
use serde_json::{Map, Number, Value};
use std::rc::Rc;
use tracing::{debug, trace};

/// The result of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
	Json(Value),
	Node(DomId),
	Event,
}
impl ExprValue {
	const NULL: Self = Self::Json(Value::Null);

	/// Converts this value into event data. The `event` object is expanded, DOM nodes become `null`.
	#[must_use]
	pub fn into_json(self, scope: &ExpressionScope<'_>) -> Value {
		match self {
			ExprValue::Json(value) => value,
			ExprValue::Node(_) => Value::Null,
			ExprValue::Event => scope.event.map_or(Value::Null, |event| {
				let mut object = event.properties.clone();
				object.insert("type".to_owned(), Value::String(event.event_type.clone()));
				Value::Object(object)
			}),
		}
	}

	#[must_use]
	pub fn is_truthy(&self) -> bool {
		match self {
			ExprValue::Json(value) => truthy(value),
			ExprValue::Node(_) | ExprValue::Event => true,
		}
	}
}

/// What an expression can see.
#[derive(Clone, Copy)]
pub struct ExpressionScope<'a> {
	pub event: Option<&'a DomEvent>,
	pub element: Option<DomId>,
	pub host: &'a dyn DomHost,
}
impl core::fmt::Debug for ExpressionScope<'_> {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("ExpressionScope").field("event", &self.event).field("element", &self.element).finish()
	}
}

/// Evaluates event data expressions.
pub trait ExpressionEvaluator {
	/// # Errors
	///
	/// Iff `expression` is malformed or its evaluation fails.
	fn evaluate(&self, expression: &str, scope: &ExpressionScope<'_>) -> Result<ExprValue, ExpressionError>;
}

/// The built-in [`ExpressionEvaluator`], caching compiled expressions.
#[derive(Debug, Default)]
pub struct SimpleEvaluator {
	cache: RefCell<HashMap<String, Rc<Expr>>>,
}
impl SimpleEvaluator {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// # Errors
	///
	/// Iff `expression` is not in the supported subset.
	pub fn compile(&self, expression: &str) -> Result<Rc<Expr>, ExpressionError> {
		if let Some(compiled) = self.cache.borrow().get(expression) {
			return Ok(Rc::clone(compiled));
		}
		let compiled = Rc::new(Parser::new(expression)?.parse()?);
		trace!(expression, "Compiled expression.");
		self.cache.borrow_mut().insert(expression.to_owned(), Rc::clone(&compiled));
		Ok(compiled)
	}

	#[must_use]
	pub fn cached_count(&self) -> usize {
		self.cache.borrow().len()
	}
}
impl ExpressionEvaluator for SimpleEvaluator {
	fn evaluate(&self, expression: &str, scope: &ExpressionScope<'_>) -> Result<ExprValue, ExpressionError> {
		self.compile(expression)?.evaluate(scope)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
	Not,
	Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
	StrictEq,
	StrictNe,
	LooseEq,
	LooseNe,
	Lt,
	Le,
	Gt,
	Ge,
	And,
	Or,
}

/// A compiled expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
	Literal(Value),
	Event,
	Element,
	Member(Box<Expr>, Box<Expr>),
	Unary(UnaryOp, Box<Expr>),
	Binary(BinaryOp, Box<Expr>, Box<Expr>),
}
impl Expr {
	/// # Errors
	///
	/// Iff a member of `null` or `undefined` is accessed or `element` is not in scope.
	pub fn evaluate(&self, scope: &ExpressionScope<'_>) -> Result<ExprValue, ExpressionError> {
		Ok(match self {
			Expr::Literal(value) => ExprValue::Json(value.clone()),
			Expr::Event => scope.event.map_or(ExprValue::NULL, |_| ExprValue::Event),
			Expr::Element => ExprValue::Node(scope.element.ok_or(ExpressionError::NoElement)?),
			Expr::Member(object, member) => {
				let object = object.evaluate(scope)?;
				let member = match member.evaluate(scope)? {
					ExprValue::Json(Value::String(member)) => member,
					ExprValue::Json(Value::Number(number)) => number.to_string(),
					other => to_display_string(&other),
				};
				member_of(object, &member, scope)?
			}
			Expr::Unary(UnaryOp::Not, operand) => ExprValue::Json(Value::Bool(!operand.evaluate(scope)?.is_truthy())),
			Expr::Unary(UnaryOp::Negate, operand) => ExprValue::Json(number_value(-to_number(&operand.evaluate(scope)?))),
			Expr::Binary(BinaryOp::And, left, right) => {
				let left = left.evaluate(scope)?;
				if left.is_truthy() {
					right.evaluate(scope)?
				} else {
					left
				}
			}
			Expr::Binary(BinaryOp::Or, left, right) => {
				let left = left.evaluate(scope)?;
				if left.is_truthy() {
					left
				} else {
					right.evaluate(scope)?
				}
			}
			Expr::Binary(op, left, right) => {
				let left = left.evaluate(scope)?;
				let right = right.evaluate(scope)?;
				ExprValue::Json(Value::Bool(compare(*op, &left, &right)))
			}
		})
	}
}

fn member_of(object: ExprValue, member: &str, scope: &ExpressionScope<'_>) -> Result<ExprValue, ExpressionError> {
	Ok(match object {
		ExprValue::Json(Value::Null) => return Err(ExpressionError::NullMember { member: member.to_owned() }),
		ExprValue::Json(Value::Object(object)) => object.get(member).cloned().map_or(ExprValue::NULL, ExprValue::Json),
		ExprValue::Json(Value::Array(array)) => {
			if member == "length" {
				ExprValue::Json(Value::from(array.len()))
			} else {
				member
					.parse::<usize>()
					.ok()
					.and_then(|index| array.get(index).cloned())
					.map_or(ExprValue::NULL, ExprValue::Json)
			}
		}
		ExprValue::Json(Value::String(string)) if member == "length" => ExprValue::Json(Value::from(string.chars().count())),
		ExprValue::Json(_) => ExprValue::NULL,
		ExprValue::Event => {
			let event = match scope.event {
				Some(event) => event,
				None => return Ok(ExprValue::NULL),
			};
			match member {
				"type" => ExprValue::Json(Value::String(event.event_type.clone())),
				"target" => event.target.map_or(ExprValue::NULL, ExprValue::Node),
				_ => event.properties.get(member).cloned().map_or(ExprValue::NULL, ExprValue::Json),
			}
		}
		ExprValue::Node(node) => {
			let host = scope.host;
			match member {
				"parentNode" => host.parent(node).map_or(ExprValue::NULL, ExprValue::Node),
				"parentElement" => host
					.parent(node)
					.filter(|parent| host.kind(*parent) == NodeKind::Element)
					.map_or(ExprValue::NULL, ExprValue::Node),
				"tagName" => host.tag_name(node).map_or(ExprValue::NULL, |tag| ExprValue::Json(Value::String(tag))),
				"localName" => host.local_name(node).map_or(ExprValue::NULL, |name| ExprValue::Json(Value::String(name))),
				"id" if host.kind(node) == NodeKind::Element => ExprValue::Json(Value::String(host.attribute(node, "id").unwrap_or_default())),
				_ => host.property(node, member).map_or(ExprValue::NULL, ExprValue::Json),
			}
		}
	})
}

fn truthy(value: &Value) -> bool {
	match value {
		Value::Null => false,
		Value::Bool(value) => *value,
		Value::Number(number) => number.as_f64().map_or(false, |number| number != 0.0 && !number.is_nan()),
		Value::String(string) => !string.is_empty(),
		Value::Array(_) | Value::Object(_) => true,
	}
}

fn to_number(value: &ExprValue) -> f64 {
	match value {
		ExprValue::Json(Value::Null) => 0.0,
		ExprValue::Json(Value::Bool(value)) => f64::from(u8::from(*value)),
		ExprValue::Json(Value::Number(number)) => number.as_f64().unwrap_or(f64::NAN),
		ExprValue::Json(Value::String(string)) => {
			let trimmed = string.trim();
			if trimmed.is_empty() {
				0.0
			} else {
				trimmed.parse().unwrap_or(f64::NAN)
			}
		}
		_ => f64::NAN,
	}
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn number_value(number: f64) -> Value {
	if number.fract() == 0.0 && number.abs() < 9_007_199_254_740_992.0 && !(number == 0.0 && number.is_sign_negative()) {
		return Value::from(number as i64);
	}
	Number::from_f64(number).map_or(Value::Null, Value::Number)
}

fn to_display_string(value: &ExprValue) -> String {
	match value {
		ExprValue::Json(Value::String(string)) => string.clone(),
		ExprValue::Json(Value::Null) => "null".to_owned(),
		ExprValue::Json(value) => value.to_string(),
		ExprValue::Node(_) | ExprValue::Event => "[object]".to_owned(),
	}
}

fn compare(op: BinaryOp, left: &ExprValue, right: &ExprValue) -> bool {
	match op {
		BinaryOp::StrictEq => strict_equals(left, right),
		BinaryOp::StrictNe => !strict_equals(left, right),
		BinaryOp::LooseEq => loose_equals(left, right),
		BinaryOp::LooseNe => !loose_equals(left, right),
		BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
			let ordering = match (left, right) {
				(ExprValue::Json(Value::String(a)), ExprValue::Json(Value::String(b))) => Some(a.cmp(b)),
				_ => to_number(left).partial_cmp(&to_number(right)),
			};
			match ordering {
				None => false,
				Some(ordering) => match op {
					BinaryOp::Lt => ordering.is_lt(),
					BinaryOp::Le => ordering.is_le(),
					BinaryOp::Gt => ordering.is_gt(),
					_ => ordering.is_ge(),
				},
			}
		}
		BinaryOp::And | BinaryOp::Or => unreachable!("Logical operators short-circuit."),
	}
}

fn strict_equals(left: &ExprValue, right: &ExprValue) -> bool {
	match (left, right) {
		(ExprValue::Json(Value::Number(a)), ExprValue::Json(Value::Number(b))) => a.as_f64() == b.as_f64(),
		(ExprValue::Json(Value::Array(_) | Value::Object(_)), _) => false,
		(left, right) => left == right,
	}
}

fn loose_equals(left: &ExprValue, right: &ExprValue) -> bool {
	match (left, right) {
		(ExprValue::Json(Value::Null), ExprValue::Json(Value::Null)) => true,
		(ExprValue::Json(Value::Null), _) | (_, ExprValue::Json(Value::Null)) => false,
		(ExprValue::Json(Value::String(a)), ExprValue::Json(Value::String(b))) => a == b,
		(ExprValue::Json(Value::Number(_) | Value::String(_) | Value::Bool(_)), ExprValue::Json(Value::Number(_) | Value::String(_) | Value::Bool(_))) => {
			to_number(left) == to_number(right)
		}
		_ => strict_equals(left, right),
	}
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
	Number(f64),
	String(String),
	Identifier(String),
	Punctuator(&'static str),
}

const PUNCTUATORS: &[&str] = &["===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "-", ".", "[", "]", "(", ")"];

struct Parser<'a> {
	expression: &'a str,
	tokens: Vec<(usize, Token)>,
	position: usize,
}
impl<'a> Parser<'a> {
	fn new(expression: &'a str) -> Result<Self, ExpressionError> {
		Ok(Self {
			expression,
			tokens: tokenize(expression)?,
			position: 0,
		})
	}

	fn parse(mut self) -> Result<Expr, ExpressionError> {
		let expr = self.parse_or()?;
		match self.tokens.get(self.position) {
			None => Ok(expr),
			Some(_) => Err(self.unexpected()),
		}
	}

	fn unexpected(&self) -> ExpressionError {
		let (offset, found) = match self.tokens.get(self.position) {
			Some((offset, token)) => (
				*offset,
				match token {
					Token::Number(number) => number.to_string(),
					Token::String(string) => format!("{:?}", string),
					Token::Identifier(identifier) => identifier.clone(),
					Token::Punctuator(punctuator) => (*punctuator).to_owned(),
				},
			),
			None => (self.expression.len(), "end of input".to_owned()),
		};
		ExpressionError::Syntax {
			expression: self.expression.to_owned(),
			offset,
			found,
		}
	}

	fn eat(&mut self, punctuator: &str) -> bool {
		match self.tokens.get(self.position) {
			Some((_, Token::Punctuator(p))) if *p == punctuator => {
				self.position += 1;
				true
			}
			_ => false,
		}
	}

	fn binary_level(
		&mut self,
		operators: &[(&str, BinaryOp)],
		next: fn(&mut Self) -> Result<Expr, ExpressionError>,
	) -> Result<Expr, ExpressionError> {
		let mut left = next(self)?;
		'outer: loop {
			for (punctuator, op) in operators {
				if self.eat(punctuator) {
					let right = next(self)?;
					left = Expr::Binary(*op, Box::new(left), Box::new(right));
					continue 'outer;
				}
			}
			return Ok(left);
		}
	}

	fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
		self.binary_level(&[("||", BinaryOp::Or)], Self::parse_and)
	}

	fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
		self.binary_level(&[("&&", BinaryOp::And)], Self::parse_equality)
	}

	fn parse_equality(&mut self) -> Result<Expr, ExpressionError> {
		self.binary_level(
			&[
				("===", BinaryOp::StrictEq),
				("!==", BinaryOp::StrictNe),
				("==", BinaryOp::LooseEq),
				("!=", BinaryOp::LooseNe),
			],
			Self::parse_relational,
		)
	}

	fn parse_relational(&mut self) -> Result<Expr, ExpressionError> {
		self.binary_level(
			&[("<=", BinaryOp::Le), (">=", BinaryOp::Ge), ("<", BinaryOp::Lt), (">", BinaryOp::Gt)],
			Self::parse_unary,
		)
	}

	fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
		if self.eat("!") {
			return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)));
		}
		if self.eat("-") {
			return Ok(Expr::Unary(UnaryOp::Negate, Box::new(self.parse_unary()?)));
		}
		self.parse_member()
	}

	fn parse_member(&mut self) -> Result<Expr, ExpressionError> {
		let mut expr = self.parse_primary()?;
		loop {
			if self.eat(".") {
				match self.tokens.get(self.position) {
					Some((_, Token::Identifier(name))) => {
						let name = Expr::Literal(Value::String(name.clone()));
						self.position += 1;
						expr = Expr::Member(Box::new(expr), Box::new(name));
					}
					_ => return Err(self.unexpected()),
				}
			} else if self.eat("[") {
				let member = self.parse_or()?;
				if !self.eat("]") {
					return Err(self.unexpected());
				}
				expr = Expr::Member(Box::new(expr), Box::new(member));
			} else {
				return Ok(expr);
			}
		}
	}

	fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
		let token = match self.tokens.get(self.position) {
			Some((_, token)) => token.clone(),
			None => return Err(self.unexpected()),
		};
		let expr = match token {
			Token::Number(number) => Expr::Literal(number_value(number)),
			Token::String(string) => Expr::Literal(Value::String(string)),
			Token::Identifier(identifier) => match identifier.as_str() {
				"true" => Expr::Literal(Value::Bool(true)),
				"false" => Expr::Literal(Value::Bool(false)),
				"null" | "undefined" => Expr::Literal(Value::Null),
				"event" => Expr::Event,
				"element" => Expr::Element,
				_ => return Err(ExpressionError::UnknownIdentifier(identifier)),
			},
			Token::Punctuator("(") => {
				self.position += 1;
				let inner = self.parse_or()?;
				if !self.eat(")") {
					return Err(self.unexpected());
				}
				return Ok(inner);
			}
			Token::Punctuator(_) => return Err(self.unexpected()),
		};
		self.position += 1;
		Ok(expr)
	}
}

fn tokenize(expression: &str) -> Result<Vec<(usize, Token)>, ExpressionError> {
	let syntax_error = |offset: usize, found: &str| ExpressionError::Syntax {
		expression: expression.to_owned(),
		offset,
		found: found.to_owned(),
	};

	let mut tokens = Vec::new();
	let mut chars = expression.char_indices().peekable();
	while let Some(&(offset, c)) = chars.peek() {
		if c.is_whitespace() {
			chars.next();
		} else if c.is_ascii_digit() {
			let mut end = offset;
			while let Some(&(i, c)) = chars.peek() {
				if c.is_ascii_digit() || c == '.' {
					end = i + c.len_utf8();
					chars.next();
				} else {
					break;
				}
			}
			let literal = &expression[offset..end];
			let number = literal.parse::<f64>().map_err(|_| syntax_error(offset, literal))?;
			tokens.push((offset, Token::Number(number)));
		} else if c == '\'' || c == '"' {
			chars.next();
			let mut string = String::new();
			let mut closed = false;
			while let Some((_, next)) = chars.next() {
				match next {
					'\\' => match chars.next() {
						Some((_, 'n')) => string.push('\n'),
						Some((_, 't')) => string.push('\t'),
						Some((_, escaped)) => string.push(escaped),
						None => break,
					},
					quote if quote == c => {
						closed = true;
						break;
					}
					other => string.push(other),
				}
			}
			if !closed {
				return Err(syntax_error(offset, "unterminated string"));
			}
			tokens.push((offset, Token::String(string)));
		} else if c.is_alphabetic() || c == '_' || c == '$' {
			let mut end = offset;
			while let Some(&(i, c)) = chars.peek() {
				if c.is_alphanumeric() || c == '_' || c == '$' {
					end = i + c.len_utf8();
					chars.next();
				} else {
					break;
				}
			}
			tokens.push((offset, Token::Identifier(expression[offset..end].to_owned())));
		} else {
			let rest = &expression[offset..];
			let punctuator = PUNCTUATORS
				.iter()
				.find(|punctuator| rest.starts_with(**punctuator))
				.ok_or_else(|| syntax_error(offset, &c.to_string()))?;
			for _ in 0..punctuator.len() {
				chars.next();
			}
			tokens.push((offset, Token::Punctuator(*punctuator)));
		}
	}
	Ok(tokens)
}

/// Builds the event data object for `expressions`, mapping each expression to its value.
pub(crate) fn evaluate_all(evaluator: &dyn ExpressionEvaluator, expressions: &[String], scope: &ExpressionScope<'_>) -> Map<String, Value> {
	expressions
		.iter()
		.map(|expression| {
			let value = match evaluator.evaluate(expression, scope) {
				Ok(value) => value.into_json(scope),
				Err(error) => {
					debug!(expression = expression.as_str(), %error, "Event data expression failed.");
					Value::Null
				}
			};
			(expression.clone(), value)
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::MemoryDom;
	use serde_json::json;

	fn eval(host: &MemoryDom, expression: &str, event: Option<&DomEvent>, element: Option<DomId>) -> Result<Value, ExpressionError> {
		let scope = ExpressionScope { event, element, host };
		SimpleEvaluator::new().evaluate(expression, &scope).map(|value| value.into_json(&scope))
	}

	#[test]
	fn literals_and_operators() {
		let host = MemoryDom::new();
		assert!(eval(&host, "1 + 1", None, None).is_err());
		assert_eq!(eval(&host, "-2", None, None), Ok(json!(-2)));
		assert_eq!(eval(&host, "'a' === \"a\" && 3 > 2", None, None), Ok(json!(true)));
		assert_eq!(eval(&host, "null || 'fallback'", None, None), Ok(json!("fallback")));
		assert_eq!(eval(&host, "'1' == 1", None, None), Ok(json!(true)));
		assert_eq!(eval(&host, "'1' === 1", None, None), Ok(json!(false)));
		assert_eq!(eval(&host, "!(1 <= 0)", None, None), Ok(json!(true)));
		assert_eq!(eval(&host, "undefined == null", None, None), Ok(json!(true)));
	}

	#[test]
	fn event_and_element_members() {
		let host = MemoryDom::new();
		let form = host.create_element("form", None);
		let input = host.create_element("input", None);
		host.append_child(form, input);
		host.set_attribute(input, "id", "name-field");
		host.set_property(input, "value", Some(json!("Ada")));

		let event = DomEvent::new("keydown").with_target(input).with_property("key", json!("Enter"));
		assert_eq!(eval(&host, "event.key === 'Enter'", Some(&event), Some(input)), Ok(json!(true)));
		assert_eq!(eval(&host, "event['type']", Some(&event), Some(input)), Ok(json!("keydown")));
		assert_eq!(eval(&host, "element.value", Some(&event), Some(input)), Ok(json!("Ada")));
		assert_eq!(eval(&host, "event.target.id", Some(&event), Some(input)), Ok(json!("name-field")));
		assert_eq!(eval(&host, "element.parentElement.tagName", Some(&event), Some(input)), Ok(json!("FORM")));
		assert_eq!(eval(&host, "element.missing", Some(&event), Some(input)), Ok(Value::Null));
		assert_eq!(
			eval(&host, "element.missing.deeper", Some(&event), Some(input)),
			Err(ExpressionError::NullMember { member: "deeper".to_owned() })
		);
	}

	#[test]
	fn rejects_unsupported_syntax() {
		let host = MemoryDom::new();
		assert!(matches!(eval(&host, "window.alert('x')", None, None), Err(ExpressionError::UnknownIdentifier(_))));
		assert!(matches!(eval(&host, "element.focus()", None, None), Err(ExpressionError::Syntax { .. })));
		assert!(matches!(eval(&host, "'open", None, None), Err(ExpressionError::Syntax { .. })));
	}

	#[test]
	fn caches_compiled_expressions() {
		let evaluator = SimpleEvaluator::new();
		let first = evaluator.compile("event.detail").unwrap();
		let second = evaluator.compile("event.detail").unwrap();
		assert!(Rc::ptr_eq(&first, &second));
		assert_eq!(evaluator.cached_count(), 1);
	}
}
