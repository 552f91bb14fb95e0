//! Syntax tree for rule text.
//!
//! The same types serve as the compiled representation: a [`Program`] is a
//! validated collection of [`PredicateDecl`]s and [`Clause`]s. Every node
//! renders back to source text through `Display`.
//!
//! [`Program`]: super::Program

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use crate::fact::Value;

// ---------------------------------------------------------------------------
// Layers and positions
// ---------------------------------------------------------------------------

/// Where a piece of rule or fact text comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Layer {
    /// Read-only predicate declarations and builtin facts.
    Schema,
    /// Hand-authored rules.
    Policy,
    /// Append-only rules accepted through hot-loading.
    Learned,
    /// Fact-only files loaded into the session. Never part of a program.
    Session,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Schema => "schema",
            Self::Policy => "policy",
            Self::Learned => "learned",
            Self::Session => "session",
        };
        f.write_str(s)
    }
}

/// A source position. Lines are 1-based, columns 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// Declared type of a predicate argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgType {
    Any,
    Name,
    String,
    Number,
    Float,
}

impl ArgType {
    /// Parse a type constant such as `/name`.
    pub fn from_constant(s: &str) -> Option<Self> {
        match s {
            "/any" => Some(Self::Any),
            "/name" => Some(Self::Name),
            "/string" => Some(Self::String),
            "/number" => Some(Self::Number),
            "/float" => Some(Self::Float),
            _ => None,
        }
    }

    /// Whether a constant of this value fits the type.
    pub fn admits(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Any, _)
                | (Self::Name, Value::Name(_))
                | (Self::String, Value::Str(_))
                | (Self::Number, Value::Int(_))
                | (Self::Float, Value::Float(_))
        )
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Any => "/any",
            Self::Name => "/name",
            Self::String => "/string",
            Self::Number => "/number",
            Self::Float => "/float",
        };
        f.write_str(s)
    }
}

/// `Decl name(A, B) bound [/name, /number] exclusive.`
#[derive(Debug, Clone, PartialEq)]
pub struct PredicateDecl {
    pub name: String,
    /// Documentation names for the arguments, as written in the declaration.
    pub arg_names: Vec<String>,
    pub arg_types: Vec<ArgType>,
    /// Decision predicate: only its highest-priority derivations survive.
    pub exclusive: bool,
    pub layer: Layer,
    pub position: Position,
}

impl PredicateDecl {
    pub fn arity(&self) -> usize {
        self.arg_types.len()
    }

    /// Declaration implied by a learned clause head that nothing declared.
    pub(crate) fn implicit(head: &Atom, layer: Layer) -> Self {
        Self {
            name: head.predicate.clone(),
            arg_names: (0..head.args.len()).map(|i| format!("A{i}")).collect(),
            arg_types: vec![ArgType::Any; head.args.len()],
            exclusive: false,
            layer,
            position: head.position,
        }
    }
}

impl fmt::Display for PredicateDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decl {}({})", self.name, self.arg_names.join(", "))?;
        if self.arg_types.iter().any(|t| *t != ArgType::Any) {
            let types: Vec<String> = self.arg_types.iter().map(ToString::to_string).collect();
            write!(f, " bound [{}]", types.join(", "))?;
        }
        if self.exclusive {
            f.write_str(" exclusive")?;
        }
        f.write_str(".")
    }
}

// ---------------------------------------------------------------------------
// Terms, atoms, comparisons
// ---------------------------------------------------------------------------

/// A term inside an atom or comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    Var(String),
    Const(Value),
    /// `_`: matches anything, binds nothing.
    Wildcard,
}

impl Term {
    pub fn as_var(&self) -> Option<&str> {
        match self {
            Self::Var(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(v) => f.write_str(v),
            Self::Const(c) => write!(f, "{c}"),
            Self::Wildcard => f.write_str("_"),
        }
    }
}

/// `predicate(t1, ..., tn)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub predicate: String,
    pub args: Vec<Term>,
    pub position: Position,
}

impl Atom {
    /// Variables appearing in this atom, in order of first appearance.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(Term::as_var)
    }

    /// Whether every argument is a constant.
    pub fn is_ground(&self) -> bool {
        self.args.iter().all(|t| matches!(t, Term::Const(_)))
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.predicate)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}

/// Comparison operator in a rule body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// Evaluate the comparison on two bound values.
    ///
    /// Numbers compare by value, so `1 = 1.0` holds. Other values are equal
    /// only when identical, and order only against constants of the same
    /// textual kind.
    pub fn holds(self, left: &Value, right: &Value) -> bool {
        match self {
            Self::Eq => values_equal(left, right),
            Self::Ne => !values_equal(left, right),
            Self::Lt => compare(left, right).is_some_and(|o| o.is_lt()),
            Self::Le => compare(left, right).is_some_and(|o| o.is_le()),
            Self::Gt => compare(left, right).is_some_and(|o| o.is_gt()),
            Self::Ge => compare(left, right).is_some_and(|o| o.is_ge()),
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a == b,
        _ => match (numeric(left), numeric(right)) {
            (Some(a), Some(b)) => a == b,
            _ => left == right,
        },
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) | (Value::Name(a), Value::Name(b)) => Some(a.cmp(b)),
        _ => numeric(left)?.partial_cmp(&numeric(right)?),
    }
}

/// `left op right` constraint over bound variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub op: CompareOp,
    pub left: Term,
    pub right: Term,
    pub position: Position,
}

impl Comparison {
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        [&self.left, &self.right].into_iter().filter_map(Term::as_var)
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op.symbol(), self.right)
    }
}

/// One element of a rule body.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyItem {
    Atom(Atom),
    Compare(Comparison),
}

impl fmt::Display for BodyItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atom(a) => write!(f, "{a}"),
            Self::Compare(c) => write!(f, "{c}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Clauses and statements
// ---------------------------------------------------------------------------

/// A rule `head :- body.` or, with an empty body, a fact.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub head: Atom,
    pub body: Vec<BodyItem>,
    /// Tie-break weight for exclusive predicates (default 0).
    pub priority: i64,
    pub layer: Layer,
    pub position: Position,
}

impl Clause {
    pub fn is_fact(&self) -> bool {
        self.body.is_empty()
    }

    /// Positive atoms of the body, in order.
    pub fn body_atoms(&self) -> impl Iterator<Item = &Atom> {
        self.body.iter().filter_map(|item| match item {
            BodyItem::Atom(a) => Some(a),
            BodyItem::Compare(_) => None,
        })
    }

    /// Comparison constraints of the body, in order.
    pub fn comparisons(&self) -> impl Iterator<Item = &Comparison> {
        self.body.iter().filter_map(|item| match item {
            BodyItem::Compare(c) => Some(c),
            BodyItem::Atom(_) => None,
        })
    }

    /// Variables bound by positive body atoms.
    pub fn bound_variables(&self) -> BTreeSet<&str> {
        self.body_atoms().flat_map(Atom::variables).collect()
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.priority != 0 {
            write!(f, "@priority({}) ", self.priority)?;
        }
        write!(f, "{}", self.head)?;
        if !self.body.is_empty() {
            f.write_str(" :- ")?;
            for (i, item) in self.body.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{item}")?;
            }
        }
        f.write_str(".")
    }
}

/// A top-level item of a source layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Decl(PredicateDecl),
    Clause(Clause),
}
