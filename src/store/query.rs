use std::cmp::Ordering;
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

use super::Fields;

type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// A document condition, built from `Query::field` and combined with `&`, `|` and `!`.
///
/// ```ignore
/// let active_adults = Query::field("active").eq(true) & Query::field("age").ge(18);
/// let nested = Query::field("address.city").eq("Wonderland");
/// ```
///
/// A field that is missing from a document never matches, for any comparison.
#[derive(Clone)]
pub struct Query {
    node: Arc<Node>,
}

enum Node {
    Noop,
    Compare {
        path: FieldPath,
        op: CompareOp,
        value: Value,
    },
    Exists(FieldPath),
    Regex {
        path: FieldPath,
        regex: Regex,
        anchored: bool,
    },
    OneOf {
        path: FieldPath,
        values: Vec<Value>,
    },
    Contains {
        path: FieldPath,
        values: Vec<Value>,
        all: bool,
    },
    Test {
        path: FieldPath,
        predicate: Predicate,
    },
    And(Query, Query),
    Or(Query, Query),
    Not(Query),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldPath(Vec<String>);

impl FieldPath {
    fn resolve<'a>(&self, fields: &'a Fields) -> Option<&'a Value> {
        let (first, rest) = self.0.split_first()?;
        let mut value = fields.get(first)?;
        for segment in rest {
            value = value.as_object()?.get(segment)?;
        }
        Some(value)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// A field reference; comparison methods turn it into a `Query`.
#[derive(Debug, Clone)]
pub struct Field {
    path: FieldPath,
}

impl Field {
    fn query(&self, node: Node) -> Query {
        Query {
            node: Arc::new(node),
        }
    }

    fn compare(&self, op: CompareOp, value: Value) -> Query {
        self.query(Node::Compare {
            path: self.path.clone(),
            op,
            value,
        })
    }

    pub fn eq(&self, value: impl Into<Value>) -> Query {
        self.compare(CompareOp::Eq, value.into())
    }

    pub fn ne(&self, value: impl Into<Value>) -> Query {
        self.compare(CompareOp::Ne, value.into())
    }

    pub fn lt(&self, value: impl Into<Value>) -> Query {
        self.compare(CompareOp::Lt, value.into())
    }

    pub fn le(&self, value: impl Into<Value>) -> Query {
        self.compare(CompareOp::Le, value.into())
    }

    pub fn gt(&self, value: impl Into<Value>) -> Query {
        self.compare(CompareOp::Gt, value.into())
    }

    pub fn ge(&self, value: impl Into<Value>) -> Query {
        self.compare(CompareOp::Ge, value.into())
    }

    pub fn exists(&self) -> Query {
        self.query(Node::Exists(self.path.clone()))
    }

    /// String field matches `pattern` in full.
    pub fn matches(&self, pattern: &str) -> StoreResult<Query> {
        self.regex(pattern, true)
    }

    /// String field contains a match for `pattern` anywhere.
    pub fn search(&self, pattern: &str) -> StoreResult<Query> {
        self.regex(pattern, false)
    }

    fn regex(&self, pattern: &str, anchored: bool) -> StoreResult<Query> {
        let source = if anchored {
            format!("^(?:{})$", pattern)
        } else {
            pattern.to_string()
        };
        let regex = Regex::new(&source)
            .map_err(|e| StoreError::InvalidArgument(format!("bad pattern {:?}: {}", pattern, e)))?;
        Ok(self.query(Node::Regex {
            path: self.path.clone(),
            regex,
            anchored,
        }))
    }

    /// Field equals one of `values`.
    pub fn one_of<I, V>(&self, values: I) -> Query
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.query(Node::OneOf {
            path: self.path.clone(),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    /// Array field contains at least one of `values`.
    pub fn any<I, V>(&self, values: I) -> Query
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.contains(values, false)
    }

    /// Array field contains every one of `values`.
    pub fn all<I, V>(&self, values: I) -> Query
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.contains(values, true)
    }

    fn contains<I, V>(&self, values: I, all: bool) -> Query
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.query(Node::Contains {
            path: self.path.clone(),
            values: values.into_iter().map(Into::into).collect(),
            all,
        })
    }

    /// Field passes a custom predicate. Queries containing a predicate are never cached.
    pub fn test<F>(&self, predicate: F) -> Query
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.query(Node::Test {
            path: self.path.clone(),
            predicate: Arc::new(predicate),
        })
    }
}

impl Query {
    /// Reference a (dot-separated) field path.
    pub fn field(path: &str) -> Field {
        Field {
            path: FieldPath(path.split('.').map(str::to_string).collect()),
        }
    }

    /// Matches every document.
    pub fn noop() -> Query {
        Query {
            node: Arc::new(Node::Noop),
        }
    }

    pub fn and(self, other: Query) -> Query {
        Query {
            node: Arc::new(Node::And(self, other)),
        }
    }

    pub fn or(self, other: Query) -> Query {
        Query {
            node: Arc::new(Node::Or(self, other)),
        }
    }

    pub fn negate(self) -> Query {
        Query {
            node: Arc::new(Node::Not(self)),
        }
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        match self.node.as_ref() {
            Node::Noop => true,
            Node::Compare { path, op, value } => match path.resolve(fields) {
                Some(actual) => compare(actual, *op, value),
                None => false,
            },
            Node::Exists(path) => path.resolve(fields).is_some(),
            Node::Regex { path, regex, .. } => path
                .resolve(fields)
                .and_then(Value::as_str)
                .is_some_and(|s| regex.is_match(s)),
            Node::OneOf { path, values } => path
                .resolve(fields)
                .is_some_and(|actual| values.contains(actual)),
            Node::Contains { path, values, all } => {
                let Some(items) = path.resolve(fields).and_then(Value::as_array) else {
                    return false;
                };
                if *all {
                    values.iter().all(|v| items.contains(v))
                } else {
                    values.iter().any(|v| items.contains(v))
                }
            }
            Node::Test { path, predicate } => path.resolve(fields).is_some_and(|v| predicate(v)),
            Node::And(a, b) => a.matches(fields) && b.matches(fields),
            Node::Or(a, b) => a.matches(fields) || b.matches(fields),
            Node::Not(inner) => !inner.matches(fields),
        }
    }

    /// Whether results for this query may be served from a query cache.
    pub fn is_cacheable(&self) -> bool {
        match self.node.as_ref() {
            Node::Test { .. } => false,
            Node::And(a, b) | Node::Or(a, b) => a.is_cacheable() && b.is_cacheable(),
            Node::Not(inner) => inner.is_cacheable(),
            _ => true,
        }
    }

    /// Canonical text form used as the cache key, `None` for uncacheable queries.
    pub fn cache_key(&self) -> Option<String> {
        self.is_cacheable().then(|| self.to_string())
    }
}

fn compare(actual: &Value, op: CompareOp, expected: &Value) -> bool {
    let ordering = || order(actual, expected);
    match op {
        CompareOp::Eq => json_eq(actual, expected),
        CompareOp::Ne => !json_eq(actual, expected),
        CompareOp::Lt => ordering() == Some(Ordering::Less),
        CompareOp::Le => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Gt => ordering() == Some(Ordering::Greater),
        CompareOp::Ge => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
    }
}

// 30 and 30.0 compare equal, as they would after a JSON round trip through another engine.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node.as_ref() {
            Node::Noop => f.write_str("true"),
            Node::Compare { path, op, value } => write!(f, "{} {} {}", path, op.symbol(), value),
            Node::Exists(path) => write!(f, "exists({})", path),
            Node::Regex {
                path,
                regex,
                anchored,
            } => {
                let op = if *anchored { "matches" } else { "search" };
                write!(f, "{}({}, {:?})", op, path, regex.as_str())
            }
            Node::OneOf { path, values } => write!(f, "{} in {}", path, Value::from(values.clone())),
            Node::Contains { path, values, all } => {
                let op = if *all { "all" } else { "any" };
                write!(f, "{}({}, {})", op, path, Value::from(values.clone()))
            }
            Node::Test { path, .. } => write!(f, "test({})", path),
            Node::And(a, b) => write!(f, "({} && {})", a, b),
            Node::Or(a, b) => write!(f, "({} || {})", a, b),
            Node::Not(inner) => write!(f, "!({})", inner),
        }
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Query({})", self)
    }
}

impl BitAnd for Query {
    type Output = Query;

    fn bitand(self, rhs: Query) -> Query {
        self.and(rhs)
    }
}

impl BitOr for Query {
    type Output = Query;

    fn bitor(self, rhs: Query) -> Query {
        self.or(rhs)
    }
}

impl Not for Query {
    type Output = Query;

    fn not(self) -> Query {
        self.negate()
    }
}
