//! AST types for the supported SQL subset
//!
//! Closely follows the Pest grammar. Every clause keeps the byte span it
//! occupies in the source text so statements can be cut at clause boundaries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte range in the normalized statement text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn slice<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

/// A clause body together with the span of the whole clause (keyword included)
/// and the raw text of the body (keyword excluded).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Located<T> {
    pub node: T,
    pub span: Span,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectStatement {
    pub distinct: bool,
    pub items: Vec<SelectItem>,
    pub select_list: Span,
    /// Tables of the FROM list; anything after the first is an implicit cross join.
    pub from: Vec<TableRef>,
    pub from_span: Span,
    pub joins: Vec<Join>,
    pub where_clause: Option<Located<Expr>>,
    pub group_by: Option<Located<Vec<KeyExpr>>>,
    pub having: Option<Located<Expr>>,
    pub order_by: Option<Located<Vec<SortKey>>>,
    pub limit: Option<Located<u64>>,
    pub offset: Option<Located<u64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SelectItem {
    Wildcard,
    QualifiedWildcard { table: String },
    Expr { expr: Expr, alias: Option<String>, text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    /// Name the table is referred to by in the rest of the statement.
    pub fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Join {
    pub join_type: JoinType,
    pub table: TableRef,
    pub on: Option<Expr>,
    pub on_text: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinType {
    /// Whether unmatched left rows survive the join.
    pub fn keeps_left(self) -> bool {
        matches!(self, JoinType::Left | JoinType::Full)
    }

    /// Whether unmatched right rows survive the join.
    pub fn keeps_right(self) -> bool {
        matches!(self, JoinType::Right | JoinType::Full)
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL OUTER JOIN",
            JoinType::Cross => "CROSS JOIN",
        };
        f.write_str(keyword)
    }
}

/// GROUP BY key with its source text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyExpr {
    pub expr: Expr,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortKey {
    pub expr: Expr,
    pub desc: bool,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    Literal(Value),
    Column(ColumnRef),
    BinaryOp { op: BinOp, left: Box<Expr>, right: Box<Expr> },
    UnaryOp { op: UnOp, expr: Box<Expr> },
    FuncCall(FuncCall),
    IsNull { expr: Box<Expr>, negated: bool },
    InList { expr: Box<Expr>, list: Vec<Expr>, negated: bool },
    Between { expr: Box<Expr>, low: Box<Expr>, high: Box<Expr>, negated: bool },
    Case { operand: Option<Box<Expr>>, branches: Vec<(Expr, Expr)>, otherwise: Option<Box<Expr>> },
}

impl Expr {
    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            Expr::Column(col) => Some(col),
            _ => None,
        }
    }

    /// `a.x = b.y` with a column on each side; the only join condition the
    /// simulator understands.
    pub fn single_equality(&self) -> Option<(&ColumnRef, &ColumnRef)> {
        match self {
            Expr::BinaryOp { op: BinOp::Eq, left, right } => {
                Some((left.as_column()?, right.as_column()?))
            }
            _ => None,
        }
    }

    /// Collect aggregate calls in source order. Nested aggregates are not descended into.
    pub fn collect_aggregates<'a>(&'a self, out: &mut Vec<&'a FuncCall>) {
        match self {
            Expr::Literal(_) | Expr::Column(_) => {}
            Expr::FuncCall(call) if call.is_aggregate() => out.push(call),
            Expr::FuncCall(call) => call.args.iter().for_each(|a| a.collect_aggregates(out)),
            Expr::BinaryOp { left, right, .. } => {
                left.collect_aggregates(out);
                right.collect_aggregates(out);
            }
            Expr::UnaryOp { expr, .. } | Expr::IsNull { expr, .. } => expr.collect_aggregates(out),
            Expr::InList { expr, list, .. } => {
                expr.collect_aggregates(out);
                list.iter().for_each(|e| e.collect_aggregates(out));
            }
            Expr::Between { expr, low, high, .. } => {
                expr.collect_aggregates(out);
                low.collect_aggregates(out);
                high.collect_aggregates(out);
            }
            Expr::Case { operand, branches, otherwise } => {
                if let Some(operand) = operand {
                    operand.collect_aggregates(out);
                }
                for (when, then) in branches {
                    when.collect_aggregates(out);
                    then.collect_aggregates(out);
                }
                if let Some(otherwise) = otherwise {
                    otherwise.collect_aggregates(out);
                }
            }
        }
    }

    pub fn contains_aggregate(&self) -> bool {
        let mut found = Vec::new();
        self.collect_aggregates(&mut found);
        !found.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuncCall {
    pub name: String,
    pub args: Vec<Expr>,
    pub distinct: bool,
    /// `COUNT(*)`
    pub star: bool,
    pub text: String,
}

const AGGREGATES: &[&str] = &["COUNT", "SUM", "AVG", "MIN", "MAX", "STRING_AGG", "GROUP_CONCAT"];

impl FuncCall {
    pub fn is_aggregate(&self) -> bool {
        AGGREGATES.iter().any(|agg| self.name.eq_ignore_ascii_case(agg))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub column: String,
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.column),
            None => f.write_str(&self.column),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    // Arithmetic
    Add, Sub, Mul, Div, Mod,
    // String
    Concat, Like,
    // Comparison
    Eq, Ne, Lt, Le, Gt, Ge,
    // Logical
    And, Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}
