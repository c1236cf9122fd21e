//! Pest-based parser for SELECT statements

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

use crate::ast::*;

#[derive(Parser)]
#[grammar = "sql.pest"]
pub struct SqlParser;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Pest error: {0}")]
    Pest(#[from] pest::error::Error<Rule>),
}

/// Parse a normalized SELECT statement into its AST
pub fn parse(source: &str) -> Result<SelectStatement, ParseError> {
    let mut pairs = SqlParser::parse(Rule::statement, source)?;
    let statement = pairs.next().ok_or_else(|| ParseError::Syntax("Empty input".to_string()))?;

    let select = statement
        .into_inner()
        .find(|p| p.as_rule() == Rule::select_stmt)
        .ok_or_else(|| ParseError::Syntax("Missing SELECT statement".to_string()))?;

    parse_select(select)
}

/// Span of a pair with implicit trailing whitespace dropped.
fn span_of(pair: &Pair<Rule>) -> Span {
    let start = pair.as_span().start();
    Span::new(start, start + pair.as_str().trim_end().len())
}

fn next_pair<'i>(pairs: &mut Pairs<'i, Rule>, what: &str) -> Result<Pair<'i, Rule>, ParseError> {
    pairs
        .next()
        .ok_or_else(|| ParseError::Syntax(format!("Missing {}", what)))
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_select
            | Rule::kw_distinct
            | Rule::kw_from
            | Rule::kw_where
            | Rule::kw_group
            | Rule::kw_by
            | Rule::kw_having
            | Rule::kw_order
            | Rule::kw_limit
            | Rule::kw_offset
            | Rule::kw_as
            | Rule::kw_on
            | Rule::kw_and
            | Rule::kw_or
            | Rule::kw_is
            | Rule::kw_in
            | Rule::kw_between
            | Rule::kw_like
            | Rule::kw_case
            | Rule::kw_when
            | Rule::kw_then
            | Rule::kw_else
            | Rule::kw_end
    )
}

/// Inner pairs of a clause without its keywords.
fn clause_body(pair: Pair<Rule>) -> impl Iterator<Item = Pair<Rule>> {
    pair.into_inner().filter(|p| !is_keyword(p.as_rule()))
}

fn parse_select(pair: Pair<Rule>) -> Result<SelectStatement, ParseError> {
    let mut distinct = false;
    let mut items = Vec::new();
    let mut select_list = Span::new(0, 0);
    let mut from = Vec::new();
    let mut from_span = Span::new(0, 0);
    let mut joins = Vec::new();
    let mut where_clause = None;
    let mut group_by = None;
    let mut having = None;
    let mut order_by = None;
    let mut limit = None;
    let mut offset = None;

    for clause in pair.into_inner() {
        let span = span_of(&clause);
        match clause.as_rule() {
            Rule::select_clause => {
                for part in clause.into_inner() {
                    match part.as_rule() {
                        Rule::kw_distinct => distinct = true,
                        Rule::select_list => {
                            select_list = span_of(&part);
                            items = part
                                .into_inner()
                                .map(parse_select_item)
                                .collect::<Result<_, _>>()?;
                        }
                        _ => {}
                    }
                }
            }
            Rule::from_clause => {
                from_span = span;
                from = clause_body(clause).map(parse_table_ref).collect::<Result<_, _>>()?;
            }
            Rule::join_clause => joins.push(parse_join(clause)?),
            Rule::where_clause => where_clause = Some(parse_condition_clause(clause)?),
            Rule::having_clause => having = Some(parse_condition_clause(clause)?),
            Rule::group_by_clause => {
                let text = body_text(&clause);
                let keys = clause_body(clause)
                    .map(|p| {
                        let text = p.as_str().trim().to_string();
                        parse_expr(p).map(|expr| KeyExpr { expr, text })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                group_by = Some(Located { node: keys, span, text });
            }
            Rule::order_by_clause => {
                let text = body_text(&clause);
                let keys = clause_body(clause).map(parse_sort_key).collect::<Result<_, _>>()?;
                order_by = Some(Located { node: keys, span, text });
            }
            Rule::limit_clause => limit = Some(parse_count_clause(clause)?),
            Rule::offset_clause => offset = Some(parse_count_clause(clause)?),
            _ => {}
        }
    }

    if from.is_empty() {
        return Err(ParseError::Syntax("Missing FROM table".to_string()));
    }

    Ok(SelectStatement {
        distinct,
        items,
        select_list,
        from,
        from_span,
        joins,
        where_clause,
        group_by,
        having,
        order_by,
        limit,
        offset,
    })
}

/// Clause text after its leading keyword(s).
fn body_text(clause: &Pair<Rule>) -> String {
    let clause_end = clause.as_span().end();
    let body_start = clause
        .clone()
        .into_inner()
        .find(|p| !is_keyword(p.as_rule()))
        .map(|p| p.as_span().start())
        .unwrap_or(clause_end);
    let offset = body_start - clause.as_span().start();
    clause.as_str()[offset..].trim().to_string()
}

fn parse_condition_clause(clause: Pair<Rule>) -> Result<Located<Expr>, ParseError> {
    let span = span_of(&clause);
    let text = body_text(&clause);
    let mut body = clause_body(clause);
    let expr_pair = body
        .next()
        .ok_or_else(|| ParseError::Syntax("Missing condition".to_string()))?;
    Ok(Located { node: parse_expr(expr_pair)?, span, text })
}

fn parse_count_clause(clause: Pair<Rule>) -> Result<Located<u64>, ParseError> {
    let span = span_of(&clause);
    let text = body_text(&clause);
    let count = text
        .parse::<u64>()
        .map_err(|e| ParseError::Syntax(format!("Invalid row count '{}': {}", text, e)))?;
    Ok(Located { node: count, span, text })
}

fn parse_select_item(pair: Pair<Rule>) -> Result<SelectItem, ParseError> {
    let mut inner = pair.into_inner();
    let first = next_pair(&mut inner, "select item")?;

    match first.as_rule() {
        Rule::wildcard => Ok(SelectItem::Wildcard),
        Rule::qualified_wildcard => {
            let table = first
                .into_inner()
                .next()
                .map(|p| unquote(p.as_str()))
                .ok_or_else(|| ParseError::Syntax("Invalid qualified wildcard".to_string()))?;
            Ok(SelectItem::QualifiedWildcard { table })
        }
        Rule::aliased_expr => {
            let mut parts = clause_body(first);
            let expr_pair = next_pair_from(&mut parts, "select expression")?;
            let text = expr_pair.as_str().trim().to_string();
            let expr = parse_expr(expr_pair)?;
            let alias = parts.next().map(|p| unquote(p.as_str()));
            Ok(SelectItem::Expr { expr, alias, text })
        }
        _ => Err(ParseError::Syntax("Invalid select item".to_string())),
    }
}

fn parse_table_ref(pair: Pair<Rule>) -> Result<TableRef, ParseError> {
    let mut parts = clause_body(pair);
    let name = unquote(next_pair_from(&mut parts, "table name")?.as_str());
    let alias = parts.next().map(|p| unquote(p.as_str()));
    Ok(TableRef { name, alias })
}

fn parse_join(pair: Pair<Rule>) -> Result<Join, ParseError> {
    let span = span_of(&pair);
    let mut inner = clause_body(pair);

    let kind = next_pair_from(&mut inner, "join type")?;
    let join_type = match kind.into_inner().next().map(|p| p.as_rule()) {
        Some(Rule::cross_join) => JoinType::Cross,
        Some(Rule::full_join) => JoinType::Full,
        Some(Rule::left_join) => JoinType::Left,
        Some(Rule::right_join) => JoinType::Right,
        _ => JoinType::Inner,
    };

    let table = parse_table_ref(next_pair_from(&mut inner, "join table")?)?;

    let (on, on_text) = match inner.next() {
        Some(cond) => {
            let text = cond.as_str().trim().to_string();
            (Some(parse_expr(cond)?), Some(text))
        }
        None => (None, None),
    };

    Ok(Join { join_type, table, on, on_text, span })
}

fn next_pair_from<'i, I>(pairs: &mut I, what: &str) -> Result<Pair<'i, Rule>, ParseError>
where
    I: Iterator<Item = Pair<'i, Rule>>,
{
    pairs
        .next()
        .ok_or_else(|| ParseError::Syntax(format!("Missing {}", what)))
}

fn parse_sort_key(pair: Pair<Rule>) -> Result<SortKey, ParseError> {
    let mut inner = pair.into_inner();
    let expr_pair = next_pair(&mut inner, "sort expression")?;
    let text = expr_pair.as_str().trim().to_string();
    let expr = parse_expr(expr_pair)?;
    let desc = inner
        .next()
        .and_then(|dir| dir.into_inner().next())
        .map(|kw| kw.as_rule() == Rule::kw_desc)
        .unwrap_or(false);
    Ok(SortKey { expr, desc, text })
}

fn parse_expr(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    match pair.as_rule() {
        Rule::expr => parse_expr(next_pair(&mut pair.into_inner(), "expression")?),
        Rule::or_expr => fold_logical(pair, BinOp::Or),
        Rule::and_expr => fold_logical(pair, BinOp::And),
        Rule::not_expr => {
            let mut inner = pair.into_inner();
            let first = next_pair(&mut inner, "expression")?;
            if first.as_rule() == Rule::kw_not {
                let operand = parse_expr(next_pair(&mut inner, "NOT operand")?)?;
                Ok(Expr::UnaryOp { op: UnOp::Not, expr: Box::new(operand) })
            } else {
                parse_expr(first)
            }
        }
        Rule::predicate => parse_predicate(pair),
        Rule::additive | Rule::multiplicative => fold_arithmetic(pair),
        Rule::unary => {
            let mut inner = pair.into_inner();
            let first = next_pair(&mut inner, "operand")?;
            if first.as_rule() == Rule::neg {
                let operand = parse_expr(next_pair(&mut inner, "negated operand")?)?;
                Ok(Expr::UnaryOp { op: UnOp::Neg, expr: Box::new(operand) })
            } else {
                parse_expr(first)
            }
        }
        Rule::literal => parse_literal(pair),
        Rule::column_ref => parse_column_ref(pair),
        Rule::func_call => parse_func_call(pair),
        Rule::case_expr => parse_case(pair),
        rule => Err(ParseError::Syntax(format!("Cannot parse expr: {:?}", rule))),
    }
}

fn fold_logical(pair: Pair<Rule>, op: BinOp) -> Result<Expr, ParseError> {
    let mut operands = clause_body(pair);
    let mut left = parse_expr(next_pair_from(&mut operands, "operand")?)?;
    for right in operands {
        left = Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(parse_expr(right)?),
        };
    }
    Ok(left)
}

fn fold_arithmetic(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let mut left = parse_expr(next_pair(&mut inner, "operand")?)?;

    while let Some(op_pair) = inner.next() {
        let op = match op_pair.as_str() {
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "%" => BinOp::Mod,
            "||" => BinOp::Concat,
            other => return Err(ParseError::Syntax(format!("Unknown operator: {}", other))),
        };
        let right = parse_expr(next_pair(&mut inner, "right operand")?)?;
        left = Expr::BinaryOp { op, left: Box::new(left), right: Box::new(right) };
    }

    Ok(left)
}

fn parse_predicate(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let subject = parse_expr(next_pair(&mut inner, "predicate subject")?)?;

    let Some(tail) = inner.next() else {
        return Ok(subject);
    };

    let rule = tail.as_rule();
    let mut negated = false;
    let mut operands = Vec::new();
    let mut comparison = None;
    for part in tail.into_inner() {
        match part.as_rule() {
            Rule::kw_not => negated = true,
            Rule::comp_op => comparison = Some(part.as_str().to_string()),
            Rule::expr | Rule::additive => operands.push(parse_expr(part)?),
            _ => {}
        }
    }

    let subject = Box::new(subject);
    match rule {
        Rule::is_null => Ok(Expr::IsNull { expr: subject, negated }),
        Rule::in_list => Ok(Expr::InList { expr: subject, list: operands, negated }),
        Rule::between => {
            let mut bounds = operands.into_iter();
            let low = bounds.next().ok_or_else(|| ParseError::Syntax("Missing BETWEEN bound".to_string()))?;
            let high = bounds.next().ok_or_else(|| ParseError::Syntax("Missing BETWEEN bound".to_string()))?;
            Ok(Expr::Between { expr: subject, low: Box::new(low), high: Box::new(high), negated })
        }
        Rule::like => {
            let pattern = operands.pop().ok_or_else(|| ParseError::Syntax("Missing LIKE pattern".to_string()))?;
            let like = Expr::BinaryOp { op: BinOp::Like, left: subject, right: Box::new(pattern) };
            Ok(if negated { Expr::UnaryOp { op: UnOp::Not, expr: Box::new(like) } } else { like })
        }
        Rule::comparison => {
            let op = match comparison.as_deref() {
                Some("=") => BinOp::Eq,
                Some("<>") | Some("!=") => BinOp::Ne,
                Some("<") => BinOp::Lt,
                Some("<=") => BinOp::Le,
                Some(">") => BinOp::Gt,
                Some(">=") => BinOp::Ge,
                other => return Err(ParseError::Syntax(format!("Unknown comparison: {:?}", other))),
            };
            let right = operands.pop().ok_or_else(|| ParseError::Syntax("Missing right operand".to_string()))?;
            Ok(Expr::BinaryOp { op, left: subject, right: Box::new(right) })
        }
        rule => Err(ParseError::Syntax(format!("Invalid predicate: {:?}", rule))),
    }
}

fn parse_literal(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let inner = next_pair(&mut pair.into_inner(), "literal")?;
    let value = match inner.as_rule() {
        Rule::number => {
            let text = inner.as_str();
            match text.parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => Value::Float(
                    text.parse()
                        .map_err(|_| ParseError::Syntax(format!("Invalid number: {}", text)))?,
                ),
            }
        }
        Rule::string => {
            let s = inner.as_str();
            Value::String(s[1..s.len() - 1].replace("''", "'"))
        }
        Rule::kw_null => Value::Null,
        Rule::kw_true => Value::Bool(true),
        Rule::kw_false => Value::Bool(false),
        _ => return Err(ParseError::Syntax("Invalid literal".to_string())),
    };
    Ok(Expr::Literal(value))
}

fn parse_column_ref(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let parts: Vec<_> = pair.into_inner().map(|p| unquote(p.as_str())).collect();

    let col = match parts.as_slice() {
        [column] => ColumnRef { table: None, column: column.clone() },
        [table, column] => ColumnRef { table: Some(table.clone()), column: column.clone() },
        _ => return Err(ParseError::Syntax("Invalid column reference".to_string())),
    };

    Ok(Expr::Column(col))
}

fn parse_func_call(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let text = pair.as_str().trim().to_string();
    let mut inner = pair.into_inner();
    let name = next_pair(&mut inner, "function name")?.as_str().to_string();

    let mut args = Vec::new();
    let mut distinct = false;
    let mut star = false;
    if let Some(arg_list) = inner.next() {
        for arg in arg_list.into_inner() {
            match arg.as_rule() {
                Rule::star_arg => star = true,
                Rule::kw_distinct => distinct = true,
                _ => args.push(parse_expr(arg)?),
            }
        }
    }

    Ok(Expr::FuncCall(FuncCall { name, args, distinct, star, text }))
}

fn parse_case(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let mut operand = None;
    let mut branches = Vec::new();
    let mut otherwise = None;

    for part in clause_body(pair) {
        match part.as_rule() {
            Rule::expr => operand = Some(Box::new(parse_expr(part)?)),
            Rule::when_clause => {
                let mut arms = clause_body(part);
                let when = parse_expr(next_pair_from(&mut arms, "WHEN condition")?)?;
                let then = parse_expr(next_pair_from(&mut arms, "THEN result")?)?;
                branches.push((when, then));
            }
            Rule::else_clause => {
                let mut arms = clause_body(part);
                otherwise = Some(Box::new(parse_expr(next_pair_from(&mut arms, "ELSE result")?)?));
            }
            _ => {}
        }
    }

    Ok(Expr::Case { operand, branches, otherwise })
}

/// Strip double quotes from a quoted identifier.
pub(crate) fn unquote(ident: &str) -> String {
    let ident = ident.trim();
    ident
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(ident)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_query() {
        let stmt = parse("SELECT * FROM employees").unwrap();
        assert!(matches!(stmt.items[..], [SelectItem::Wildcard]));
        assert_eq!(stmt.from[0].name, "employees");
        assert!(stmt.where_clause.is_none());
    }

    #[test]
    fn test_clause_spans_cover_keywords() {
        let sql = "SELECT name FROM employees WHERE salary > 50000 ORDER BY name DESC LIMIT 3";
        let stmt = parse(sql).unwrap();

        let where_clause = stmt.where_clause.unwrap();
        assert_eq!(where_clause.span.slice(sql), "WHERE salary > 50000");
        assert_eq!(where_clause.text, "salary > 50000");

        let order_by = stmt.order_by.unwrap();
        assert_eq!(order_by.span.slice(sql), "ORDER BY name DESC");
        assert!(order_by.node[0].desc);

        assert_eq!(stmt.limit.unwrap().node, 3);
    }

    #[test]
    fn test_keyword_inside_string_literal() {
        let sql = "SELECT name FROM employees WHERE name = 'ORDER BY x' LIMIT 2";
        let stmt = parse(sql).unwrap();
        assert_eq!(stmt.where_clause.unwrap().text, "name = 'ORDER BY x'");
        assert!(stmt.order_by.is_none());
        assert_eq!(stmt.limit.unwrap().node, 2);
    }

    #[test]
    fn test_join_with_aliases() {
        let sql = "SELECT e.name, d.name AS department FROM employees e \
                   LEFT OUTER JOIN departments AS d ON e.dept_id = d.id";
        let stmt = parse(sql).unwrap();

        assert_eq!(stmt.from[0].alias.as_deref(), Some("e"));
        assert_eq!(stmt.joins.len(), 1);
        let join = &stmt.joins[0];
        assert_eq!(join.join_type, JoinType::Left);
        assert_eq!(join.table.name, "departments");
        assert_eq!(join.table.alias.as_deref(), Some("d"));
        assert_eq!(join.on_text.as_deref(), Some("e.dept_id = d.id"));

        let (left, right) = join.on.as_ref().unwrap().single_equality().unwrap();
        assert_eq!(left.to_string(), "e.dept_id");
        assert_eq!(right.to_string(), "d.id");

        match &stmt.items[1] {
            SelectItem::Expr { alias, text, .. } => {
                assert_eq!(alias.as_deref(), Some("department"));
                assert_eq!(text, "d.name");
            }
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn test_cross_join_has_no_condition() {
        let stmt = parse("SELECT * FROM employees CROSS JOIN departments").unwrap();
        assert_eq!(stmt.joins[0].join_type, JoinType::Cross);
        assert!(stmt.joins[0].on.is_none());
    }

    #[test]
    fn test_compound_condition_is_not_single_equality() {
        let stmt = parse(
            "SELECT * FROM employees e JOIN departments d ON e.dept_id = d.id AND d.budget > 10",
        )
        .unwrap();
        let on = stmt.joins[0].on.as_ref().unwrap();
        assert!(on.single_equality().is_none());
    }

    #[test]
    fn test_group_by_having_aggregates() {
        let sql = "SELECT dept_id, COUNT(*) FROM employees GROUP BY dept_id HAVING COUNT(*) > 2";
        let stmt = parse(sql).unwrap();

        let group_by = stmt.group_by.unwrap();
        assert_eq!(group_by.node.len(), 1);
        assert_eq!(group_by.node[0].text, "dept_id");

        let having = stmt.having.unwrap();
        let mut aggs = Vec::new();
        having.node.collect_aggregates(&mut aggs);
        assert_eq!(aggs.len(), 1);
        assert!(aggs[0].star);
        assert_eq!(aggs[0].text, "COUNT(*)");
    }

    #[test]
    fn test_predicates() {
        let sql = "SELECT * FROM employees WHERE dept_id IS NOT NULL \
                   AND salary BETWEEN 50000 AND 90000 \
                   AND name NOT LIKE 'A%' AND id IN (1, 2, 3)";
        let stmt = parse(sql).unwrap();
        let Expr::BinaryOp { op: BinOp::And, .. } = stmt.where_clause.unwrap().node else {
            panic!("expected conjunction");
        };
    }

    #[test]
    fn test_case_expression() {
        let sql = "SELECT name, CASE WHEN salary > 100000 THEN 'high' ELSE 'normal' END AS band FROM employees";
        let stmt = parse(sql).unwrap();
        match &stmt.items[1] {
            SelectItem::Expr { expr: Expr::Case { branches, otherwise, .. }, alias, .. } => {
                assert_eq!(branches.len(), 1);
                assert!(otherwise.is_some());
                assert_eq!(alias.as_deref(), Some("band"));
            }
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn test_comma_separated_from() {
        let stmt = parse("SELECT * FROM employees e, departments d WHERE e.dept_id = d.id").unwrap();
        assert_eq!(stmt.from.len(), 2);
        assert_eq!(stmt.from[1].qualifier(), "d");
    }

    #[test]
    fn test_rejects_subquery() {
        assert!(parse("SELECT * FROM (SELECT 1) t").is_err());
    }
}
