//! SQLStep AST - parser, pre-flight validation and clause extraction

pub mod ast;
pub mod descriptor;
pub mod parser;
pub mod validate;

pub use ast::*;
pub use descriptor::{ClauseKind, JoinClause, OrderTerm, QueryDescriptor, SelectColumn, SelectKind, SortDirection};
pub use parser::{parse, ParseError};
pub use validate::{check_statement_keyword, classify, normalize, target_table, validate, StatementKind, UnsupportedStatement, ValidationError};
