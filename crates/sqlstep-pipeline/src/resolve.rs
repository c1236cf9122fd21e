//! Column naming across joins
//!
//! Once a join has run, every column of the running table is prefixed with
//! the table it came from (`employees_name`, `departments_name`). A scope
//! remembers which query qualifier maps to which prefix.

use sqlstep_ast::ColumnRef;

pub fn qualified_name(prefix: &str, column: &str) -> String {
    format!("{}_{}", prefix, column)
}

#[derive(Debug, Clone, Default)]
pub struct ColumnScope {
    /// (qualifier as written in the query, column prefix), in FROM/JOIN order.
    prefixes: Vec<(String, String)>,
}

impl ColumnScope {
    /// Scope of a single scanned table whose columns carry no prefix.
    pub fn unprefixed() -> Self {
        Self::default()
    }

    pub fn is_prefixed(&self) -> bool {
        !self.prefixes.is_empty()
    }

    /// Number of tables contributing to the running table.
    pub fn width(&self) -> usize {
        self.prefixes.len().max(1)
    }

    pub fn add(&mut self, qualifier: impl Into<String>, prefix: impl Into<String>) {
        self.prefixes.push((qualifier.into(), prefix.into()));
    }

    pub fn prefix_for(&self, qualifier: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .find(|(q, _)| q.eq_ignore_ascii_case(qualifier))
            .map(|(_, p)| p.as_str())
    }

    /// Prefix for a newly joined table: the table name, or the alias when
    /// the table name is already taken (self joins).
    pub fn choose_prefix(&self, table: &str, alias: Option<&str>) -> String {
        let taken = |p: &str| self.prefixes.iter().any(|(_, existing)| existing == p);
        if !taken(table) {
            return table.to_string();
        }
        if let Some(alias) = alias {
            if !taken(alias) {
                return alias.to_string();
            }
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}{}", table, n);
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Column of `columns` a reference reads from, if any.
    pub fn resolve(&self, columns: &[String], col: &ColumnRef) -> Option<String> {
        let present = |name: &str| columns.iter().any(|c| c == name);

        if self.is_prefixed() {
            match &col.table {
                Some(qualifier) => {
                    if let Some(prefix) = self.prefix_for(qualifier) {
                        let name = qualified_name(prefix, &col.column);
                        if present(&name) {
                            return Some(name);
                        }
                    }
                }
                None => {
                    for (_, prefix) in &self.prefixes {
                        let name = qualified_name(prefix, &col.column);
                        if present(&name) {
                            return Some(name);
                        }
                    }
                }
            }
        }

        if present(&col.column) {
            return Some(col.column.clone());
        }
        columns
            .iter()
            .find(|c| c.eq_ignore_ascii_case(&col.column))
            .cloned()
    }

    /// Columns belonging to one qualifier, with their unprefixed names.
    pub fn columns_of<'a>(&self, columns: &'a [String], qualifier: &str) -> Vec<(&'a str, String)> {
        match self.prefix_for(qualifier) {
            Some(prefix) => {
                let head = format!("{}_", prefix);
                columns
                    .iter()
                    .filter_map(|c| c.strip_prefix(&head).map(|bare| (c.as_str(), bare.to_string())))
                    .collect()
            }
            None if !self.is_prefixed() => columns.iter().map(|c| (c.as_str(), c.clone())).collect(),
            None => Vec::new(),
        }
    }
}
