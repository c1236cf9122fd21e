//! Engine error messages → learner-facing hints

/// Rewrite a known engine error into a hint; anything else passes through.
pub fn translate_error(message: &str, known_tables: &[String]) -> String {
    if let Some(table) = missing_table(message) {
        let available = if known_tables.is_empty() {
            "No tables are loaded.".to_string()
        } else {
            format!("Available tables: {}.", known_tables.join(", "))
        };
        return format!("Table '{}' does not exist. {}", table, available);
    }

    if let Some(column) = missing_column(message) {
        return format!(
            "Column '{}' does not exist. Check the spelling, and when the query uses \
             table aliases make sure the prefix (for example e.name) points at the right table.",
            column
        );
    }

    if message.to_ascii_lowercase().contains("syntax error") || message.contains("Parser Error") {
        return format!(
            "SQL syntax error: {}. Check keyword spelling and the commas between columns; \
             text values need single quotes.",
            first_line(message)
        );
    }

    message.to_string()
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or(message).trim()
}

fn between<'a>(message: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = message.find(start)? + start.len();
    let rest = &message[from..];
    let to = rest.find(end).unwrap_or(rest.len());
    let found = rest[..to].trim().trim_matches('"');
    (!found.is_empty()).then_some(found)
}

fn missing_table(message: &str) -> Option<&str> {
    between(message, "no such table:", "\n")
        .or_else(|| between(message, "Table with name ", " does not exist"))
}

fn missing_column(message: &str) -> Option<&str> {
    between(message, "no such column:", "\n")
        .or_else(|| between(message, "Referenced column \"", "\""))
        .or_else(|| between(message, "Column with name ", " does not exist"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> Vec<String> {
        vec!["departments".to_string(), "employees".to_string()]
    }

    #[test]
    fn test_missing_table_lists_known_tables() {
        let msg = translate_error("no such table: employes", &tables());
        assert_eq!(msg, "Table 'employes' does not exist. Available tables: departments, employees.");

        let msg = translate_error(
            "Catalog Error: Table with name employes does not exist!\nDid you mean \"employees\"?",
            &tables(),
        );
        assert!(msg.starts_with("Table 'employes' does not exist."));
        assert!(msg.contains("employees"));
    }

    #[test]
    fn test_missing_column_suggests_alias_check() {
        let msg = translate_error(
            "Binder Error: Referenced column \"nme\" not found in FROM clause!",
            &tables(),
        );
        assert!(msg.starts_with("Column 'nme' does not exist."));
        assert!(msg.contains("aliases"));

        assert!(translate_error("no such column: e.nme", &[]).contains("'e.nme'"));
    }

    #[test]
    fn test_syntax_error_hint() {
        let msg = translate_error("Parser Error: syntax error at or near \"FORM\"", &tables());
        assert!(msg.starts_with("SQL syntax error: Parser Error"));
        assert!(msg.contains("single quotes"));
    }

    #[test]
    fn test_unknown_errors_pass_through() {
        assert_eq!(
            translate_error("Conversion Error: could not convert", &tables()),
            "Conversion Error: could not convert"
        );
        assert_eq!(translate_error("", &[]), "");
    }
}
