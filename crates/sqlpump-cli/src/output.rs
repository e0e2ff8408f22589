use sqlpump_pg::{PgResult, ResultStatus};

/// Splits a script on `;`, ignoring semicolons inside quoted text.
pub fn split_statements(input: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in input.chars() {
        match quote {
            Some(open) if ch == open => quote = None,
            Some(_) => {}
            None if ch == '\'' || ch == '"' => quote = Some(ch),
            None if ch == ';' => {
                push_statement(&mut statements, &mut current);
                continue;
            }
            None => {}
        }
        current.push(ch);
    }
    push_statement(&mut statements, &mut current);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let sql = current.trim();
    if !sql.is_empty() {
        statements.push(sql.to_string());
    }
    current.clear();
}

/// Tab-separated rows under a header line, then the command tag.
/// NULL is written as `\N`.
pub fn render(result: &PgResult) -> String {
    let mut lines = Vec::new();
    match result.status() {
        ResultStatus::Rows => {
            lines.push(result.columns.join("\t"));
            for row in &result.rows {
                let cells: Vec<&str> = row.iter().map(|v| v.as_deref().unwrap_or("\\N")).collect();
                lines.push(cells.join("\t"));
            }
        }
        ResultStatus::Empty => lines.push("(empty query)".to_string()),
        ResultStatus::Command => {}
        ResultStatus::Error => {
            if let Some(error) = &result.error {
                lines.push(error.to_string());
            }
        }
    }
    if let Some(tag) = &result.command_tag {
        lines.push(tag.clone());
    }
    let mut text = lines.join("\n");
    text.push('\n');
    text
}
