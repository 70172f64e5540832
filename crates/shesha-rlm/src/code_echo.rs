//! Renders a past execution back into the driver conversation.

use crate::boundary::{wrap_untrusted, Boundary};
use std::collections::BTreeMap;

/// The single source of truth for what the driver sees about a past
/// execution: the code it ran, its (boundary-wrapped) output, and the
/// resulting variable names. Output never appears outside the markers.
pub fn format_code_echo(code: &str, output: &str, vars: &BTreeMap<String, String>, boundary: &Boundary) -> String {
    let mut out = format!(
        "Code executed:\n```python\n{code}\n```\n\nREPL output:\n{}",
        wrap_untrusted(output, boundary)
    );
    if !vars.is_empty() {
        let names: Vec<&str> = vars.keys().map(|s| s.as_str()).collect();
        out.push_str(&format!("\nREPL variables: {}", names.join(", ")));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_without_vars_omits_the_variables_line() {
        let boundary = Boundary::generate();
        let echo = format_code_echo("print(1)", "1", &BTreeMap::new(), &boundary);
        assert!(echo.contains("Code executed:"));
        assert!(echo.contains("```python\nprint(1)\n```"));
        assert!(echo.contains("REPL output:"));
        assert!(!echo.contains("REPL variables:"));
    }

    #[test]
    fn echo_with_vars_lists_variable_names() {
        let boundary = Boundary::generate();
        let mut vars = BTreeMap::new();
        vars.insert("x".to_string(), "str".to_string());
        vars.insert("y".to_string(), "int".to_string());
        let echo = format_code_echo("x = 1", "", &vars, &boundary);
        assert!(echo.contains("REPL variables: x, y"));
    }

    #[test]
    fn output_is_wrapped_between_boundary_markers() {
        let boundary = Boundary::generate();
        let echo = format_code_echo("1", "secret data", &BTreeMap::new(), &boundary);
        let begin = format!("{boundary}_BEGIN");
        let end = format!("{boundary}_END");
        assert!(echo.contains(&begin));
        assert!(echo.contains(&end));
        let begin_pos = echo.find(&begin).unwrap();
        let output_pos = echo.find("secret data").unwrap();
        let end_pos = echo.find(&end).unwrap();
        assert!(begin_pos < output_pos && output_pos < end_pos);
    }
}
