//! `${...}` substitution for step inputs and config values.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("template regex is valid"))
}

fn generic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\$\{([^}]+)\}")
}

/// Resolve environment variable references in a string.
/// Supports `${ENV_VAR}` and `${ENV_VAR:-default}` syntax.
pub fn resolve_env_vars(input: &str) -> String {
    generic_re()
        .replace_all(input, |caps: &Captures| {
            let var_expr = &caps[1];
            if let Some(idx) = var_expr.find(":-") {
                let var_name = &var_expr[..idx];
                let default_val = &var_expr[idx + 2..];
                std::env::var(var_name).unwrap_or_else(|_| default_val.to_string())
            } else {
                std::env::var(var_expr).unwrap_or_else(|_| format!("${{{}}}", var_expr))
            }
        })
        .to_string()
}

/// Render the workflow input for substitution: strings verbatim, anything
/// else as compact JSON.
pub fn render_input(input: &Value) -> String {
    match input {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve template variables in a step input.
///
/// Supported patterns:
/// - `${input}` the workflow input
/// - `${steps.<StepName>.output}` output from a previous step
/// - `${variables.<key>}` or `${<key>}` from the variables block
/// - `${ENV_VAR}` from the environment
///
/// Every reference is resolved in one pass over the template text; inserted
/// values are never scanned again. Unknown references are left in place.
pub fn resolve_template(
    template: &str,
    input: &Value,
    variables: &HashMap<String, String>,
    step_outputs: &HashMap<String, String>,
) -> String {
    generic_re()
        .replace_all(template, |caps: &Captures| {
            let key = &caps[1];
            let resolved = if key == "input" {
                Some(render_input(input))
            } else if let Some(step) = key.strip_prefix("steps.").and_then(|k| k.strip_suffix(".output")) {
                step_outputs.get(step).cloned()
            } else if let Some(name) = key.strip_prefix("variables.") {
                variables.get(name).cloned()
            } else if key.starts_with("steps.") {
                None
            } else {
                variables.get(key).cloned().or_else(|| std::env::var(key).ok())
            };
            resolved.unwrap_or_else(|| format!("${{{}}}", key))
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("CONDUCTOR_TEST_TEMPLATE_VAR", "hello");
        assert_eq!(resolve_env_vars("${CONDUCTOR_TEST_TEMPLATE_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix-${CONDUCTOR_TEST_TEMPLATE_VAR}-suffix"),
            "prefix-hello-suffix"
        );
        assert_eq!(resolve_env_vars("${CONDUCTOR_NONEXISTENT_VAR:-fallback}"), "fallback");
        std::env::remove_var("CONDUCTOR_TEST_TEMPLATE_VAR");
    }

    #[test]
    fn test_resolve_template() {
        let mut outputs = HashMap::new();
        outputs.insert("collect".to_string(), "3 alerts".to_string());
        let mut vars = HashMap::new();
        vars.insert("service".to_string(), "checkout".to_string());

        let input = json!("page from oncall");
        assert_eq!(
            resolve_template("Previous: ${steps.collect.output}", &input, &vars, &outputs),
            "Previous: 3 alerts"
        );
        assert_eq!(
            resolve_template("${variables.service} / ${service}", &input, &vars, &outputs),
            "checkout / checkout"
        );
        assert_eq!(resolve_template("In: ${input}", &input, &vars, &outputs), "In: page from oncall");
        assert_eq!(
            resolve_template("${input}", &json!({"n": 1}), &vars, &outputs),
            r#"{"n":1}"#
        );
        assert_eq!(
            resolve_template("${steps.missing.output}", &input, &vars, &outputs),
            "${steps.missing.output}"
        );
    }

    #[test]
    fn test_substituted_values_are_not_expanded_again() {
        std::env::set_var("CONDUCTOR_TEST_TEMPLATE_SECRET", "hunter2");
        let mut outputs = HashMap::new();
        outputs.insert("agent".to_string(), "agent said ${CONDUCTOR_TEST_TEMPLATE_SECRET}".to_string());
        let vars = HashMap::new();

        assert_eq!(
            resolve_template("${steps.agent.output}", &json!(null), &vars, &outputs),
            "agent said ${CONDUCTOR_TEST_TEMPLATE_SECRET}"
        );
        assert_eq!(
            resolve_template("${input}", &json!("user typed ${CONDUCTOR_TEST_TEMPLATE_SECRET}"), &vars, &outputs),
            "user typed ${CONDUCTOR_TEST_TEMPLATE_SECRET}"
        );
        // A reference written in the template itself still resolves.
        assert_eq!(
            resolve_template("key=${CONDUCTOR_TEST_TEMPLATE_SECRET}", &json!(null), &vars, &outputs),
            "key=hunter2"
        );
        std::env::remove_var("CONDUCTOR_TEST_TEMPLATE_SECRET");
    }
}
