//! Variable rendering over job specs.
//!
//! Two reference syntaxes exist at different points of the lifecycle:
//!
//! * `${name}`: global variables (`workflow.name`, `task_id`, `creator`,
//!   declared params), substituted once at materialization. Unresolved
//!   references stay literal.
//! * `$(workflow.<job>.<output>)`: job outputs, resolved from the variable
//!   context when a downstream job builds its executor document.
//!
//! Specs are walked as yaml trees so every string-valued field is covered
//! regardless of the variant it lives in.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::model::{Param, Workflow};
use crate::vars::VariableContext;

/// Wrappers the UI puts around values it fixed for preview rendering.
pub const FIXED_VALUE_PREFIX: &str = "<+fixed>";
pub const FIXED_VALUE_SUFFIX: &str = "</+fixed>";

fn global_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z0-9_.\-]+)\}").expect("global ref regex"))
}

fn output_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\(([A-Za-z0-9_.\-]+)\)").expect("output ref regex"))
}

/// Apply `render` to every string scalar in a yaml tree, in place.
pub fn render_strings(value: &mut serde_yaml::Value, render: &dyn Fn(&str) -> String) {
    match value {
        serde_yaml::Value::String(s) => *s = render(s),
        serde_yaml::Value::Sequence(seq) => {
            for item in seq {
                render_strings(item, render);
            }
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                render_strings(item, render);
            }
        }
        _ => {}
    }
}

fn substitute_globals(input: &str, lookup: &HashMap<String, String>) -> String {
    global_ref_re()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            lookup.get(name).cloned().unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn strip_fixed_markers(input: &str) -> String {
    if !input.contains(FIXED_VALUE_PREFIX) {
        return input.to_string();
    }
    input.replace(FIXED_VALUE_PREFIX, "").replace(FIXED_VALUE_SUFFIX, "")
}

/// Global substitution table for a task.
#[must_use]
pub fn global_variables(
    workflow_name: &str,
    task_id: i64,
    creator: &str,
    params: &[Param],
) -> HashMap<String, String> {
    let mut table = HashMap::new();
    table.insert("workflow.name".to_string(), workflow_name.to_string());
    table.insert("task_id".to_string(), task_id.to_string());
    table.insert("creator".to_string(), creator.to_string());
    for param in params {
        let value = if param.value.is_empty() { param.default.clone() } else { param.value.clone() };
        table.insert(param.name.clone(), value);
    }
    table
}

/// Drop the UI's fixed-value wrappers from every string field of every job
/// spec and param, so rendering sees runtime values only.
pub fn remove_fixed_value_marks(workflow: &mut Workflow) {
    for param in &mut workflow.params {
        param.value = strip_fixed_markers(&param.value);
    }
    for stage in &mut workflow.stages {
        for job in &mut stage.jobs {
            render_strings(&mut job.spec, &strip_fixed_markers);
        }
    }
}

/// Substitute global variables into every string field of every job spec.
/// References with no binding are left literal for later resolution.
pub fn render_global_variables(workflow: &mut Workflow, task_id: i64, creator: &str) {
    let table = global_variables(&workflow.name, task_id, creator, &workflow.params);
    let render = move |s: &str| substitute_globals(s, &table);
    for stage in &mut workflow.stages {
        for job in &mut stage.jobs {
            render_strings(&mut job.spec, &render);
        }
    }
}

/// Resolve `$(workflow.<job>.<output>)` references against the variable
/// context. Unknown references remain literal.
#[must_use]
pub fn resolve_output_refs(input: &str, vars: &VariableContext) -> String {
    let snapshot = vars.snapshot();
    output_ref_re()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            snapshot.get(&caps[1]).cloned().unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Job, JobType, WorkflowStage};

    fn workflow_with_env(value: &str) -> Workflow {
        let spec: serde_yaml::Value = serde_yaml::from_str(&format!(
            "properties:\n  envs:\n    - key: TAG\n      value: '{value}'\n"
        ))
        .unwrap();
        Workflow {
            name: "release".to_string(),
            stages: vec![WorkflowStage {
                name: "build".to_string(),
                jobs: vec![Job {
                    name: "build".to_string(),
                    job_type: JobType::Freestyle,
                    skipped: false,
                    spec,
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn env_value(workflow: &Workflow) -> String {
        workflow.stages[0].jobs[0].spec["properties"]["envs"][0]["value"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn globals_are_substituted_and_unknowns_stay_literal() {
        let mut wf = workflow_with_env("${workflow.name}-${task_id}-${mystery}");
        render_global_variables(&mut wf, 7, "alice");
        assert_eq!(env_value(&wf), "release-7-${mystery}");
    }

    #[test]
    fn params_render_with_default_fallback() {
        let mut wf = workflow_with_env("${ENV_NAME}");
        wf.params.push(Param {
            name: "ENV_NAME".to_string(),
            default: "staging".to_string(),
            ..Default::default()
        });
        render_global_variables(&mut wf, 1, "alice");
        assert_eq!(env_value(&wf), "staging");
    }

    #[test]
    fn fixed_markers_are_stripped_before_rendering() {
        let mut wf = workflow_with_env("<+fixed>v1.2</+fixed>");
        remove_fixed_value_marks(&mut wf);
        assert_eq!(env_value(&wf), "v1.2");
    }

    #[test]
    fn output_refs_resolve_from_context() {
        let vars = VariableContext::new();
        vars.set("workflow.build.IMAGE", "foo:1");
        assert_eq!(resolve_output_refs("img=$(workflow.build.IMAGE)", &vars), "img=foo:1");
        assert_eq!(
            resolve_output_refs("$(workflow.build.MISSING)", &vars),
            "$(workflow.build.MISSING)"
        );
    }
}
