//! The executor input document.
//!
//! A [`JobContext`] is the entire contract between the orchestrator and the
//! generic executor image: env, credentials, steps, declared outputs, and
//! workspace layout, serialized to YAML and mounted through a configmap.

use serde::{Deserialize, Serialize};

use crate::model::{JobTask, JobTaskFreestyleSpec, Step, TaskContext};
use crate::render::resolve_output_refs;

/// Key inside the configmap holding the serialized context.
pub const CONFIG_MAP_KEY: &str = "job-config.yaml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobContext {
    pub name: String,
    /// Plaintext env as `KEY=VALUE` entries.
    #[serde(default)]
    pub envs: Vec<String>,
    /// Credential env as `KEY=VALUE`; the executor masks these in logs.
    #[serde(default)]
    pub secret_envs: Vec<String>,
    pub workflow_name: String,
    #[serde(default)]
    pub workspace: String,
    pub task_id: i64,
    /// Names of outputs the executor must report in its termination message.
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub paths: String,
}

impl JobContext {
    /// Assemble the document for a freestyle/build job. Env values are
    /// resolved against the variable context so upstream outputs referenced
    /// as `$(workflow.<job>.<name>)` arrive as concrete values; env entries
    /// flagged as credentials go to `secret_envs`.
    #[must_use]
    pub fn build(job: &JobTask, spec: &JobTaskFreestyleSpec, ctx: &TaskContext) -> JobContext {
        let mut envs = Vec::new();
        let mut secret_envs = Vec::new();
        for kv in &spec.properties.envs {
            let value = resolve_output_refs(&kv.value, &ctx.vars);
            let entry = format!("{}={}", kv.key, value);
            if kv.is_credential {
                secret_envs.push(entry);
            } else {
                envs.push(entry);
            }
        }

        JobContext {
            name: job.name.clone(),
            envs,
            secret_envs,
            workflow_name: ctx.workflow_name.clone(),
            workspace: ctx.workspace.clone(),
            task_id: ctx.task_id,
            outputs: job.outputs.iter().map(|o| o.name.clone()).collect(),
            steps: spec.steps.clone(),
            paths: spec.properties.paths.clone(),
        }
    }

    pub fn to_yaml(&self) -> crate::error::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobTaskSpec, JobType, KeyVal, Output, Status};
    use crate::vars::VariableContext;

    fn task_ctx() -> TaskContext {
        TaskContext {
            workflow_name: "ci".to_string(),
            project_name: "demo".to_string(),
            task_id: 4,
            creator: "alice".to_string(),
            workspace: "/workspace".to_string(),
            vars: VariableContext::new(),
        }
    }

    fn freestyle_job(envs: Vec<KeyVal>) -> (JobTask, JobTaskFreestyleSpec) {
        let spec = JobTaskFreestyleSpec {
            properties: crate::model::JobProperties { envs, ..Default::default() },
            steps: vec![],
        };
        let job = JobTask {
            name: "build".to_string(),
            job_type: JobType::Freestyle,
            status: Status::Created,
            start_time: 0,
            end_time: 0,
            error: String::new(),
            spec: JobTaskSpec::Freestyle(spec.clone()),
            outputs: vec![Output { name: "VERSION".to_string(), description: String::new() }],
        };
        (job, spec)
    }

    #[test]
    fn partitions_credential_envs() {
        let (job, spec) = freestyle_job(vec![
            KeyVal { key: "A".to_string(), value: "1".to_string(), is_credential: false },
            KeyVal { key: "TOKEN".to_string(), value: "hush".to_string(), is_credential: true },
        ]);
        let ctx = JobContext::build(&job, &spec, &task_ctx());
        assert_eq!(ctx.envs, vec!["A=1"]);
        assert_eq!(ctx.secret_envs, vec!["TOKEN=hush"]);
        assert_eq!(ctx.outputs, vec!["VERSION"]);
    }

    #[test]
    fn env_values_resolve_upstream_outputs() {
        let (job, spec) = freestyle_job(vec![KeyVal {
            key: "IMAGE".to_string(),
            value: "$(workflow.build.IMAGE)".to_string(),
            is_credential: false,
        }]);
        let task_ctx = task_ctx();
        task_ctx.vars.set("workflow.build.IMAGE", "foo:1");
        let ctx = JobContext::build(&job, &spec, &task_ctx);
        assert_eq!(ctx.envs, vec!["IMAGE=foo:1"]);
    }

    #[test]
    fn yaml_round_trip_preserves_document() {
        let (job, spec) = freestyle_job(vec![KeyVal {
            key: "A".to_string(),
            value: "1".to_string(),
            is_credential: false,
        }]);
        let ctx = JobContext::build(&job, &spec, &task_ctx());
        let yaml = ctx.to_yaml().unwrap();
        let back: JobContext = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(ctx, back);
    }
}
