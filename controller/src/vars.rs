//! Per-task variable context.
//!
//! Jobs publish their declared outputs here under
//! `workflow.<job_name>.<output_name>`; later stages read them when their
//! env values reference `$(workflow.<job>.<name>)`. One context exists per
//! running task and dies with it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

/// Key under which a job output is published.
#[must_use]
pub fn output_key(job_name: &str, output_name: &str) -> String {
    format!("workflow.{job_name}.{output_name}")
}

impl VariableContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner
            .lock()
            .expect("variable context poisoned")
            .insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().expect("variable context poisoned").get(key).cloned()
    }

    /// Point-in-time copy, used when rendering a job's env block.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.inner.lock().expect("variable context poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::{output_key, VariableContext};

    #[test]
    fn output_key_shape() {
        assert_eq!(output_key("build", "VERSION"), "workflow.build.VERSION");
    }

    #[test]
    fn concurrent_writers_all_land() {
        let ctx = VariableContext::new();
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let ctx = ctx.clone();
                std::thread::spawn(move || ctx.set(format!("k{i}"), format!("v{i}")))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ctx.snapshot().len(), 16);
        assert_eq!(ctx.get("k7").as_deref(), Some("v7"));
    }
}
