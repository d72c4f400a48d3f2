/*
 * Workflow Task Orchestrator
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Workflow task orchestrator core
//!
//! This crate materializes workflow definitions into numbered tasks, drives
//! their stages in order under approval gates and cancellation, and runs
//! each job as a container workload on a chosen cluster: executor context in
//! a configmap, workload launch, sentinel-based completion, output
//! propagation, log shipping, and guaranteed resource cleanup.

pub mod approval;
pub mod cluster;
pub mod config;
pub mod dockerhost;
pub mod error;
pub mod jobs;
pub mod logstore;
pub mod materializer;
pub mod model;
pub mod notify;
pub mod preview;
pub mod render;
pub mod stage;
pub mod store;
pub mod supervisor;
pub mod vars;
pub mod workload;

// Re-export the types most callers wire together
pub use approval::{ApprovalDecision, ApprovalHub, ApprovalKey};
pub use config::OrchestratorConfig;
pub use error::{Error, Result};
pub use jobs::{JobEnv, NoopStepHandler, StepHandler};
pub use materializer::{NoopRepoRegistry, RepoRegistry, TaskMaterializer};
pub use model::{Status, Workflow, WorkflowTask};
pub use supervisor::{StageApprovalRequest, TaskManager};
