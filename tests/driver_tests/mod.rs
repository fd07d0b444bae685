//! Driver run stories
//!
//! - `managed_runs`: a cluster is launched, tested and always torn down
//! - `existing_runs`: tests run against a cluster someone else provides
//! - `handoff_runs`: CREATE leaves a cluster behind, DELETE removes it
//! - `fixtures`: container layout, scripted control plane and tool stand-ins

mod existing_runs;
mod fixtures;
mod handoff_runs;
mod managed_runs;
