//! Governance engine for multi-agent coding workflows.
//!
//! Conductor sits between a host agent pipeline and its side effects. Before
//! an agent is invoked or a file is edited, the host asks for a verdict; after
//! a task runs, it reports the outcome. Two workflows are governed:
//!
//! - **Ralph**: a bounded implementation loop for one story, with iteration
//!   limits, heartbeat liveness and explicit continuations.
//! - **Maestro**: a recon → interview → plan approval → execution pipeline
//!   driven by user phrases.
//!
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (state machines, decision table,
//!   retry ladder). No I/O; time is always passed in.
//! - **[`io`]**: Side-effecting operations (session store, archive, audit,
//!   learning sink, config).
//!
//! Orchestration modules ([`controller`], [`orchestrator`], [`enforce`],
//! [`feedback`], [`recovery`], [`status`], [`sweep`]) combine the two to
//! implement CLI commands.

pub mod controller;
pub mod core;
pub mod enforce;
pub mod exit_codes;
pub mod feedback;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod recovery;
pub mod status;
pub mod sweep;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workspace;
