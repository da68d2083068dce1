//! Pipeline stages for one document.
//!
//! Each submodule implements one step. The document driver in
//! [`crate::analyze`] wires them together; the batch orchestrator in
//! [`crate::batch`] runs documents one after another.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ plan ──▶ [ executor ⟲ retry ] × ranges ──▶ merge ──▶ upgrade
//! (URL/path) (ranges)  (render → encode → llm)         (dedupe)  (hi-fi)
//! ```
//!
//! 1. [`input`]: canonicalise a path or URL to a local PDF
//! 2. [`plan`]: pick a chunk size from bytes per page and seed the ranges
//! 3. [`profile`]: the render ladder walked down on every retry
//! 4. [`executor`]: one attempt at one range; renders via [`render`] and
//!    [`encode`], guards the payload size, calls [`llm`]
//! 5. [`retry`]: classify failures and decide retry, split, skip or abort
//! 6. [`postprocess`]: turn a model reply into a clean chunk result
//! 7. [`merge`]: dedupe slides by page and resolve metadata per field
//! 8. [`upgrade`]: re-render only the selected pages at high fidelity

pub mod encode;
pub mod executor;
pub mod input;
pub mod llm;
pub mod merge;
pub mod plan;
pub mod postprocess;
pub mod profile;
pub mod render;
pub mod retry;
pub mod upgrade;
