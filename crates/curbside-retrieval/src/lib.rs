//! Curbside retrieval crate: filter evaluators, search planning, relevance
//! refinement and the retrieval pipeline that strings them together.
//!
//! The pipeline turns a free-text request into a ranked list of report ids.
//! Every collaborator failure along the way degrades to a documented fallback
//! instead of failing the query.

pub mod filter;
pub mod generation;
pub mod merge;
pub mod pipeline;
pub mod plan;
pub mod refine;

pub use filter::{FilterEvaluator, FilterField, FilterMatch, FilterOutcome, InvalidFilter, LocationMatch};
pub use generation::{generator_from_config, DisabledGenerator, HttpTextGenerator, TextGenerator};
pub use merge::{AppliedFilter, ToolOutcomes};
pub use pipeline::{LocationFilter, PipelineRequest, PipelineResult, RetrievalPipeline, Stage};
pub use plan::{PlanFilters, PlanOutcome, Planner, SearchPlan};
pub use refine::{RefineOutcome, Refiner};
