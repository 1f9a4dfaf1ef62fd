//! Insight Assembler
//!
//! Turns a signal that cleared the confidence scorer into a published
//! insight with evidence citations and the confidence breakdown.

pub mod assembler;
pub mod narrator;

pub use assembler::{insight_id, ExplainabilityFactors, Insight, InsightAssembler};
pub use narrator::{HttpNarrator, Narrative, NarrativeGenerator, NarrativeRequest, TemplateNarrator};
