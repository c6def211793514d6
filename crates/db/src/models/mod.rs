pub mod artifact;
pub mod artifact_summary;
pub mod context_cache_entry;
pub mod cost_usage_record;
pub mod embedding;
pub mod entity_edge;
pub mod fact;
pub mod insight;
pub mod person_mention;
pub mod program_settings;
pub mod temporal_sequence;
pub mod topic;
