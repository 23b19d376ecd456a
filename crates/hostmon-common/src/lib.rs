//! Shared data model for the hostmon agent.
//!
//! Everything that crosses a subsystem boundary lives here: the stored
//! [`types::SamplePoint`], the shaped probe snapshots, alert severities and
//! events, and the canonical tag-string encoding.

pub mod tags;
pub mod types;
