//! Shared context and errors for compiling configs into runtime evaluators.
//!
//! Filters, mutations, queries, and game values are tagged-union configs;
//! the `compile` factories in their modules are the only place where the
//! config-to-evaluator mapping lives. Compilation is where configuration
//! invariants are enforced, so the per-tick path never fails.

use crate::types::{CollectiveId, ResourceId, TagId, VibeId, MAX_TAGS};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while compiling configs at engine init.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("tag id {0} exceeds the tag capacity of {MAX_TAGS}")]
    TagOutOfRange(TagId),
    #[error("resource id {0} is not in the resource table")]
    UnknownResource(ResourceId),
    #[error("vibe id {0} is not in the vibe table")]
    UnknownVibe(VibeId),
    #[error("collective {0:?} is not configured")]
    UnknownCollective(String),
    #[error("game value mutation target must be an inventory or stat value")]
    ReadOnlyGameValue,
    #[error("event {0:?} names unknown fallback event {1:?}")]
    UnknownFallback(String, String),
    #[error("handler name must not be empty")]
    UnnamedHandler,
}

/// Lookup tables available while compiling configs.
#[derive(Debug, Clone, Default)]
pub struct CompileCtx {
    pub collective_ids: HashMap<String, CollectiveId>,
    pub num_resources: usize,
    pub num_vibes: usize,
}

impl CompileCtx {
    pub fn check_tag(&self, tag: TagId) -> Result<TagId, CompileError> {
        if (tag as usize) < MAX_TAGS {
            Ok(tag)
        } else {
            Err(CompileError::TagOutOfRange(tag))
        }
    }

    pub fn check_resource(&self, resource: ResourceId) -> Result<ResourceId, CompileError> {
        if (resource as usize) < self.num_resources {
            Ok(resource)
        } else {
            Err(CompileError::UnknownResource(resource))
        }
    }

    pub fn check_vibe(&self, vibe: VibeId) -> Result<VibeId, CompileError> {
        if (vibe as usize) < self.num_vibes {
            Ok(vibe)
        } else {
            Err(CompileError::UnknownVibe(vibe))
        }
    }

    pub fn collective(&self, name: &str) -> Result<CollectiveId, CompileError> {
        self.collective_ids
            .get(name)
            .copied()
            .ok_or_else(|| CompileError::UnknownCollective(name.to_owned()))
    }
}
