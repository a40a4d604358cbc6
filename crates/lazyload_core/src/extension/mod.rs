//! Extension declaration contracts.
//!
//! This module defines what a caller declares about an extension, how the
//! registry admits declarations into tiers, and the on-disk plugin manifest
//! those declarations are usually built from.

pub mod declaration;
pub mod manifest;
pub mod registry;
