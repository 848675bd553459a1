//! Group module.
//!
//! This module contains the view groups: views whose members are the
//! union, the intersection or the complement of other views.

pub mod group;
pub use self::group::*;
