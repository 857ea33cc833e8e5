// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Targets are collected at link time: every crate of the flow engine declares the targets it
//! logs to, and [`crate::TracingControl`] picks them all up when it is built.

use crate::LevelFilter;
use linkme::distributed_slice;

/// One declared target, its default level and the tags it can be addressed by.
#[derive(Debug)]
pub struct DeclaredTarget {
    pub(crate) target: &'static str,
    pub(crate) name: &'static str,
    pub(crate) level: LevelFilter,
    pub(crate) tags: &'static [&'static str],
}

impl DeclaredTarget {
    #[must_use]
    pub const fn new(
        target: &'static str,
        name: &'static str,
        level: LevelFilter,
        tags: &'static [&'static str],
    ) -> Self {
        Self {
            target,
            name,
            level,
            tags,
        }
    }
}

#[distributed_slice]
pub static DECLARED_TARGETS: [DeclaredTarget];

#[doc(hidden)]
#[macro_export]
macro_rules! declare_target {
    ($target:expr, $name:expr, $level:expr, $tags:expr) => {
        const _: () = {
            // callers name the level as `LevelFilter::...`
            #[allow(unused_imports)]
            use $crate::LevelFilter;

            #[::linkme::distributed_slice($crate::targets::DECLARED_TARGETS)]
            #[linkme(crate = ::linkme)]
            static TARGET: $crate::targets::DeclaredTarget =
                $crate::targets::DeclaredTarget::new($target, $name, $level, $tags);
        };
    };
}

/// Declare the calling module as a target, under `$name`.
#[macro_export]
macro_rules! trace_target {
    ($name:expr, $level:expr, $tags:expr) => {
        $crate::declare_target!(module_path!(), $name, $level, $tags);
    };
}

/// Declare a target that is not a module path, as used with `target: "flow-export"`.
#[macro_export]
macro_rules! custom_target {
    ($target:expr, $level:expr, $tags:expr) => {
        $crate::declare_target!($target, $target, $level, $tags);
    };
}
