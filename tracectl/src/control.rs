// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Tracing runtime control.

use ordermap::OrderMap;
use std::collections::HashSet;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, OnceLock};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, Registry, filter::LevelFilter, prelude::*, reload};

use crate::targets::DECLARED_TARGETS;
use crate::trace_target;

trace_target!("tracectl", LevelFilter::INFO, &[]);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TracectlError {
    #[error("invalid level '{0}'")]
    InvalidLevel(String),
    #[error("invalid directive '{0}': expected tag=level")]
    InvalidDirective(String),
}

#[derive(Debug, Clone)]
pub struct TargetCfg {
    pub target: &'static str,
    pub name: &'static str,
    pub level: LevelFilter,
    pub tags: Vec<&'static str>,
}

#[derive(Debug)]
struct TargetDb {
    default: LevelFilter,
    targets: OrderMap<&'static str, TargetCfg>,
    tags: OrderMap<&'static str, HashSet<&'static str>>,
}

impl TargetDb {
    fn new(default: LevelFilter) -> Self {
        let mut db = Self {
            default,
            targets: OrderMap::new(),
            tags: OrderMap::new(),
        };
        for declared in DECLARED_TARGETS {
            db.register(declared.target, declared.name, declared.level, declared.tags);
        }
        db
    }

    fn register(
        &mut self,
        target: &'static str,
        name: &'static str,
        level: LevelFilter,
        tags: &'static [&'static str],
    ) {
        // a target can always be addressed by its own name
        let mut tags = tags.to_vec();
        if !tags.contains(&name) {
            tags.push(name);
        }
        for tag in &tags {
            self.tags.entry(*tag).or_default().insert(target);
        }
        let cfg = TargetCfg {
            target,
            name,
            level,
            tags,
        };
        if self.targets.insert(target, cfg).is_some() {
            warn!("Tracing target {target} declared more than once");
        }
    }

    fn env_filter(&self) -> EnvFilter {
        self.targets
            .values()
            .filter_map(|t| format!("{}={}", t.target, t.level).parse().ok())
            .fold(EnvFilter::new(self.default.to_string()), |filter, directive| {
                filter.add_directive(directive)
            })
    }

    fn set_tag_level(&mut self, tag: &str, level: LevelFilter) -> usize {
        let Some(members) = self.tags.get(tag) else {
            return 0;
        };
        let mut changed = 0;
        for target in self.targets.values_mut() {
            if members.contains(target.target) && target.level != level {
                target.level = level;
                changed += 1;
            }
        }
        changed
    }
}

impl Display for TargetDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{:>40} │ {:>6} │ TAGS", "TARGET", "LEVEL")?;
        for t in self.targets.values() {
            writeln!(f, "{:>40} │ {:>6} │ {}", t.target, t.level, t.tags.join(","))?;
        }
        write!(f, "{:>40} │ {:>6} │ --", "(default)", self.default)
    }
}

#[derive(Debug)]
pub struct TracingControl {
    db: Mutex<TargetDb>,
    reload_filter: reload::Handle<EnvFilter, Registry>,
}

static TRACING_CTL: OnceLock<TracingControl> = OnceLock::new();

/// Get the process-wide [`TracingControl`], installing the subscriber on first use.
pub fn get_trace_ctl() -> &'static TracingControl {
    TRACING_CTL.get_or_init(TracingControl::new)
}

impl TracingControl {
    fn new() -> Self {
        let db = TargetDb::new(LevelFilter::INFO);
        let (filter, reload_filter) = reload::Layer::new(db.env_filter());
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_line_number(true)
            .with_target(true)
            .with_thread_names(true)
            .with_level(true);

        // the embedding process may have installed its own subscriber already
        if tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .is_err()
        {
            eprintln!("tracectl: a global tracing subscriber is already installed");
        }
        Self {
            db: Mutex::new(db),
            reload_filter,
        }
    }

    pub fn init() {
        get_trace_ctl();
    }

    fn db(&self) -> MutexGuard<'_, TargetDb> {
        self.db.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn reload(&self, db: &TargetDb) {
        if let Err(e) = self.reload_filter.reload(db.env_filter()) {
            error!("Failed to reload tracing filter: {e}");
        }
    }

    pub fn set_tag_level(&self, tag: &str, level: LevelFilter) {
        let mut db = self.db();
        let changed = db.set_tag_level(tag, level);
        if changed > 0 {
            self.reload(&db);
        }
        info!("Log level for tag '{tag}' set to {level} ({changed} targets changed)");
    }

    pub fn set_level_all(&self, level: LevelFilter) {
        let mut db = self.db();
        db.targets.values_mut().for_each(|t| t.level = level);
        self.reload(&db);
    }

    pub fn set_default_level(&self, level: LevelFilter) {
        let mut db = self.db();
        if db.default != level {
            db.default = level;
            self.reload(&db);
        }
    }

    #[must_use]
    pub fn default_level(&self) -> LevelFilter {
        self.db().default
    }

    #[must_use]
    pub fn target(&self, target: &str) -> Option<TargetCfg> {
        self.db().targets.get(target).cloned()
    }

    #[must_use]
    pub fn targets_by_tag(&self, tag: &str) -> Vec<TargetCfg> {
        let db = self.db();
        let Some(members) = db.tags.get(tag) else {
            return vec![];
        };
        db.targets
            .values()
            .filter(|t| members.contains(t.target))
            .cloned()
            .collect()
    }

    /// Parse comma-separated `tag=level` items. `default` and `all` are reserved tags.
    fn parse_config(input: &str) -> Result<OrderMap<String, LevelFilter>, TracectlError> {
        let mut parsed = OrderMap::new();
        for item in input.split(',').map(str::trim) {
            let (tag, level) = item
                .split_once('=')
                .ok_or_else(|| TracectlError::InvalidDirective(item.to_string()))?;
            let level = LevelFilter::from_str(level.trim())
                .map_err(|_| TracectlError::InvalidLevel(level.trim().to_string()))?;
            parsed.insert(tag.trim().to_string(), level);
        }
        Ok(parsed)
    }

    /// Apply a level configuration such as `default=warn,all=info,flow-mgmt=debug`.
    ///
    /// # Errors
    ///
    /// Fails without changing anything if any item is malformed.
    pub fn setup_from_string(&self, input: &str) -> Result<(), TracectlError> {
        let config = Self::parse_config(input)?;
        if let Some(level) = config.get("default") {
            self.set_default_level(*level);
        }
        if let Some(level) = config.get("all") {
            self.set_level_all(*level);
        }
        config
            .iter()
            .filter(|(tag, _)| !matches!(tag.as_str(), "default" | "all"))
            .for_each(|(tag, level)| self.set_tag_level(tag, *level));
        Ok(())
    }

    pub fn dump(&self) {
        let db = self.db();
        info!("\n{db}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custom_target;
    use serial_test::serial;

    #[test]
    #[serial]
    fn declared_targets_are_known_before_use() {
        custom_target!("tracectl-test-late", LevelFilter::WARN, &["tracectl-test"]);
        let tctl = get_trace_ctl();
        let cfg = tctl.target("tracectl-test-late").expect("declared at link time");
        assert_eq!(cfg.level, LevelFilter::WARN);
        assert!(cfg.tags.contains(&"tracectl-test"));
        assert!(cfg.tags.contains(&"tracectl-test-late"));
        assert!(tctl.target(module_path!()).is_none());
        assert!(tctl.target("vrouter_tracectl::control").is_some());
    }

    #[test]
    #[serial]
    fn tag_level_changes_all_members() {
        const TAG: &str = "tracectl-shared";
        custom_target!("tracectl-a", LevelFilter::DEBUG, &[TAG]);
        custom_target!("tracectl-b", LevelFilter::ERROR, &[TAG]);

        let tctl = get_trace_ctl();
        assert_eq!(tctl.targets_by_tag(TAG).len(), 2);
        tctl.set_tag_level(TAG, LevelFilter::OFF);
        assert!(
            tctl.targets_by_tag(TAG)
                .iter()
                .all(|t| t.level == LevelFilter::OFF)
        );
        assert!(tctl.targets_by_tag("no-such-tag").is_empty());
    }

    #[test]
    #[serial]
    fn setup_from_string() {
        custom_target!("tracectl-c", LevelFilter::INFO, &[]);
        let tctl = get_trace_ctl();

        tctl.setup_from_string("default=warn, tracectl-c=trace").unwrap();
        assert_eq!(tctl.default_level(), LevelFilter::WARN);
        assert_eq!(tctl.target("tracectl-c").unwrap().level, LevelFilter::TRACE);

        assert_eq!(
            tctl.setup_from_string("tracectl-c=loud"),
            Err(TracectlError::InvalidLevel("loud".to_string()))
        );
        assert_eq!(
            tctl.setup_from_string("tracectl-c=error, oops"),
            Err(TracectlError::InvalidDirective("oops".to_string()))
        );
        // a failed parse leaves the levels untouched
        assert_eq!(tctl.target("tracectl-c").unwrap().level, LevelFilter::TRACE);
        tctl.dump();
    }
}
