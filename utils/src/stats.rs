//! Per-command inbound traffic counters.

use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CommandStats {
    pub received: u64,
    pub rejected: u64,
    pub penalized: u64,
}

/// Counters for a fixed set of commands. Unknown commands are ignored.
#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct TrafficStats {
    commands: BTreeMap<&'static str, CommandStats>,
}

impl TrafficStats {
    pub fn new(commands: &[&'static str]) -> Self {
        Self {
            commands: commands
                .iter()
                .map(|&c| (c, CommandStats::default()))
                .collect(),
        }
    }

    pub fn received(&mut self, command: &str) {
        self.update(command, |s| s.received += 1);
    }

    /// Outcome of a processed message: `dos > 0` is a penalty, otherwise
    /// a plain rejection unless `accepted`.
    pub fn outcome(&mut self, command: &str, accepted: bool, dos: u32) {
        self.update(command, |s| {
            if dos > 0 {
                s.penalized += 1;
            } else if !accepted {
                s.rejected += 1;
            }
        });
    }

    pub fn get(&self, command: &str) -> CommandStats {
        self.commands.get(command).copied().unwrap_or_default()
    }

    fn update(&mut self, command: &str, f: impl FnOnce(&mut CommandStats)) {
        match self.commands.get_mut(command) {
            Some(stats) => f(stats),
            None => tracing::trace!(command, "untracked command"),
        }
    }
}
