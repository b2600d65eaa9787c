//! Reversible commands and the transaction log.
//!
//! Every mutating engine operation is recorded as a [`Command`] that can
//! produce its own inverse. Commit drops the log; rollback applies the
//! inverses newest-first. No snapshot of the fact set is ever taken.

use std::sync::Arc;
use std::time::{Duration, Instant};

use trellis_foundation::Fact;

use crate::builder::BuildStats;
use crate::rule::{Pattern, Rule};

// =============================================================================
// Command
// =============================================================================

/// One applied, reversible change.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// A fact was stored and propagated.
    AssertFact {
        /// The fact as stored.
        fact: Fact,
    },
    /// A fact was retracted and deleted.
    RetractFact {
        /// The fact as it was before deletion.
        fact: Fact,
    },
    /// A fact was replaced under the same id.
    UpdateFact {
        /// Previous version.
        before: Fact,
        /// New version.
        after: Fact,
    },
    /// A rule was compiled.
    AddRule {
        /// The rule.
        rule: Arc<Rule>,
        /// Its build stats, restored when a removal is undone.
        stats: BuildStats,
    },
    /// A rule was removed.
    RemoveRule {
        /// The rule.
        rule: Arc<Rule>,
        /// Its build stats at removal.
        stats: BuildStats,
    },
}

impl Command {
    /// The command that undoes this one.
    #[must_use]
    pub fn inverse(&self) -> Command {
        match self {
            Self::AssertFact { fact } => Self::RetractFact { fact: fact.clone() },
            Self::RetractFact { fact } => Self::AssertFact { fact: fact.clone() },
            Self::UpdateFact { before, after } => Self::UpdateFact {
                before: after.clone(),
                after: before.clone(),
            },
            Self::AddRule { rule, stats } => Self::RemoveRule {
                rule: rule.clone(),
                stats: *stats,
            },
            Self::RemoveRule { rule, stats } => Self::AddRule {
                rule: rule.clone(),
                stats: *stats,
            },
        }
    }

    /// Rough size in bytes of what the command keeps alive.
    #[must_use]
    pub fn footprint(&self) -> usize {
        let own = std::mem::size_of::<Self>();
        match self {
            Self::AssertFact { fact } | Self::RetractFact { fact } => own + fact.footprint(),
            Self::UpdateFact { before, after } => own + before.footprint() + after.footprint(),
            Self::AddRule { rule, .. } | Self::RemoveRule { rule, .. } => {
                own + std::mem::size_of::<Rule>()
                    + rule.name.len()
                    + rule.patterns.len() * std::mem::size_of::<Pattern>()
                    + rule.condition.as_ref().map_or(0, |c| c.size())
                    + rule.actions.len() * std::mem::size_of::<crate::rule::Action>()
            }
        }
    }

    /// Short name for logs and traces.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AssertFact { .. } => "assert-fact",
            Self::RetractFact { .. } => "retract-fact",
            Self::UpdateFact { .. } => "update-fact",
            Self::AddRule { .. } => "add-rule",
            Self::RemoveRule { .. } => "remove-rule",
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// An explicit transaction: the commands applied since `begin`.
#[derive(Debug)]
pub struct Transaction {
    id: u64,
    commands: Vec<Command>,
    footprint: usize,
    started: Instant,
}

impl Transaction {
    /// Starts an empty transaction.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            commands: Vec::new(),
            footprint: 0,
            started: Instant::now(),
        }
    }

    /// Transaction id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Appends an applied command.
    pub fn record(&mut self, command: Command) {
        self.footprint += command.footprint();
        self.commands.push(command);
    }

    /// Appends several applied commands in order.
    pub fn extend(&mut self, commands: impl IntoIterator<Item = Command>) {
        for command in commands {
            self.record(command);
        }
    }

    /// Commands in application order.
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of recorded commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Sum of command footprints in bytes.
    #[must_use]
    pub fn footprint(&self) -> usize {
        self.footprint
    }

    /// Time since `begin`.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Consumes the transaction, yielding the inverses newest-first.
    pub fn into_inverses(self) -> impl Iterator<Item = Command> {
        self.commands.into_iter().rev().map(|c| c.inverse())
    }
}
