//! Rules, actions, and the custom action hook.
//!
//! Actions are a closed set of built-ins plus one `Custom` variant resolved
//! by name through an [`ActionRegistry`] supplied by the embedding program.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use trellis_condition::Condition;
use trellis_foundation::{Fact, FactId, FieldMap, Result, Value};

// =============================================================================
// Rule
// =============================================================================

/// One pattern of a rule: a variable bound to facts of a type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    /// Variable name (`p` in `p: Person`).
    pub var: Arc<str>,
    /// Fact type matched.
    pub type_name: Arc<str>,
}

impl Pattern {
    /// Creates a pattern.
    #[must_use]
    pub fn new(var: impl Into<Arc<str>>, type_name: impl Into<Arc<str>>) -> Self {
        Self {
            var: var.into(),
            type_name: type_name.into(),
        }
    }
}

/// A production rule as handed over by the parser.
#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    /// Unique name.
    pub name: Arc<str>,
    /// Priority (higher fires first).
    pub salience: i32,
    /// Patterns, in binding order.
    pub patterns: Vec<Pattern>,
    /// Condition over the pattern variables; `None` matches every combination.
    pub condition: Option<Condition>,
    /// Actions run when the rule fires, in order.
    pub actions: Vec<Action>,
}

impl Rule {
    /// Creates a rule with no patterns, condition, or actions.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            salience: 0,
            patterns: Vec::new(),
            condition: None,
            actions: Vec::new(),
        }
    }

    /// Builder method to add a pattern.
    #[must_use]
    pub fn with_pattern(mut self, var: impl Into<Arc<str>>, type_name: impl Into<Arc<str>>) -> Self {
        self.patterns.push(Pattern::new(var, type_name));
        self
    }

    /// Builder method to set the condition.
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Builder method to add an action.
    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Builder method to set the salience.
    #[must_use]
    pub fn with_salience(mut self, salience: i32) -> Self {
        self.salience = salience;
        self
    }

    /// Returns the pattern binding `var`.
    #[must_use]
    pub fn pattern(&self, var: &str) -> Option<&Pattern> {
        self.patterns.iter().find(|p| &*p.var == var)
    }
}

// =============================================================================
// Actions
// =============================================================================

/// Field assignments evaluated against an activation's bindings.
pub type FieldExprs = Vec<(Arc<str>, Condition)>;

/// Action descriptor carried by a terminal node.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Assert a new fact.
    Insert {
        /// Type of the new fact.
        type_name: Arc<str>,
        /// Field values.
        fields: FieldExprs,
    },
    /// Retract the fact bound to `var`.
    Retract {
        /// Bound variable.
        var: Arc<str>,
    },
    /// Replace fields of the fact bound to `var`.
    Update {
        /// Bound variable.
        var: Arc<str>,
        /// New field values; unmentioned fields keep their value.
        fields: FieldExprs,
    },
    /// Write a message to the log.
    Log {
        /// Message; each `{}` is replaced by the next argument.
        message: String,
        /// Arguments.
        args: Vec<Condition>,
    },
    /// Write a message to the engine's output.
    Print {
        /// Message; each `{}` is replaced by the next argument.
        message: String,
        /// Arguments.
        args: Vec<Condition>,
    },
    /// Invoke a registered handler.
    Custom {
        /// Handler name.
        name: Arc<str>,
        /// Arguments.
        args: Vec<Condition>,
    },
}

impl Action {
    /// `Insert` builder.
    #[must_use]
    pub fn insert<N, I>(type_name: impl Into<Arc<str>>, fields: I) -> Self
    where
        N: Into<Arc<str>>,
        I: IntoIterator<Item = (N, Condition)>,
    {
        Self::Insert {
            type_name: type_name.into(),
            fields: fields.into_iter().map(|(n, c)| (n.into(), c)).collect(),
        }
    }

    /// `Retract` builder.
    #[must_use]
    pub fn retract(var: impl Into<Arc<str>>) -> Self {
        Self::Retract { var: var.into() }
    }

    /// `Update` builder.
    #[must_use]
    pub fn update<N, I>(var: impl Into<Arc<str>>, fields: I) -> Self
    where
        N: Into<Arc<str>>,
        I: IntoIterator<Item = (N, Condition)>,
    {
        Self::Update {
            var: var.into(),
            fields: fields.into_iter().map(|(n, c)| (n.into(), c)).collect(),
        }
    }

    /// `Log` builder.
    #[must_use]
    pub fn log(message: impl Into<String>, args: impl IntoIterator<Item = Condition>) -> Self {
        Self::Log {
            message: message.into(),
            args: args.into_iter().collect(),
        }
    }

    /// `Print` builder.
    #[must_use]
    pub fn print(message: impl Into<String>, args: impl IntoIterator<Item = Condition>) -> Self {
        Self::Print {
            message: message.into(),
            args: args.into_iter().collect(),
        }
    }

    /// `Custom` builder.
    #[must_use]
    pub fn custom(name: impl Into<Arc<str>>, args: impl IntoIterator<Item = Condition>) -> Self {
        Self::Custom {
            name: name.into(),
            args: args.into_iter().collect(),
        }
    }

    /// Name of the action as exposed to the runtime.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Retract { .. } => "retract",
            Self::Update { .. } => "update",
            Self::Log { .. } => "log",
            Self::Print { .. } => "print",
            Self::Custom { name, .. } => name,
        }
    }

    /// Every expression the action evaluates.
    pub fn expressions(&self) -> impl Iterator<Item = &Condition> {
        let (fields, args): (&[(Arc<str>, Condition)], &[Condition]) = match self {
            Self::Insert { fields, .. } | Self::Update { fields, .. } => (fields, &[]),
            Self::Log { args, .. } | Self::Print { args, .. } | Self::Custom { args, .. } => {
                (&[], args)
            }
            Self::Retract { .. } => (&[], &[]),
        };
        fields.iter().map(|(_, c)| c).chain(args.iter())
    }
}

/// Substitutes `{}` placeholders in order; leftover arguments are appended.
#[must_use]
pub fn render_message(message: &str, args: &[Value]) -> String {
    let mut out = String::with_capacity(message.len());
    let mut args = args.iter();
    let mut rest = message;
    while let Some(at) = rest.find("{}") {
        out.push_str(&rest[..at]);
        match args.next() {
            Some(arg) => out.push_str(&arg.to_string()),
            None => out.push_str("{}"),
        }
        rest = &rest[at + 2..];
    }
    out.push_str(rest);
    for arg in args {
        out.push(' ');
        out.push_str(&arg.to_string());
    }
    out
}

// =============================================================================
// Custom Action Hook
// =============================================================================

/// What a custom handler sees of an activation.
#[derive(Debug)]
pub struct ActionContext<'a> {
    /// Rule that fired.
    pub rule: &'a str,
    /// Handler name.
    pub action: &'a str,
    /// Evaluated arguments.
    pub args: &'a [Value],
    /// Token bindings, in pattern order.
    pub bindings: &'a [(Arc<str>, Fact)],
}

impl ActionContext<'_> {
    /// Returns the fact bound to `var`.
    #[must_use]
    pub fn fact(&self, var: &str) -> Option<&Fact> {
        self.bindings
            .iter()
            .find(|(name, _)| &**name == var)
            .map(|(_, fact)| fact)
    }
}

/// A change requested by a custom handler, applied by the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionEffect {
    /// Assert a new fact with a freshly allocated id.
    Insert {
        /// Fact type.
        type_name: Arc<str>,
        /// Field values.
        fields: FieldMap,
    },
    /// Retract a fact.
    Retract(FactId),
    /// Replace fields of a fact.
    Update {
        /// Target fact.
        fact: FactId,
        /// New field values.
        fields: FieldMap,
    },
    /// Hand a value back to the caller of the top-level operation.
    Emit {
        /// Channel name.
        name: Arc<str>,
        /// Payload.
        value: Value,
    },
}

/// A user-registered action.
pub trait ActionHandler: Send + Sync {
    /// Runs the action.
    ///
    /// # Errors
    /// An error fails the top-level operation, which is then rolled back.
    fn execute(&self, context: &ActionContext<'_>) -> Result<Vec<ActionEffect>>;
}

impl<F> ActionHandler for F
where
    F: Fn(&ActionContext<'_>) -> Result<Vec<ActionEffect>> + Send + Sync,
{
    fn execute(&self, context: &ActionContext<'_>) -> Result<Vec<ActionEffect>> {
        self(context)
    }
}

/// Name to handler map for `Custom` actions.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<Arc<str>, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a handler.
    pub fn register(&mut self, name: impl Into<Arc<str>>, handler: impl ActionHandler + 'static) {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    /// Builder form of [`ActionRegistry::register`].
    #[must_use]
    pub fn with(mut self, name: impl Into<Arc<str>>, handler: impl ActionHandler + 'static) -> Self {
        self.register(name, handler);
        self
    }

    /// Returns a handler by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Returns true if a handler is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("ActionRegistry")
            .field("handlers", &names)
            .finish()
    }
}
