/// Command Module
///
/// The command descriptor bound onto a connection before execution, plus
/// the small enumerations that travel with it.
use crate::core::db::parameter::Parameter;
use serde::Deserialize;
use std::ops::{BitOr, BitOrAssign};

/// How the command text is interpreted by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Literal SQL text
    #[default]
    Text,
    /// Name of a stored procedure
    StoredProcedure,
    /// Name of a table read in full
    TableDirect,
    /// A raw kind code this crate does not know about
    #[serde(skip)]
    Unrecognized(i32),
}

impl CommandKind {
    /// Maps the conventional numeric codes (1, 4, 512) to a kind.
    pub fn from_raw(code: i32) -> Self {
        match code {
            1 => CommandKind::Text,
            4 => CommandKind::StoredProcedure,
            512 => CommandKind::TableDirect,
            other => CommandKind::Unrecognized(other),
        }
    }

    pub fn raw(&self) -> i32 {
        match self {
            CommandKind::Text => 1,
            CommandKind::StoredProcedure => 4,
            CommandKind::TableDirect => 512,
            CommandKind::Unrecognized(code) => *code,
        }
    }
}

/// Execution hints passed when a row cursor is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandBehavior(u8);

impl CommandBehavior {
    pub const DEFAULT: CommandBehavior = CommandBehavior(0);
    /// Only the first result set is of interest
    pub const SINGLE_RESULT: CommandBehavior = CommandBehavior(1);
    /// Only the first row is of interest
    pub const SINGLE_ROW: CommandBehavior = CommandBehavior(1 << 1);
    /// Closing the cursor closes the connection
    pub const CLOSE_CONNECTION: CommandBehavior = CommandBehavior(1 << 2);

    pub fn contains(&self, other: CommandBehavior) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl BitOr for CommandBehavior {
    type Output = CommandBehavior;

    fn bitor(self, rhs: Self) -> Self::Output {
        CommandBehavior(self.0 | rhs.0)
    }
}

impl BitOrAssign for CommandBehavior {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Isolation requested when a transaction begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    Unspecified,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
    Snapshot,
}

/// Handle for the transaction bound to a tool's command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    id: u64,
    isolation: IsolationLevel,
}

impl Transaction {
    pub(crate) fn new(id: u64, isolation: IsolationLevel) -> Self {
        Transaction { id, isolation }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }
}

/// A command ready to be executed by a provider.
///
/// A tool keeps one descriptor and rebinds it for every call; rebinding
/// always drops the parameters of the previous call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Command {
    text: String,
    kind: CommandKind,
    timeout: u32,
    parameters: Vec<Parameter>,
    transaction: Option<Transaction>,
}

impl Command {
    pub fn new() -> Self {
        Command::default()
    }

    pub fn with_text(text: &str) -> Self {
        Command {
            text: text.to_string(),
            ..Command::default()
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Timeout in seconds; zero means wait indefinitely.
    pub fn timeout(&self) -> u32 {
        self.timeout
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Providers write output values back through this.
    pub fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.parameters
    }

    pub fn transaction(&self) -> Option<Transaction> {
        self.transaction
    }

    pub(crate) fn rebind(&mut self, kind: CommandKind, text: &str, timeout: u32) {
        self.text.clear();
        self.text.push_str(text);
        self.kind = kind;
        self.timeout = timeout;
        self.parameters.clear();
    }

    pub(crate) fn add_parameter(&mut self, mut param: Parameter) {
        param.normalize_null();
        self.parameters.push(param);
    }

    pub(crate) fn set_transaction(&mut self, transaction: Option<Transaction>) {
        self.transaction = transaction;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::value::Value;

    #[test]
    fn test_behavior_flags() {
        let fetch = CommandBehavior::CLOSE_CONNECTION | CommandBehavior::SINGLE_RESULT;
        assert!(fetch.contains(CommandBehavior::CLOSE_CONNECTION));
        assert!(fetch.contains(CommandBehavior::SINGLE_RESULT));
        assert!(!fetch.contains(CommandBehavior::SINGLE_ROW));
        assert!(fetch.contains(CommandBehavior::DEFAULT));

        let mut one = CommandBehavior::DEFAULT;
        one |= CommandBehavior::SINGLE_ROW;
        assert_eq!(one, CommandBehavior::SINGLE_ROW);
    }

    #[test]
    fn test_kind_codes() {
        for kind in [
            CommandKind::Text,
            CommandKind::StoredProcedure,
            CommandKind::TableDirect,
        ] {
            assert_eq!(CommandKind::from_raw(kind.raw()), kind);
        }
        assert_eq!(CommandKind::from_raw(99), CommandKind::Unrecognized(99));
    }

    #[test]
    fn test_rebind_clears_previous_parameters() {
        let mut cmd = Command::with_text("SELECT 1");
        cmd.add_parameter(Parameter::new("@a", 1).unwrap());
        cmd.add_parameter(Parameter::absent("@b").unwrap());
        assert_eq!(cmd.parameters()[1].value(), Some(&Value::Null));

        cmd.rebind(CommandKind::StoredProcedure, "usp_next", 15);
        assert!(cmd.parameters().is_empty());
        assert_eq!(cmd.text(), "usp_next");
        assert_eq!(cmd.kind(), CommandKind::StoredProcedure);
        assert_eq!(cmd.timeout(), 15);
    }
}
