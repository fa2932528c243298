use super::error::{Error, ErrorKind};
use std::collections::HashMap;

pub(crate) const MIN_PRECEDENCE: i32 = 1;
pub(crate) const MAX_PRECEDENCE: i32 = 100;
pub(crate) const DEFAULT_PRECEDENCE: i32 = 30;

/// Binding strength of every binary operator the parser knows about.
#[derive(Debug, Clone)]
pub(crate) struct OperatorTable {
    precedence: HashMap<char, i32>,
}

impl Default for OperatorTable {
    fn default() -> Self {
        let precedence = [('<', 10), ('+', 20), ('-', 20), ('*', 40)]
            .iter()
            .cloned()
            .collect();
        OperatorTable { precedence }
    }
}

impl OperatorTable {
    pub(crate) fn precedence(&self, op: char) -> Option<i32> {
        if !op.is_ascii() {
            return None;
        }
        match self.precedence.get(&op) {
            Some(&p) if p > 0 => Some(p),
            _ => None,
        }
    }

    /// Registers `op`, handing back whatever was installed before.
    pub(crate) fn install(&mut self, op: char, precedence: i32) -> Result<Option<i32>, Error> {
        if precedence < MIN_PRECEDENCE || precedence > MAX_PRECEDENCE {
            return Err(ErrorKind::InvalidPrecedence.into());
        }
        Ok(self.precedence.insert(op, precedence))
    }

    pub(crate) fn restore(&mut self, op: char, previous: Option<i32>) {
        match previous {
            Some(p) => self.precedence.insert(op, p),
            None => self.precedence.remove(&op),
        };
    }
}
