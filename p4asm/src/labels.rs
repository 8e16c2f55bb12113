//! Label table and threaded forward-reference resolution.
//!
//! An undefined label's `val` holds the instruction slot of the most
//! recent unresolved reference to it; that slot's own operand field in
//! turn holds the *previous* unresolved slot, terminated by `-1`. When the
//! label is finally defined, the whole chain is walked and every `q`
//! along it is overwritten with the resolved address.

use std::collections::HashMap;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LabelState {
    Entered,
    Defined,
}

#[derive(Clone, Copy, Debug)]
pub struct LabelRecord {
    pub val: i32,
    pub state: LabelState,
}

impl Default for LabelRecord {
    fn default() -> LabelRecord {
        LabelRecord {
            val: -1,
            state: LabelState::Entered,
        }
    }
}

#[derive(Default)]
pub struct LabelTable {
    table: HashMap<u32, LabelRecord>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum LabelError {
    DuplicateLabel(u32),
}

impl LabelTable {
    pub fn new() -> LabelTable {
        LabelTable::default()
    }

    fn entry(&mut self, label: u32) -> &mut LabelRecord {
        self.table.entry(label).or_insert_with(LabelRecord::default)
    }

    /// Called while assembling a label-taking operand at slot `pc`. Returns
    /// the `q` value to pack into that instruction right now: the resolved
    /// address if already defined, or the previous thread head (chaining
    /// this slot onto it) if still forward-referenced.
    pub fn lookup(&mut self, label: u32, pc: i32) -> i32 {
        let record = self.entry(label);
        match record.state {
            LabelState::Defined => record.val,
            LabelState::Entered => {
                let previous = record.val;
                record.val = pc;
                previous
            }
        }
    }

    /// Defines `label` at `value`, walking the forward-reference thread
    /// and resolving every `q` field on it via `resolve`.
    ///
    /// Re-defining an already-`Defined` label to the *same* value is
    /// tolerated rather than rejected: the assembler's second pass
    /// (spec §4.5) walks the identical line stream over the same label
    /// table, so every label-definition line is seen twice with the same
    /// computed value. Only a genuine duplicate — the same label number
    /// defined at two different values — is an error.
    pub fn define(
        &mut self,
        label: u32,
        value: i32,
        mut resolve: impl FnMut(i32) -> i32,
    ) -> Result<(), LabelError> {
        let record = self.entry(label);
        if record.state == LabelState::Defined {
            return if record.val == value {
                Ok(())
            } else {
                Err(LabelError::DuplicateLabel(label))
            };
        }
        let mut slot = record.val;
        while slot != -1 {
            slot = resolve(slot);
        }
        let record = self.entry(label);
        record.val = value;
        record.state = LabelState::Defined;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.table.clear();
    }

    pub fn all_defined(&self) -> bool {
        self.table.values().all(|r| r.state == LabelState::Defined)
    }

    /// Labels referenced but never given a definition; spec §8 property 3
    /// requires this be empty once assembly finishes.
    pub fn entered_labels(&self) -> Vec<u32> {
        let mut labels: Vec<u32> = self
            .table
            .iter()
            .filter(|(_, r)| r.state == LabelState::Entered)
            .map(|(label, _)| *label)
            .collect();
        labels.sort_unstable();
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_reference_resolves_through_thread() {
        let mut labels = LabelTable::new();
        let mut code = vec![0i32; 4];

        code[1] = labels.lookup(5, 1);
        code[2] = labels.lookup(5, 2);

        labels
            .define(5, 100, |slot| {
                let prev = code[slot as usize];
                code[slot as usize] = 100;
                prev
            })
            .unwrap();

        assert_eq!(code[1], 100);
        assert_eq!(code[2], 100);
    }

    #[test]
    fn backward_reference_resolves_immediately() {
        let mut labels = LabelTable::new();
        labels.define(5, 50, |_| -1).unwrap();
        assert_eq!(labels.lookup(5, 10), 50);
    }

    #[test]
    fn duplicate_definition_errors() {
        let mut labels = LabelTable::new();
        labels.define(1, 10, |_| -1).unwrap();
        assert_eq!(
            labels.define(1, 20, |_| -1),
            Err(LabelError::DuplicateLabel(1))
        );
    }

    #[test]
    fn redefining_to_the_same_value_is_a_no_op() {
        // a second assembler pass over the same line stream re-defines
        // every label at the value it already has; that must not error.
        let mut labels = LabelTable::new();
        labels.define(1, 10, |_| -1).unwrap();
        assert_eq!(labels.define(1, 10, |_| -1), Ok(()));
    }
}
