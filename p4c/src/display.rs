//! The display: a fixed-capacity stack of lexical scopes indexed by
//! static level, each an unbalanced binary search tree keyed on name in
//! insertion order (spec §3/§4.2).

use crate::idents::{ClassMask, IdentId, IdentTable};
use p4vm::constants::{MAXLEVEL, DISPLIMIT};

/// What a display slot was pushed for (spec §3/§4.3). `Block` is an
/// ordinary declaration scope; `WithConstRecord`/`WithVariableRecord` are
/// pushed by a `with` statement over a constant/variable record base;
/// `RecordTypeBeingDefined` is pushed while laying out a `record`'s field
/// list so `searchsection` can see only that record's own fields.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ScopeKind {
    Block,
    WithConstRecord,
    WithVariableRecord,
    RecordTypeBeingDefined,
}

struct BstNode {
    ident: IdentId,
    left: Option<usize>,
    right: Option<usize>,
}

/// An unbalanced BST whose shape is determined purely by insertion
/// order (spec §3: "insertion order determines shape") — no rebalancing,
/// matching the original's plain `llink`/`rlink` insert.
#[derive(Default)]
pub struct Bst {
    nodes: Vec<BstNode>,
    root: Option<usize>,
}

impl Bst {
    pub fn insert(&mut self, ident: IdentId, name: &str, names: &IdentTable) -> bool {
        let node = BstNode { ident, left: None, right: None };
        self.nodes.push(node);
        let new_index = self.nodes.len() - 1;

        if self.root.is_none() {
            self.root = Some(new_index);
            return true;
        }
        let mut cursor = self.root.unwrap();
        loop {
            let cursor_name = &names.get(self.nodes[cursor].ident).name;
            match name.cmp(cursor_name.as_str()) {
                std::cmp::Ordering::Equal => {
                    self.nodes.pop();
                    return false;
                }
                std::cmp::Ordering::Less => match self.nodes[cursor].left {
                    Some(next) => cursor = next,
                    None => {
                        self.nodes[cursor].left = Some(new_index);
                        return true;
                    }
                },
                std::cmp::Ordering::Greater => match self.nodes[cursor].right {
                    Some(next) => cursor = next,
                    None => {
                        self.nodes[cursor].right = Some(new_index);
                        return true;
                    }
                },
            }
        }
    }

    pub fn find(&self, name: &str, names: &IdentTable) -> Option<IdentId> {
        let mut cursor = self.root;
        while let Some(index) = cursor {
            let node = &self.nodes[index];
            let cursor_name = &names.get(node.ident).name;
            cursor = match name.cmp(cursor_name.as_str()) {
                std::cmp::Ordering::Equal => return Some(node.ident),
                std::cmp::Ordering::Less => node.left,
                std::cmp::Ordering::Greater => node.right,
            };
        }
        None
    }
}

pub struct Scope {
    pub kind: ScopeKind,
    pub bst: Bst,
    /// For `with` scopes: the base address's static level/displacement,
    /// or (if indirect) the temporary cell holding the base address.
    pub with_level: u8,
    pub with_displ: i32,
    pub with_indirect: bool,
}

impl Scope {
    fn new(kind: ScopeKind) -> Scope {
        Scope {
            kind,
            bst: Bst::default(),
            with_level: 0,
            with_displ: 0,
            with_indirect: false,
        }
    }
}

/// The display proper: scopes stacked by static level, searched
/// innermost-first (spec §4.2's `searchid`).
pub struct Display {
    scopes: Vec<Scope>,
}

impl Display {
    pub fn new() -> Display {
        let mut scopes = Vec::with_capacity(DISPLIMIT);
        scopes.push(Scope::new(ScopeKind::Block)); // level 0: standard identifiers
        Display { scopes }
    }

    pub fn level(&self) -> u8 {
        (self.scopes.len() - 1) as u8
    }

    pub fn push_block(&mut self) -> Result<(), ()> {
        if self.scopes.len() >= MAXLEVEL {
            return Err(());
        }
        self.scopes.push(Scope::new(ScopeKind::Block));
        Ok(())
    }

    pub fn push_with(&mut self, kind: ScopeKind, level: u8, displ: i32, indirect: bool) -> Result<(), ()> {
        if self.scopes.len() >= DISPLIMIT {
            return Err(());
        }
        let mut scope = Scope::new(kind);
        scope.with_level = level;
        scope.with_displ = displ;
        scope.with_indirect = indirect;
        self.scopes.push(scope);
        Ok(())
    }

    pub fn push_record_being_defined(&mut self) {
        self.scopes.push(Scope::new(ScopeKind::RecordTypeBeingDefined));
    }

    pub fn pop(&mut self) -> Scope {
        self.scopes.pop().expect("display underflow")
    }

    pub fn current_mut(&mut self) -> &mut Scope {
        self.scopes.last_mut().unwrap()
    }

    pub fn current(&self) -> &Scope {
        self.scopes.last().unwrap()
    }

    /// Inserts into the current scope's BST; `false` means a duplicate
    /// (spec §4.2: diagnostic 101).
    pub fn enterid(&mut self, ident: IdentId, name: &str, names: &IdentTable) -> bool {
        self.scopes.last_mut().unwrap().bst.insert(ident, name, names)
    }

    /// Walks the display from the innermost scope outward, returning the
    /// first binding whose class matches `mask` (spec §4.2's `searchid`).
    pub fn searchid(&self, name: &str, mask: &[ClassMask], names: &IdentTable) -> Option<IdentId> {
        for scope in self.scopes.iter().rev() {
            if let Some(id) = scope.bst.find(name, names) {
                if mask.contains(&names.get(id).kind.class()) {
                    return Some(id);
                }
            }
        }
        None
    }

    /// A single BST lookup, used for record fields and for detecting a
    /// forward-declared routine already present in the *current* scope.
    pub fn searchsection(&self, name: &str, names: &IdentTable) -> Option<IdentId> {
        self.scopes.last().unwrap().bst.find(name, names)
    }
}

impl Default for Display {
    fn default() -> Display {
        Display::new()
    }
}
