use fxhash::FxBuildHasher;
use indexmap::IndexMap;

use crate::atom_table::*;

pub const MAX_PRIORITY: u16 = 1200;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum OpClass {
    Prefix,
    Infix,
    Postfix,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum OpSpec {
    XFX,
    XFY,
    YFX,
    XF,
    YF,
    FX,
    FY,
}

impl OpSpec {
    pub fn class(self) -> OpClass {
        match self {
            OpSpec::FX | OpSpec::FY => OpClass::Prefix,
            OpSpec::XFX | OpSpec::XFY | OpSpec::YFX => OpClass::Infix,
            OpSpec::XF | OpSpec::YF => OpClass::Postfix,
        }
    }

    pub fn as_atom(self) -> Atom {
        match self {
            OpSpec::XFX => atom!("xfx"),
            OpSpec::XFY => atom!("xfy"),
            OpSpec::YFX => atom!("yfx"),
            OpSpec::XF => atom!("xf"),
            OpSpec::YF => atom!("yf"),
            OpSpec::FX => atom!("fx"),
            OpSpec::FY => atom!("fy"),
        }
    }

    pub fn from_atom(a: Atom) -> Option<OpSpec> {
        match a.as_str() {
            "xfx" => Some(OpSpec::XFX),
            "xfy" => Some(OpSpec::XFY),
            "yfx" => Some(OpSpec::YFX),
            "xf" => Some(OpSpec::XF),
            "yf" => Some(OpSpec::YF),
            "fx" => Some(OpSpec::FX),
            "fy" => Some(OpSpec::FY),
            _ => None,
        }
    }

    /// Maximum priority admitted for the left argument.
    pub fn left_priority(self, priority: u16) -> u16 {
        match self {
            OpSpec::YFX | OpSpec::YF => priority,
            OpSpec::XFX | OpSpec::XFY | OpSpec::XF => priority - 1,
            OpSpec::FX | OpSpec::FY => 0,
        }
    }

    /// Maximum priority admitted for the right argument.
    pub fn right_priority(self, priority: u16) -> u16 {
        match self {
            OpSpec::XFY | OpSpec::FY => priority,
            OpSpec::XFX | OpSpec::YFX | OpSpec::FX => priority - 1,
            OpSpec::XF | OpSpec::YF => 0,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct OpDef {
    pub priority: u16,
    pub spec: OpSpec,
    pub name: Atom,
}

/// The operator registry consulted by the reader and the writer. One slot
/// per class (prefix/infix/postfix) per name; iteration is in definition
/// order for `current_op/3`.
#[derive(Clone, Debug)]
pub struct OpTable {
    table: IndexMap<Atom, [Option<OpDef>; 3], FxBuildHasher>,
}

impl Default for OpTable {
    fn default() -> Self {
        OpTable::with_defaults()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum OpTableError {
    /// `,` may not be tampered with.
    ModifyComma,
    /// an atom may not be both an infix and a postfix operator.
    InfixPostfixClash(Atom),
}

impl OpTable {
    pub fn new() -> OpTable {
        OpTable {
            table: IndexMap::with_hasher(FxBuildHasher::default()),
        }
    }

    pub fn with_defaults() -> OpTable {
        let mut ops = OpTable::new();

        let defaults: &[(u16, OpSpec, &str)] = &[
            (1200, OpSpec::XFX, ":-"),
            (1200, OpSpec::XFX, "-->"),
            (1200, OpSpec::FX, ":-"),
            (1200, OpSpec::FX, "?-"),
            (1100, OpSpec::XFY, ";"),
            (1050, OpSpec::XFY, "->"),
            (1000, OpSpec::XFY, ","),
            (900, OpSpec::FY, "\\+"),
            (700, OpSpec::XFX, "="),
            (700, OpSpec::XFX, "\\="),
            (700, OpSpec::XFX, "=="),
            (700, OpSpec::XFX, "\\=="),
            (700, OpSpec::XFX, "@<"),
            (700, OpSpec::XFX, "@>"),
            (700, OpSpec::XFX, "@=<"),
            (700, OpSpec::XFX, "@>="),
            (700, OpSpec::XFX, "=.."),
            (700, OpSpec::XFX, "is"),
            (700, OpSpec::XFX, "=:="),
            (700, OpSpec::XFX, "=\\="),
            (700, OpSpec::XFX, "<"),
            (700, OpSpec::XFX, ">"),
            (700, OpSpec::XFX, "=<"),
            (700, OpSpec::XFX, ">="),
            (500, OpSpec::YFX, "+"),
            (500, OpSpec::YFX, "-"),
            (500, OpSpec::YFX, "/\\"),
            (500, OpSpec::YFX, "\\/"),
            (500, OpSpec::YFX, "xor"),
            (400, OpSpec::YFX, "*"),
            (400, OpSpec::YFX, "/"),
            (400, OpSpec::YFX, "//"),
            (400, OpSpec::YFX, "mod"),
            (400, OpSpec::YFX, "rem"),
            (400, OpSpec::YFX, "div"),
            (400, OpSpec::YFX, "<<"),
            (400, OpSpec::YFX, ">>"),
            (200, OpSpec::XFX, "**"),
            (200, OpSpec::XFY, "^"),
            (200, OpSpec::FY, "-"),
            (200, OpSpec::FY, "+"),
            (200, OpSpec::FY, "\\"),
            // the dict access dot.
            (100, OpSpec::YFX, "."),
        ];

        for &(priority, spec, name) in defaults {
            ops.insert(OpDef {
                priority,
                spec,
                name: atom!(name),
            });
        }

        ops
    }

    fn insert(&mut self, def: OpDef) {
        let slots = self.table.entry(def.name).or_insert([None; 3]);
        slots[def.spec.class() as usize] = Some(def);
    }

    pub fn lookup(&self, name: Atom, class: OpClass) -> Option<OpDef> {
        self.table.get(&name).and_then(|slots| slots[class as usize])
    }

    pub fn is_operator(&self, name: Atom) -> bool {
        self.table
            .get(&name)
            .map(|slots| slots.iter().any(|s| s.is_some()))
            .unwrap_or(false)
    }

    /// Defines or, with priority zero, removes an operator.
    pub fn define(
        &mut self,
        priority: u16,
        spec: OpSpec,
        name: Atom,
    ) -> Result<(), OpTableError> {
        if name == atom!(",") {
            return Err(OpTableError::ModifyComma);
        }

        // 6.3.4.3: an atom shall not be an infix and a postfix operator at once.
        let clashing = match spec.class() {
            OpClass::Infix => self.lookup(name, OpClass::Postfix),
            OpClass::Postfix => self.lookup(name, OpClass::Infix),
            OpClass::Prefix => None,
        };
        if priority > 0 && clashing.is_some() {
            return Err(OpTableError::InfixPostfixClash(name));
        }

        if priority == 0 {
            if let Some(slots) = self.table.get_mut(&name) {
                slots[spec.class() as usize] = None;
            }
        } else {
            self.insert(OpDef {
                priority,
                spec,
                name,
            });
        }

        Ok(())
    }

    /// All defined operators in definition order.
    pub fn iter(&self) -> impl Iterator<Item = OpDef> + '_ {
        self.table
            .values()
            .flat_map(|slots| slots.iter().filter_map(|s| *s))
    }
}
