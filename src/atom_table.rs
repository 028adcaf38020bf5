use std::cmp::Ordering;
use std::fmt;
use std::sync::RwLock;

use fxhash::FxBuildHasher;
use indexmap::IndexSet;
use lazy_static::lazy_static;

/// An interned symbol. Two atoms are equal iff their indices match; the
/// standard order of atoms is the lexicographic order of their texts.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Atom {
    index: u32,
}

lazy_static! {
    static ref GLOBAL_ATOM_TABLE: RwLock<AtomTable> = RwLock::new(AtomTable {
        table: IndexSet::with_hasher(FxBuildHasher::default()),
    });
}

/// The process-global intern table. Reads are concurrent; interning a new
/// atom takes the write lock. Atom texts live for the process lifetime.
pub struct AtomTable {
    table: IndexSet<&'static str, FxBuildHasher>,
}

impl AtomTable {
    pub fn build_with(string: &str) -> Atom {
        {
            let table = GLOBAL_ATOM_TABLE.read().unwrap();

            if let Some(index) = table.table.get_index_of(string) {
                return Atom {
                    index: index as u32,
                };
            }
        }

        let mut table = GLOBAL_ATOM_TABLE.write().unwrap();

        // lost the race on the write lock?
        if let Some(index) = table.table.get_index_of(string) {
            return Atom {
                index: index as u32,
            };
        }

        let leaked: &'static str = Box::leak(string.to_owned().into_boxed_str());
        let (index, _) = table.table.insert_full(leaked);

        Atom {
            index: index as u32,
        }
    }
}

#[macro_export]
macro_rules! atom {
    ($s:expr) => {
        $crate::atom_table::AtomTable::build_with($s)
    };
}

impl Atom {
    #[inline]
    pub fn as_str(self) -> &'static str {
        let table = GLOBAL_ATOM_TABLE.read().unwrap();
        *table
            .table
            .get_index(self.index as usize)
            .expect("atom indices are only minted by the table")
    }

    #[inline]
    pub fn len(self) -> usize {
        self.as_str().len()
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.as_str().is_empty()
    }

    pub fn as_char(self) -> Option<char> {
        let s = self.as_str();
        let mut it = s.chars();

        let c1 = it.next();
        let c2 = it.next();

        if c2.is_none() {
            c1
        } else {
            None
        }
    }

    /// True iff the atom's text is a letter-digit token, i.e. it would be
    /// read back as a single name token without quoting.
    pub fn is_letter_digit(self) -> bool {
        let s = self.as_str();
        let mut chars = s.chars();

        match chars.next() {
            Some(c) if c.is_ascii_lowercase() => {}
            _ => return false,
        }

        chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    /// True iff the atom's text consists solely of graphic characters.
    pub fn is_graphic(self) -> bool {
        let s = self.as_str();
        !s.is_empty() && s.chars().all(is_graphic_char)
    }
}

pub fn is_graphic_char(c: char) -> bool {
    matches!(
        c,
        '#' | '$' | '&' | '*' | '+' | '-' | '.' | '/' | ':' | '<' | '=' | '>' | '?' | '@' | '^'
            | '~' | '\\'
    )
}

impl PartialOrd for Atom {
    #[inline]
    fn partial_cmp(&self, other: &Atom) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Atom {
    #[inline]
    fn cmp(&self, other: &Atom) -> Ordering {
        if self.index == other.index {
            Ordering::Equal
        } else {
            self.as_str().cmp(other.as_str())
        }
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "atom!({:?})", self.as_str())
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
