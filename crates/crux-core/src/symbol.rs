//! The symbol data model and the per-file on-disk table payloads.
//!
//! Every indexed file gets four tables on disk: `symbols` (location → symbol
//! record), `symnames` (qualified name → locations), `targets` (usr →
//! locations whose symbol declares, defines, or references that usr) and
//! `usrs` (usr → locations of symbols having that usr). The tables are
//! archived sorted by key so the mmap'd form supports exact lookup and
//! ordered range scans without deserializing the whole file.

use std::collections::{BTreeMap, BTreeSet};

use rkyv::Deserialize as _;
use serde::{Deserialize, Serialize};

use crate::Location;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[archive(check_bytes)]
pub enum SymbolKind {
    Namespace,
    Class,
    Struct,
    Enum,
    EnumConstant,
    Typedef,
    Function,
    Method,
    Constructor,
    Destructor,
    Field,
    Variable,
    Macro,
    Reference,
    Other,
}

impl SymbolKind {
    /// True for kinds that can enclose call sites.
    pub fn is_function_like(self) -> bool {
        matches!(
            self,
            SymbolKind::Function
                | SymbolKind::Method
                | SymbolKind::Constructor
                | SymbolKind::Destructor
        )
    }

    pub fn is_class_like(self) -> bool {
        matches!(self, SymbolKind::Class | SymbolKind::Struct)
    }

    /// Sort rank used by result ordering; lower sorts first.
    pub fn rank(self) -> u32 {
        match self {
            SymbolKind::Class | SymbolKind::Struct => 0,
            SymbolKind::Enum => 1,
            SymbolKind::Function
            | SymbolKind::Method
            | SymbolKind::Constructor
            | SymbolKind::Destructor => 2,
            SymbolKind::Typedef => 3,
            SymbolKind::EnumConstant | SymbolKind::Field | SymbolKind::Variable => 4,
            SymbolKind::Namespace => 5,
            SymbolKind::Macro => 6,
            SymbolKind::Other => 7,
            SymbolKind::Reference => 8,
        }
    }
}

/// Symbol property bits.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[archive(check_bytes)]
#[repr(transparent)]
pub struct SymbolFlags(pub u16);

impl SymbolFlags {
    pub const NONE: Self = Self(0);
    pub const DEFINITION: Self = Self(1 << 0);
    pub const DECLARATION: Self = Self(1 << 1);
    pub const REFERENCE: Self = Self(1 << 2);
    pub const VIRTUAL: Self = Self(1 << 3);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// One indexed symbol occurrence.
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[archive(check_bytes)]
pub struct Symbol {
    pub location: Location,
    pub kind: SymbolKind,
    pub flags: SymbolFlags,
    /// Unified symbol resolution string. For a reference this names the
    /// referenced symbol, not the reference itself.
    pub usr: String,
    /// Qualified symbol name.
    pub name: String,
    /// Token span in characters, used for cursor containment on one line.
    pub length: u32,
    /// Body extent for definitions with a body; 0/0 when absent.
    pub end_line: u32,
    pub end_column: u32,
    /// USRs of overridden methods / base classes.
    pub base_usrs: Vec<String>,
}

impl Symbol {
    pub fn is_definition(&self) -> bool {
        self.flags.contains(SymbolFlags::DEFINITION)
    }

    pub fn is_declaration(&self) -> bool {
        self.flags.contains(SymbolFlags::DECLARATION)
    }

    pub fn is_reference(&self) -> bool {
        self.flags.contains(SymbolFlags::REFERENCE) || self.kind == SymbolKind::Reference
    }

    pub fn is_virtual(&self) -> bool {
        self.flags.contains(SymbolFlags::VIRTUAL)
    }

    /// True when `loc` falls inside this symbol's token span.
    pub fn contains(&self, loc: Location) -> bool {
        loc.file_id() == self.location.file_id()
            && loc.line == self.location.line
            && loc.column >= self.location.column
            && loc.column < self.location.column + self.length.max(1)
    }

    /// True when `loc` falls inside this symbol's body extent.
    pub fn body_contains(&self, loc: Location) -> bool {
        if self.end_line == 0 || loc.file_id() != self.location.file_id() {
            return false;
        }
        let start = (self.location.line, self.location.column);
        let end = (self.end_line, self.end_column);
        start <= (loc.line, loc.column) && (loc.line, loc.column) <= end
    }
}

#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[archive(check_bytes)]
pub struct SymbolEntry {
    pub location: Location,
    pub symbol: Symbol,
}

/// The `symbols` table of one file: symbol records sorted by location.
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[archive(check_bytes)]
pub struct SymbolTable {
    pub entries: Vec<SymbolEntry>,
}

impl SymbolTable {
    pub fn from_symbols(symbols: BTreeMap<Location, Symbol>) -> Self {
        Self {
            entries: symbols
                .into_iter()
                .map(|(location, symbol)| SymbolEntry { location, symbol })
                .collect(),
        }
    }
}

impl ArchivedSymbolTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn key_at(&self, index: usize) -> Option<Location> {
        self.entries.get(index).map(|e| e.location.to_location())
    }

    pub fn value_at(&self, index: usize) -> Option<Symbol> {
        self.entries.get(index).map(|e| {
            e.symbol
                .deserialize(&mut rkyv::Infallible)
                .expect("infallible deserialization")
        })
    }

    /// Index of the first entry with key ≥ `loc`.
    pub fn lower_bound(&self, loc: &Location) -> usize {
        self.entries
            .partition_point(|e| e.location.to_location() < *loc)
    }

    /// Exact lookup; returns the entry index and the symbol.
    pub fn get(&self, loc: &Location) -> Option<(usize, Symbol)> {
        let index = self.lower_bound(loc);
        let entry = self.entries.get(index)?;
        if entry.location.to_location() == *loc {
            Some((index, self.value_at(index)?))
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Symbol> + '_ {
        (0..self.len()).filter_map(|i| self.value_at(i))
    }
}

#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[archive(check_bytes)]
pub struct LocationListEntry {
    pub key: String,
    pub locations: Vec<Location>,
}

/// A string-keyed table of location lists, sorted by key.
///
/// Backs the `symnames`, `targets` and `usrs` tables.
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[archive(check_bytes)]
pub struct LocationListTable {
    pub entries: Vec<LocationListEntry>,
}

impl LocationListTable {
    pub fn from_map(map: BTreeMap<String, BTreeSet<Location>>) -> Self {
        Self {
            entries: map
                .into_iter()
                .map(|(key, locations)| LocationListEntry {
                    key,
                    locations: locations.into_iter().collect(),
                })
                .collect(),
        }
    }
}

impl ArchivedLocationListTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn key_at(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|e| e.key.as_str())
    }

    pub fn locations_at(&self, index: usize) -> Option<Vec<Location>> {
        self.entries
            .get(index)
            .map(|e| e.locations.iter().map(|l| l.to_location()).collect())
    }

    /// Index of the first entry with key ≥ `key`.
    pub fn lower_bound(&self, key: &str) -> usize {
        self.entries.partition_point(|e| e.key.as_str() < key)
    }

    pub fn get(&self, key: &str) -> Option<Vec<Location>> {
        let index = self.lower_bound(key);
        let entry = self.entries.get(index)?;
        if entry.key.as_str() == key {
            self.locations_at(index)
        } else {
            None
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|e| e.key.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileId;
    use pretty_assertions::assert_eq;

    fn loc(file: u32, line: u32, column: u32) -> Location {
        Location::new(FileId::from_raw(file), line, column)
    }

    fn symbol(at: Location, kind: SymbolKind, usr: &str, length: u32) -> Symbol {
        Symbol {
            location: at,
            kind,
            flags: SymbolFlags::DEFINITION,
            usr: usr.to_string(),
            name: usr.to_string(),
            length,
            end_line: 0,
            end_column: 0,
            base_usrs: Vec::new(),
        }
    }

    fn archived_symbols(table: &SymbolTable) -> rkyv::util::AlignedVec {
        rkyv::to_bytes::<_, 256>(table).expect("serialize table")
    }

    #[test]
    fn symbol_table_exact_lookup_and_lower_bound() {
        let mut map = BTreeMap::new();
        for (line, usr) in [(1, "c:@foo"), (5, "c:@bar"), (9, "c:@baz")] {
            let at = loc(1, line, 3);
            map.insert(at, symbol(at, SymbolKind::Function, usr, 3));
        }
        let bytes = archived_symbols(&SymbolTable::from_symbols(map));
        let archived = rkyv::check_archived_root::<SymbolTable>(&bytes).expect("valid archive");

        let (index, sym) = archived.get(&loc(1, 5, 3)).expect("exact hit");
        assert_eq!(index, 1);
        assert_eq!(sym.usr, "c:@bar");

        assert_eq!(archived.lower_bound(&loc(1, 2, 1)), 1);
        assert_eq!(archived.lower_bound(&loc(1, 10, 1)), 3);
        assert!(archived.get(&loc(1, 2, 1)).is_none());
    }

    #[test]
    fn containment_is_same_line_span() {
        let at = loc(1, 4, 10);
        let sym = symbol(at, SymbolKind::Variable, "c:@v", 5);

        assert!(sym.contains(loc(1, 4, 10)));
        assert!(sym.contains(loc(1, 4, 14)));
        assert!(!sym.contains(loc(1, 4, 15)));
        assert!(!sym.contains(loc(1, 5, 10)));
        assert!(!sym.contains(loc(2, 4, 10)));
    }

    #[test]
    fn location_list_table_lookup_and_prefix_scan() {
        let mut map: BTreeMap<String, BTreeSet<Location>> = BTreeMap::new();
        map.entry("List".into()).or_default().insert(loc(1, 1, 1));
        map.entry("List::size".into())
            .or_default()
            .insert(loc(1, 4, 5));
        map.entry("Map".into()).or_default().insert(loc(2, 8, 1));

        let table = LocationListTable::from_map(map);
        let bytes = rkyv::to_bytes::<_, 256>(&table).expect("serialize table");
        let archived =
            rkyv::check_archived_root::<LocationListTable>(&bytes).expect("valid archive");

        assert_eq!(archived.get("Map"), Some(vec![loc(2, 8, 1)]));
        assert_eq!(archived.get("Set"), None);

        let start = archived.lower_bound("List");
        let names: Vec<&str> = (start..archived.len())
            .filter_map(|i| archived.key_at(i))
            .take_while(|name| name.starts_with("List"))
            .collect();
        assert_eq!(names, vec!["List", "List::size"]);
    }
}
