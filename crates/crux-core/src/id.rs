//! Strongly-typed IDs used across crux.
//!
//! These are `#[repr(transparent)]` newtypes around primitives to keep them
//! cheap and type-safe. Zero is reserved as the invalid sentinel in both
//! cases; registries allocate starting at 1.

macro_rules! define_id {
    ($name:ident) => {
        #[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// The invalid sentinel id.
            pub const NONE: Self = Self(0);

            #[inline]
            pub const fn new(raw: u32) -> Self {
                Self::from_raw(raw)
            }

            #[inline]
            pub const fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn to_raw(self) -> u32 {
                self.0
            }

            #[inline]
            pub const fn is_valid(self) -> bool {
                self.0 != 0
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

define_id!(FileId);

/// Identifies one compilable source under one argument set.
///
/// Computed as a content hash over `(path, args, compiler)`; stable across
/// restarts for identical inputs. Keys active indexer job slots.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Default, serde::Serialize, serde::Deserialize)]
#[repr(transparent)]
pub struct SourceKey(u64);

impl SourceKey {
    pub const NONE: Self = Self(0);

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn to_raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Debug for SourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SourceKey({:#x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_invalid() {
        assert!(!FileId::NONE.is_valid());
        assert!(FileId::from_raw(1).is_valid());
        assert!(!SourceKey::NONE.is_valid());
        assert!(SourceKey::from_raw(0xdead_beef).is_valid());
    }
}
