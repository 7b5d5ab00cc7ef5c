//! Keyed-by-name table of operator-supplied identities.

use crate::{address::Address, rpa::Irk};
use std::fmt;

/// A known identity: an optional public address and/or IRK.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Bonding {
    /// Operator-chosen name.
    pub name: String,
    /// Public Bluetooth address, if known.
    pub bda_public: Option<Address>,
    /// Identity Resolving Key, if known.
    pub irk: Option<Irk>,
}

impl fmt::Display for Bonding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(bda) = self.bda_public {
            write!(f, "\tbda={bda}")?;
        }
        if let Some(irk) = self.irk {
            write!(f, "\tirk={}", hex::encode(irk))?;
        }
        Ok(())
    }
}

/// Ordered, name-keyed collection of [`Bonding`]s.
///
/// New names are prepended, matching the reference's insert-at-head list.
#[derive(Clone, Debug, Default)]
pub struct BondingRegistry {
    entries: Vec<Bonding>,
}

impl BondingRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or merges a bonding.
    ///
    /// An existing entry matches the new bonding if the new name agrees with
    /// the existing entry's name on its first `len(existing.name) - 1`
    /// characters (mirroring the reference's `strncmp(new, old,
    /// strlen(old)-1)`, which tolerates the last character of the stored name
    /// differing from the incoming one). A match is treated as an update to
    /// that entry: only its non-zero (`Some`) fields are copied in, the
    /// existing entry's other fields are left untouched. Otherwise the new
    /// bonding is prepended.
    ///
    /// Upserting a bonding with both fields `None` is a no-op beyond the
    /// prefix-match lookup: if no matching entry exists either, nothing is
    /// inserted.
    pub fn upsert(&mut self, update: Bonding) {
        let existing = self.entries.iter_mut().find(|b| {
            let n = b.name.len().saturating_sub(1);
            update.name.as_bytes().get(..n).is_some_and(|u| b.name.as_bytes().get(..n) == Some(u))
        });

        match existing {
            Some(entry) => {
                if update.bda_public.is_some() {
                    entry.bda_public = update.bda_public;
                }
                if update.irk.is_some() {
                    entry.irk = update.irk;
                }
            }
            None => {
                if update.bda_public.is_some() || update.irk.is_some() || !update.name.is_empty() {
                    self.entries.insert(0, update);
                }
            }
        }
    }

    /// Iterates bondings in registry order (most recently inserted first).
    pub fn iter(&self) -> impl Iterator<Item = &Bonding> {
        self.entries.iter()
    }

    /// Iterates only the bondings that carry a set IRK.
    pub fn iter_with_irk(&self) -> impl Iterator<Item = (&Bonding, &Irk)> {
        self.entries.iter().filter_map(|b| b.irk.as_ref().map(|irk| (b, irk)))
    }

    /// Number of known bondings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no bondings are known.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_name_prepends() {
        let mut reg = BondingRegistry::new();
        reg.upsert(Bonding { name: "alice".into(), ..Default::default() });
        reg.upsert(Bonding { name: "bob".into(), ..Default::default() });
        let names: Vec<_> = reg.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["bob", "alice"]);
    }

    #[test]
    fn prefix_match_merges_non_zero_fields() {
        let mut reg = BondingRegistry::new();
        let bda: Address = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        reg.upsert(Bonding { name: "alice".into(), bda_public: Some(bda), irk: None });
        reg.upsert(Bonding { name: "alice".into(), bda_public: None, irk: Some([1; 16]) });

        assert_eq!(reg.len(), 1);
        let entry = reg.iter().next().unwrap();
        assert_eq!(entry.bda_public, Some(bda));
        assert_eq!(entry.irk, Some([1; 16]));
    }

    #[test]
    fn all_zero_upsert_is_noop_for_new_name() {
        let mut reg = BondingRegistry::new();
        reg.upsert(Bonding { name: String::new(), bda_public: None, irk: None });
        assert!(reg.is_empty());
    }
}
