use std::collections::hash_map;
use std::collections::HashMap;
use std::ops::Index;

use crate::environment::Env;
use crate::flag::Flag;

/// FlagSet is a collection of flags keyed by flag key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlagSet {
    flags: HashMap<String, Flag>,
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a flag, replacing any flag with the same key.
    pub fn insert(&mut self, flag: Flag) -> Option<Flag> {
        self.flags.insert(flag.key().to_owned(), flag)
    }

    pub fn get(&self, key: &str) -> Option<&Flag> {
        self.flags.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.flags.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.flags.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Flag> {
        self.flags.values()
    }

    /// The flags for exactly `keys`. Keys that are not in this set get a placeholder flag.
    pub fn only<K: AsRef<str>>(&self, keys: &[K], env: &Env) -> FlagSet {
        keys.iter()
            .map(|key| {
                let key = key.as_ref();
                self.get(key)
                    .cloned()
                    .unwrap_or_else(|| Flag::placeholder(key, env.clone()))
            })
            .collect()
    }
}

impl Index<&str> for FlagSet {
    type Output = Flag;

    /// Panics if `key` is not in the set.
    fn index(&self, key: &str) -> &Flag {
        &self.flags[key]
    }
}

impl FromIterator<Flag> for FlagSet {
    fn from_iter<I: IntoIterator<Item = Flag>>(iter: I) -> Self {
        let mut set = FlagSet::new();
        for flag in iter {
            set.insert(flag);
        }
        set
    }
}

impl Extend<Flag> for FlagSet {
    fn extend<I: IntoIterator<Item = Flag>>(&mut self, iter: I) {
        for flag in iter {
            self.insert(flag);
        }
    }
}

impl IntoIterator for FlagSet {
    type Item = Flag;
    type IntoIter = hash_map::IntoValues<String, Flag>;

    fn into_iter(self) -> Self::IntoIter {
        self.flags.into_values()
    }
}

impl<'a> IntoIterator for &'a FlagSet {
    type Item = &'a Flag;
    type IntoIter = hash_map::Values<'a, String, Flag>;

    fn into_iter(self) -> Self::IntoIter {
        self.flags.values()
    }
}
