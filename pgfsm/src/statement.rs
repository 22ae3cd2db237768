//! Prepared statement cache.
use md5::{Digest, Md5};
use std::collections::HashMap;

use crate::{postgres::Oid, resultset::RowDescription};

/// Prepared statement name derived from the sql and its parameter types.
///
/// The same sql with the same ordered parameter oids always yields the same name.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    pub fn new(sql: &str, types: &[Oid]) -> Self {
        let mut md5 = Md5::new();
        md5.update(sql.as_bytes());

        let mut oids = String::from("{");
        let mut b = itoa::Buffer::new();
        for (i, oid) in types.iter().enumerate() {
            if i != 0 {
                oids.push(',');
            }
            oids.push_str(b.format(*oid));
        }
        oids.push('}');
        md5.update(oids.as_bytes());

        Self(format!("q_{:x}", md5.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Signature").field(&self.0).finish()
    }
}

/// Result shape of a prepared statement.
#[derive(Debug, Clone)]
pub enum Prepared {
    /// Statement returns rows.
    Described(RowDescription),
    /// Statement returns no rows.
    NoData,
}

impl Prepared {
    pub fn description(&self) -> Option<&RowDescription> {
        match self {
            Prepared::Described(desc) => Some(desc),
            Prepared::NoData => None,
        }
    }
}

/// Per connection statement cache, entries live as long as the connection.
#[derive(Debug, Default)]
pub struct StatementCache {
    entries: HashMap<Signature, Prepared>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, signature: &Signature) -> Option<&Prepared> {
        self.entries.get(signature)
    }

    pub fn insert(&mut self, signature: Signature, prepared: Prepared) {
        self.entries.insert(signature, prepared);
    }

    pub fn contains(&self, signature: &Signature) -> bool {
        self.entries.contains_key(signature)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
