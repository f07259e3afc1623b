//! Who a ledger entry is "about".
//!
//! An entry concerns its author (`role`, `entity_name`) and every party named
//! anywhere in its payload: `donor`, `ngo` and `clinic` string fields and the
//! `donors` array, at the top level or inside nested objects such as
//! `snapshot`.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::ledger::LedgerEntry;
use crate::types::Role;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Participant {
    pub role: Role,
    pub name: String,
}

impl Participant {
    pub fn new(role: Role, name: impl Into<String>) -> Self {
        Self {
            role,
            name: name.into(),
        }
    }

    /// Case-insensitive, whitespace-trimmed name comparison.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.trim().eq_ignore_ascii_case(name.trim())
    }
}

const PARTY_FIELDS: [(&str, Role); 3] = [
    ("donor", Role::Donor),
    ("ngo", Role::Ngo),
    ("clinic", Role::Clinic),
];

const DONOR_LIST_FIELD: &str = "donors";

/// Every party this entry concerns.
pub fn participants(entry: &LedgerEntry) -> BTreeSet<Participant> {
    let mut found = BTreeSet::new();
    insert(&mut found, entry.role, &entry.entity_name);
    collect(&entry.payload, &mut found);
    found
}

fn insert(found: &mut BTreeSet<Participant>, role: Role, name: &str) {
    let name = name.trim();
    if !name.is_empty() {
        found.insert(Participant::new(role, name));
    }
}

fn collect(value: &Value, found: &mut BTreeSet<Participant>) {
    let Value::Object(map) = value else {
        return;
    };
    for (field, role) in PARTY_FIELDS {
        if let Some(Value::String(name)) = map.get(field) {
            insert(found, role, name);
        }
    }
    if let Some(Value::Array(donors)) = map.get(DONOR_LIST_FIELD) {
        for donor in donors.iter().filter_map(Value::as_str) {
            insert(found, Role::Donor, donor);
        }
    }
    for nested in map.values().filter(|v| v.is_object()) {
        collect(nested, found);
    }
}
