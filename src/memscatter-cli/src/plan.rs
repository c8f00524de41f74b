//! Declarative scatter plans
//!
//! A plan is a TOML file describing the rounds of a [`ScatterMap`]:
//!
//! ```toml
//! indexes = 2
//!
//! [[rounds]]
//! [[rounds.entries]]
//! index = 0
//! id = 0
//! kind = "ptr"
//! address = "module+0x8F1A2B0"
//!
//! [[rounds]]
//! use_cache = false
//! [[rounds.entries]]
//! index = 1
//! id = 0
//! kind = "u32"
//! address_ref = [0, 0]
//! offset = "0x30"
//! ```

use crate::address::{parse_number, Address};
use anyhow::{bail, Context, Result};
use memscatter::{
    AddressSource, EntryRef, MemoryResult, Pid, PointerValue, RoundBuilder, ScatterMap,
    ScatterResults, SizeSource,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// Number written either as a TOML integer or a string (`"0x30"`)
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NumberSpec {
    Int(u64),
    Text(String),
}

impl NumberSpec {
    fn address(&self) -> Result<Address> {
        match self {
            NumberSpec::Int(value) => Ok(Address::Absolute(*value)),
            NumberSpec::Text(text) => Address::parse(text),
        }
    }

    fn number(&self) -> Result<u64> {
        match self {
            NumberSpec::Int(value) => Ok(*value),
            NumberSpec::Text(text) => parse_number(text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bool,
    Ptr,
    Text,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanEntry {
    pub index: usize,
    pub id: u32,
    pub kind: EntryKind,
    /// Label shown in output
    pub name: Option<String>,
    pub address: Option<NumberSpec>,
    pub address_ref: Option<(usize, u32)>,
    pub offset: Option<NumberSpec>,
    pub size: Option<usize>,
    pub size_ref: Option<(usize, u32)>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanRound {
    pub use_cache: Option<bool>,
    #[serde(default)]
    pub entries: Vec<PlanEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    pub indexes: usize,
    #[serde(default)]
    pub rounds: Vec<PlanRound>,
}

impl std::str::FromStr for Plan {
    type Err = anyhow::Error;

    fn from_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse scatter plan")
    }
}

impl Plan {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan from {}", path.display()))?;
        contents
            .parse()
            .with_context(|| format!("Invalid plan {}", path.display()))
    }

    fn entries(&self) -> impl Iterator<Item = &PlanEntry> {
        self.rounds.iter().flat_map(|r| r.entries.iter())
    }

    /// True if any entry is addressed relative to the module base
    pub fn needs_module(&self) -> bool {
        self.entries().any(|e| {
            e.address
                .as_ref()
                .and_then(|a| a.address().ok())
                .is_some_and(|a| a.is_module_relative())
        })
    }

    /// Build the scatter map for `pid`.
    ///
    /// Rounds without `use_cache` take `default_cache`. References must
    /// name entries declared in an earlier round.
    pub fn build(
        &self,
        pid: Pid,
        module_base: Option<u64>,
        default_cache: bool,
    ) -> Result<ScatterMap> {
        let mut map = ScatterMap::new(self.indexes);
        let mut declared: HashMap<(usize, u32), EntryRef> = HashMap::new();

        for (number, round) in self.rounds.iter().enumerate() {
            let mut builder = map.add_round(pid, round.use_cache.unwrap_or(default_cache));
            for entry in &round.entries {
                let at = add_entry(&mut builder, entry, &declared, module_base)
                    .with_context(|| {
                        format!("round {}, entry [{}, {}]", number, entry.index, entry.id)
                    })?;
                declared.insert((entry.index, entry.id), at);
            }
        }

        Ok(map)
    }

    /// Decoded results in plan order
    pub fn report(&self, results: &ScatterResults) -> Report {
        let stats = results.stats();
        let entries = self
            .entries()
            .map(|e| EntryReport {
                index: e.index,
                id: e.id,
                name: e.name.clone(),
                kind: e.kind,
                value: decode(e.kind, results, e.index, e.id),
                error: results.failure(e.index, e.id).map(|f| f.to_string()),
            })
            .collect();

        Report {
            rounds: stats.rounds,
            entries_read: stats.entries,
            pages_requested: stats.pages_requested,
            failed: stats.failed,
            entries,
        }
    }
}

fn lookup(declared: &HashMap<(usize, u32), EntryRef>, key: (usize, u32)) -> Result<EntryRef> {
    declared.get(&key).copied().with_context(|| {
        format!(
            "reference [{}, {}] is not declared earlier in the plan",
            key.0, key.1
        )
    })
}

fn add_entry(
    builder: &mut RoundBuilder<'_>,
    entry: &PlanEntry,
    declared: &HashMap<(usize, u32), EntryRef>,
    module_base: Option<u64>,
) -> Result<EntryRef> {
    let address: AddressSource = match (&entry.address, entry.address_ref) {
        (Some(spec), None) => spec.address()?.resolve(module_base)?.into(),
        (None, Some(key)) => lookup(declared, key)?.into(),
        (Some(_), Some(_)) => bail!("`address` and `address_ref` are mutually exclusive"),
        (None, None) => bail!("missing `address` or `address_ref`"),
    };
    let offset = entry
        .offset
        .as_ref()
        .map(NumberSpec::number)
        .transpose()?
        .unwrap_or(0);

    let size: Option<SizeSource> = match (entry.size, entry.size_ref) {
        (Some(size), None) => Some(size.into()),
        (None, Some(key)) => Some(lookup(declared, key)?.into()),
        (Some(_), Some(_)) => bail!("`size` and `size_ref` are mutually exclusive"),
        (None, None) => None,
    };
    if entry.kind != EntryKind::Text && size.is_some() {
        bail!("only text entries take a size");
    }

    let (index, id) = (entry.index, entry.id);
    let added: MemoryResult<EntryRef> = match entry.kind {
        EntryKind::U8 => builder.add_value::<u8>(index, id, address, offset),
        EntryKind::U16 => builder.add_value::<u16>(index, id, address, offset),
        EntryKind::U32 => builder.add_value::<u32>(index, id, address, offset),
        EntryKind::U64 => builder.add_value::<u64>(index, id, address, offset),
        EntryKind::I8 => builder.add_value::<i8>(index, id, address, offset),
        EntryKind::I16 => builder.add_value::<i16>(index, id, address, offset),
        EntryKind::I32 => builder.add_value::<i32>(index, id, address, offset),
        EntryKind::I64 => builder.add_value::<i64>(index, id, address, offset),
        EntryKind::F32 => builder.add_value::<f32>(index, id, address, offset),
        EntryKind::F64 => builder.add_value::<f64>(index, id, address, offset),
        EntryKind::Bool => builder.add_value::<bool>(index, id, address, offset),
        EntryKind::Ptr => builder.add_pointer(index, id, address, offset),
        EntryKind::Text => {
            let size = size.context("text entries need `size` or `size_ref`")?;
            builder.add_text(index, id, address, size, offset)
        }
    };
    Ok(added?)
}

/// A decoded entry value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Decoded {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Bool(bool),
    Pointer(String),
    Text(String),
}

impl fmt::Display for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decoded::Unsigned(v) => write!(f, "{} ({:#x})", v, v),
            Decoded::Signed(v) => write!(f, "{}", v),
            Decoded::Float(v) => write!(f, "{}", v),
            Decoded::Bool(v) => write!(f, "{}", v),
            Decoded::Pointer(v) => write!(f, "{}", v),
            Decoded::Text(v) => write!(f, "{:?}", v),
        }
    }
}

fn decode(kind: EntryKind, results: &ScatterResults, index: usize, id: u32) -> Option<Decoded> {
    match kind {
        EntryKind::U8 => results.get::<u8>(index, id).map(|v| Decoded::Unsigned(v.into())),
        EntryKind::U16 => results.get::<u16>(index, id).map(|v| Decoded::Unsigned(v.into())),
        EntryKind::U32 => results.get::<u32>(index, id).map(|v| Decoded::Unsigned(v.into())),
        EntryKind::U64 => results.get::<u64>(index, id).map(Decoded::Unsigned),
        EntryKind::I8 => results.get::<i8>(index, id).map(|v| Decoded::Signed(v.into())),
        EntryKind::I16 => results.get::<i16>(index, id).map(|v| Decoded::Signed(v.into())),
        EntryKind::I32 => results.get::<i32>(index, id).map(|v| Decoded::Signed(v.into())),
        EntryKind::I64 => results.get::<i64>(index, id).map(Decoded::Signed),
        EntryKind::F32 => results.get::<f32>(index, id).map(|v| Decoded::Float(v.into())),
        EntryKind::F64 => results.get::<f64>(index, id).map(Decoded::Float),
        EntryKind::Bool => results.get::<bool>(index, id).map(Decoded::Bool),
        EntryKind::Ptr => results
            .pointer(index, id)
            .map(|p: PointerValue| Decoded::Pointer(p.to_string())),
        EntryKind::Text => results
            .text(index, id)
            .map(|t| Decoded::Text(t.to_string())),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryReport {
    pub index: usize,
    pub id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub kind: EntryKind,
    pub value: Option<Decoded>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Results of one plan execution
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub rounds: usize,
    pub entries_read: usize,
    pub pages_requested: usize,
    pub failed: usize,
    pub entries: Vec<EntryReport>,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<6} {:<6} {:<24} {:<5} VALUE",
            "INDEX", "ID", "NAME", "KIND"
        )?;
        for entry in &self.entries {
            let kind = format!("{:?}", entry.kind).to_lowercase();
            let value = match (&entry.value, &entry.error) {
                (Some(value), _) => value.to_string(),
                (None, Some(error)) => format!("<failed: {}>", error),
                (None, None) => "<missing>".to_string(),
            };
            writeln!(
                f,
                "{:<6} {:<6} {:<24} {:<5} {}",
                entry.index,
                entry.id,
                entry.name.as_deref().unwrap_or("-"),
                kind,
                value
            )?;
        }
        write!(
            f,
            "{} rounds, {} entries, {} pages requested, {} failed",
            self.rounds, self.entries_read, self.pages_requested, self.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memscatter::mock::MockPort;
    use memscatter::{MemoryError, Session};

    const ACTORS: &str = include_str!("../plans/actors.toml");

    const SIMPLE: &str = r#"
indexes = 2

[[rounds]]
[[rounds.entries]]
index = 0
id = 0
kind = "ptr"
name = "world"
address = "module+0x100"

[[rounds]]
use_cache = false
[[rounds.entries]]
index = 1
id = 0
kind = "u32"
address_ref = [0, 0]
offset = "0x30"

[[rounds.entries]]
index = 1
id = 1
kind = "f32"
address_ref = [0, 0]
offset = 0x34
"#;

    fn simple_port() -> MockPort {
        let mut port = MockPort::new();
        port.put_value(0x1_4000_0100, &0x2000_0000u64);
        port.put_value(0x2000_0030, &42u32);
        port.put_value(0x2000_0034, &1.5f32);
        port
    }

    #[test]
    fn test_parse_simple_plan() {
        let plan: Plan = SIMPLE.parse().unwrap();
        assert_eq!(plan.indexes, 2);
        assert_eq!(plan.rounds.len(), 2);
        assert_eq!(plan.rounds[1].use_cache, Some(false));
        assert_eq!(plan.rounds[0].entries[0].kind, EntryKind::Ptr);
        assert_eq!(plan.rounds[1].entries[0].address_ref, Some((0, 0)));
        assert!(plan.needs_module());
    }

    #[test]
    fn test_build_and_execute() {
        let plan: Plan = SIMPLE.parse().unwrap();
        let map = plan.build(7, Some(0x1_4000_0000), true).unwrap();
        assert_eq!(map.rounds().len(), 2);
        assert!(map.rounds()[0].use_cache());
        assert!(!map.rounds()[1].use_cache());
        assert_eq!(map.rounds()[1].pid(), 7);

        let session = Session::new(simple_port());
        let results = session.execute(map).unwrap();
        let report = plan.report(&results);

        assert_eq!(report.rounds, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.entries[0].name.as_deref(), Some("world"));
        assert_eq!(
            report.entries[0].value,
            Some(Decoded::Pointer("0x20000000".to_string()))
        );
        assert_eq!(report.entries[1].value, Some(Decoded::Unsigned(42)));
        assert_eq!(report.entries[2].value, Some(Decoded::Float(1.5)));

        let table = report.to_string();
        assert!(table.contains("42 (0x2a)"));
        assert!(table.contains("2 rounds, 3 entries"));
    }

    #[test]
    fn test_report_json() {
        let plan: Plan = SIMPLE.parse().unwrap();
        let map = plan.build(7, Some(0x1_4000_0000), true).unwrap();
        let results = Session::new(simple_port()).execute(map).unwrap();

        let json = serde_json::to_value(plan.report(&results)).unwrap();
        assert_eq!(json["rounds"], 2);
        assert_eq!(json["entries"][0]["value"], "0x20000000");
        assert_eq!(json["entries"][0]["kind"], "ptr");
        assert_eq!(json["entries"][1]["value"], 42);
        assert!(json["entries"][1].get("error").is_none());
    }

    #[test]
    fn test_failed_entry_in_report() {
        let plan: Plan = SIMPLE.parse().unwrap();
        let map = plan.build(7, Some(0x1_4000_0000), true).unwrap();
        // World pointer is zero
        let mut port = MockPort::new();
        port.put_value(0x1_4000_0100, &0u64);
        let results = Session::new(port).execute(map).unwrap();

        let report = plan.report(&results);
        assert_eq!(report.failed, 3);
        assert!(report.entries.iter().all(|e| e.value.is_none()));
        assert_eq!(report.entries[0].error.as_deref(), Some("pointer value is zero"));
        assert!(report.to_string().contains("<failed: "));
    }

    #[test]
    fn test_module_relative_needs_base() {
        let plan: Plan = SIMPLE.parse().unwrap();
        let err = plan.build(7, None, true).unwrap_err();
        assert!(format!("{:#}", err).contains("module"));
    }

    #[test]
    fn test_same_round_reference_rejected() {
        let plan: Plan = r#"
indexes = 1
[[rounds]]
[[rounds.entries]]
index = 0
id = 0
kind = "ptr"
address = 0x1000
[[rounds.entries]]
index = 0
id = 1
kind = "u32"
address_ref = [0, 0]
"#
        .parse()
        .unwrap();
        let err = plan.build(1, None, true).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MemoryError>(),
            Some(MemoryError::SameRoundReference { .. })
        ));
    }

    #[test]
    fn test_undeclared_reference_rejected() {
        let plan: Plan = r#"
indexes = 1
[[rounds]]
[[rounds.entries]]
index = 0
id = 1
kind = "u32"
address_ref = [0, 9]
"#
        .parse()
        .unwrap();
        let err = plan.build(1, None, true).unwrap_err();
        assert!(format!("{:#}", err).contains("not declared"));
    }

    #[test]
    fn test_invalid_entries_rejected() {
        let both = r#"
indexes = 1
[[rounds]]
[[rounds.entries]]
index = 0
id = 0
kind = "u32"
address = 0x1000
address_ref = [0, 0]
"#;
        let text_without_size = r#"
indexes = 1
[[rounds]]
[[rounds.entries]]
index = 0
id = 0
kind = "text"
address = 0x1000
"#;
        let sized_value = r#"
indexes = 1
[[rounds]]
[[rounds.entries]]
index = 0
id = 0
kind = "u32"
address = 0x1000
size = 4
"#;
        for source in [both, text_without_size, sized_value] {
            let plan: Plan = source.parse().unwrap();
            assert!(plan.build(1, None, true).is_err());
        }

        assert!("indexes = 1\nbogus = 2\n".parse::<Plan>().is_err());
        assert!(r#"
indexes = 1
[[rounds]]
[[rounds.entries]]
index = 0
id = 0
kind = "u128"
address = 1
"#
        .parse::<Plan>()
        .is_err());
    }

    #[test]
    fn test_actors_plan() {
        let plan: Plan = ACTORS.parse().unwrap();
        assert!(plan.needs_module());

        let base = 0x1_4000_0000u64;
        let mut port = MockPort::new();
        port.put_value(base + 0x8F1A2B0, &0x2000_0000u64); // world
        port.put_value(0x2000_0030, &0x3000_0000u64); // persistent level
        port.put_value(0x3000_0098, &0x4000_0000u64); // actor array data
        port.put_value(0x3000_00A0, &3i32); // actor count
        port.put_value(0x3000_00B0, &0x5000_0000u64); // level name
        port.put_value(0x3000_00B8, &9i32); // level name length
        port.put_value(0x4000_0000, &0x6000_0000u64); // first actor
        port.put_bytes(0x5000_0000, b"Overworld\0");
        port.put_value(0x6000_0018, &77u32); // first actor id

        let map = plan.build(1, Some(base), true).unwrap();
        let results = Session::new(port).execute(map).unwrap();
        let report = plan.report(&results);

        assert_eq!(report.failed, 0, "{}", report);
        let named = |name: &str| {
            report
                .entries
                .iter()
                .find(|e| e.name.as_deref() == Some(name))
                .and_then(|e| e.value.clone())
        };
        assert_eq!(named("actor_count"), Some(Decoded::Signed(3)));
        assert_eq!(named("level_name"), Some(Decoded::Text("Overworld".to_string())));
        assert_eq!(named("first_actor_id"), Some(Decoded::Unsigned(77)));
    }
}
