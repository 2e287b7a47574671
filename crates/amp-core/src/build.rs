//! Build gate: compile shards into the Index, or reject with diagnostics.
//!
//! Compilation is delegated to an [`IndexCompiler`]. The gate then runs every
//! [`BuildRule`] over the compiled graph and the raw shards, collecting all
//! violations in one pass. Only a clean graph is written; a rejected build
//! leaves the previous index file untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use amp_store::{
    tag_prefix, workspace_fingerprint, Fingerprint, Link, Memory, Relation, Shard, ShardStore,
    StoreError, Workspace, MAX_SHARD_RECORDS,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{AmpError, AmpResult};
use crate::index::{IndexFile, INDEX_FORMAT_VERSION};
use crate::obs;

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// A validation rule enforced by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildRule {
    /// No tag with a recognized prefix.
    MissingTagPrefix,
    /// Decision, fact, or risk without a body.
    EmptyBody,
    /// Deprecated without `superseded_by` or a deprecation note.
    MissingSuccessor,
    /// Link endpoint absent from the graph.
    DanglingLink,
    SelfLink,
    DuplicateId,
    ShardOverCapacity,
    /// A shard file that does not parse.
    MalformedShard,
    /// Shape violation reported by the store.
    InvalidRecord,
    /// The external compiler exited unsuccessfully.
    CompilerFailed,
}

impl fmt::Display for BuildRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MissingTagPrefix => "missing_tag_prefix",
            Self::EmptyBody => "empty_body",
            Self::MissingSuccessor => "missing_successor",
            Self::DanglingLink => "dangling_link",
            Self::SelfLink => "self_link",
            Self::DuplicateId => "duplicate_id",
            Self::ShardOverCapacity => "shard_over_capacity",
            Self::MalformedShard => "malformed_shard",
            Self::InvalidRecord => "invalid_record",
            Self::CompilerFailed => "compiler_failed",
        };
        f.write_str(s)
    }
}

/// One violated rule, optionally tied to a record id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub rule: BuildRule,
    pub id: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(rule: BuildRule, id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            rule,
            id,
            message: message.into(),
        }
    }

    fn for_record(rule: BuildRule, id: &str, message: impl Into<String>) -> Self {
        Self::new(rule, Some(id.to_string()), message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "[{}] {}: {}", self.rule, id, self.message),
            None => write!(f, "[{}] {}", self.rule, self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// Compilers
// ---------------------------------------------------------------------------

/// Flattened graph produced by a compiler, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledGraph {
    pub nodes: Vec<Memory>,
    pub edges: Vec<Link>,
}

/// Turns the shard directory into a flat graph.
pub trait IndexCompiler {
    fn compile(&self, workspace: &Workspace, shards: &[Shard]) -> AmpResult<CompiledGraph>;
}

/// In-process compiler: every record becomes a node, every stored link an
/// edge, and every `superseded_by` a derived `supersedes` edge pointing from
/// the successor to the record it replaced.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCompiler;

impl IndexCompiler for NativeCompiler {
    fn compile(&self, _workspace: &Workspace, shards: &[Shard]) -> AmpResult<CompiledGraph> {
        let mut nodes = Vec::new();
        let mut edges = BTreeSet::new();
        for memory in shards.iter().flat_map(|s| s.records.iter()) {
            for target in memory.links.iter() {
                edges.insert(Link {
                    from: memory.id.clone(),
                    to: target.to,
                    relation: target.relation,
                });
            }
            if let Some(ref by) = memory.superseded_by {
                edges.insert(Link {
                    from: by.clone(),
                    to: memory.id.clone(),
                    relation: Relation::Supersedes,
                });
            }
            nodes.push(memory.clone());
        }
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(CompiledGraph {
            nodes,
            edges: edges.into_iter().collect(),
        })
    }
}

/// Runs an external program as `<program> <args..> <memory_dir> <output>` and
/// reads the JSON graph it writes to `<output>`.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    program: String,
    args: Vec<String>,
}

impl CommandCompiler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Build from a `compiler_command` config entry (program then args).
    pub fn from_command_line(command: &[String]) -> AmpResult<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| AmpError::Config("compiler_command must not be empty".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl IndexCompiler for CommandCompiler {
    fn compile(&self, workspace: &Workspace, _shards: &[Shard]) -> AmpResult<CompiledGraph> {
        let out_dir = workspace.state_dir();
        fs::create_dir_all(&out_dir)?;
        let output_file = tempfile::Builder::new()
            .prefix("compiled-")
            .suffix(".json")
            .tempfile_in(&out_dir)?;

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(workspace.memory_dir())
            .arg(output_file.path())
            .output()
            .map_err(|e| AmpError::Config(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AmpError::Validation(vec![Diagnostic::new(
                BuildRule::CompilerFailed,
                None,
                format!("{} exited with {}: {}", self.program, output.status, stderr.trim()),
            )]));
        }

        let text = fs::read_to_string(output_file.path())?;
        Ok(serde_json::from_str(&text)?)
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Summary of a successful build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub fingerprint: Fingerprint,
    pub index_path: PathBuf,
    pub nodes: usize,
    pub edges: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |m: &BTreeMap<String, usize>| {
            m.iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        writeln!(f, "index written to {}", self.index_path.display())?;
        writeln!(f, "total: {} memories, {} links", self.nodes, self.edges)?;
        writeln!(f, "  types:    {}", join(&self.by_type))?;
        write!(f, "  statuses: {}", join(&self.by_status))
    }
}

/// Compiles, validates, and publishes the Index.
pub struct BuildGate {
    store: ShardStore,
    compiler: Box<dyn IndexCompiler>,
}

impl BuildGate {
    /// Gate using the configured external compiler, or the native one.
    pub fn new(store: ShardStore) -> AmpResult<Self> {
        let compiler: Box<dyn IndexCompiler> = match store.workspace().config().compiler_command {
            Some(ref command) => Box::new(CommandCompiler::from_command_line(command)?),
            None => Box::new(NativeCompiler),
        };
        Ok(Self { store, compiler })
    }

    pub fn with_compiler(mut self, compiler: impl IndexCompiler + 'static) -> Self {
        self.compiler = Box::new(compiler);
        self
    }

    /// Compile and validate without writing anything.
    pub fn check(&self) -> AmpResult<IndexFile> {
        let mut diagnostics = Vec::new();
        let mut shards = Vec::new();
        for handle in self.store.shards()? {
            match Shard::read(&handle) {
                Ok(shard) => shards.push(shard),
                Err(StoreError::MalformedShard { path, detail }) => diagnostics.push(
                    Diagnostic::new(
                        BuildRule::MalformedShard,
                        None,
                        format!("{}: {detail}", path.display()),
                    ),
                ),
                Err(e) => return Err(e.into()),
            }
        }

        let graph = self.compiler.compile(self.store.workspace(), &shards)?;
        diagnostics.extend(validate(self.store.workspace(), &shards, &graph));
        if !diagnostics.is_empty() {
            obs::emit_index_rejected(diagnostics.len());
            return Err(AmpError::Validation(diagnostics));
        }

        Ok(IndexFile {
            format_version: INDEX_FORMAT_VERSION,
            fingerprint: workspace_fingerprint(&shards),
            built_at: Utc::now(),
            nodes: graph.nodes,
            edges: graph.edges,
        })
    }

    /// Compile, validate, and atomically replace the index file.
    pub fn build(&self) -> AmpResult<BuildReport> {
        let file = self.check()?;
        let path = self.store.workspace().index_path();
        write_json_atomic(&path, &file)?;

        let mut by_type = BTreeMap::new();
        let mut by_status = BTreeMap::new();
        for node in &file.nodes {
            *by_type.entry(node.memory_type.to_string()).or_insert(0) += 1;
            *by_status.entry(node.status.to_string()).or_insert(0) += 1;
        }

        obs::emit_index_built(&file.fingerprint.to_hex(), file.nodes.len(), file.edges.len());
        Ok(BuildReport {
            fingerprint: file.fingerprint,
            index_path: path,
            nodes: file.nodes.len(),
            edges: file.edges.len(),
            by_type,
            by_status,
        })
    }
}

/// Run every rule; never stops at the first violation.
fn validate(workspace: &Workspace, shards: &[Shard], graph: &CompiledGraph) -> Vec<Diagnostic> {
    let recognized = &workspace.config().recognized_tag_prefixes;
    let mut diagnostics = Vec::new();

    for shard in shards {
        if shard.len() > MAX_SHARD_RECORDS {
            diagnostics.push(Diagnostic::new(
                BuildRule::ShardOverCapacity,
                None,
                format!(
                    "{} holds {} records (limit {MAX_SHARD_RECORDS})",
                    shard.handle.name(),
                    shard.len()
                ),
            ));
        }
    }

    let mut seen = BTreeSet::new();
    for node in &graph.nodes {
        if !seen.insert(node.id.as_str()) {
            diagnostics.push(Diagnostic::for_record(
                BuildRule::DuplicateId,
                &node.id,
                "id appears more than once",
            ));
        }
        if !node.is_deprecated()
            && !node
                .tags
                .iter()
                .filter_map(|t| tag_prefix(t))
                .any(|p| recognized.iter().any(|r| r == p))
        {
            diagnostics.push(Diagnostic::for_record(
                BuildRule::MissingTagPrefix,
                &node.id,
                format!("needs a tag with one of: {}", recognized.join(", ")),
            ));
        }
        if node.memory_type.requires_body() && node.body.trim().is_empty() {
            diagnostics.push(Diagnostic::for_record(
                BuildRule::EmptyBody,
                &node.id,
                format!("{} records need a body", node.memory_type),
            ));
        }
        let has_note = node
            .deprecation_note
            .as_deref()
            .is_some_and(|n| !n.trim().is_empty());
        if node.is_deprecated() && node.superseded_by.is_none() && !has_note {
            diagnostics.push(Diagnostic::for_record(
                BuildRule::MissingSuccessor,
                &node.id,
                "deprecated without superseded_by or a deprecation note",
            ));
        }
    }

    for edge in &graph.edges {
        if edge.from == edge.to {
            diagnostics.push(Diagnostic::for_record(
                BuildRule::SelfLink,
                &edge.from,
                format!("{} link to itself", edge.relation),
            ));
            continue;
        }
        for endpoint in [&edge.from, &edge.to] {
            if !seen.contains(endpoint.as_str()) {
                diagnostics.push(Diagnostic::for_record(
                    BuildRule::DanglingLink,
                    &edge.from,
                    format!("{} link {} -> {}: {endpoint} does not exist", edge.relation, edge.from, edge.to),
                ));
            }
        }
    }

    diagnostics
}

pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> AmpResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n")?;
    tmp.persist(path).map_err(|e| AmpError::Io(e.error))?;
    Ok(())
}
