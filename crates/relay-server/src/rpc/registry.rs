//! Procedure registry.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use relay_core::RelayError;
use relay_core::errors::codes;
use serde::Serialize;
use tracing::warn;

use super::{Procedure, ProcedureKind, ProcedureMeta, StreamHandler, UnaryHandler};
use crate::atom::{Atom, AtomSource};
use crate::interceptor::{Interceptor, InterceptorChain};

/// A registered procedure with its own interceptors and metadata.
#[derive(Debug)]
pub struct ProcedureEntry {
    procedure: Procedure,
    interceptors: InterceptorChain,
    meta: ProcedureMeta,
}

impl ProcedureEntry {
    /// The handler.
    pub fn procedure(&self) -> &Procedure {
        &self.procedure
    }

    /// Static metadata.
    pub fn meta(&self) -> &ProcedureMeta {
        &self.meta
    }

    /// The procedure kind.
    pub fn kind(&self) -> ProcedureKind {
        self.meta.kind
    }

    /// Put this procedure in an interceptor group.
    pub fn in_group(&mut self, group: &str) -> &mut Self {
        self.meta.group = Some(group.to_owned());
        self
    }

    /// Add an interceptor that applies to this procedure only.
    pub fn intercept(&mut self, interceptor: impl Interceptor + 'static) -> &mut Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Attach a description.
    pub fn describe(&mut self, description: &str) -> &mut Self {
        self.meta.description = Some(description.to_owned());
        self
    }

    /// Declare the value type of events or results.
    pub fn value_type(&mut self, value_type: &str) -> &mut Self {
        self.meta.value_type = Some(value_type.to_owned());
        self
    }
}

/// Registry mapping procedure names to handlers and interceptors.
#[derive(Debug, Default)]
pub struct ProcedureRegistry {
    global: InterceptorChain,
    groups: HashMap<String, InterceptorChain>,
    procedures: HashMap<String, ProcedureEntry>,
}

impl ProcedureRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an interceptor that wraps every procedure.
    pub fn intercept(&mut self, interceptor: impl Interceptor + 'static) -> &mut Self {
        self.global.push(Arc::new(interceptor));
        self
    }

    /// Add an interceptor to a named group.
    pub fn group_intercept(
        &mut self,
        group: &str,
        interceptor: impl Interceptor + 'static,
    ) -> &mut Self {
        self.groups
            .entry(group.to_owned())
            .or_default()
            .push(Arc::new(interceptor));
        self
    }

    /// Register a procedure, replacing any previous one with the same name.
    pub fn register(&mut self, name: &str, procedure: Procedure) -> &mut ProcedureEntry {
        let value_type = match &procedure {
            Procedure::Atom(source) => Some(source.value_type().to_owned()),
            Procedure::Unary(_) | Procedure::Stream(_) => None,
        };
        let entry = ProcedureEntry {
            meta: ProcedureMeta {
                name: name.to_owned(),
                kind: procedure.kind(),
                value_type,
                group: None,
                description: None,
            },
            procedure,
            interceptors: InterceptorChain::new(),
        };
        match self.procedures.entry(name.to_owned()) {
            Entry::Occupied(mut occupied) => {
                warn!(procedure = name, "procedure registered twice, replacing");
                let _ = occupied.insert(entry);
                occupied.into_mut()
            }
            Entry::Vacant(vacant) => vacant.insert(entry),
        }
    }

    /// Register a unary procedure.
    pub fn unary(&mut self, name: &str, handler: impl UnaryHandler + 'static) -> &mut ProcedureEntry {
        self.register(name, Procedure::Unary(Arc::new(handler)))
    }

    /// Register a stream procedure.
    pub fn stream(
        &mut self,
        name: &str,
        handler: impl StreamHandler + 'static,
    ) -> &mut ProcedureEntry {
        self.register(name, Procedure::Stream(Arc::new(handler)))
    }

    /// Register an atom. The registry keeps its own handle to the cell.
    pub fn atom<T>(&mut self, name: &str, atom: &Atom<T>) -> &mut ProcedureEntry
    where
        T: Serialize + Send + 'static,
    {
        let source: Arc<dyn AtomSource> = Arc::new(atom.clone());
        self.register(name, Procedure::Atom(source))
    }

    /// Look up a procedure by name.
    pub fn get(&self, name: &str) -> Option<&ProcedureEntry> {
        self.procedures.get(name)
    }

    /// Look up a procedure and check that it is served over the expected
    /// transport (`streaming` for SSE, otherwise unary).
    pub fn resolve(&self, name: &str, streaming: bool) -> Result<&ProcedureEntry, RelayError> {
        let entry = self.get(name).ok_or_else(|| RelayError::NotFound {
            code: codes::PROCEDURE_NOT_FOUND.into(),
            message: format!("procedure '{name}' not found"),
        })?;
        if entry.kind().is_streaming() != streaming {
            return Err(RelayError::custom(
                codes::WRONG_PROCEDURE_KIND,
                format!(
                    "procedure '{name}' is a {} procedure",
                    entry.kind().as_str()
                ),
            )
            .with_status(405));
        }
        Ok(entry)
    }

    /// The full chain for a procedure: global, then group, then its own.
    pub fn chain_for(&self, entry: &ProcedureEntry) -> InterceptorChain {
        let group = entry
            .meta
            .group
            .as_deref()
            .and_then(|g| self.groups.get(g));
        InterceptorChain::compose(
            std::iter::once(&self.global)
                .chain(group)
                .chain(std::iter::once(&entry.interceptors)),
        )
    }

    /// Metadata for every procedure, sorted by name.
    pub fn procedures(&self) -> Vec<ProcedureMeta> {
        let mut metas: Vec<ProcedureMeta> =
            self.procedures.values().map(|e| e.meta.clone()).collect();
        metas.sort_by(|a, b| a.name.cmp(&b.name));
        metas
    }

    /// Whether a procedure is registered.
    pub fn has_procedure(&self, name: &str) -> bool {
        self.procedures.contains_key(name)
    }

    /// Number of registered procedures.
    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    /// Whether no procedures are registered.
    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}
