//! Parameter plan precomputed for each handler at registration time.
//!
//! # Responsibilities
//! - Describe plain parameters (path, query, header, cookie) with type and constraints
//! - Describe the `data` and `body` kwargs
//! - Layer declared dependencies into batches that can run concurrently
//!
//! # Design Decisions
//! - All wiring errors (duplicate kwargs, unknown or cyclic dependencies) fail the build
//! - Batches keep declaration order so resolution is deterministic

use std::collections::HashSet;

use crate::dependency::provider::Dependency;
use crate::error::BuildError;

pub const DATA_KWARG: &str = "data";
pub const BODY_KWARG: &str = "body";

/// Where a plain parameter is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSource {
    Path,
    Query,
    Header,
    Cookie,
}

impl ParamSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamSource::Path => "path",
            ParamSource::Query => "query",
            ParamSource::Header => "header",
            ParamSource::Cookie => "cookie",
        }
    }
}

/// Declared type a raw parameter is coerced into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamType {
    #[default]
    Str,
    Int,
    Float,
    Bool,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    pub gt: Option<f64>,
    pub ge: Option<f64>,
    pub lt: Option<f64>,
    pub le: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

/// A plain parameter: `(name, source, type)` plus validation rules.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    /// Name looked up in the request, when it differs from the kwarg name.
    pub alias: Option<String>,
    pub source: ParamSource,
    pub ty: ParamType,
    pub required: bool,
    pub default: Option<serde_json::Value>,
    pub constraints: Constraints,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, source: ParamSource) -> Self {
        Self {
            name: name.into(),
            alias: None,
            source,
            ty: ParamType::Str,
            // path params can never be absent
            required: source == ParamSource::Path,
            default: None,
            constraints: Constraints::default(),
        }
    }

    pub fn path(name: impl Into<String>) -> Self {
        Self::new(name, ParamSource::Path)
    }

    pub fn query(name: impl Into<String>) -> Self {
        Self::new(name, ParamSource::Query)
    }

    pub fn header(name: impl Into<String>) -> Self {
        Self::new(name, ParamSource::Header)
    }

    pub fn cookie(name: impl Into<String>) -> Self {
        Self::new(name, ParamSource::Cookie)
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn int(mut self) -> Self {
        self.ty = ParamType::Int;
        self
    }

    pub fn float(mut self) -> Self {
        self.ty = ParamType::Float;
        self
    }

    pub fn bool(mut self) -> Self {
        self.ty = ParamType::Bool;
        self
    }

    pub fn json(mut self) -> Self {
        self.ty = ParamType::Json;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.default = Some(value.into());
        self.required = false;
        self
    }

    pub fn gt(mut self, bound: f64) -> Self {
        self.constraints.gt = Some(bound);
        self
    }

    pub fn ge(mut self, bound: f64) -> Self {
        self.constraints.ge = Some(bound);
        self
    }

    pub fn lt(mut self, bound: f64) -> Self {
        self.constraints.lt = Some(bound);
        self
    }

    pub fn le(mut self, bound: f64) -> Self {
        self.constraints.le = Some(bound);
        self
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.constraints.min_length = Some(len);
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.constraints.max_length = Some(len);
        self
    }

    /// Name to look up in the request.
    ///
    /// Headers default to the kwarg name with `_` replaced by `-`.
    pub fn lookup_name(&self) -> String {
        match (&self.alias, self.source) {
            (Some(alias), _) => alias.clone(),
            (None, ParamSource::Header) => self.name.replace('_', "-"),
            (None, _) => self.name.clone(),
        }
    }
}

/// How the `data` kwarg decodes the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataEncoding {
    #[default]
    Json,
    UrlEncoded,
    MultiPart,
}

/// Precomputed plan for resolving a handler's kwargs.
#[derive(Debug, Clone, Default)]
pub struct KwargsModel {
    params: Vec<ParamSpec>,
    data: Option<DataEncoding>,
    body: bool,
    dependency_batches: Vec<Vec<Dependency>>,
}

impl KwargsModel {
    pub fn build(
        params: Vec<ParamSpec>,
        data: Option<DataEncoding>,
        body: bool,
        dependencies: Vec<Dependency>,
    ) -> Result<Self, BuildError> {
        {
            let mut seen = HashSet::new();
            let names = params
                .iter()
                .map(|p| p.name.as_str())
                .chain(data.map(|_| DATA_KWARG))
                .chain(body.then_some(BODY_KWARG))
                .chain(dependencies.iter().map(Dependency::key));
            for name in names {
                if !seen.insert(name) {
                    return Err(BuildError::ConflictingKwarg(name.to_string()));
                }
            }
        }

        let dependency_batches = layer_dependencies(dependencies)?;
        Ok(Self {
            params,
            data,
            body,
            dependency_batches,
        })
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn data(&self) -> Option<DataEncoding> {
        self.data
    }

    pub fn has_body(&self) -> bool {
        self.body
    }

    pub fn dependency_batches(&self) -> &[Vec<Dependency>] {
        &self.dependency_batches
    }

    pub fn has_dependencies(&self) -> bool {
        !self.dependency_batches.is_empty()
    }

    /// True when nothing needs resolving.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty() && self.data.is_none() && !self.body && self.dependency_batches.is_empty()
    }
}

/// Split dependencies into batches where each only needs earlier batches.
fn layer_dependencies(dependencies: Vec<Dependency>) -> Result<Vec<Vec<Dependency>>, BuildError> {
    {
        let keys: HashSet<&str> = dependencies.iter().map(Dependency::key).collect();
        for dep in &dependencies {
            if let Some(missing) = dep.dependencies().iter().find(|d| !keys.contains(d.as_str())) {
                return Err(BuildError::UnknownDependency {
                    key: dep.key().to_string(),
                    missing: missing.clone(),
                });
            }
        }
    }

    let mut resolved: HashSet<String> = HashSet::new();
    let mut pending = dependencies;
    let mut batches = Vec::new();

    while !pending.is_empty() {
        let (ready, blocked): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|dep| dep.dependencies().iter().all(|d| resolved.contains(d)));
        if ready.is_empty() {
            return Err(BuildError::DependencyCycle(
                blocked.iter().map(|d| d.key().to_string()).collect(),
            ));
        }
        resolved.extend(ready.iter().map(|d| d.key().to_string()));
        batches.push(ready);
        pending = blocked;
    }

    Ok(batches)
}
