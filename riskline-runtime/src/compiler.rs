//! Pipeline compiler
//!
//! The compiler validates pipeline definitions, resolves dependencies, and
//! produces an execution plan in topological order.

use crate::stage::Stage;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during pipeline compilation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("Circular dependency detected between stages: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    #[error("Missing dependency {missing} referenced by stage {stage}")]
    MissingDependency { stage: String, missing: String },

    #[error("Duplicate stage registered: {0}")]
    DuplicateStage(String),

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),
}

/// A named stage and the stages it depends on
#[derive(Clone)]
pub struct StageDefinition {
    pub name: String,
    pub depends_on: Vec<String>,
    pub stage: Arc<dyn Stage>,
}

impl fmt::Debug for StageDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDefinition")
            .field("name", &self.name)
            .field("kind", &self.stage.kind())
            .field("depends_on", &self.depends_on)
            .finish()
    }
}

/// Uncompiled pipeline: stages in declaration order
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    pub name: String,
    pub stages: Vec<StageDefinition>,
}

impl PipelineDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Append a stage
    pub fn stage<S: Stage + 'static>(self, name: &str, depends_on: &[&str], stage: S) -> Self {
        self.stage_arc(name, depends_on, Arc::new(stage))
    }

    pub fn stage_arc(mut self, name: &str, depends_on: &[&str], stage: Arc<dyn Stage>) -> Self {
        self.stages.push(StageDefinition {
            name: name.to_string(),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            stage,
        });
        self
    }
}

/// Compiles pipeline definitions into execution plans
#[derive(Debug, Default)]
pub struct PipelineCompiler;

impl PipelineCompiler {
    pub fn new() -> Self {
        Self
    }

    /// Compile a pipeline and validate it
    pub fn compile(&self, pipeline: &PipelineDefinition) -> Result<ExecutionPlan, CompileError> {
        if pipeline.stages.is_empty() {
            return Err(CompileError::InvalidPipeline(format!(
                "pipeline '{}' has no stages",
                pipeline.name
            )));
        }

        let mut stages: BTreeMap<String, StageDefinition> = BTreeMap::new();
        for def in &pipeline.stages {
            if def.name.trim().is_empty() {
                return Err(CompileError::InvalidPipeline(
                    "stage names must not be empty".to_string(),
                ));
            }
            if stages.insert(def.name.clone(), def.clone()).is_some() {
                return Err(CompileError::DuplicateStage(def.name.clone()));
            }
        }

        for def in &pipeline.stages {
            let mut seen = HashSet::new();
            for dep in &def.depends_on {
                if !stages.contains_key(dep) {
                    return Err(CompileError::MissingDependency {
                        stage: def.name.clone(),
                        missing: dep.clone(),
                    });
                }
                if !seen.insert(dep) {
                    return Err(CompileError::InvalidPipeline(format!(
                        "stage '{}' lists dependency '{}' twice",
                        def.name, dep
                    )));
                }
            }
        }

        let order = topological_sort(pipeline)?;

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for name in &order {
            for dep in &stages[name].depends_on {
                dependents.entry(dep.clone()).or_default().push(name.clone());
            }
        }

        Ok(ExecutionPlan {
            pipeline: pipeline.name.clone(),
            order,
            stages,
            dependents,
        })
    }
}

/// Kahn's algorithm. Ties are broken by declaration order so plans are stable.
fn topological_sort(pipeline: &PipelineDefinition) -> Result<Vec<String>, CompileError> {
    let position: HashMap<&str, usize> = pipeline
        .stages
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    let mut indegree: Vec<usize> = pipeline.stages.iter().map(|s| s.depends_on.len()).collect();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); pipeline.stages.len()];
    for (i, def) in pipeline.stages.iter().enumerate() {
        for dep in &def.depends_on {
            children[position[dep.as_str()]].push(i);
        }
    }

    let mut ready: VecDeque<usize> = (0..pipeline.stages.len())
        .filter(|&i| indegree[i] == 0)
        .collect();
    let mut ordered = Vec::with_capacity(pipeline.stages.len());

    while let Some(i) = ready.pop_front() {
        ordered.push(i);
        let mut unlocked = Vec::new();
        for &child in &children[i] {
            indegree[child] -= 1;
            if indegree[child] == 0 {
                unlocked.push(child);
            }
        }
        unlocked.sort_unstable();
        ready.extend(unlocked);
    }

    if ordered.len() != pipeline.stages.len() {
        let mut cyclic: Vec<String> = (0..pipeline.stages.len())
            .filter(|&i| indegree[i] > 0)
            .map(|i| pipeline.stages[i].name.clone())
            .collect();
        cyclic.sort();
        return Err(CompileError::CircularDependency(cyclic));
    }

    Ok(ordered
        .into_iter()
        .map(|i| pipeline.stages[i].name.clone())
        .collect())
}

/// A validated pipeline ready to execute
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pipeline: String,
    order: Vec<String>,
    stages: BTreeMap<String, StageDefinition>,
    dependents: HashMap<String, Vec<String>>,
}

impl ExecutionPlan {
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Stage names in topological order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn stage(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.get(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Direct dependents of a stage
    pub fn dependents(&self, name: &str) -> &[String] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every stage reachable downstream of `name`, in plan order
    pub fn transitive_dependents(&self, name: &str) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([name]);
        while let Some(current) = queue.pop_front() {
            for child in self.dependents(current) {
                if seen.insert(child.as_str()) {
                    queue.push_back(child.as_str());
                }
            }
        }
        self.order
            .iter()
            .filter(|s| seen.contains(s.as_str()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Artifact;
    use crate::stage::{StageContext, StageError, StageInputs};
    use riskline_core::Fingerprint;

    struct Noop;

    impl Stage for Noop {
        fn kind(&self) -> &'static str {
            "noop"
        }

        fn config_fingerprint(&self) -> Result<Fingerprint, StageError> {
            Ok(Fingerprint::of_bytes(b"noop"))
        }

        fn run(&self, _ctx: &StageContext, _inputs: &StageInputs) -> Result<Artifact, StageError> {
            Err(StageError::internal("not executed in compiler tests"))
        }
    }

    #[test]
    fn test_compile_topological_order() {
        let pipeline = PipelineDefinition::new("p")
            .stage("train", &["transform"], Noop)
            .stage("ingest", &[], Noop)
            .stage("transform", &["ingest"], Noop);

        let plan = PipelineCompiler::new().compile(&pipeline).unwrap();
        assert_eq!(plan.order(), &["ingest", "transform", "train"]);
        assert_eq!(plan.dependents("ingest"), &["transform"]);
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let pipeline = PipelineDefinition::new("p")
            .stage("root", &[], Noop)
            .stage("b", &["root"], Noop)
            .stage("a", &["root"], Noop)
            .stage("join", &["a", "b"], Noop);

        let plan = PipelineCompiler::new().compile(&pipeline).unwrap();
        assert_eq!(plan.order(), &["root", "b", "a", "join"]);
        assert_eq!(plan.transitive_dependents("root"), vec!["b", "a", "join"]);
        assert_eq!(plan.transitive_dependents("a"), vec!["join"]);
    }

    #[test]
    fn test_compile_detects_cycle() {
        let pipeline = PipelineDefinition::new("p")
            .stage("ingest", &[], Noop)
            .stage("a", &["ingest", "b"], Noop)
            .stage("b", &["a"], Noop);

        let err = PipelineCompiler::new().compile(&pipeline).unwrap_err();
        assert_eq!(
            err,
            CompileError::CircularDependency(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let pipeline = PipelineDefinition::new("p").stage("a", &["a"], Noop);
        let err = PipelineCompiler::new().compile(&pipeline).unwrap_err();
        assert!(matches!(err, CompileError::CircularDependency(_)));
    }

    #[test]
    fn test_compile_missing_dependency() {
        let pipeline = PipelineDefinition::new("p").stage("a", &["b"], Noop);
        let err = PipelineCompiler::new().compile(&pipeline).unwrap_err();
        assert_eq!(
            err,
            CompileError::MissingDependency {
                stage: "a".to_string(),
                missing: "b".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_and_empty() {
        let pipeline = PipelineDefinition::new("p")
            .stage("a", &[], Noop)
            .stage("a", &[], Noop);
        assert_eq!(
            PipelineCompiler::new().compile(&pipeline).unwrap_err(),
            CompileError::DuplicateStage("a".to_string())
        );

        let empty = PipelineDefinition::new("p");
        assert!(matches!(
            PipelineCompiler::new().compile(&empty).unwrap_err(),
            CompileError::InvalidPipeline(_)
        ));
    }
}
