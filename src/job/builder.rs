use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use petgraph::Graph;
use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;

use crate::ArcStr;
use crate::error::{EngineError, JobLabel};
use crate::job::{
    Analyzer, AnalyzerHandle, Component, Filter, FilterHandle, FilterOutcome, JobId,
    OutputStreamSpec, Requirement, Transformer, TransformerHandle,
};
use crate::result::AnalyzerResultReducer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Filter,
    Transformer,
    Analyzer,
}

impl Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobKind::Filter => "filter",
            JobKind::Transformer => "transformer",
            JobKind::Analyzer => "analyzer",
        })
    }
}

/// Why one job runs after another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    /// The target reads a column the source produces.
    Column(ArcStr),
    /// The target only receives rows given this outcome.
    Requirement(FilterOutcome),
}

/// Everything about a job except the component itself.
#[derive(Debug, Clone)]
pub(crate) struct JobInfo {
    pub id: JobId,
    pub name: ArcStr,
    pub kind: JobKind,
    pub inputs: Vec<ArcStr>,
    pub requirement: Option<Requirement>,
    /// Columns appended by a transformer.
    pub outputs: Vec<ArcStr>,
    /// Declared categories of a filter.
    pub categories: Vec<ArcStr>,
    pub streams: Vec<OutputStreamSpec>,
}

impl JobInfo {
    pub fn label(&self) -> JobLabel {
        JobLabel {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

/// A nested job fed by one output stream of an analyzer.
#[derive(Debug)]
pub(crate) struct StreamBinding {
    pub analyzer: JobId,
    pub stream: String,
    pub columns: Vec<ArcStr>,
    pub job: AnalysisJob,
}

/// Assembles an [`AnalysisJob`].
///
/// Components are registered through a [`JobDef`] that collects their name,
/// input columns and requirement. All wiring is validated in
/// [`JobBuilder::build`].
///
/// ```rust,ignore
/// let mut builder = JobBuilder::new(["name", "age"]);
/// let adult = builder.filter(IsAdult).input("age").register();
/// let stats = builder
///     .analyzer(Stats::default())
///     .input("name")
///     .requires(adult.outcome("VALID"))
///     .register();
/// let job = builder.build()?;
/// ```
pub struct JobBuilder {
    columns: Vec<ArcStr>,
    ids: Arc<AtomicU32>,
    pending: Vec<(JobInfo, Component)>,
    late: Vec<(JobId, Requirement)>,
    streams: Vec<(JobId, String, AnalysisJob)>,
}

impl JobBuilder {
    /// A builder for a job reading the given source columns.
    pub fn new<I, C>(columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ArcStr>,
    {
        Self::with_ids(columns, Arc::default())
    }

    /// A builder for a job fed by an output stream. Its job ids continue the
    /// numbering of `self`.
    pub fn nested<I, C>(&self, columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ArcStr>,
    {
        Self::with_ids(columns, self.ids.clone())
    }

    fn with_ids<I, C>(columns: I, ids: Arc<AtomicU32>) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ArcStr>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ids,
            pending: Vec::new(),
            late: Vec::new(),
            streams: Vec::new(),
        }
    }

    pub fn filter(&mut self, filter: impl Filter + 'static) -> JobDef<'_, FilterHandle> {
        JobDef::new(self, Component::Filter(Box::new(filter)), FilterHandle)
    }

    pub fn transformer(
        &mut self,
        transformer: impl Transformer + 'static,
    ) -> JobDef<'_, TransformerHandle> {
        JobDef::new(
            self,
            Component::Transformer(Box::new(transformer)),
            TransformerHandle,
        )
    }

    pub fn analyzer(&mut self, analyzer: impl Analyzer + 'static) -> JobDef<'_, AnalyzerHandle> {
        JobDef::new(self, Component::Analyzer(Box::new(analyzer)), AnalyzerHandle)
    }

    /// Sets the requirement of an already registered job.
    pub fn require(&mut self, job: impl Into<JobId>, requirement: impl Into<Requirement>) -> &mut Self {
        self.late.push((job.into(), requirement.into()));
        self
    }

    /// Attaches a job to a declared output stream of an analyzer.
    pub fn output_stream(
        &mut self,
        analyzer: AnalyzerHandle,
        stream: impl Into<String>,
        job: AnalysisJob,
    ) -> &mut Self {
        self.streams.push((analyzer.id(), stream.into(), job));
        self
    }

    fn push(&mut self, info: JobInfo, component: Component) {
        self.pending.push((info, component));
    }

    pub fn build(self) -> Result<AnalysisJob, EngineError> {
        let JobBuilder {
            columns,
            mut pending,
            late,
            streams,
            ..
        } = self;

        if pending.is_empty() {
            return Err(EngineError::EmptyJob);
        }

        for (id, requirement) in late {
            let (info, _) = pending
                .iter_mut()
                .find(|(info, _)| info.id == id)
                .ok_or(EngineError::UnknownJob(id))?;
            info.requirement = Some(requirement);
        }

        let mut graph: Graph<JobInfo, Dependency> = Graph::new();
        let mut components = Vec::with_capacity(pending.len());
        for (info, component) in pending {
            graph.add_node(info);
            components.push(component);
        }

        // `None` marks a source column.
        let mut producers: HashMap<ArcStr, Option<NodeIndex>> = HashMap::new();
        for column in &columns {
            if producers.insert(column.clone(), None).is_some() {
                return Err(EngineError::DuplicateColumn(column.to_string()));
            }
        }

        let by_id: HashMap<JobId, NodeIndex> = graph
            .node_indices()
            .map(|index| (graph[index].id, index))
            .collect();

        for index in graph.node_indices() {
            for column in &graph[index].outputs {
                if producers.insert(column.clone(), Some(index)).is_some() {
                    return Err(EngineError::DuplicateColumn(column.to_string()));
                }
            }
        }

        let mut edges = Vec::new();
        for index in graph.node_indices() {
            let info = &graph[index];

            for column in &info.inputs {
                match producers.get(column) {
                    None => {
                        return Err(EngineError::UnknownColumn {
                            job: info.name.to_string(),
                            column: column.to_string(),
                        });
                    }
                    Some(None) => {}
                    Some(Some(producer)) => {
                        edges.push((*producer, index, Dependency::Column(column.clone())));
                    }
                }
            }

            let Some(requirement) = &info.requirement else {
                continue;
            };

            let invalid = |reason: String| EngineError::InvalidRequirement {
                job: info.name.to_string(),
                reason,
            };

            if requirement.outcomes().is_empty() {
                return Err(invalid("no outcomes listed".into()));
            }

            for outcome in requirement.outcomes() {
                let filter = by_id
                    .get(&outcome.filter)
                    .copied()
                    .ok_or_else(|| invalid(format!("unknown job {}", outcome.filter)))?;

                let target = &graph[filter];
                if target.kind != JobKind::Filter {
                    return Err(invalid(format!("'{}' is not a filter", target.name)));
                }
                if !target.categories.contains(&outcome.category) {
                    return Err(invalid(format!(
                        "filter '{}' has no category '{}'",
                        target.name, outcome.category
                    )));
                }

                edges.push((filter, index, Dependency::Requirement(outcome.clone())));
            }
        }

        for (from, to, dependency) in edges {
            graph.add_edge(from, to, dependency);
        }

        let order = toposort(&graph, None)
            .map_err(|cycle| EngineError::Cycle(graph[cycle.node_id()].name.to_string()))?;

        let mut bound: Vec<StreamBinding> = Vec::with_capacity(streams.len());
        for (analyzer, stream, job) in streams {
            let index = by_id
                .get(&analyzer)
                .copied()
                .ok_or(EngineError::UnknownJob(analyzer))?;
            let info = &graph[index];

            let spec = info
                .streams
                .iter()
                .find(|spec| spec.name == stream)
                .ok_or_else(|| EngineError::UnknownOutputStream {
                    job: info.name.to_string(),
                    stream: stream.clone(),
                })?;

            if bound.iter().any(|b| b.analyzer == analyzer && b.stream == stream) {
                return Err(EngineError::DuplicateOutputStream {
                    job: info.name.to_string(),
                    stream,
                });
            }

            for column in job.source_columns() {
                if !spec.columns.iter().any(|c| **c == **column) {
                    return Err(EngineError::MissingSourceColumn(column.to_string()));
                }
            }

            bound.push(StreamBinding {
                analyzer,
                stream,
                columns: spec.columns.iter().map(|c| ArcStr::from(c.as_str())).collect(),
                job,
            });
        }

        Ok(AnalysisJob {
            source_columns: columns,
            graph,
            components,
            order,
            streams: bound,
        })
    }
}

/// Registration of a single component, finished with [`JobDef::register`].
pub struct JobDef<'a, H> {
    builder: &'a mut JobBuilder,
    component: Component,
    name: Option<ArcStr>,
    inputs: Vec<ArcStr>,
    requirement: Option<Requirement>,
    wrap: fn(JobId) -> H,
}

impl<'a, H> JobDef<'a, H> {
    fn new(builder: &'a mut JobBuilder, component: Component, wrap: fn(JobId) -> H) -> Self {
        Self {
            builder,
            component,
            name: None,
            inputs: Vec::new(),
            requirement: None,
            wrap,
        }
    }

    pub fn name(mut self, name: impl Into<ArcStr>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn input(mut self, column: impl Into<ArcStr>) -> Self {
        self.inputs.push(column.into());
        self
    }

    pub fn inputs<I, C>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ArcStr>,
    {
        self.inputs.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn requires(mut self, requirement: impl Into<Requirement>) -> Self {
        self.requirement = Some(requirement.into());
        self
    }

    pub fn register(self) -> H {
        let id = JobId(self.builder.ids.fetch_add(1, Ordering::Relaxed));

        let (kind, outputs, categories, streams) = match &self.component {
            Component::Filter(filter) => (JobKind::Filter, vec![], filter.categories(), vec![]),
            Component::Transformer(transformer) => (
                JobKind::Transformer,
                transformer.output_columns(),
                vec![],
                vec![],
            ),
            Component::Analyzer(analyzer) => {
                (JobKind::Analyzer, vec![], vec![], analyzer.output_streams())
            }
        };

        let name = self
            .name
            .unwrap_or_else(|| ArcStr::from(format!("{kind} {id}")));

        let info = JobInfo {
            id,
            name,
            kind,
            inputs: self.inputs,
            requirement: self.requirement,
            outputs: outputs.into_iter().map(ArcStr::from).collect(),
            categories: categories.into_iter().map(ArcStr::from).collect(),
            streams,
        };

        self.builder.push(info, self.component);
        (self.wrap)(id)
    }
}

/// A validated, immutable job graph ready to run.
pub struct AnalysisJob {
    source_columns: Vec<ArcStr>,
    graph: Graph<JobInfo, Dependency>,
    /// Indexed like the graph's nodes.
    components: Vec<Component>,
    order: Vec<NodeIndex>,
    streams: Vec<StreamBinding>,
}

/// An [`AnalysisJob`] taken apart for execution.
pub(crate) struct JobParts {
    pub graph: Graph<JobInfo, Dependency>,
    pub components: Vec<Component>,
    pub order: Vec<NodeIndex>,
    pub streams: Vec<StreamBinding>,
}

impl AnalysisJob {
    pub fn source_columns(&self) -> &[ArcStr] {
        &self.source_columns
    }

    /// Number of jobs in this graph, not counting nested stream jobs.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Jobs of this graph in execution order.
    pub fn jobs(&self) -> impl Iterator<Item = (JobId, &str, JobKind)> {
        self.order.iter().map(|&index| {
            let info = &self.graph[index];
            (info.id, &*info.name, info.kind)
        })
    }

    /// Looks a job up here and in every nested stream job.
    pub fn job_name(&self, id: JobId) -> Option<&str> {
        self.graph
            .node_weights()
            .find(|info| info.id == id)
            .map(|info| &*info.name)
            .or_else(|| self.streams.iter().find_map(|s| s.job.job_name(id)))
    }

    /// Jobs attached to output streams, with the analyzer and stream name.
    pub fn nested_jobs(&self) -> impl Iterator<Item = (JobId, &str, &AnalysisJob)> {
        self.streams
            .iter()
            .map(|s| (s.analyzer, s.stream.as_str(), &s.job))
    }

    /// Reducer declared by every analyzer, nested jobs included.
    pub(crate) fn reducers(&self) -> Vec<(JobLabel, Option<Arc<dyn AnalyzerResultReducer>>)> {
        let mut reducers = Vec::new();

        for index in &self.order {
            if let Component::Analyzer(analyzer) = &self.components[index.index()] {
                reducers.push((self.graph[*index].label(), analyzer.reducer()));
            }
        }

        for stream in &self.streams {
            reducers.extend(stream.job.reducers());
        }

        reducers
    }

    pub(crate) fn into_parts(self) -> JobParts {
        JobParts {
            graph: self.graph,
            components: self.components,
            order: self.order,
            streams: self.streams,
        }
    }

    fn write_mermaid(&self, f: &mut fmt::Formatter<'_>, source: &str) -> fmt::Result {
        for &index in &self.order {
            let info = &self.graph[index];
            let name = info.name.replace('"', "\\\"");
            writeln!(f, "    j{}[\"{}: {}\"]", info.id.0, info.kind, name)?;

            for column in &info.inputs {
                if self.source_columns.contains(column) {
                    writeln!(f, "    {source} -- \"{column}\" --> j{}", info.id.0)?;
                }
            }
        }

        for edge in self.graph.edge_indices() {
            let Some((from, to)) = self.graph.edge_endpoints(edge) else {
                continue;
            };
            let label = match &self.graph[edge] {
                Dependency::Column(column) => column.to_string(),
                Dependency::Requirement(outcome) => format!("={}", outcome.category),
            };
            writeln!(
                f,
                "    j{} -- \"{}\" --> j{}",
                self.graph[from].id.0,
                label.replace('"', "\\\""),
                self.graph[to].id.0
            )?;
        }

        for stream in &self.streams {
            stream.job.write_mermaid(f, &format!("j{}", stream.analyzer.0))?;
        }

        Ok(())
    }
}

impl fmt::Debug for AnalysisJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisJob")
            .field("source_columns", &self.source_columns)
            .field("jobs", &self.jobs().collect::<Vec<_>>())
            .field("streams", &self.streams)
            .finish()
    }
}

/// Renders the graph as a Mermaid flowchart.
impl Display for AnalysisJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph LR")?;
        writeln!(f, "    source[(source)]")?;
        self.write_mermaid(f, "source")
    }
}
