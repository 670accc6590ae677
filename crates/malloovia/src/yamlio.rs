//! Reading and writing problem and solution documents.
//!
//! Documents are YAML with the top-level keys `Apps`, `Limiting_sets`,
//! `Instance_classes`, `Performances`, `Workloads`, `Problems` and
//! (for solution documents) `Solutions`. Cross references may be plain id
//! strings or native YAML anchors/aliases (aliases arrive expanded and are
//! deduplicated by id). Files ending in `.gz` are transparently
//! (de)compressed. Workloads may carry their values inline or point to a
//! file with one value per line, resolved relative to the document.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::MallooviaError;
use crate::model::{
    App, InstanceClass, LimitingSet, PerformanceSet, PerformanceValues, Problem, TimeUnit,
    Workload,
};
use crate::solution::{
    AllocationInfo, GlobalSolvingStats, MallooviaStats, ReservedAllocation, Solution, SolutionI,
    SolutionII, SolvingStats,
};

/// A cross reference: either a bare id or the referenced entity itself
/// (inline definition, or a YAML alias expanded by the loader).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum Ref<T> {
    Id(String),
    Inline(T),
}

trait HasId {
    fn id(&self) -> &str;
}

impl<T: HasId> Ref<T> {
    fn id(&self) -> &str {
        match self {
            Ref::Id(id) => id,
            Ref::Inline(entity) => entity.id(),
        }
    }
}

macro_rules! impl_has_id {
    ($($type:ty),*) => {
        $(impl HasId for $type {
            fn id(&self) -> &str {
                &self.id
            }
        })*
    };
}

impl_has_id!(
    RawApp,
    RawLimitingSet,
    RawInstanceClass,
    RawWorkload,
    RawPerformanceSet,
    RawProblem,
    RawSolution
);

fn default_cores() -> f64 {
    1.
}

fn default_units() -> String {
    "vms".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawApp {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLimitingSet {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    max_vms: u64,
    #[serde(default)]
    max_cores: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInstanceClass {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    limiting_sets: Vec<Ref<RawLimitingSet>>,
    max_vms: u64,
    price: f64,
    time_unit: TimeUnit,
    #[serde(default)]
    is_reserved: bool,
    #[serde(default = "default_cores")]
    cores: f64,
    #[serde(default)]
    is_private: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWorkload {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    app: Ref<RawApp>,
    time_unit: TimeUnit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    values: Option<Vec<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    intra_slot_distribution: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPerformanceValue {
    instance_class: Ref<RawInstanceClass>,
    app: Ref<RawApp>,
    value: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPerformanceSet {
    id: String,
    time_unit: TimeUnit,
    values: Vec<RawPerformanceValue>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProblem {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    workloads: Vec<Ref<RawWorkload>>,
    instance_classes: Vec<Ref<RawInstanceClass>>,
    performances: Ref<RawPerformanceSet>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum RawStatsField {
    One(RawSolvingStats),
    Many(Vec<RawSolvingStats>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSolvingStats {
    creation_time: f64,
    solving_time: f64,
    optimal_cost: Option<f64>,
    algorithm: RawAlgorithm,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAlgorithm {
    malloovia: MallooviaStats,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawReservedAllocation {
    instance_classes: Vec<Ref<RawInstanceClass>>,
    vms_number: Vec<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAllocation {
    apps: Vec<Ref<RawApp>>,
    instance_classes: Vec<Ref<RawInstanceClass>>,
    workload_tuples: Vec<Vec<u64>>,
    #[serde(default)]
    repeats: Vec<u64>,
    values: Vec<Vec<Vec<u64>>>,
    #[serde(default = "default_units")]
    units: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSolution {
    id: String,
    problem: Ref<RawProblem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    previous_phase: Option<Box<Ref<RawSolution>>>,
    solving_stats: RawStatsField,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    global_solving_stats: Option<GlobalSolvingStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reserved_allocation: Option<RawReservedAllocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allocation: Option<RawAllocation>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDocument {
    #[serde(rename = "Apps", default, skip_serializing_if = "Vec::is_empty")]
    apps: Vec<RawApp>,
    #[serde(rename = "Limiting_sets", default, skip_serializing_if = "Vec::is_empty")]
    limiting_sets: Vec<RawLimitingSet>,
    #[serde(rename = "Instance_classes", default, skip_serializing_if = "Vec::is_empty")]
    instance_classes: Vec<RawInstanceClass>,
    #[serde(rename = "Performances", default, skip_serializing_if = "Vec::is_empty")]
    performances: Vec<RawPerformanceSet>,
    #[serde(rename = "Workloads", default, skip_serializing_if = "Vec::is_empty")]
    workloads: Vec<RawWorkload>,
    #[serde(rename = "Problems", default, skip_serializing_if = "Vec::is_empty")]
    problems: Vec<RawProblem>,
    #[serde(rename = "Solutions", default, skip_serializing_if = "Vec::is_empty")]
    solutions: Vec<RawSolution>,
}

/// Pools of raw entities gathered from the whole document, both top-level
/// and inline definitions, deduplicated by id (first definition wins, as
/// aliases always repeat the anchored content).
#[derive(Default)]
struct RawPools {
    apps: BTreeMap<String, RawApp>,
    limiting_sets: BTreeMap<String, RawLimitingSet>,
    instance_classes: BTreeMap<String, RawInstanceClass>,
    workloads: BTreeMap<String, RawWorkload>,
    performances: BTreeMap<String, RawPerformanceSet>,
    problems: BTreeMap<String, RawProblem>,
}

impl RawPools {
    fn gather(doc: &RawDocument) -> Self {
        let mut pools = Self::default();
        for app in &doc.apps {
            pools.add_app(app);
        }
        for lset in &doc.limiting_sets {
            pools.add_limiting_set(lset);
        }
        for iclass in &doc.instance_classes {
            pools.add_instance_class(iclass);
        }
        for workload in &doc.workloads {
            pools.add_workload(workload);
        }
        for perfs in &doc.performances {
            pools.add_performances(perfs);
        }
        for problem in &doc.problems {
            pools.add_problem(problem);
        }
        for solution in &doc.solutions {
            pools.add_solution(solution);
        }
        pools
    }

    fn add_app(&mut self, raw: &RawApp) {
        self.apps.entry(raw.id.clone()).or_insert_with(|| raw.clone());
    }

    fn add_limiting_set(&mut self, raw: &RawLimitingSet) {
        self.limiting_sets
            .entry(raw.id.clone())
            .or_insert_with(|| raw.clone());
    }

    fn add_instance_class(&mut self, raw: &RawInstanceClass) {
        for lset in &raw.limiting_sets {
            if let Ref::Inline(lset) = lset {
                self.add_limiting_set(lset);
            }
        }
        self.instance_classes
            .entry(raw.id.clone())
            .or_insert_with(|| raw.clone());
    }

    fn add_workload(&mut self, raw: &RawWorkload) {
        if let Ref::Inline(app) = &raw.app {
            self.add_app(app);
        }
        self.workloads
            .entry(raw.id.clone())
            .or_insert_with(|| raw.clone());
    }

    fn add_performances(&mut self, raw: &RawPerformanceSet) {
        for value in &raw.values {
            if let Ref::Inline(iclass) = &value.instance_class {
                self.add_instance_class(iclass);
            }
            if let Ref::Inline(app) = &value.app {
                self.add_app(app);
            }
        }
        self.performances
            .entry(raw.id.clone())
            .or_insert_with(|| raw.clone());
    }

    fn add_problem(&mut self, raw: &RawProblem) {
        for workload in &raw.workloads {
            if let Ref::Inline(workload) = workload {
                self.add_workload(workload);
            }
        }
        for iclass in &raw.instance_classes {
            if let Ref::Inline(iclass) = iclass {
                self.add_instance_class(iclass);
            }
        }
        if let Ref::Inline(perfs) = &raw.performances {
            self.add_performances(perfs);
        }
        self.problems
            .entry(raw.id.clone())
            .or_insert_with(|| raw.clone());
    }

    fn add_solution(&mut self, raw: &RawSolution) {
        if let Ref::Inline(problem) = &raw.problem {
            self.add_problem(problem);
        }
        if let Some(previous) = &raw.previous_phase {
            if let Ref::Inline(previous) = previous.as_ref() {
                self.add_solution(previous);
            }
        }
    }
}

/// Converts the gathered raw pools into domain entities.
struct Resolver {
    pools: RawPools,
    base_dir: PathBuf,
}

impl Resolver {
    fn app(&self, id: &str) -> Result<App, MallooviaError> {
        let raw = self
            .pools
            .apps
            .get(id)
            .ok_or_else(|| MallooviaError::UnknownReference(format!("app {}", id)))?;
        Ok(App {
            id: raw.id.clone(),
            name: raw.name.clone().unwrap_or_else(|| raw.id.clone()),
        })
    }

    fn limiting_set(&self, id: &str) -> Result<LimitingSet, MallooviaError> {
        let raw = self
            .pools
            .limiting_sets
            .get(id)
            .ok_or_else(|| MallooviaError::UnknownReference(format!("limiting set {}", id)))?;
        Ok(LimitingSet {
            id: raw.id.clone(),
            name: raw.name.clone().unwrap_or_else(|| raw.id.clone()),
            max_vms: raw.max_vms,
            max_cores: raw.max_cores,
        })
    }

    fn instance_class(&self, id: &str) -> Result<InstanceClass, MallooviaError> {
        let raw = self
            .pools
            .instance_classes
            .get(id)
            .ok_or_else(|| MallooviaError::UnknownReference(format!("instance class {}", id)))?;
        let limiting_sets = raw
            .limiting_sets
            .iter()
            .map(|lset| self.limiting_set(lset.id()))
            .collect::<Result<_, _>>()?;
        Ok(InstanceClass {
            id: raw.id.clone(),
            name: raw.name.clone().unwrap_or_else(|| raw.id.clone()),
            limiting_sets,
            max_vms: raw.max_vms,
            price: raw.price,
            time_unit: raw.time_unit,
            is_reserved: raw.is_reserved,
            cores: raw.cores,
            is_private: raw.is_private,
        })
    }

    fn workload(&self, id: &str) -> Result<Workload, MallooviaError> {
        let raw = self
            .pools
            .workloads
            .get(id)
            .ok_or_else(|| MallooviaError::UnknownReference(format!("workload {}", id)))?;
        let values = match (&raw.values, &raw.filename) {
            (Some(values), None) => values.clone(),
            (None, Some(filename)) => read_workload_values(&self.base_dir.join(filename))?,
            _ => {
                return Err(MallooviaError::Document(format!(
                    "workload {} needs exactly one of values or filename",
                    raw.id
                )))
            }
        };
        Ok(Workload {
            id: raw.id.clone(),
            description: raw.description.clone(),
            app: self.app(raw.app.id())?,
            time_unit: raw.time_unit,
            values,
            intra_slot_distribution: raw.intra_slot_distribution.clone(),
            filename: raw.filename.clone(),
        })
    }

    fn performances(&self, id: &str) -> Result<PerformanceSet, MallooviaError> {
        let raw = self
            .pools
            .performances
            .get(id)
            .ok_or_else(|| MallooviaError::UnknownReference(format!("performances {}", id)))?;
        let mut entries = Vec::with_capacity(raw.values.len());
        for value in &raw.values {
            // The referenced entities must exist, even if only the ids are
            // stored in the performance table.
            let iclass = self.instance_class(value.instance_class.id())?;
            let app = self.app(value.app.id())?;
            entries.push((iclass.id, app.id, value.value));
        }
        Ok(PerformanceSet {
            id: raw.id.clone(),
            time_unit: raw.time_unit,
            values: PerformanceValues::new(entries),
        })
    }

    fn problem(&self, id: &str) -> Result<Problem, MallooviaError> {
        let raw = self
            .pools
            .problems
            .get(id)
            .ok_or_else(|| MallooviaError::UnknownReference(format!("problem {}", id)))?;
        Ok(Problem {
            id: raw.id.clone(),
            name: raw.name.clone().unwrap_or_else(|| raw.id.clone()),
            description: raw.description.clone(),
            workloads: raw
                .workloads
                .iter()
                .map(|workload| self.workload(workload.id()))
                .collect::<Result<_, _>>()?,
            instance_classes: raw
                .instance_classes
                .iter()
                .map(|iclass| self.instance_class(iclass.id()))
                .collect::<Result<_, _>>()?,
            performances: self.performances(raw.performances.id())?,
        })
    }
}

/// One workload value per line, integers (a trailing fractional part of
/// zero is accepted).
fn read_workload_values(path: &Path) -> Result<Vec<u64>, MallooviaError> {
    let file = File::open(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(file);
    let mut values = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| {
            MallooviaError::Document(format!("cannot parse {}: {}", path.display(), e))
        })?;
        let Some(field) = record.get(0) else {
            continue;
        };
        let value: f64 = field.trim().parse().map_err(|_| {
            MallooviaError::Document(format!(
                "bad workload value {:?} in {}",
                field,
                path.display()
            ))
        })?;
        values.push(value.round() as u64);
    }
    Ok(values)
}

fn read_document(path: &Path) -> Result<RawDocument, MallooviaError> {
    let mut content = String::new();
    let file = File::open(path)?;
    if path.extension().map_or(false, |ext| ext == "gz") {
        GzDecoder::new(file).read_to_string(&mut content)?;
    } else {
        std::io::BufReader::new(file).read_to_string(&mut content)?;
    }
    Ok(serde_yaml::from_str(&content)?)
}

fn resolver_for(path: &Path) -> Result<(Resolver, RawDocument), MallooviaError> {
    let doc = read_document(path)?;
    let pools = RawPools::gather(&doc);
    let base_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    Ok((Resolver { pools, base_dir }, doc))
}

/// Reads the problems of a YAML document (plain or `.gz`). Returns a map
/// from problem id to [`Problem`].
pub fn read_problems_from_yaml(
    path: impl AsRef<Path>,
) -> Result<BTreeMap<String, Problem>, MallooviaError> {
    let path = path.as_ref();
    let (resolver, _) = resolver_for(path)?;
    let mut problems = BTreeMap::new();
    for id in resolver.pools.problems.keys() {
        problems.insert(id.clone(), resolver.problem(id)?);
    }
    info!("read {} problems from {}", problems.len(), path.display());
    Ok(problems)
}

/// Reads the solutions of a YAML document. The problems they reference must
/// be part of the same document.
pub fn read_solutions_from_yaml(
    path: impl AsRef<Path>,
) -> Result<BTreeMap<String, Solution>, MallooviaError> {
    let path = path.as_ref();
    let (resolver, doc) = resolver_for(path)?;
    let mut solutions = BTreeMap::new();
    for raw in &doc.solutions {
        // Make sure the referenced problem resolves.
        resolver.problem(raw.problem.id())?;
        let solution = solution_from_raw(raw)?;
        solutions.insert(solution.id().to_string(), solution);
    }
    Ok(solutions)
}

fn stats_from_raw(raw: &RawSolvingStats) -> SolvingStats {
    SolvingStats {
        algorithm: raw.algorithm.malloovia.clone(),
        creation_time: raw.creation_time,
        solving_time: raw.solving_time,
        optimal_cost: raw.optimal_cost,
    }
}

fn allocation_from_raw(raw: &RawAllocation) -> AllocationInfo {
    AllocationInfo {
        apps: raw.apps.iter().map(|a| a.id().to_string()).collect(),
        instance_classes: raw
            .instance_classes
            .iter()
            .map(|ic| ic.id().to_string())
            .collect(),
        workload_tuples: raw.workload_tuples.clone(),
        repeats: if raw.repeats.is_empty() {
            vec![1; raw.workload_tuples.len()]
        } else {
            raw.repeats.clone()
        },
        values: raw.values.clone(),
        units: raw.units.clone(),
    }
}

fn solution_from_raw(raw: &RawSolution) -> Result<Solution, MallooviaError> {
    match &raw.previous_phase {
        None => {
            let RawStatsField::One(stats) = &raw.solving_stats else {
                return Err(MallooviaError::Document(format!(
                    "phase I solution {} must have a single solving_stats",
                    raw.id
                )));
            };
            Ok(Solution::PhaseI(SolutionI {
                id: raw.id.clone(),
                problem_id: raw.problem.id().to_string(),
                solving_stats: stats_from_raw(stats),
                reserved_allocation: raw.reserved_allocation.as_ref().map(|rsv| {
                    ReservedAllocation {
                        instance_classes: rsv
                            .instance_classes
                            .iter()
                            .map(|ic| ic.id().to_string())
                            .collect(),
                        vms_number: rsv.vms_number.clone(),
                    }
                }),
                allocation: raw.allocation.as_ref().map(allocation_from_raw),
            }))
        }
        Some(previous) => {
            let RawStatsField::Many(stats) = &raw.solving_stats else {
                return Err(MallooviaError::Document(format!(
                    "phase II solution {} must have one solving_stats per timeslot",
                    raw.id
                )));
            };
            let global = raw.global_solving_stats.clone().ok_or_else(|| {
                MallooviaError::Document(format!(
                    "phase II solution {} is missing global_solving_stats",
                    raw.id
                ))
            })?;
            let allocation = raw.allocation.as_ref().ok_or_else(|| {
                MallooviaError::Document(format!(
                    "phase II solution {} is missing the allocation",
                    raw.id
                ))
            })?;
            Ok(Solution::PhaseII(SolutionII {
                id: raw.id.clone(),
                problem_id: raw.problem.id().to_string(),
                previous_phase_id: previous.id().to_string(),
                solving_stats: stats.iter().map(stats_from_raw).collect(),
                global_solving_stats: global,
                allocation: allocation_from_raw(allocation),
            }))
        }
    }
}

fn raw_document_for_problems(problems: &[Problem]) -> RawDocument {
    let mut pools = RawPools::default();
    for problem in problems {
        for workload in &problem.workloads {
            pools.add_app(&RawApp {
                id: workload.app.id.clone(),
                name: Some(workload.app.name.clone()),
            });
            pools.add_workload(&RawWorkload {
                id: workload.id.clone(),
                description: workload.description.clone(),
                app: Ref::Id(workload.app.id.clone()),
                time_unit: workload.time_unit,
                values: match workload.filename {
                    Some(_) => None,
                    None => Some(workload.values.clone()),
                },
                filename: workload.filename.clone(),
                intra_slot_distribution: workload.intra_slot_distribution.clone(),
            });
        }
        for iclass in &problem.instance_classes {
            for lset in &iclass.limiting_sets {
                pools.add_limiting_set(&RawLimitingSet {
                    id: lset.id.clone(),
                    name: Some(lset.name.clone()),
                    max_vms: lset.max_vms,
                    max_cores: lset.max_cores,
                });
            }
            pools.add_instance_class(&RawInstanceClass {
                id: iclass.id.clone(),
                name: Some(iclass.name.clone()),
                limiting_sets: iclass
                    .limiting_sets
                    .iter()
                    .map(|lset| Ref::Id(lset.id.clone()))
                    .collect(),
                max_vms: iclass.max_vms,
                price: iclass.price,
                time_unit: iclass.time_unit,
                is_reserved: iclass.is_reserved,
                cores: iclass.cores,
                is_private: iclass.is_private,
            });
        }
        pools.add_performances(&RawPerformanceSet {
            id: problem.performances.id.clone(),
            time_unit: problem.performances.time_unit,
            values: problem
                .performances
                .values
                .iter()
                .map(|(ic_id, app_id, value)| RawPerformanceValue {
                    instance_class: Ref::Id(ic_id.to_string()),
                    app: Ref::Id(app_id.to_string()),
                    value,
                })
                .collect(),
        });
        pools.add_problem(&RawProblem {
            id: problem.id.clone(),
            name: Some(problem.name.clone()),
            description: problem.description.clone(),
            workloads: problem
                .workloads
                .iter()
                .map(|w| Ref::Id(w.id.clone()))
                .collect(),
            instance_classes: problem
                .instance_classes
                .iter()
                .map(|ic| Ref::Id(ic.id.clone()))
                .collect(),
            performances: Ref::Id(problem.performances.id.clone()),
        });
    }
    RawDocument {
        apps: pools.apps.into_values().collect(),
        limiting_sets: pools.limiting_sets.into_values().collect(),
        instance_classes: pools.instance_classes.into_values().collect(),
        performances: pools.performances.into_values().collect(),
        workloads: pools.workloads.into_values().collect(),
        problems: pools.problems.into_values().collect(),
        solutions: Vec::new(),
    }
}

/// Serializes the problems (and every entity they reference) into a YAML
/// document, with id-based cross references.
pub fn problems_to_yaml(problems: &[Problem]) -> Result<String, MallooviaError> {
    Ok(serde_yaml::to_string(&raw_document_for_problems(problems))?)
}

fn stats_to_raw(stats: &SolvingStats) -> RawSolvingStats {
    RawSolvingStats {
        creation_time: stats.creation_time,
        solving_time: stats.solving_time,
        optimal_cost: stats.optimal_cost,
        algorithm: RawAlgorithm {
            malloovia: stats.algorithm.clone(),
        },
    }
}

fn allocation_to_raw(alloc: &AllocationInfo) -> RawAllocation {
    RawAllocation {
        apps: alloc.apps.iter().cloned().map(Ref::Id).collect(),
        instance_classes: alloc.instance_classes.iter().cloned().map(Ref::Id).collect(),
        workload_tuples: alloc.workload_tuples.clone(),
        repeats: alloc.repeats.clone(),
        values: alloc.values.clone(),
        units: alloc.units.clone(),
    }
}

/// Serializes the solutions, together with the problems they reference,
/// into a YAML document.
pub fn solutions_to_yaml(
    problems: &[Problem],
    solutions: &[Solution],
) -> Result<String, MallooviaError> {
    let mut doc = raw_document_for_problems(problems);
    for solution in solutions {
        let raw = match solution {
            Solution::PhaseI(sol) => RawSolution {
                id: sol.id.clone(),
                problem: Ref::Id(sol.problem_id.clone()),
                previous_phase: None,
                solving_stats: RawStatsField::One(stats_to_raw(&sol.solving_stats)),
                global_solving_stats: None,
                reserved_allocation: sol.reserved_allocation.as_ref().map(|rsv| {
                    RawReservedAllocation {
                        instance_classes: rsv
                            .instance_classes
                            .iter()
                            .cloned()
                            .map(Ref::Id)
                            .collect(),
                        vms_number: rsv.vms_number.clone(),
                    }
                }),
                allocation: sol.allocation.as_ref().map(allocation_to_raw),
            },
            Solution::PhaseII(sol) => RawSolution {
                id: sol.id.clone(),
                problem: Ref::Id(sol.problem_id.clone()),
                previous_phase: Some(Box::new(Ref::Id(sol.previous_phase_id.clone()))),
                solving_stats: RawStatsField::Many(
                    sol.solving_stats.iter().map(stats_to_raw).collect(),
                ),
                global_solving_stats: Some(sol.global_solving_stats.clone()),
                reserved_allocation: None,
                allocation: Some(allocation_to_raw(&sol.allocation)),
            },
        };
        doc.solutions.push(raw);
    }
    Ok(serde_yaml::to_string(&doc)?)
}

/// Writes a YAML string to a file, gzip-compressing when the path ends in
/// `.gz`.
pub fn write_yaml_file(path: impl AsRef<Path>, yaml: &str) -> Result<(), MallooviaError> {
    let path = path.as_ref();
    if path.extension().map_or(false, |ext| ext == "gz") {
        let mut encoder = GzEncoder::new(File::create(path)?, Compression::default());
        encoder.write_all(yaml.as_bytes())?;
        encoder.finish()?;
    } else {
        std::fs::write(path, yaml)?;
    }
    Ok(())
}

/// Strictly parses a document and validates every problem in it. Returns
/// the number of problems checked.
pub fn validate_problems_file(path: impl AsRef<Path>) -> Result<usize, MallooviaError> {
    let (resolver, _) = resolver_for(path.as_ref())?;
    let mut count = 0;
    for id in resolver.pools.problems.keys() {
        resolver.problem(id)?.validate()?;
        count += 1;
    }
    Ok(count)
}
