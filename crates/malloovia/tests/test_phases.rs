use std::cell::Cell;
use std::rc::Rc;

use malloovia::lp::formulator::GuidedBounds;
use malloovia::lp::{ConstraintSense, ObjectiveSense, VarId};
use malloovia::model::{
    App, InstanceClass, LimitingSet, PerformanceSet, PerformanceValues, Problem, TimeUnit,
    Workload,
};
use malloovia::phases::{OmniscientPredictor, PhaseI, PhaseII, SolveOptions};
use malloovia::solution::Status;
use malloovia::solver::cbc::CbcFactory;
use malloovia::solver::{BackendFactory, MilpBackend, SolverConfig, SolverStatus};

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {}, got {}",
        expected,
        actual
    );
}

fn lset(id: &str, max_vms: u64, max_cores: f64) -> LimitingSet {
    LimitingSet {
        id: id.to_string(),
        name: id.to_string(),
        max_vms,
        max_cores,
    }
}

fn iclass(
    id: &str,
    lsets: &[LimitingSet],
    max_vms: u64,
    price: f64,
    is_reserved: bool,
    cores: f64,
) -> InstanceClass {
    InstanceClass {
        id: id.to_string(),
        name: id.to_string(),
        limiting_sets: lsets.to_vec(),
        max_vms,
        price,
        time_unit: TimeUnit::Hour,
        is_reserved,
        cores,
        is_private: false,
    }
}

fn workload(id: &str, app: &App, values: &[u64]) -> Workload {
    Workload {
        id: id.to_string(),
        description: None,
        app: app.clone(),
        time_unit: TimeUnit::Hour,
        values: values.to_vec(),
        intra_slot_distribution: None,
        filename: None,
    }
}

fn problem(
    id: &str,
    workloads: Vec<Workload>,
    instance_classes: Vec<InstanceClass>,
    perfs: &[(&str, &str, f64)],
) -> Problem {
    Problem {
        id: id.to_string(),
        name: format!("Test problem {}", id),
        description: None,
        workloads,
        instance_classes,
        performances: PerformanceSet {
            id: "test_perfs".to_string(),
            time_unit: TimeUnit::Hour,
            values: PerformanceValues::new(
                perfs
                    .iter()
                    .map(|(ic, app, v)| (ic.to_string(), app.to_string(), *v)),
            ),
        },
    }
}

/// One region, one on-demand and one reserved class, two apps, four
/// timeslots. Its optimal cost is 178 with 6 reserved VMs.
fn problem1() -> Problem {
    let cloud_dem = lset("Cloud1", 0, 0.);
    let cloud_res = lset("CloudR", 20, 0.);
    let app0 = App::new("app0", "Test app0");
    let app1 = App::new("app1", "Test app1");
    problem(
        "example",
        vec![
            workload("wl_app0", &app0, &[30, 32, 30, 30]),
            workload("wl_app1", &app1, &[1003, 1200, 1194, 1003]),
        ],
        vec![
            iclass("m3large", &[cloud_dem], 20, 10., false, 1.),
            iclass("m3large_r", &[cloud_res], 20, 7., true, 1.),
        ],
        &[
            ("m3large", "app0", 10.),
            ("m3large", "app1", 500.),
            ("m3large_r", "app0", 10.),
            ("m3large_r", "app1", 500.),
        ],
    )
}

/// Like problem1 but with limiting sets so tight that no allocation can
/// serve the workload.
fn problem2() -> Problem {
    let cloud_dem = lset("Cloud1", 1, 0.);
    let cloud_res = lset("CloudR", 1, 4.);
    let app0 = App::new("app0", "Test app0");
    let app1 = App::new("app1", "Test app1");
    problem(
        "example",
        vec![
            workload("wl_app0", &app0, &[30, 32, 30, 30]),
            workload("wl_app1", &app1, &[1003, 1200, 1194, 1003]),
        ],
        vec![
            iclass("m3large", &[cloud_dem], 0, 10., false, 1.),
            iclass("m3large_r", &[cloud_res], 20, 7., true, 1.),
        ],
        &[
            ("m3large", "app0", 10.),
            ("m3large", "app1", 500.),
            ("m3large_r", "app0", 10.),
            ("m3large_r", "app1", 500.),
        ],
    )
}

/// Like problem1 but with core caps in both limiting sets. Its optimal cost
/// is 226.
fn problem3() -> Problem {
    let cloud_dem = lset("Cloud1", 20, 20.);
    let cloud_res = lset("CloudR", 20, 10.);
    let app0 = App::new("app0", "Test app0");
    let app1 = App::new("app1", "Test app1");
    problem(
        "example",
        vec![
            workload("wl_app0", &app0, &[30, 32, 30, 30]),
            workload("wl_app1", &app1, &[1003, 1200, 1194, 1003]),
        ],
        vec![
            iclass("m3large", &[cloud_dem], 20, 10., false, 2.),
            iclass("m3large_r", &[cloud_res], 20, 7., true, 4.),
        ],
        &[
            ("m3large", "app0", 10.),
            ("m3large", "app1", 500.),
            ("m3large_r", "app0", 10.),
            ("m3large_r", "app1", 500.),
        ],
    )
}

/// Two apps over a ten-slot horizon, one reserved zonal class and one
/// larger on-demand class.
fn example1() -> Problem {
    let r1_z1 = lset("r1_z1", 20, 0.);
    let r1 = lset("r1", 20, 0.);
    let app0 = App::new("a0", "Web server");
    let app1 = App::new("a1", "Database");
    problem(
        "example1",
        vec![
            workload(
                "ltwp_a0",
                &app0,
                &[201, 203, 180, 220, 190, 211, 199, 204, 500, 200],
            ),
            workload(
                "ltwp_a1",
                &app1,
                &[2010, 2035, 1807, 2202, 1910, 2110, 1985, 2033, 5050, 1992],
            ),
        ],
        vec![
            iclass("m3large_z1", &[r1_z1], 20, 7., true, 1.),
            iclass("m4xlarge_r1", &[r1], 10, 10., false, 1.),
        ],
        &[
            ("m3large_z1", "a0", 12.),
            ("m3large_z1", "a1", 500.),
            ("m4xlarge_r1", "a0", 44.),
            ("m4xlarge_r1", "a1", 1800.),
        ],
    )
}

/// Backend factory which counts how many models are created.
struct CountingFactory {
    count: Rc<Cell<usize>>,
}

impl BackendFactory for CountingFactory {
    fn create(&self) -> Box<dyn MilpBackend> {
        self.count.set(self.count.get() + 1);
        CbcFactory.create()
    }
}

/// Backend factory which must never be used.
struct PanicFactory;

impl BackendFactory for PanicFactory {
    fn create(&self) -> Box<dyn MilpBackend> {
        panic!("the backend should not be invoked");
    }
}

/// Backend which terminates with a fixed status without solving anything.
struct ScriptedBackend {
    status: SolverStatus,
    bound: Option<f64>,
    vars: usize,
}

impl MilpBackend for ScriptedBackend {
    fn add_integer_var(&mut self, _lb: f64, _ub: Option<f64>, _name: &str) -> VarId {
        self.vars += 1;
        VarId(self.vars - 1)
    }

    fn add_constraint(&mut self, _terms: &[(VarId, f64)], _sense: ConstraintSense, _rhs: f64) {}

    fn set_objective(&mut self, _terms: &[(VarId, f64)], _sense: ObjectiveSense) {}

    fn solve(&mut self, _config: &SolverConfig) -> SolverStatus {
        self.status
    }

    fn value(&self, _var: VarId) -> f64 {
        0.
    }

    fn objective_value(&self) -> Option<f64> {
        None
    }

    fn best_bound(&self) -> Option<f64> {
        self.bound
    }
}

struct ScriptedFactory {
    status: SolverStatus,
    bound: Option<f64>,
}

impl BackendFactory for ScriptedFactory {
    fn create(&self) -> Box<dyn MilpBackend> {
        Box::new(ScriptedBackend {
            status: self.status,
            bound: self.bound,
            vars: 0,
        })
    }
}

/// Checks that an allocation serves the given workload tuples: for every
/// level and app, the aggregated performance reaches the workload.
fn assert_allocation_serves(problem: &Problem, alloc: &malloovia::solution::AllocationInfo) {
    for (level, tuple) in alloc.workload_tuples.iter().enumerate() {
        for (a, app_id) in alloc.apps.iter().enumerate() {
            let perf: f64 = alloc.values[level][a]
                .iter()
                .enumerate()
                .map(|(k, &vms)| {
                    vms as f64
                        * problem
                            .performances
                            .values
                            .get(&alloc.instance_classes[k], app_id)
                            .unwrap()
                })
                .sum();
            assert!(
                perf >= tuple[a] as f64,
                "level {} app {} served {} < {}",
                level,
                app_id,
                perf,
                tuple[a]
            );
        }
    }
}

#[test]
// Solve problem 1, which has an optimal cost of 178 using 6 reserved VMs.
fn phase_i_solves_problem1() {
    let problem = problem1();
    let solution = PhaseI::new(&problem).unwrap().solve(&SolveOptions::default());

    let stats = &solution.solving_stats;
    assert_eq!(stats.algorithm.status, Status::Optimal);
    assert_close(stats.optimal_cost.unwrap(), 178.);

    let reserved = solution.reserved_allocation.unwrap();
    assert_eq!(reserved.instance_classes, vec!["m3large_r".to_string()]);
    assert_eq!(reserved.vms_number, vec![6]);

    // Three unique load levels, in ascending lexicographic order.
    let alloc = solution.allocation.unwrap();
    assert_eq!(
        alloc.workload_tuples,
        vec![vec![30, 1003], vec![30, 1194], vec![32, 1200]]
    );
    assert_eq!(alloc.repeats, vec![2, 1, 1]);
    assert_allocation_serves(&problem, &alloc);
}

#[test]
// The reserved VM count is the same at every load level.
fn phase_i_reserved_constant_across_levels() {
    let problem = problem1();
    let solution = PhaseI::new(&problem).unwrap().solve(&SolveOptions::default());
    let alloc = solution.allocation.unwrap();

    // Reserved class is the first column of each row.
    let reserved_per_level: Vec<u64> = alloc
        .values
        .iter()
        .map(|row| row.iter().map(|app_row| app_row[0]).sum())
        .collect();
    assert_eq!(reserved_per_level, vec![6, 6, 6]);
}

#[test]
// Problem 2 cannot be served within its limiting sets.
fn phase_i_detects_infeasible_problem2() {
    let problem = problem2();
    let solution = PhaseI::new(&problem).unwrap().solve(&SolveOptions::default());

    assert_eq!(
        solution.solving_stats.algorithm.status,
        Status::Infeasible
    );
    assert_eq!(solution.solving_stats.optimal_cost, None);
    assert!(solution.allocation.is_none());
    assert!(solution.reserved_allocation.is_none());
}

#[test]
// Solve problem 3, where core caps make the big reserved VMs scarce. The
// optimal cost is 226 and the core caps are honored at every level.
fn phase_i_solves_core_limited_problem3() {
    let problem = problem3();
    let solution = PhaseI::new(&problem).unwrap().solve(&SolveOptions::default());

    let stats = &solution.solving_stats;
    assert_eq!(stats.algorithm.status, Status::Optimal);
    assert_close(stats.optimal_cost.unwrap(), 226.);

    let alloc = solution.allocation.unwrap();
    assert_allocation_serves(&problem, &alloc);
    for row in &alloc.values {
        // m3large_r: 4 cores, capped at 10 cores in CloudR.
        let reserved_cores: u64 = row.iter().map(|app_row| app_row[0] * 4).sum();
        assert!(reserved_cores <= 10);
        // m3large: 2 cores, capped at 20 cores in Cloud1.
        let ondemand_cores: u64 = row.iter().map(|app_row| app_row[1] * 2).sum();
        assert!(ondemand_cores <= 20);
    }
}

#[test]
// An all-zero workload needs no solver at all.
fn phase_i_trivial_problem_skips_the_backend() {
    let mut problem = problem1();
    for workload in &mut problem.workloads {
        workload.values = vec![0; workload.values.len()];
    }
    let solution = PhaseI::new(&problem)
        .unwrap()
        .with_backend(Box::new(PanicFactory))
        .solve(&SolveOptions::default());

    assert_eq!(solution.solving_stats.algorithm.status, Status::Trivial);
    assert_close(solution.solving_stats.optimal_cost.unwrap(), 0.);

    let reserved = solution.reserved_allocation.unwrap();
    assert_eq!(reserved.vms_number, vec![0]);
    let alloc = solution.allocation.unwrap();
    for row in &alloc.values {
        for app_row in row {
            assert!(app_row.iter().all(|&v| v == 0));
        }
    }
}

#[test]
// Rescaling by the common divisor must not change the optimal cost nor the
// shape of the allocation.
fn phase_i_gcd_round_trip() {
    let cloud_dem = lset("Cloud1", 0, 0.);
    let cloud_res = lset("CloudR", 20, 0.);
    let app0 = App::new("app0", "Test app0");
    let app1 = App::new("app1", "Test app1");
    // problem1 with every workload and performance multiplied by 10, so
    // that the GCD technique has something to divide.
    let problem = problem(
        "example_x10",
        vec![
            workload("wl_app0", &app0, &[300, 320, 300, 300]),
            workload("wl_app1", &app1, &[10030, 12000, 11940, 10030]),
        ],
        vec![
            iclass("m3large", &[cloud_dem], 20, 10., false, 1.),
            iclass("m3large_r", &[cloud_res], 20, 7., true, 1.),
        ],
        &[
            ("m3large", "app0", 100.),
            ("m3large", "app1", 5000.),
            ("m3large_r", "app0", 100.),
            ("m3large_r", "app1", 5000.),
        ],
    );

    let with_gcd = PhaseI::new(&problem).unwrap().solve(&SolveOptions {
        gcd: true,
        solver: SolverConfig::default(),
    });
    let without_gcd = PhaseI::new(&problem).unwrap().solve(&SolveOptions {
        gcd: false,
        solver: SolverConfig::default(),
    });

    assert!(with_gcd.solving_stats.algorithm.gcd);
    assert_close(with_gcd.solving_stats.algorithm.gcd_multiplier, 10.);
    assert!(!without_gcd.solving_stats.algorithm.gcd);

    assert_close(with_gcd.solving_stats.optimal_cost.unwrap(), 178.);
    assert_close(without_gcd.solving_stats.optimal_cost.unwrap(), 178.);

    // The reported tuples stay in the original scale.
    let alloc = with_gcd.allocation.unwrap();
    assert_eq!(
        alloc.workload_tuples,
        vec![vec![300, 10030], vec![300, 11940], vec![320, 12000]]
    );
    assert_eq!(
        with_gcd.reserved_allocation.unwrap().vms_number,
        without_gcd.reserved_allocation.unwrap().vms_number
    );
}

#[test]
// The two-app ten-slot example: Phase I buys 16 reserved VMs at cost 1450;
// replaying the same workloads through Phase II costs 1390 because the
// reserved pool can be re-split between the apps at every timeslot.
fn example1_phase_i_and_phase_ii_replay() {
    let problem = example1();
    let solution_i = PhaseI::new(&problem).unwrap().solve(&SolveOptions::default());

    assert_eq!(solution_i.solving_stats.algorithm.status, Status::Optimal);
    assert_close(solution_i.solving_stats.optimal_cost.unwrap(), 1450.);
    let reserved = solution_i.reserved_allocation.clone().unwrap();
    assert_eq!(reserved.instance_classes, vec!["m3large_z1".to_string()]);
    assert_eq!(reserved.vms_number, vec![16]);

    let mut phase_ii = PhaseII::new(&problem, &solution_i).unwrap();
    let predictor = OmniscientPredictor::new(&problem.workloads).unwrap();
    let solution_ii = phase_ii.solve_period(predictor).unwrap();

    let global = &solution_ii.global_solving_stats;
    assert_eq!(global.status, Status::Optimal);
    assert_close(global.optimal_cost.unwrap(), 1390.);
    assert_eq!(solution_ii.allocation.values.len(), 10);
    assert_allocation_serves(&problem, &solution_ii.allocation);
}

#[test]
// Replaying the Phase I workloads slot by slot reproduces the Phase I cost
// when re-splitting the reserved pool cannot help.
fn phase_ii_replays_phase_i_cost() {
    let problem = problem1();
    let solution_i = PhaseI::new(&problem).unwrap().solve(&SolveOptions::default());
    let phase_i_cost = solution_i.solving_stats.optimal_cost.unwrap();

    let mut phase_ii = PhaseII::new(&problem, &solution_i).unwrap();
    let predictor = OmniscientPredictor::new(&problem.workloads).unwrap();
    let solution_ii = phase_ii.solve_period(predictor).unwrap();

    assert_eq!(solution_ii.global_solving_stats.status, Status::Optimal);
    assert_close(
        solution_ii.global_solving_stats.optimal_cost.unwrap(),
        phase_i_cost,
    );
    assert_eq!(solution_ii.solving_stats.len(), 4);

    // First and last timeslot carry the same workload, so the cache makes
    // their allocations identical.
    assert_eq!(
        solution_ii.allocation.values[0],
        solution_ii.allocation.values[3]
    );
    assert_allocation_serves(&problem, &solution_ii.allocation);
}

#[test]
// A timeslot whose workload exceeds every feasible capacity is served in
// best-effort mode and reported as overfull.
fn phase_ii_overfull_timeslot() {
    let problem = problem1();
    let solution_i = PhaseI::new(&problem).unwrap().solve(&SolveOptions::default());

    // Same infrastructure, but the short-term prediction for timeslot 1
    // asks app0 for more than the 240 requests per hour the cloud can give.
    let app0 = problem.workloads[0].app.clone();
    let app1 = problem.workloads[1].app.clone();
    let mut stwp_problem = problem.clone();
    stwp_problem.workloads = vec![
        workload("stwp_app0", &app0, &[30, 270, 30, 30]),
        workload("stwp_app1", &app1, &[1003, 1200, 1194, 1003]),
    ];

    let mut phase_ii = PhaseII::new(&stwp_problem, &solution_i).unwrap();
    let predictor = OmniscientPredictor::new(&stwp_problem.workloads).unwrap();
    let solution_ii = phase_ii.solve_period(predictor).unwrap();

    assert_eq!(solution_ii.global_solving_stats.status, Status::Overfull);

    // Timeslot 1 is overfull. The best effort keeps the 6 reserved VMs and
    // starts the whole on-demand pool, for a cost of 6*7 + 20*10 = 242.
    let slot = &solution_ii.solving_stats[1];
    assert_eq!(slot.algorithm.status, Status::Overfull);
    assert_close(slot.optimal_cost.unwrap(), 242.);

    let row = &solution_ii.allocation.values[1];
    let reserved_total: u64 = row.iter().map(|app_row| app_row[0]).sum();
    let ondemand_total: u64 = row.iter().map(|app_row| app_row[1]).sum();
    assert_eq!(reserved_total, 6);
    assert_eq!(ondemand_total, 20);
    // No app is served beyond its own workload.
    let served_app1 = (row[1][0] + row[1][1]) * 500;
    assert!(served_app1 <= 1200);
    let served_app0 = (row[0][0] + row[0][1]) * 10;
    assert!(served_app0 <= 270);

    // The other timeslots stay optimal and the global cost adds up.
    assert_eq!(solution_ii.solving_stats[0].algorithm.status, Status::Optimal);
    assert_close(
        solution_ii.global_solving_stats.optimal_cost.unwrap(),
        42. + 242. + 42. + 42.,
    );
}

#[test]
// A long period with few distinct tuples touches the engine once per tuple.
fn phase_ii_cache_limits_backend_calls() {
    let problem = problem1();
    let solution_i = PhaseI::new(&problem).unwrap().solve(&SolveOptions::default());

    let count = Rc::new(Cell::new(0));
    let mut phase_ii = PhaseII::new(&problem, &solution_i)
        .unwrap()
        .with_backend(Box::new(CountingFactory {
            count: count.clone(),
        }));

    let tuples = [vec![30u64, 1003], vec![32, 1200], vec![30, 1194]];
    let period: Vec<Vec<u64>> = (0..1000).map(|t| tuples[t % 3].clone()).collect();
    let solution_ii = phase_ii.solve_period(period).unwrap();

    assert_eq!(count.get(), 3);
    assert_eq!(solution_ii.global_solving_stats.status, Status::Optimal);
    assert_eq!(solution_ii.allocation.values.len(), 1000);

    // Identical tuples produce identical allocations.
    for window in solution_ii.allocation.values.chunks(3).take(5) {
        assert_eq!(window, &solution_ii.allocation.values[0..3]);
    }
}

#[test]
// Guided lower bounds keep the requested on-demand VMs running.
fn phase_ii_guided_bounds_are_honored() {
    let problem = problem1();
    let solution_i = PhaseI::new(&problem).unwrap().solve(&SolveOptions::default());

    let mut guided = GuidedBounds::new();
    guided.set("m3large", "app0", 3);
    let mut phase_ii = PhaseII::new(&problem, &solution_i)
        .unwrap()
        .with_guided_bounds(guided);

    let predictor = OmniscientPredictor::new(&problem.workloads).unwrap();
    let solution_ii = phase_ii.solve_period(predictor).unwrap();

    assert_eq!(solution_ii.global_solving_stats.status, Status::Optimal);
    for row in &solution_ii.allocation.values {
        // app0 row, on-demand column.
        assert!(row[0][1] >= 3);
    }
    // Keeping VMs running costs more than the unguided optimum.
    assert!(solution_ii.global_solving_stats.optimal_cost.unwrap() > 178.);
}

#[test]
// Phase II cannot start from a failed Phase I.
fn phase_ii_rejects_non_optimal_phase_i() {
    let problem = problem2();
    let solution_i = PhaseI::new(&problem).unwrap().solve(&SolveOptions::default());
    assert_eq!(
        solution_i.solving_stats.algorithm.status,
        Status::Infeasible
    );

    let result = PhaseII::new(&problem, &solution_i);
    assert!(matches!(
        result,
        Err(malloovia::error::MallooviaError::PreviousPhase(_))
    ));
}

#[test]
// An engine failure is reported through the status, not as an error.
fn phase_i_reports_engine_failures() {
    let problem = problem1();
    let solution = PhaseI::new(&problem)
        .unwrap()
        .with_backend(Box::new(ScriptedFactory {
            status: SolverStatus::EngineError,
            bound: None,
        }))
        .solve(&SolveOptions::default());

    assert_eq!(solution.solving_stats.algorithm.status, Status::CbcError);
    assert_eq!(solution.solving_stats.optimal_cost, None);
    assert!(solution.allocation.is_none());
}

#[test]
// When the time limit aborts the solve, the engine best bound is kept.
fn phase_i_reports_aborted_with_lower_bound() {
    let problem = problem1();
    let solution = PhaseI::new(&problem)
        .unwrap()
        .with_backend(Box::new(ScriptedFactory {
            status: SolverStatus::Aborted,
            bound: Some(100.),
        }))
        .solve(&SolveOptions {
            gcd: true,
            solver: SolverConfig {
                max_seconds: Some(0.01),
                ..SolverConfig::default()
            },
        });

    let stats = &solution.solving_stats;
    assert_eq!(stats.algorithm.status, Status::Aborted);
    assert_eq!(stats.optimal_cost, None);
    assert_eq!(stats.algorithm.lower_bound, Some(100.));
    assert_eq!(stats.algorithm.max_seconds, Some(0.01));
}

#[test]
// A problem with a missing performance value is rejected before solving.
fn phase_i_rejects_incomplete_performances() {
    let mut problem = problem1();
    problem.performances.values = PerformanceValues::new(vec![
        ("m3large".to_string(), "app0".to_string(), 10.),
        ("m3large".to_string(), "app1".to_string(), 500.),
        ("m3large_r".to_string(), "app0".to_string(), 10.),
        // m3large_r / app1 missing
    ]);
    let result = PhaseI::new(&problem);
    assert!(matches!(
        result,
        Err(malloovia::error::MallooviaError::InvalidProblem(_))
    ));
}

#[test]
// Workloads of different lengths are rejected before solving.
fn phase_i_rejects_unequal_workloads() {
    let mut problem = problem1();
    problem.workloads[0].values.pop();
    assert!(PhaseI::new(&problem).is_err());
}
