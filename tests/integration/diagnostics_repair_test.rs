use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use healthmon::core::diagnostics::{
    DiagnosticEngine, DiagnosticInput, DiagnosticThresholds, Issue, IssueKind, IssueTarget,
};
use healthmon::core::repair::{RepairFailure, SafeList};
use healthmon::core::system_monitor::{MetricSample, ProcessInfo, Severity};

use super::support::{dispatcher, sample, FakeActions};

fn process(pid: u32, name: &str, cpu: f32) -> ProcessInfo {
    ProcessInfo {
        pid,
        name: name.to_string(),
        cpu_percent: cpu,
        memory_percent: 1.0,
        memory_bytes: 64 << 20,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_safe_listed_process_is_never_terminated() {
    let actions = Arc::new(FakeActions::default());
    let dispatcher = dispatcher(actions.clone(), true);

    let kernel = process(4242, "kernel", 97.0);
    let issue = Issue::new(
        IssueKind::HighCpuProcess,
        Severity::Warning,
        "kernel using 97% CPU".to_string(),
        Some(IssueTarget::process(&kernel)),
        Some(97.0),
    );

    let record = dispatcher.apply(&issue, &CancellationToken::new()).await;
    assert!(!record.success);
    assert_eq!(record.failure, Some(RepairFailure::SafeListed));
    assert_eq!(record.reason(), Some("safe-listed"));
    assert!(actions.terminated.lock().is_empty());
}

#[tokio::test]
async fn test_unprotected_target_is_terminated() {
    let miner = process(31337, "cryptominer", 99.0);
    let actions = Arc::new(FakeActions::with_processes(vec![miner.clone()]));
    let dispatcher = dispatcher(actions.clone(), true);

    let issue = Issue::new(
        IssueKind::HighCpuProcess,
        Severity::Warning,
        "cryptominer using 99% CPU".to_string(),
        Some(IssueTarget::process(&miner)),
        Some(99.0),
    );

    let record = dispatcher.apply(&issue, &CancellationToken::new()).await;
    assert!(record.success);
    assert_eq!(record.processes_affected, 1);
    assert_eq!(*actions.terminated.lock(), vec![31337]);
}

#[tokio::test]
async fn test_reused_pid_held_by_protected_process_is_not_terminated() {
    // Diagnosed as chrome; by repair time the pid belongs to the kernel.
    let actions = Arc::new(FakeActions::with_processes(vec![process(4242, "kernel", 1.0)]));
    let dispatcher = dispatcher(actions.clone(), true);

    let chrome = process(4242, "chrome", 95.0);
    let issue = Issue::new(
        IssueKind::HighCpuProcess,
        Severity::Warning,
        "chrome using 95% CPU".to_string(),
        Some(IssueTarget::process(&chrome)),
        Some(95.0),
    );

    let record = dispatcher.apply(&issue, &CancellationToken::new()).await;
    assert!(!record.success);
    assert_eq!(record.failure, Some(RepairFailure::SafeListed));
    assert!(actions.terminated.lock().is_empty());
}

#[tokio::test]
async fn test_reused_pid_held_by_other_process_is_not_terminated() {
    let actions = Arc::new(FakeActions::with_processes(vec![process(4242, "editor", 1.0)]));
    let dispatcher = dispatcher(actions.clone(), true);

    let chrome = process(4242, "chrome", 95.0);
    let issue = Issue::new(
        IssueKind::HighCpuProcess,
        Severity::Warning,
        "chrome using 95% CPU".to_string(),
        Some(IssueTarget::process(&chrome)),
        Some(95.0),
    );

    let record = dispatcher.apply(&issue, &CancellationToken::new()).await;
    assert_eq!(record.failure, Some(RepairFailure::NothingToDo));
    assert!(actions.terminated.lock().is_empty());
}

#[tokio::test]
async fn test_repairs_are_refused_while_auto_fix_is_off() {
    let actions = Arc::new(FakeActions::default());
    let dispatcher = dispatcher(actions.clone(), false);

    let issue = Issue::new(
        IssueKind::DiskLow,
        Severity::Warning,
        "Disk / is 88% full".to_string(),
        Some(IssueTarget::Partition {
            mount_point: "/".to_string(),
        }),
        Some(88.0),
    );
    let record = dispatcher.apply(&issue, &CancellationToken::new()).await;

    assert_eq!(record.failure, Some(RepairFailure::DisabledOrUnsafe));
    assert_eq!(actions.cleaned.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(dispatcher.history().len(), 1);
}

#[test]
fn test_engine_skips_safe_listed_processes() {
    let engine = DiagnosticEngine::new(DiagnosticThresholds::default(), SafeList::for_current_platform());
    let input = DiagnosticInput {
        processes: vec![process(4242, "kernel", 97.0), process(31337, "cryptominer", 99.0)],
        ..DiagnosticInput::from_sample(Arc::new(sample(0)))
    };

    let issues = engine.diagnose(&input);
    let targets: Vec<&IssueTarget> = issues
        .iter()
        .filter(|i| i.kind == IssueKind::HighCpuProcess)
        .filter_map(|i| i.target.as_ref())
        .collect();
    assert_eq!(
        targets,
        vec![&IssueTarget::Process {
            pid: 31337,
            name: "cryptominer".to_string()
        }]
    );
}

#[test]
fn test_issue_ids_are_stable_across_runs() {
    let engine = DiagnosticEngine::new(DiagnosticThresholds::default(), SafeList::empty());
    let full = Arc::new(MetricSample {
        ram_percent: 97.0,
        disk_percent: Some(96.0),
        ..sample(0)
    });

    let first = engine.diagnose(&DiagnosticInput::from_sample(full.clone()));
    let second = engine.diagnose(&DiagnosticInput::from_sample(full));
    assert!(first.iter().any(|i| i.kind == IssueKind::HighMemoryCritical));
    let ids = |issues: &[Issue]| issues.iter().map(|i| i.id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&first), ids(&second));
}

#[test]
fn test_quiet_sample_has_no_issues() {
    let engine = DiagnosticEngine::new(DiagnosticThresholds::default(), SafeList::empty());
    assert!(engine
        .diagnose(&DiagnosticInput::from_sample(Arc::new(sample(0))))
        .is_empty());
}
