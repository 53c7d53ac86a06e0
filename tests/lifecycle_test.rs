//! Service lifecycle: install/open, start, stop, delete.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kfix::service::{
    ensure_executor_running, start_or_open_service, stop_service, Arch, ExecutorLocator,
    InMemoryServiceManager, ManagerError, ServiceError, ServiceManager,
};
use kfix::ErrorCategory;

fn image(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, b"MZ").unwrap();
    path
}

#[test]
fn test_fresh_install_and_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = image(&dir, "sample.sys");
    let scm = InMemoryServiceManager::new();

    let start = start_or_open_service(&scm, &path, "kfixkr_sample", "sample").unwrap();
    assert!(start.installed);
    assert!(start.started);
    assert!(scm.is_running("kfixkr_sample"));
    assert_eq!(scm.service("kfixkr_sample").unwrap().binary, path);

    start.release(&scm).unwrap();
    assert!(scm.service("kfixkr_sample").is_none());
    assert_eq!(scm.open_handles(), 0);
}

#[test]
fn test_existing_running_service_is_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let path = image(&dir, "sample.sys");
    let scm = InMemoryServiceManager::new();
    let first = start_or_open_service(&scm, &path, "svc", "svc").unwrap();

    let second = start_or_open_service(&scm, &path, "svc", "svc").unwrap();
    assert!(!second.installed);
    assert!(!second.started);

    second.release(&scm).unwrap();
    assert!(scm.is_running("svc"), "release must not stop what it did not start");

    first.release(&scm).unwrap();
    assert!(scm.service("svc").is_none());
    assert_eq!(scm.open_handles(), 0);
}

#[test]
fn test_installed_but_stopped_service_is_started_not_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let path = image(&dir, "sample.sys");
    let scm = InMemoryServiceManager::new();
    let handle = scm.create("svc", "svc", &path).unwrap();
    scm.close(handle);

    let start = start_or_open_service(&scm, &path, "svc", "svc").unwrap();
    assert!(!start.installed);
    assert!(start.started);

    start.release(&scm).unwrap();
    let state = scm.service("svc").expect("pre-existing service survives");
    assert!(!state.running);
}

#[test]
fn test_image_loaded_elsewhere_counts_as_not_started() {
    let dir = tempfile::tempdir().unwrap();
    let path = image(&dir, "sample.sys");
    let scm = InMemoryServiceManager::new();
    scm.fail_start("svc", ManagerError::FileNotFound);

    let start = start_or_open_service(&scm, &path, "svc", "svc").unwrap();
    assert!(start.installed);
    assert!(!start.started);

    start.release(&scm).unwrap();
    assert!(scm.service("svc").is_none());
}

#[test]
fn test_start_failures_clean_up_and_map() {
    let dir = tempfile::tempdir().unwrap();
    let path = image(&dir, "sample.sys");
    let scm = InMemoryServiceManager::new();

    for (error, check) in [
        (ManagerError::MoreData, ErrorCategory::Capacity),
        (ManagerError::AccessDenied, ErrorCategory::Permission),
        (ManagerError::Os(1275), ErrorCategory::Other),
    ] {
        scm.fail_start("svc", error);
        let err = start_or_open_service(&scm, &path, "svc", "svc").unwrap_err();
        assert_eq!(err.category(), check, "{error:?}");
        assert!(scm.service("svc").is_none(), "service installed by the call is removed");
        assert_eq!(scm.open_handles(), 0);
        scm.clear_failures();
    }

    scm.fail_start("svc", ManagerError::MoreData);
    assert!(matches!(
        start_or_open_service(&scm, &path, "svc", "svc"),
        Err(ServiceError::FixtureNameTooLong)
    ));
}

#[test]
fn test_start_failure_keeps_preexisting_service() {
    let dir = tempfile::tempdir().unwrap();
    let path = image(&dir, "sample.sys");
    let scm = InMemoryServiceManager::new();
    let handle = scm.create("svc", "svc", &path).unwrap();
    scm.close(handle);
    scm.fail_start("svc", ManagerError::AccessDenied);

    let err = start_or_open_service(&scm, &path, "svc", "svc").unwrap_err();
    assert!(matches!(err, ServiceError::PermissionDenied(ref n) if n == "svc"));
    assert!(scm.service("svc").is_some());
    assert_eq!(scm.open_handles(), 0);
}

#[test]
fn test_missing_image_and_bad_names() {
    let dir = tempfile::tempdir().unwrap();
    let scm = InMemoryServiceManager::new();

    let err = start_or_open_service(&scm, &dir.path().join("absent.sys"), "svc", "svc").unwrap_err();
    assert!(matches!(err, ServiceError::ModuleNotFound(_)));
    assert_eq!(err.category(), ErrorCategory::NotFound);

    let path = image(&dir, "sample.sys");
    let long = "s".repeat(300);
    assert!(matches!(
        start_or_open_service(&scm, &path, &long, "svc"),
        Err(ServiceError::NameTooLong { units: 300, .. })
    ));
    assert!(matches!(
        start_or_open_service(&scm, &path, "", "svc"),
        Err(ServiceError::NameTooLong { units: 0, .. })
    ));
}

#[test]
fn test_create_denied() {
    let dir = tempfile::tempdir().unwrap();
    let path = image(&dir, "sample.sys");
    let scm = InMemoryServiceManager::new();
    scm.fail_create("svc", ManagerError::AccessDenied);
    assert!(matches!(
        start_or_open_service(&scm, &path, "svc", "svc"),
        Err(ServiceError::PermissionDenied(_))
    ));
}

#[test]
fn test_stop_already_stopped_is_success() {
    let scm = InMemoryServiceManager::new();
    let handle = scm.create("svc", "svc", Path::new("/x.sys")).unwrap();
    stop_service(&scm, handle, false).unwrap();
    assert!(scm.service("svc").is_some());
    assert_eq!(scm.open_handles(), 0);

    let handle = scm.open("svc").unwrap();
    stop_service(&scm, handle, true).unwrap();
    assert!(scm.service("svc").is_none());
}

#[test]
fn test_failed_stop_does_not_delete() {
    let scm = InMemoryServiceManager::new();
    let handle = scm.create("svc", "svc", Path::new("/x.sys")).unwrap();
    scm.start(handle).unwrap();
    scm.fail_stop("svc", ManagerError::AccessDenied);

    let err = stop_service(&scm, handle, true).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Manager { operation: "stop", source: ManagerError::AccessDenied }
    ));
    let state = scm.service("svc").expect("service survives a failed stop");
    assert!(state.running);
    assert_eq!(scm.open_handles(), 0);

    scm.clear_failures();
    let handle = scm.open("svc").unwrap();
    stop_service(&scm, handle, true).unwrap();
    assert!(scm.service("svc").is_none());
}

#[test]
fn test_hooks_fire_on_transitions() {
    let dir = tempfile::tempdir().unwrap();
    let path = image(&dir, "sample.sys");
    let scm = Arc::new(InMemoryServiceManager::new());
    let starts = Arc::new(AtomicUsize::new(0));
    let stops = Arc::new(AtomicUsize::new(0));
    {
        let starts = starts.clone();
        scm.on_start(move |_, _| {
            starts.fetch_add(1, Ordering::SeqCst);
        });
        let stops = stops.clone();
        scm.on_stop(move |_| {
            stops.fetch_add(1, Ordering::SeqCst);
        });
    }

    let start = start_or_open_service(scm.as_ref(), &path, "svc", "svc").unwrap();
    start.release(scm.as_ref()).unwrap();
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_ensure_executor_running() {
    let root = tempfile::tempdir().unwrap();
    let bin = root.path().join("bin");
    std::fs::create_dir(&bin).unwrap();
    let arch_dir = root.path().join("amd64");
    std::fs::create_dir(&arch_dir).unwrap();
    std::fs::write(arch_dir.join("kfixkr64.sys"), b"MZ").unwrap();

    let scm = InMemoryServiceManager::new();
    let locator = ExecutorLocator::new(&bin, Arch::X64);

    let status = ensure_executor_running(&scm, &locator, "kfixkr", "Kfix Kernel Reflector").unwrap();
    assert!(status.installed);
    assert!(status.started);
    assert!(status.image.ends_with("kfixkr64.sys"));
    assert!(scm.is_running("kfixkr"), "executor stays running");
    assert_eq!(scm.open_handles(), 0);

    let again = ensure_executor_running(&scm, &locator, "kfixkr", "Kfix Kernel Reflector").unwrap();
    assert!(!again.installed);
    assert!(!again.started);
}

#[test]
fn test_ensure_executor_errors() {
    let root = tempfile::tempdir().unwrap();
    let scm = InMemoryServiceManager::new();

    let missing = ExecutorLocator::new(root.path(), Arch::X64);
    assert!(matches!(
        ensure_executor_running(&scm, &missing, "kfixkr", "k"),
        Err(ServiceError::ExecutorImageNotFound(_))
    ));

    std::fs::write(root.path().join("kfixkr64.sys"), b"MZ").unwrap();
    scm.fail_start("kfixkr", ManagerError::AccessDenied);
    assert!(matches!(
        ensure_executor_running(&scm, &missing, "kfixkr", "k"),
        Err(ServiceError::ExecutorStartDenied)
    ));

    let other = ExecutorLocator::new(root.path(), Arch::Other("arm64"));
    assert!(matches!(
        ensure_executor_running(&scm, &other, "kfixkr", "k"),
        Err(ServiceError::UnsupportedArchitecture(_))
    ));
}
