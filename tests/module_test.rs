//! Loading modules through their services and releasing them again.

mod common;

use common::Rig;
use kfix::descriptor::{DescriptorError, RoutineRole};
use kfix::discovery::DiscoveryError;
use kfix::executor::LoopbackModule;
use kfix::service::{start_or_open_service, ManagerError, ServiceError};
use kfix::{ErrorCategory, ModuleError};

fn sample(name: &'static str) -> impl Fn() -> LoopbackModule + Send + Sync + 'static {
    move || {
        LoopbackModule::builder(name)
            .fixture("SampleFixture1", |f| {
                f.setup(|_| Ok(()))
                    .teardown(|_| Ok(()))
                    .test_case("Test01", |_| Ok(()))
                    .test_case("Test02", |_| Ok(()))
            })
            .fixture("SampleFixture2", |f| f.before(|_| Ok(())).test_case("Only", |_| Ok(())))
            .build()
    }
}

#[test]
fn test_load_reads_fixtures_and_release_undoes_everything() {
    let rig = Rig::new();
    let path = rig.image("sample.sys", sample("sample.sys"));

    let module = rig.harness.load_module(&path).unwrap();
    assert_eq!(module.name(), "sample");
    assert!(module.installed());
    assert!(module.started());
    assert!(rig.services.is_running("kfixkr_sample"));
    assert_eq!(rig.executor.module_count(), 1);

    let names: Vec<&str> = module.fixtures().iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["SampleFixture1", "SampleFixture2"]);
    let first = module.fixture("SampleFixture1").unwrap();
    assert!(first.routine(RoutineRole::Setup).is_some());
    assert!(first.routine(RoutineRole::Before).is_none());
    assert_eq!(first.test_cases.len(), 2);
    assert!(module.fixtures().iter().all(|f| f.module == module.address()));

    drop(module);
    assert!(rig.services.service("kfixkr_sample").is_none());
    assert_eq!(rig.executor.module_count(), 0);
    assert_eq!(rig.services.open_handles(), 0);
}

#[test]
fn test_clones_share_the_service() {
    let rig = Rig::new();
    let path = rig.image("sample.sys", sample("sample.sys"));

    let module = rig.harness.load_module(&path).unwrap();
    let other = module.clone();
    assert_eq!(module.reference_count(), 2);

    drop(module);
    assert_eq!(other.reference_count(), 1);
    assert!(rig.services.is_running("kfixkr_sample"));

    let handle = std::thread::spawn(move || other.fixtures().len());
    assert_eq!(handle.join().unwrap(), 2);
    assert!(rig.services.service("kfixkr_sample").is_none());
}

#[test]
fn test_already_running_module_is_not_stopped() {
    let rig = Rig::new();
    let path = rig.image("sample.sys", sample("sample.sys"));
    let outside = start_or_open_service(rig.services.as_ref(), &path, "kfixkr_sample", "sample").unwrap();

    let module = rig.harness.load_module(&path).unwrap();
    assert!(!module.installed());
    assert!(!module.started());
    drop(module);

    assert!(rig.services.is_running("kfixkr_sample"));
    outside.release(rig.services.as_ref()).unwrap();
    assert_eq!(rig.executor.module_count(), 0);
}

#[test]
fn test_module_name_matches_case_insensitively() {
    let rig = Rig::new();
    let path = rig.image("Sample.SYS", sample("SAMPLE.sys"));
    let module = rig.harness.load_module(&path).unwrap();
    assert_eq!(module.fixtures().len(), 2);
}

#[test]
fn test_unknown_module_releases_service() {
    let rig = Rig::new();
    let path = rig.image("sample.sys", sample("different.sys"));

    let err = rig.harness.load_module(&path).unwrap_err();
    assert!(matches!(err, ModuleError::Discovery(DiscoveryError::UnknownLoadAddress(ref n)) if n == "sample.sys"));
    assert_eq!(err.category(), ErrorCategory::NotFound);
    assert!(rig.services.service("kfixkr_sample").is_none());
    assert_eq!(rig.executor.module_count(), 0);
}

#[test]
fn test_bad_descriptor_releases_service() {
    let rig = Rig::new();
    let path = rig.image("dup.sys", || {
        LoopbackModule::builder("dup.sys")
            .fixture("F", |f| f.after(|_| Ok(())).after(|_| Ok(())).test_case("T", |_| Ok(())))
            .build()
    });

    let err = rig.harness.load_module(&path).unwrap_err();
    assert!(matches!(
        err,
        ModuleError::Descriptor(DescriptorError::DuplicateSpecialRoutine(RoutineRole::After))
    ));
    assert_eq!(err.category(), ErrorCategory::Policy);
    assert!(rig.services.service("kfixkr_dup").is_none());
}

#[test]
fn test_fixture_name_too_long_for_executor() {
    let rig = Rig::new();
    let path = rig.image("sample.sys", sample("sample.sys"));
    rig.services.fail_start("kfixkr_sample", ManagerError::MoreData);

    let err = rig.harness.load_module(&path).unwrap_err();
    assert!(matches!(err, ModuleError::Service(ServiceError::FixtureNameTooLong)));
    assert!(rig.services.service("kfixkr_sample").is_none());
}

#[test]
fn test_missing_image() {
    let rig = Rig::new();
    let err = rig.harness.load_module(&rig.dir.path().join("absent.sys")).unwrap_err();
    assert!(matches!(err, ModuleError::Service(ServiceError::ModuleNotFound(_))));
}

#[test]
fn test_attach_manages_no_service() {
    let rig = Rig::new();
    let module = rig.attach(sample("direct.sys")());
    assert!(!module.installed());
    assert!(!module.started());
    assert_eq!(module.fixtures().len(), 2);
    drop(module);
    assert_eq!(rig.executor.module_count(), 1);
}
