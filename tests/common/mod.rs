//! Shared rig: loopback executor plus in-memory service manager, wired so
//! that starting a module's service registers it with the executor.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use kfix::executor::{LoopbackExecutor, LoopbackModule};
use kfix::service::InMemoryServiceManager;
use kfix::{Harness, HarnessSettings, LoadAddress, TestModule};

type Factory = Arc<dyn Fn() -> LoopbackModule + Send + Sync>;

pub struct Rig {
    pub dir: tempfile::TempDir,
    pub executor: Arc<LoopbackExecutor>,
    pub services: Arc<InMemoryServiceManager>,
    pub harness: Harness,
    factories: Arc<Mutex<HashMap<String, Factory>>>,
    loaded: Arc<Mutex<HashMap<String, LoadAddress>>>,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_settings(HarnessSettings::default())
    }

    pub fn with_settings(settings: HarnessSettings) -> Self {
        let executor = Arc::new(LoopbackExecutor::new());
        let services = Arc::new(InMemoryServiceManager::new());
        let factories: Arc<Mutex<HashMap<String, Factory>>> = Arc::default();
        let loaded: Arc<Mutex<HashMap<String, LoadAddress>>> = Arc::default();

        {
            let executor = executor.clone();
            let factories = factories.clone();
            let loaded = loaded.clone();
            services.on_start(move |service, binary| {
                let file = binary
                    .file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let factory = factories.lock().unwrap().get(&file).cloned();
                if let Some(factory) = factory {
                    let address = executor.register(factory());
                    loaded.lock().unwrap().insert(service.to_string(), address);
                }
            });
        }
        {
            let executor = executor.clone();
            let loaded = loaded.clone();
            services.on_stop(move |service| {
                if let Some(address) = loaded.lock().unwrap().remove(service) {
                    executor.unregister(address);
                }
            });
        }

        let harness = Harness::new(executor.clone(), executor.clone(), services.clone(), settings);
        Self {
            dir: tempfile::tempdir().unwrap(),
            executor,
            services,
            harness,
            factories,
            loaded,
        }
    }

    /// Create an image file named `file`; starting its service registers
    /// the module `factory` builds.
    pub fn image(
        &self,
        file: &str,
        factory: impl Fn() -> LoopbackModule + Send + Sync + 'static,
    ) -> PathBuf {
        let path = self.dir.path().join(file);
        std::fs::write(&path, b"MZ").unwrap();
        self.factories.lock().unwrap().insert(file.to_string(), Arc::new(factory));
        path
    }

    /// Register directly with the executor and attach without a service.
    pub fn attach(&self, module: LoopbackModule) -> TestModule {
        let name = module.name().to_string();
        let address = self.executor.register(module);
        self.harness.attach_module(address, &name).unwrap()
    }
}
