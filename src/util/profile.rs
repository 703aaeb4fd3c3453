use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use ahash::RandomState;

/// A named, atomically updated profile counter.
#[derive(Clone, Debug, Default)]
pub struct Counter {
    value: Arc<AtomicI64>,
}

impl Counter {
    pub fn update(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counter tree node. Cloning shares the same node.
#[derive(Clone)]
pub struct RuntimeProfile {
    inner: Arc<RuntimeProfileInner>,
}

struct RuntimeProfileInner {
    name: String,
    counters: Mutex<HashMap<String, Counter, RandomState>>,
    children: Mutex<Vec<RuntimeProfile>>,
}

impl RuntimeProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RuntimeProfileInner {
                name: name.into(),
                counters: Mutex::new(HashMap::default()),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the counter named `name`, creating it on first use.
    pub fn add_counter(&self, name: impl Into<String>) -> Counter {
        self.inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name.into())
            .or_default()
            .clone()
    }

    pub fn counter(&self, name: &str) -> Option<Counter> {
        self.inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Attaches `child` unless a child with the same name is already attached.
    pub fn add_child(&self, child: RuntimeProfile) {
        let mut children = self
            .inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if children.iter().any(|c| c.name() == child.name()) {
            return;
        }
        children.push(child);
    }

    pub fn child(&self, name: impl Into<String>) -> RuntimeProfile {
        let name = name.into();
        if let Some(existing) = self.get_child(&name) {
            return existing;
        }
        let child = RuntimeProfile::new(name);
        self.add_child(child.clone());
        child
    }

    pub fn get_child(&self, name: &str) -> Option<RuntimeProfile> {
        self.inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    pub fn children(&self) -> Vec<RuntimeProfile> {
        self.inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn remove_child(&self, name: &str) -> Option<RuntimeProfile> {
        let mut children = self
            .inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let idx = children.iter().position(|c| c.name() == name)?;
        Some(children.remove(idx))
    }
}

impl fmt::Debug for RuntimeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counters = self
            .inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| (k.clone(), v.value()))
            .collect::<Vec<_>>();
        counters.sort();
        f.debug_struct("RuntimeProfile")
            .field("name", &self.inner.name)
            .field("counters", &counters)
            .field("children", &self.children())
            .finish()
    }
}
