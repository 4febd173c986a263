//! Offline provider backed by a single TOML file.
//!
//! Assigns deterministic ids and echoes attributes back as outputs, so
//! plan/apply work end-to-end without credentials. The file is the
//! "world": everything the provider believes exists.

use reconciler::{Applied, Attrs, Error, Provider, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Default, Serialize, Deserialize)]
struct World {
    #[serde(default)]
    instances: BTreeMap<String, Instance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Instance {
    kind: String,
    attrs: Attrs,
    serial: u64,
}

pub struct LocalProvider {
    path: PathBuf,
    world: Mutex<World>,
}

impl LocalProvider {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let world = if path.exists() {
            toml::from_str(&fs::read_to_string(&path)?)?
        } else {
            World::default()
        };
        Ok(Self {
            path,
            world: Mutex::new(world),
        })
    }

    fn persist(&self, world: &World) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, toml::to_string_pretty(world)?)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, World> {
        self.world.lock().expect("world lock poisoned")
    }

    fn outputs_for(provider_id: &str, attrs: &Attrs) -> Attrs {
        let mut outputs = attrs.clone();
        outputs.insert("id".into(), Value::String(provider_id.to_string()));
        outputs
    }
}

impl Provider for LocalProvider {
    fn create(&self, kind: &str, attrs: &Attrs) -> Result<Applied> {
        let mut world = self.lock();
        let serial = world.instances.values().map(|i| i.serial).max().unwrap_or(0) + 1;

        // Deterministic id from the name attribute when present
        let provider_id = match attrs.get("name").and_then(Value::as_str) {
            Some(name) if !world.instances.contains_key(&format!("{kind}-{name}")) => {
                format!("{kind}-{name}")
            }
            _ => format!("{kind}-{serial}"),
        };

        world.instances.insert(
            provider_id.clone(),
            Instance {
                kind: kind.to_string(),
                attrs: attrs.clone(),
                serial,
            },
        );
        self.persist(&world)?;
        Ok(Applied {
            outputs: Self::outputs_for(&provider_id, attrs),
            provider_id,
        })
    }

    fn update(&self, kind: &str, provider_id: &str, attrs: &Attrs) -> Result<Applied> {
        let mut world = self.lock();
        let instance = world
            .instances
            .get_mut(provider_id)
            .ok_or_else(|| Error::permanent(format!("{kind} {provider_id} does not exist")))?;
        instance.attrs = attrs.clone();
        self.persist(&world)?;
        Ok(Applied {
            provider_id: provider_id.to_string(),
            outputs: Self::outputs_for(provider_id, attrs),
        })
    }

    fn delete(&self, kind: &str, provider_id: &str) -> Result<()> {
        let mut world = self.lock();
        if world.instances.remove(provider_id).is_none() {
            return Err(Error::permanent(format!(
                "{kind} {provider_id} does not exist"
            )));
        }
        self.persist(&world)
    }

    fn read(&self, _kind: &str, provider_id: &str) -> Result<Option<Applied>> {
        let world = self.lock();
        Ok(world.instances.get(provider_id).map(|instance| Applied {
            provider_id: provider_id.to_string(),
            outputs: Self::outputs_for(provider_id, &instance.attrs),
        }))
    }
}
