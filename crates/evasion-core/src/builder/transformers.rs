//! Obfuscator pipeline.
//!
//! A [`BuildState`] is derived from a manipulation set, then every transformer
//! of the [`Pipeline`] runs in a fixed order. Each transformer writes its edit
//! plan to `.manipulations/<name>.json` inside the working copy, where the
//! external rebuild step picks it up.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use evasion_types::{FeatureCategory, ManipulationSet};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

/// Directory (inside a working copy) holding the transformer plans.
pub const PLAN_DIR: &str = ".manipulations";

/// Edit request for one rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildState {
    pub strings_to_inject: BTreeSet<String>,
    pub apis_to_inject: BTreeSet<String>,
    pub strings_to_encrypt: BTreeSet<String>,
    pub apis_to_reflect: BTreeSet<String>,
    /// Type descriptors (`Lcom/a/Main;`)
    pub classes_to_rename: BTreeSet<String>,
    /// Transformers in the pipeline that add fields / methods.
    pub fields_adders: usize,
    pub methods_adders: usize,
}

impl BuildState {
    pub fn from_set(set: &ManipulationSet) -> Self {
        let mut state = BuildState::default();
        for candidate in set.inject() {
            match candidate.category {
                FeatureCategory::Urls => {
                    state.strings_to_inject.insert(candidate.identifier.clone());
                }
                FeatureCategory::ApiCalls => {
                    state.apis_to_inject.insert(candidate.identifier.clone());
                }
                _ => {}
            }
        }
        for candidate in set.obfuscate() {
            let category = candidate.category;
            if category == FeatureCategory::Urls {
                state.strings_to_encrypt.insert(candidate.identifier.clone());
            } else if category.is_call() {
                state.apis_to_reflect.insert(candidate.identifier.clone());
            } else if category.is_component() {
                state.classes_to_rename.insert(type_descriptor(&candidate.identifier));
            }
        }
        state
    }

    pub fn is_empty(&self) -> bool {
        self.strings_to_inject.is_empty()
            && self.apis_to_inject.is_empty()
            && self.strings_to_encrypt.is_empty()
            && self.apis_to_reflect.is_empty()
            && self.classes_to_rename.is_empty()
    }
}

/// `com.a.Main` -> `Lcom/a/Main;`
pub fn type_descriptor(class_name: &str) -> String {
    format!("L{};", class_name.replace('.', "/"))
}

/// One obfuscation technique.
pub trait Transformer: Send + Sync {
    fn name(&self) -> &'static str;

    fn adds_fields(&self) -> bool {
        false
    }

    fn adds_methods(&self) -> bool {
        false
    }

    /// Whether the technique needs decoded resources (manifest and res/).
    fn requires_resources(&self) -> bool {
        false
    }

    /// Edit plan for `state`, or `None` when there is nothing to do.
    fn plan(&self, state: &BuildState) -> Option<serde_json::Value>;
}

pub struct ClassRename;

impl Transformer for ClassRename {
    fn name(&self) -> &'static str {
        "class_rename"
    }

    fn requires_resources(&self) -> bool {
        true
    }

    fn plan(&self, state: &BuildState) -> Option<serde_json::Value> {
        (!state.classes_to_rename.is_empty()).then(|| json!({ "classes": state.classes_to_rename }))
    }
}

pub struct AdvancedReflection;

impl Transformer for AdvancedReflection {
    fn name(&self) -> &'static str {
        "advanced_reflection"
    }

    fn adds_methods(&self) -> bool {
        true
    }

    fn plan(&self, state: &BuildState) -> Option<serde_json::Value> {
        (!state.apis_to_reflect.is_empty()).then(|| {
            json!({
                "apis": state.apis_to_reflect,
                "methods_budget_share": state.methods_adders,
            })
        })
    }
}

pub struct ConstStringEncryption;

impl Transformer for ConstStringEncryption {
    fn name(&self) -> &'static str {
        "const_string_encryption"
    }

    fn adds_fields(&self) -> bool {
        true
    }

    fn plan(&self, state: &BuildState) -> Option<serde_json::Value> {
        (!state.strings_to_encrypt.is_empty()).then(|| {
            json!({
                "strings": state.strings_to_encrypt,
                "fields_budget_share": state.fields_adders,
            })
        })
    }
}

pub struct ApiInjection;

impl Transformer for ApiInjection {
    fn name(&self) -> &'static str {
        "api_injection"
    }

    fn plan(&self, state: &BuildState) -> Option<serde_json::Value> {
        (!state.apis_to_inject.is_empty()).then(|| json!({ "apis": state.apis_to_inject }))
    }
}

pub struct StringInjection;

impl Transformer for StringInjection {
    fn name(&self) -> &'static str {
        "string_injection"
    }

    fn plan(&self, state: &BuildState) -> Option<serde_json::Value> {
        (!state.strings_to_inject.is_empty()).then(|| json!({ "strings": state.strings_to_inject }))
    }
}

/// Ordered list of transformers.
pub struct Pipeline {
    transformers: Vec<Box<dyn Transformer>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            transformers: vec![
                Box::new(ClassRename),
                Box::new(AdvancedReflection),
                Box::new(ConstStringEncryption),
                Box::new(ApiInjection),
                Box::new(StringInjection),
            ],
        }
    }
}

impl Pipeline {
    pub fn new(transformers: Vec<Box<dyn Transformer>>) -> Self {
        Self { transformers }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transformers.iter().map(|t| t.name()).collect()
    }

    /// Drop every transformer that needs decoded resources.
    pub fn without_resource_dependent(&mut self) {
        self.transformers.retain(|t| !t.requires_resources());
    }

    /// Write the plans for `set` into `workdir`; returns the transformers that ran.
    pub fn apply(&self, set: &ManipulationSet, workdir: &Path) -> Result<Vec<&'static str>> {
        let mut state = BuildState::from_set(set);
        state.fields_adders = self.transformers.iter().filter(|t| t.adds_fields()).count();
        state.methods_adders = self.transformers.iter().filter(|t| t.adds_methods()).count();

        let plan_dir = workdir.join(PLAN_DIR);
        let mut applied = Vec::new();
        for transformer in &self.transformers {
            let Some(plan) = transformer.plan(&state) else {
                continue;
            };
            std::fs::create_dir_all(&plan_dir)
                .with_context(|| format!("Failed to create {}", plan_dir.display()))?;
            let path = plan_dir.join(format!("{}.json", transformer.name()));
            let bytes = serde_json::to_vec_pretty(&plan)?;
            std::fs::write(&path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
            debug!(transformer = transformer.name(), "plan written");
            applied.push(transformer.name());
        }
        Ok(applied)
    }
}
