//! In-memory stand-ins for the rebuild toolchain, classifier and extractor.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use evasion_core::{ArtifactBuilder, BuildError, BuilderFactory, FeatureExtractor, Label, Oracle, Verdict};
use evasion_types::{Candidate, FeatureCategory, ManipulationSet};
use parking_lot::Mutex;
use tempfile::TempDir;

/// Builder whose "artifacts" are text files listing the applied candidates.
///
/// Any set containing a candidate from `broken` fails to rebuild.
pub struct FakeBuilder {
    out: PathBuf,
    broken: HashSet<String>,
    baseline_breaks: bool,
    degraded: AtomicBool,
    validations: AtomicU64,
    applies: AtomicU64,
    next_id: AtomicU64,
    cleaned: AtomicBool,
}

impl FakeBuilder {
    pub fn new(out: &Path) -> Self {
        Self {
            out: out.to_path_buf(),
            broken: HashSet::new(),
            baseline_breaks: false,
            degraded: AtomicBool::new(false),
            validations: AtomicU64::new(0),
            applies: AtomicU64::new(0),
            next_id: AtomicU64::new(0),
            cleaned: AtomicBool::new(false),
        }
    }

    pub fn breaking<I, S>(mut self, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.broken.extend(candidates.into_iter().map(Into::into));
        self
    }

    /// The unmanipulated rebuild fails until `degrade` is called.
    pub fn with_broken_baseline(mut self) -> Self {
        self.baseline_breaks = true;
        self
    }

    pub fn validations(&self) -> u64 {
        self.validations.load(Ordering::SeqCst)
    }

    pub fn applies(&self) -> u64 {
        self.applies.load(Ordering::SeqCst)
    }

    pub fn degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn cleaned(&self) -> bool {
        self.cleaned.load(Ordering::SeqCst)
    }

    fn check(&self, set: &ManipulationSet) -> Result<(), BuildError> {
        if set.is_empty() && self.baseline_breaks && !self.degraded() {
            return Err(BuildError::new("resource table could not be rebuilt"));
        }
        match set.iter().find(|c| self.broken.contains(&c.to_string())) {
            Some(c) => Err(BuildError::new(format!("smali assembly failed on {}", c))),
            None => Ok(()),
        }
    }
}

impl ArtifactBuilder for FakeBuilder {
    fn apply(&self, set: &ManipulationSet, _attempt: usize) -> Result<PathBuf, BuildError> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        self.check(set)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let path = self.out.join(format!("manipulated_{}.apk", id));
        let body: Vec<String> = set.iter().map(Candidate::to_string).collect();
        std::fs::write(&path, body.join("\n")).map_err(|e| BuildError::new(e.to_string()))?;
        Ok(path)
    }

    fn validate(&self, set: &ManipulationSet, _attempt: usize) -> Result<(), BuildError> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        self.check(set)
    }

    fn degrade(&self) -> Result<(), BuildError> {
        self.degraded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn clean(&self, _attempt: usize) {}

    fn clean_all(&self) {
        self.cleaned.store(true, Ordering::SeqCst);
    }
}

/// Factory handing out one shared [`FakeBuilder`].
pub struct SharedFactory(pub Arc<FakeBuilder>);

struct SharedBuilder(Arc<FakeBuilder>);

impl ArtifactBuilder for SharedBuilder {
    fn apply(&self, set: &ManipulationSet, attempt: usize) -> Result<PathBuf, BuildError> {
        self.0.apply(set, attempt)
    }
    fn validate(&self, set: &ManipulationSet, attempt: usize) -> Result<(), BuildError> {
        self.0.validate(set, attempt)
    }
    fn degrade(&self) -> Result<(), BuildError> {
        self.0.degrade()
    }
    fn clean(&self, attempt: usize) {
        self.0.clean(attempt)
    }
    fn clean_all(&self) {
        self.0.clean_all()
    }
}

impl BuilderFactory for SharedFactory {
    fn open(&self, _artifact: &Path) -> Result<Box<dyn ArtifactBuilder>, BuildError> {
        Ok(Box::new(SharedBuilder(self.0.clone())))
    }
}

type ScoreFn = dyn Fn(&[String]) -> f64 + Send + Sync;

/// Classifier scoring the candidate lines of a fake artifact.
///
/// Scores below 0.5 are benign.
pub struct FakeOracle {
    score: Box<ScoreFn>,
    queries: AtomicU64,
    manipulated: AtomicU64,
    /// Manipulated artifacts scored before the classifier starts failing.
    fail_after: Option<u64>,
}

impl FakeOracle {
    pub fn new(score: impl Fn(&[String]) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            score: Box::new(score),
            queries: AtomicU64::new(0),
            manipulated: AtomicU64::new(0),
            fail_after: None,
        }
    }

    pub fn failing_on_manipulated(self) -> Self {
        self.failing_after(0)
    }

    /// Score `ok` manipulated artifacts, then fail on every later one.
    pub fn failing_after(mut self, ok: u64) -> Self {
        self.fail_after = Some(ok);
        self
    }

    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }
}

impl Oracle for FakeOracle {
    fn classify(&self, artifact: &Path) -> Result<Verdict> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let body = std::fs::read_to_string(artifact)?;
        let lines: Vec<String> = body.lines().filter(|l| !l.is_empty()).map(String::from).collect();
        if !lines.is_empty() {
            let seen = self.manipulated.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.is_some_and(|ok| seen >= ok) {
                return Err(anyhow!("classifier crashed"));
            }
        }
        let score = (self.score)(&lines);
        let label = if score < 0.5 { Label::Benign } else { Label::Malicious };
        Ok(Verdict::new(label, score))
    }
}

/// Score falling by `step` per applied candidate of `category`.
pub fn linear_score(base: f64, category: &'static str, step: f64) -> impl Fn(&[String]) -> f64 + Send + Sync {
    move |lines: &[String]| {
        let hits = lines.iter().filter(|l| l.starts_with(category)).count();
        base - step * hits as f64
    }
}

/// Extractor serving fixed feature lists per file name.
#[derive(Default)]
pub struct FakeExtractor {
    features: Mutex<BTreeMap<String, Vec<String>>>,
}

impl FakeExtractor {
    pub fn with(self, name: &str, features: &[&str]) -> Self {
        self.features
            .lock()
            .insert(name.to_string(), features.iter().map(|f| f.to_string()).collect());
        self
    }
}

impl FeatureExtractor for FakeExtractor {
    fn extract(&self, artifact: &Path) -> Result<Vec<String>> {
        let name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.features
            .lock()
            .get(&name)
            .cloned()
            .ok_or_else(|| anyhow!("no features for {}", name))
    }
}

/// `count` injectable URLs and `count` obfuscatable activities.
pub fn space_set(injections: usize, obfuscations: usize) -> ManipulationSet {
    let inject = (0..injections)
        .map(|i| Candidate::inject(FeatureCategory::Urls, format!("evil{}.example", i)))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let obfuscate = (0..obfuscations)
        .map(|i| Candidate::obfuscate(FeatureCategory::Activities, format!("com.mal.Act{}", i)))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    ManipulationSet::new(inject, obfuscate).unwrap()
}

/// Unmanipulated artifact: an empty file the oracle scores as baseline.
pub fn original_artifact(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, "").unwrap();
    path
}
