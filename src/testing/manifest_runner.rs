//! Runner that executes kernels defined by TOML manifests.
//!
//! Each manifest is decoded, its buffers are allocated and filled through a
//! [`HostAllocator`], the program is launched, and every buffer with an
//! `expect` list is copied back out and compared element by element.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::device::{Allocator, Buffer, HostAllocator};
use crate::interpreter::{InterpreterEngine, Literal, Value};

use super::manifest::KernelManifest;

/// Relative tolerance for float comparisons.
const FLOAT_TOLERANCE: f64 = 1e-5;

/// Result of running one manifest.
#[derive(Debug)]
pub struct ManifestResult {
    pub name: String,
    pub passed: bool,
    pub correct_count: usize,
    pub total_count: usize,
    pub first_mismatch: Option<MismatchInfo>,
    pub instructions: u64,
    pub elapsed: Option<Duration>,
}

/// Information about a mismatched output value.
#[derive(Debug, Clone, PartialEq)]
pub struct MismatchInfo {
    pub buffer: String,
    pub index: usize,
    pub expected: String,
    pub actual: String,
}

impl std::fmt::Display for MismatchInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[{}]: expected {}, got {}",
            self.buffer, self.index, self.expected, self.actual
        )
    }
}

/// Runner that executes manifest-based kernels.
#[derive(Debug, Default)]
pub struct ManifestRunner {
    /// Report wall-clock time per launch.
    time: bool,
}

impl ManifestRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_time(mut self, time: bool) -> Self {
        self.time = time;
        self
    }

    /// Load and run a manifest file.
    pub fn run_file(&self, path: &Path) -> Result<ManifestResult> {
        let manifest = KernelManifest::from_file(path)?;
        self.run(&manifest)
            .with_context(|| format!("kernel '{}'", manifest.kernel.name))
    }

    /// Run every `*.toml` manifest in `dir`, in file-name order.
    pub fn run_dir(&self, dir: &Path) -> Result<Vec<(PathBuf, Result<ManifestResult>)>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read manifest directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        Ok(paths
            .into_iter()
            .map(|path| {
                let result = self.run_file(&path);
                (path, result)
            })
            .collect())
    }

    /// Run a parsed manifest.
    pub fn run(&self, manifest: &KernelManifest) -> Result<ManifestResult> {
        let program = manifest.program()?;
        let mut alloc = HostAllocator::new();

        let mut bufs = manifest
            .buffers
            .iter()
            .map(|def| {
                let input = def.generate_input()?;
                let mut buf = alloc.alloc(input.fmt(), input.len());
                alloc.copyin(&mut buf, input.as_bytes())?;
                Ok(buf)
            })
            .collect::<Result<Vec<Buffer>>>()?;

        let mut engine = InterpreterEngine::new(&program)?;
        let params = manifest.launch_params().with_wait(self.time);
        let elapsed = engine.launch(&mut bufs, &params)?;

        let mut result = ManifestResult {
            name: manifest.kernel.name.clone(),
            passed: true,
            correct_count: 0,
            total_count: 0,
            first_mismatch: None,
            instructions: engine.instructions(),
            elapsed,
        };

        for (def, buf) in manifest.buffers.iter().zip(&bufs) {
            let Some(expect) = &def.expect else {
                continue;
            };
            let mut host = vec![0u8; buf.size()];
            alloc.copyout(&mut host, buf)?;
            let actual = Buffer::from_bytes(buf.fmt(), host)?.to_values();

            result.total_count += expect.len();
            for (index, expected) in expect.iter().enumerate() {
                let got = actual.get(index);
                if got.is_some_and(|v| matches(v, *expected)) {
                    result.correct_count += 1;
                } else if result.first_mismatch.is_none() {
                    result.first_mismatch = Some(MismatchInfo {
                        buffer: def.name.clone(),
                        index,
                        expected: expected.value().to_string(),
                        actual: got.map_or_else(|| "nothing".to_string(), |v| v.to_string()),
                    });
                }
            }
        }

        result.passed = result.correct_count == result.total_count;
        log::debug!(
            "{}: {}/{} correct, {} instructions",
            result.name,
            result.correct_count,
            result.total_count,
            result.instructions
        );
        Ok(result)
    }
}

fn matches(actual: &Value, expected: Literal) -> bool {
    match expected {
        Literal::Float(e) => {
            let a = actual.as_f64();
            (e.is_nan() && a.is_nan()) || (a - e).abs() <= FLOAT_TOLERANCE * e.abs().max(1.0)
        }
        _ => actual.numeric_eq(&expected.value()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::EmuError;

    const VECTOR_ADD: &str = include_str!("../../manifests/vector_add.toml");
    const LOOP_SUM: &str = include_str!("../../manifests/loop_sum.toml");
    const LOCAL_REVERSE: &str = include_str!("../../manifests/local_reverse.toml");
    const RELU: &str = include_str!("../../manifests/relu.toml");

    fn run(content: &str) -> ManifestResult {
        let manifest = KernelManifest::parse(content).unwrap();
        ManifestRunner::new().run(&manifest).unwrap()
    }

    #[test]
    fn test_sample_manifests_pass() {
        for content in [VECTOR_ADD, LOOP_SUM, LOCAL_REVERSE, RELU] {
            let result = run(content);
            assert!(
                result.passed,
                "{}: {:?}",
                result.name,
                result.first_mismatch
            );
            assert!(result.total_count > 0);
            assert!(result.instructions > 0);
            assert_eq!(result.elapsed, None);
        }
    }

    #[test]
    fn test_reports_first_mismatch() {
        let mut manifest = KernelManifest::parse(VECTOR_ADD).unwrap();
        let out = manifest
            .buffers
            .iter_mut()
            .find(|b| b.expect.is_some())
            .unwrap();
        let expect = out.expect.as_mut().unwrap();
        expect[2] = Literal::Float(-1.0);
        expect[3] = Literal::Float(-1.0);

        let result = ManifestRunner::new().run(&manifest).unwrap();
        assert!(!result.passed);
        assert_eq!(result.correct_count, result.total_count - 2);
        let mismatch = result.first_mismatch.unwrap();
        assert_eq!(mismatch.buffer, "out");
        assert_eq!(mismatch.index, 2);
        assert_eq!(mismatch.expected, "-1");
    }

    #[test]
    fn test_timing() {
        let manifest = KernelManifest::parse(LOOP_SUM).unwrap();
        let result = ManifestRunner::new().with_time(true).run(&manifest).unwrap();
        assert!(result.elapsed.is_some());
    }

    #[test]
    fn test_launch_error_propagates() {
        let mut manifest = KernelManifest::parse(VECTOR_ADD).unwrap();
        manifest.buffers[1].size = 2;
        manifest.buffers[1].pattern = crate::testing::Pattern::Zeros;

        let err = ManifestRunner::new().run(&manifest).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EmuError>(),
            Some(EmuError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_run_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b_relu.toml"), RELU).unwrap();
        std::fs::write(dir.path().join("a_add.toml"), VECTOR_ADD).unwrap();
        std::fs::write(dir.path().join("broken.toml"), "[kernel]\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let results = ManifestRunner::new().run_dir(dir.path()).unwrap();
        let names: Vec<_> = results
            .iter()
            .map(|(p, _)| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a_add.toml", "b_relu.toml", "broken.toml"]);
        assert!(results[0].1.as_ref().unwrap().passed);
        assert!(results[1].1.as_ref().unwrap().passed);
        assert!(results[2].1.is_err());
    }

    #[test]
    fn test_float_tolerance() {
        assert!(matches(&Value::f32(0.1), Literal::Float(0.1)));
        assert!(matches(&Value::f64(f64::NAN), Literal::Float(f64::NAN)));
        assert!(!matches(&Value::f32(0.5), Literal::Float(0.6)));
        assert!(matches(&Value::i32(3), Literal::Int(3)));
        assert!(matches(&Value::TRUE, Literal::Bool(true)));
    }
}
