//! DeepSeek OCR backend implementation (the deep stage).
//!
//! Uses DeepSeek-OCR.rs via subprocess for vision-language OCR. This gives the
//! best results on difficult scans but costs far more than Tesseract
//! (6-13GB RAM, GPU recommended), so the pipeline only reaches for it when the
//! fast stage is inconclusive.
//!
//! Install deepseek-ocr.rs from:
//! https://github.com/TimmyOVO/deepseek-ocr.rs
//!
//! ```bash
//! git clone https://github.com/TimmyOVO/deepseek-ocr.rs
//! cd deepseek-ocr.rs
//! cargo install --path crates/cli --features cuda  # or --features metal for Mac
//! ```
//!
//! Every call runs with the same device, model and `f32` precision, decodes
//! greedily (the CLI only samples when `--do-sample` is passed, which we never
//! do) and is bounded by `max_new_tokens` and a wall-clock timeout.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::time::Duration;

use image::{DynamicImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::backend::{OcrError, OcrStage, TextExtractor};
use super::engine_utils::{
    check_binary, resolve_binary, stderr_excerpt, stdout_text, write_scratch_png,
};

/// Fixed OCR task instruction; `<image>` marks where the image tokens go.
const OCR_PROMPT: &str = "<image>\nFree OCR.";

/// Weights and inputs always run in single precision.
const PRECISION: &str = "f32";

/// Side length of the blank image used to check that the model loads.
const WARM_UP_SIZE: u32 = 32;

/// Compute backend the model is bound to for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeDevice {
    /// Apple silicon GPU via Metal.
    Metal,
    /// NVIDIA GPU via CUDA.
    Cuda,
    Cpu,
}

impl ComputeDevice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputeDevice::Metal => "metal",
            ComputeDevice::Cuda => "cuda",
            ComputeDevice::Cpu => "cpu",
        }
    }
}

impl std::fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operator preference for the compute device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Best available: Metal, then CUDA, then CPU.
    #[default]
    Auto,
    Metal,
    Cuda,
    Cpu,
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "metal" | "mps" => Ok(DevicePreference::Metal),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "cpu" => Ok(DevicePreference::Cpu),
            other => Err(format!(
                "unknown device '{}' (expected auto, metal, cuda or cpu)",
                other
            )),
        }
    }
}

/// Resolve a device preference to a concrete device.
pub fn select_device(preference: DevicePreference) -> ComputeDevice {
    match preference {
        DevicePreference::Metal => ComputeDevice::Metal,
        DevicePreference::Cuda => ComputeDevice::Cuda,
        DevicePreference::Cpu => ComputeDevice::Cpu,
        DevicePreference::Auto => {
            if metal_available() {
                ComputeDevice::Metal
            } else if cuda_available() {
                ComputeDevice::Cuda
            } else {
                ComputeDevice::Cpu
            }
        }
    }
}

fn metal_available() -> bool {
    cfg!(all(target_os = "macos", target_arch = "aarch64"))
}

fn cuda_available() -> bool {
    if !check_binary("nvidia-smi") {
        return false;
    }
    Command::new("nvidia-smi")
        .arg("-L")
        .output()
        .map(|o| o.status.success() && String::from_utf8_lossy(&o.stdout).contains("GPU"))
        .unwrap_or(false)
}

/// Settings for the DeepSeek engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepSeekConfig {
    /// Binary name (looked up in PATH) or path to deepseek-ocr-cli.
    pub binary: PathBuf,
    /// Model to use (deepseek-ocr, paddleocr-vl, dots-ocr).
    pub model: String,
    /// Compute device preference.
    pub device: DevicePreference,
    /// Upper bound on generated tokens per image.
    pub max_new_tokens: u32,
    /// Wall-clock limit per image in seconds (0 disables the limit).
    pub timeout_secs: u64,
}

impl Default for DeepSeekConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("deepseek-ocr-cli"),
            model: "deepseek-ocr".to_string(),
            device: DevicePreference::Auto,
            max_new_tokens: 1024,
            timeout_secs: 300,
        }
    }
}

/// Loaded engine state. Owned exclusively by [`DeepSeekExtractor`].
struct DeepSeekSession {
    binary: PathBuf,
    model: String,
    device: ComputeDevice,
    max_new_tokens: u32,
    timeout: Option<Duration>,
    /// Current-thread runtime used only to bound each inference call.
    runtime: tokio::runtime::Runtime,
}

impl DeepSeekSession {
    fn command_args(&self, image_path: &Path) -> Vec<OsString> {
        vec![
            "--quiet".into(),
            "--prompt".into(),
            OCR_PROMPT.into(),
            "--image".into(),
            image_path.as_os_str().to_os_string(),
            "--device".into(),
            self.device.as_str().into(),
            "--dtype".into(),
            PRECISION.into(),
            "--model".into(),
            self.model.clone().into(),
            "--max-new-tokens".into(),
            self.max_new_tokens.to_string().into(),
        ]
    }

    /// Run one inference on a blank image so a model that cannot be loaded
    /// on the selected device fails the run before the first real image.
    fn warm_up(&self) -> Result<(), OcrError> {
        info!("Loading {} on {}...", self.model, self.device);
        let blank = DynamicImage::ImageRgb8(RgbImage::from_pixel(
            WARM_UP_SIZE,
            WARM_UP_SIZE,
            Rgb([255, 255, 255]),
        ));
        let scratch = write_scratch_png(&blank)?;

        match self.infer(scratch.path()) {
            Ok(_) => {
                debug!("Model {} loaded", self.model);
                Ok(())
            }
            Err(OcrError::BackendNotAvailable(msg)) => Err(OcrError::BackendNotAvailable(msg)),
            Err(e) => Err(OcrError::BackendNotAvailable(format!(
                "model '{}' could not be loaded on {}: {}",
                self.model, self.device, e
            ))),
        }
    }

    fn infer(&self, image_path: &Path) -> Result<String, OcrError> {
        let mut command = tokio::process::Command::new(&self.binary);
        command
            .args(self.command_args(image_path))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = self.runtime.block_on(async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, command.output())
                    .await
                    .map_err(|_| OcrError::Timeout(limit)),
                None => Ok(command.output().await),
            }
        })?;

        match output {
            Ok(output) => {
                if output.status.success() {
                    Ok(stdout_text(&output.stdout))
                } else {
                    Err(OcrError::OcrFailed(format!(
                        "deepseek-ocr failed: {}",
                        stderr_excerpt(&output.stderr)
                    )))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(OcrError::BackendNotAvailable(
                    "deepseek-ocr not found. Install from: https://github.com/TimmyOVO/deepseek-ocr.rs".to_string(),
                ))
            }
            Err(e) => Err(OcrError::Io(e)),
        }
    }
}

/// DeepSeek OCR backend using subprocess.
pub struct DeepSeekExtractor {
    session: DeepSeekSession,
}

impl DeepSeekExtractor {
    /// Bind the engine to a device and check that the model loads there.
    ///
    /// Failure here is fatal for a run: without the deep stage the fallback
    /// has nothing to fall back to. A missing binary, a model that fails to
    /// load, or a warm-up that exceeds the timeout all surface as
    /// [`OcrError::BackendNotAvailable`].
    pub fn initialize(config: DeepSeekConfig) -> Result<Self, OcrError> {
        let binary = resolve_binary(&config.binary).ok_or_else(|| {
            OcrError::BackendNotAvailable(format!(
                "{} not found. Install from: https://github.com/TimmyOVO/deepseek-ocr.rs",
                config.binary.display()
            ))
        })?;

        let device = select_device(config.device);
        info!("Using device: {} (precision {})", device, PRECISION);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let timeout = (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs));
        debug!(
            "DeepSeek session ready: binary={} model={} max_new_tokens={} timeout={:?}",
            binary.display(),
            config.model,
            config.max_new_tokens,
            timeout
        );

        let session = DeepSeekSession {
            binary,
            model: config.model,
            device,
            max_new_tokens: config.max_new_tokens,
            timeout,
            runtime,
        };
        session.warm_up()?;

        Ok(Self { session })
    }

    /// Device selected at initialization.
    pub fn device(&self) -> ComputeDevice {
        self.session.device
    }

    /// Whether the configured binary can be found.
    pub fn is_available(config: &DeepSeekConfig) -> bool {
        resolve_binary(&config.binary).is_some()
    }

    /// Hint for the operator when the engine is missing.
    pub fn availability_hint(config: &DeepSeekConfig) -> String {
        if Self::is_available(config) {
            "deepseek-ocr-cli is available".to_string()
        } else {
            "deepseek-ocr-cli not installed. Install from: https://github.com/TimmyOVO/deepseek-ocr.rs"
                .to_string()
        }
    }
}

impl TextExtractor for DeepSeekExtractor {
    fn stage(&self) -> OcrStage {
        OcrStage::Deep
    }

    fn engine(&self) -> &str {
        "deepseek"
    }

    fn extract(&self, image: &DynamicImage) -> Result<String, OcrError> {
        let scratch = write_scratch_png(image)?;
        self.session.infer(scratch.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(device: ComputeDevice, max_new_tokens: u32) -> DeepSeekSession {
        DeepSeekSession {
            binary: PathBuf::from("deepseek-ocr-cli"),
            model: "deepseek-ocr".to_string(),
            device,
            max_new_tokens,
            timeout: None,
            runtime: tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap(),
        }
    }

    fn flag_value(args: &[OsString], flag: &str) -> Option<String> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(|v| v.to_string_lossy().into_owned())
    }

    #[test]
    fn test_args_pin_precision_device_and_length() {
        let args = session(ComputeDevice::Cuda, 512).command_args(Path::new("/tmp/p.png"));
        assert_eq!(flag_value(&args, "--dtype").as_deref(), Some("f32"));
        assert_eq!(flag_value(&args, "--device").as_deref(), Some("cuda"));
        assert_eq!(flag_value(&args, "--max-new-tokens").as_deref(), Some("512"));
        assert_eq!(flag_value(&args, "--image").as_deref(), Some("/tmp/p.png"));
        assert_eq!(flag_value(&args, "--prompt").as_deref(), Some(OCR_PROMPT));
    }

    #[test]
    fn test_args_never_enable_sampling() {
        let args = session(ComputeDevice::Cpu, 1024).command_args(Path::new("x.png"));
        assert!(!args.iter().any(|a| a == "--do-sample"));
    }

    #[test]
    fn test_explicit_device_preference_wins() {
        assert_eq!(select_device(DevicePreference::Cpu), ComputeDevice::Cpu);
        assert_eq!(select_device(DevicePreference::Cuda), ComputeDevice::Cuda);
        assert_eq!(select_device(DevicePreference::Metal), ComputeDevice::Metal);
    }

    #[test]
    fn test_device_preference_parsing() {
        assert_eq!("AUTO".parse::<DevicePreference>(), Ok(DevicePreference::Auto));
        assert_eq!("mps".parse::<DevicePreference>(), Ok(DevicePreference::Metal));
        assert_eq!("cuda".parse::<DevicePreference>(), Ok(DevicePreference::Cuda));
        assert!("tpu".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_initialize_fails_without_binary() {
        let config = DeepSeekConfig {
            binary: PathBuf::from("/nonexistent/bin/deepseek-ocr-cli"),
            ..Default::default()
        };
        assert!(matches!(
            DeepSeekExtractor::initialize(config),
            Err(OcrError::BackendNotAvailable(_))
        ));
    }

    #[test]
    fn test_config_deserializes_device() {
        let config: DeepSeekConfig =
            toml::from_str("device = \"cuda\"\nmax_new_tokens = 256").unwrap();
        assert_eq!(config.device, DevicePreference::Cuda);
        assert_eq!(config.max_new_tokens, 256);
        assert_eq!(config.model, "deepseek-ocr");
        assert_eq!(config.timeout_secs, 300);
    }

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_infer_returns_trimmed_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(ComputeDevice::Cpu, 16);
        s.binary = script(dir.path(), "fake-ocr", "echo '  invoice Ex1 paid  '");
        assert_eq!(s.infer(Path::new("x.png")).unwrap(), "invoice Ex1 paid");
    }

    #[cfg(unix)]
    #[test]
    fn test_infer_reports_engine_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(ComputeDevice::Cpu, 16);
        s.binary = script(dir.path(), "broken-ocr", "echo 'model load failed' >&2; exit 3");
        match s.infer(Path::new("x.png")) {
            Err(OcrError::OcrFailed(msg)) => assert!(msg.contains("model load failed")),
            other => panic!("expected OcrFailed, got {:?}", other),
        }
    }

    #[cfg(unix)]
    fn config_with(binary: PathBuf) -> DeepSeekConfig {
        DeepSeekConfig {
            binary,
            device: DevicePreference::Cpu,
            timeout_secs: 5,
            ..Default::default()
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_initialize_fails_when_model_cannot_load() {
        let dir = tempfile::tempdir().unwrap();
        let binary = script(
            dir.path(),
            "deepseek-ocr-cli",
            "echo 'error: failed to load model weights' >&2; exit 1",
        );
        match DeepSeekExtractor::initialize(config_with(binary)) {
            Err(OcrError::BackendNotAvailable(msg)) => {
                assert!(msg.contains("failed to load model weights"), "{}", msg);
                assert!(msg.contains("deepseek-ocr"), "{}", msg);
            }
            Err(e) => panic!("expected BackendNotAvailable, got {:?}", e),
            Ok(_) => panic!("initialize should fail when the model cannot load"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_initialize_runs_one_warm_up_inference() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.log");
        let args = dir.path().join("args.txt");
        let binary = script(
            dir.path(),
            "deepseek-ocr-cli",
            &format!(
                "echo call >> '{}'\necho \"$@\" > '{}'",
                log.display(),
                args.display()
            ),
        );
        let extractor = DeepSeekExtractor::initialize(config_with(binary)).unwrap();
        assert_eq!(extractor.device(), ComputeDevice::Cpu);

        let calls = std::fs::read_to_string(&log).unwrap();
        assert_eq!(calls.lines().count(), 1);
        let args = std::fs::read_to_string(&args).unwrap();
        assert!(args.contains("--device cpu"), "{}", args);
        assert!(args.contains("--dtype f32"), "{}", args);
    }

    #[cfg(unix)]
    #[test]
    fn test_initialize_fails_when_warm_up_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let binary = script(dir.path(), "deepseek-ocr-cli", "sleep 5");
        let mut config = config_with(binary);
        config.timeout_secs = 1;
        assert!(matches!(
            DeepSeekExtractor::initialize(config),
            Err(OcrError::BackendNotAvailable(_))
        ));
    }

    #[test]
    fn test_timeout_error_reports_sub_second_limits() {
        let err = OcrError::Timeout(Duration::from_millis(200));
        assert_eq!(err.to_string(), "OCR timed out after 200ms");
    }

    #[cfg(unix)]
    #[test]
    fn test_infer_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(ComputeDevice::Cpu, 16);
        s.binary = script(dir.path(), "slow-ocr", "sleep 5");
        s.timeout = Some(Duration::from_millis(200));
        assert!(matches!(
            s.infer(Path::new("x.png")),
            Err(OcrError::Timeout(_))
        ));
    }
}
