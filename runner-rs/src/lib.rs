//! Run protocol for scenario tools.
//!
//! A run is described by one JSON document:
//!
//! ```json
//! {
//!   "input":  { "seed": 42, "replicate": 0, ...scenario fields },
//!   "model":  { "files": { "age_distribution": "ages.json", "severity": "severity.toml" } },
//!   "output": { "spec": "filesystem", "dir": "out/" }
//! }
//! ```
//!
//! The document arrives on stdin, or is assembled from individual files with
//! [`Environment::from_paths`].

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Key of the age-distribution dataset in `model.files`.
pub const AGE_DISTRIBUTION_FILE: &str = "age_distribution";
/// Key of the severity dataset in `model.files`.
pub const SEVERITY_FILE: &str = "severity";

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing input: {0}")]
    MissingInput(String),
}

pub type Result<T> = std::result::Result<T, RunnerError>;

/// Reads a JSON document, or TOML when the file has a `.toml` extension.
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .map_err(|e| io::Error::new(e.kind(), format!("{}: {e}", path.display())))?;
    if path.extension().is_some_and(|ext| ext == "toml") {
        Ok(toml::from_str(&raw)?)
    } else {
        Ok(serde_json::from_str(&raw)?)
    }
}

pub struct Environment<I = ()> {
    input_json: Map<String, Value>,
    pub input: Option<I>,
    /// Explicit seed from the input document, if any
    pub seed: Option<u64>,
    pub replicate: u64,
    pub files: HashMap<String, PathBuf>,
    output: Value,
}

impl Environment {
    pub fn from_json(data: Value) -> Self {
        let mut input_json = data
            .get("input")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        let seed = input_json.remove("seed").and_then(|v| v.as_u64());

        let replicate = input_json
            .remove("replicate")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let files = data
            .get("model")
            .and_then(|m| m.get("files"))
            .and_then(|f| f.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), PathBuf::from(s))))
                    .collect()
            })
            .unwrap_or_default();

        let output = data.get("output").cloned().unwrap_or(Value::Null);

        Self {
            input_json,
            input: None,
            seed,
            replicate,
            files,
            output,
        }
    }

    pub fn from_stdin() -> Result<Self> {
        let mut raw = String::new();
        io::stdin().read_to_string(&mut raw)?;
        if raw.trim().is_empty() {
            return Err(RunnerError::MissingInput("no input on stdin".to_string()));
        }
        let data: Value = serde_json::from_str(&raw)?;
        Ok(Self::from_json(data))
    }

    /// Assembles a run document from a scenario file, optional dataset files
    /// and an optional output file. Without `out` the result goes to stdout.
    pub fn from_paths(
        scenario: &Path,
        age_distribution: Option<&Path>,
        severity: Option<&Path>,
        out: Option<&Path>,
    ) -> Result<Self> {
        log::info!("Reading scenario from {}", scenario.display());
        let input: Value = read_document(scenario)?;
        if !input.is_object() {
            return Err(RunnerError::MissingInput(format!(
                "{} does not contain a scenario table",
                scenario.display()
            )));
        }

        let files: Map<String, Value> = [
            (AGE_DISTRIBUTION_FILE, age_distribution),
            (SEVERITY_FILE, severity),
        ]
        .into_iter()
        .filter_map(|(key, path)| {
            path.map(|p| (key.to_string(), Value::from(p.to_string_lossy().into_owned())))
        })
        .collect();

        let output = match out {
            Some(path) => json!({ "spec": "filesystem", "file": path.to_string_lossy() }),
            None => json!({ "spec": "stdout" }),
        };

        Ok(Self::from_json(json!({
            "input": input,
            "model": { "files": files },
            "output": output,
        })))
    }

    pub fn with_input_type<I: DeserializeOwned>(self) -> Result<Environment<I>> {
        let input_value = Value::Object(self.input_json.clone());
        let input = serde_json::from_value(input_value)?;
        Ok(Environment {
            input_json: self.input_json,
            input: Some(input),
            seed: self.seed,
            replicate: self.replicate,
            files: self.files,
            output: self.output,
        })
    }
}

impl<I: DeserializeOwned> Environment<I> {
    pub fn load() -> Result<Self> {
        Environment::from_stdin()?.with_input_type::<I>()
    }
}

impl<I> Environment<I> {
    pub fn input_json(&self) -> &Map<String, Value> {
        &self.input_json
    }

    fn input_bytes(&self) -> Vec<u8> {
        // keys are sorted, so the text is canonical for a given input
        Value::Object(self.input_json.clone()).to_string().into_bytes()
    }

    /// Hex SHA-256 of the input, excluding `seed` and `replicate`.
    pub fn input_digest(&self) -> String {
        hex::encode(Sha256::digest(self.input_bytes()))
    }

    /// The explicit seed, or one derived from the input digest so that the
    /// same input always samples the same ensemble.
    pub fn resolved_seed(&self) -> u64 {
        self.seed.unwrap_or_else(|| {
            let digest = Sha256::digest(self.input_bytes());
            let mut head = [0u8; 8];
            head.copy_from_slice(&digest[..8]);
            u64::from_be_bytes(head)
        })
    }

    /// Loads the dataset registered under `key`, if one was given.
    pub fn load_file<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.files.get(key) {
            Some(path) => {
                log::info!("Reading {key} from {}", path.display());
                read_document(path).map(Some)
            }
            None => Ok(None),
        }
    }

    fn filesystem_output(&self) -> Option<&Value> {
        let output = &self.output;

        // Check flat output
        if output.get("spec").and_then(|v| v.as_str()) == Some("filesystem") {
            return Some(output);
        }

        // Check profiled output; resolve default profile
        let profiles = output.get("profile").and_then(|v| v.as_object())?;
        let profile = profiles
            .get("default")
            .or_else(|| profiles.values().next())?;
        (profile.get("spec").and_then(|v| v.as_str()) == Some("filesystem")).then_some(profile)
    }

    pub fn output_dir(&self) -> Option<PathBuf> {
        self.filesystem_output()?
            .get("dir")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
    }

    pub fn output_file(&self) -> Option<PathBuf> {
        self.filesystem_output()?
            .get("file")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
    }

    /// Destination of the main result: the output file, or `default_name`
    /// inside the output directory. `None` means stdout.
    pub fn output_path(&self, default_name: &str) -> Option<PathBuf> {
        self.output_file()
            .or_else(|| self.output_dir().map(|dir| dir.join(default_name)))
    }

    /// Destination of a secondary artifact: inside the output directory when
    /// there is one, otherwise `name` as given. Artifacts never go to stdout,
    /// which carries the main result.
    fn artifact_path(&self, name: &Path) -> PathBuf {
        match self.output_dir() {
            Some(dir) => dir.join(name),
            None => name.to_path_buf(),
        }
    }

    fn create_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    pub fn write(&self, filename: &str, data: &[u8]) -> Result<()> {
        if let Some(path) = self.output_path(filename) {
            Self::create_parent(&path)?;
            log::info!("Writing output to {}", path.display());
            fs::write(path, data)?;
        } else {
            io::stdout().write_all(data)?;
        }
        Ok(())
    }

    pub fn write_json<T: Serialize>(&self, filename: &str, value: &T) -> Result<()> {
        let data = serde_json::to_vec(value)?;
        self.write(filename, &data)
    }

    pub fn write_csv(
        &self,
        filename: impl AsRef<Path>,
        headers: &[&str],
        rows: &[Vec<String>],
    ) -> Result<()> {
        let path = self.artifact_path(filename.as_ref());
        Self::create_parent(&path)?;
        log::info!("Writing {} rows to {}", rows.len(), path.display());
        write_records(fs::File::create(path)?, headers, rows)
    }
}

fn write_records(file: fs::File, headers: &[&str], rows: &[Vec<String>]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(file);
    wtr.write_record(headers)?;
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(())
}
