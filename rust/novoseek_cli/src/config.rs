use novoseek::{
    InferenceConfig,
    NovoSeekError,
};
use novoseek::oracle::ModelConfig;
use novoseek::results::{
    OutputFormat,
    default_output_path,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::path::{
    Path,
    PathBuf,
};

use crate::cli::Cli;
use crate::errors::CliError;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub input: Option<InputConfig>,
    pub inference: InferenceConfig,
    pub model: ModelConfig,
    pub output: Option<OutputConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InputConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub knapsack_path: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutputConfig {
    /// Output file, or a directory to write `predictions.csv` into.
    pub path: PathBuf,
    #[serde(default = "default_row_group_size")]
    pub row_group_size: usize,
}

fn default_row_group_size() -> usize {
    20_000
}

impl OutputConfig {
    pub fn resolved_path(&self) -> PathBuf {
        let is_file = self.path.extension().is_some() && !self.path.is_dir();
        if is_file {
            self.path.clone()
        } else {
            default_output_path(&self.path, OutputFormat::Csv)
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, CliError> {
        let file = std::fs::File::open(path).map_err(|e| CliError::io(e, path))?;
        serde_json::from_reader(file).map_err(|e| CliError::ParseError { msg: e.to_string() })
    }

    /// Applies command line overrides on top of the file configuration,
    /// then checks the result for contradictions before any heavy setup.
    pub fn with_cli_args(mut self, args: &Cli) -> Result<Self, CliError> {
        if let Some(input) = &args.input {
            let knapsack_path = self.input.take().and_then(|x| x.knapsack_path);
            self.input = Some(InputConfig {
                path: input.clone(),
                knapsack_path,
            });
        }
        if let Some(ks_path) = &args.knapsack_path {
            match self.input.as_mut() {
                Some(input) => input.knapsack_path = Some(ks_path.clone()),
                None => {
                    return Err(CliError::Config(
                        "A knapsack path was given but no input".to_string(),
                    ));
                }
            }
        }
        if let Some(output) = &args.output {
            let row_group_size = self
                .output
                .as_ref()
                .map(|x| x.row_group_size)
                .unwrap_or_else(default_row_group_size);
            self.output = Some(OutputConfig {
                path: output.clone(),
                row_group_size,
            });
        }
        if let Some(num_beams) = args.num_beams {
            self.inference.num_beams = num_beams;
        }
        if args.refine {
            self.inference.refine = true;
        }
        if args.no_refine {
            self.inference.refine = false;
        }
        if args.with_targets {
            self.inference.denovo = false;
        }

        if self.input.is_none() {
            return Err(CliError::Config(
                "No input provided, please provide one in either the config file or with the --input flag".to_string(),
            ));
        }
        if self.output.is_none() {
            return Err(CliError::Config(
                "No output provided, please provide one in either the config file or with the --output flag".to_string(),
            ));
        }
        self.inference
            .validate(self.model.max_supported_charge)
            .map_err(NovoSeekError::from)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_partial_config_uses_defaults() {
        let conf: Config = serde_json::from_str(
            r#"{"input": {"path": "spectra.ndjson"}, "inference": {"num_beams": 5}}"#,
        )
        .unwrap();
        assert_eq!(conf.inference.num_beams, 5);
        assert_eq!(conf.inference.max_length, InferenceConfig::default().max_length);
        assert_eq!(conf.model, ModelConfig::default());
        assert!(conf.output.is_none());
    }

    #[test]
    fn test_cli_overrides() {
        let args = Cli::parse_from([
            "novoseek",
            "--input",
            "a.msgpack",
            "--output",
            "out/preds.parquet",
            "-b",
            "4",
            "--refine",
            "--with-targets",
        ]);
        let conf = Config::default().with_cli_args(&args).unwrap();
        assert_eq!(conf.input.unwrap().path, PathBuf::from("a.msgpack"));
        assert_eq!(conf.inference.num_beams, 4);
        assert!(conf.inference.refine);
        assert!(!conf.inference.denovo);
        let output = conf.output.unwrap();
        assert_eq!(output.resolved_path(), PathBuf::from("out/preds.parquet"));
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let args = Cli::parse_from(["novoseek", "--output", "out"]);
        assert!(Config::default().with_cli_args(&args).is_err());
    }

    #[test]
    fn test_unsupported_charge_fails_before_setup() {
        let args = Cli::parse_from(["novoseek", "--input", "a.ndjson", "--output", "out"]);
        let mut conf = Config::default();
        conf.inference.max_charge = conf.model.max_supported_charge + 1;
        let err = conf.with_cli_args(&args).unwrap_err();
        assert!(matches!(err, CliError::NovoSeek(NovoSeekError::Config(_))));
    }

    #[test]
    fn test_output_directory_gets_default_name() {
        let output = OutputConfig {
            path: PathBuf::from("some_dir"),
            row_group_size: 10,
        };
        assert_eq!(
            output.resolved_path(),
            PathBuf::from("some_dir").join("predictions.csv")
        );
    }
}
