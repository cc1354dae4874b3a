//! Command-line arguments and run configuration of the binaries.

use crate::cnn::IMAGE_LEN;
use crate::data::SplitConfig;
use crate::training::MethodConfig;
use burn::prelude::*;
use pico_args::Arguments;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const TRAIN_HELP: &str = "\
train-calo

Trains the calorimeter CNN on signal and background image trees, then tests
and evaluates it. Results are written as JSON with the ROC curve as SVG next
to them.

USAGE:
    train-calo [OPTIONS]

FLAGS:
    -h, --help                  Show this help message and exit

OPTIONS:
    -c, --config <PATH>         Load the training configuration from this file.
                                The options below override its values.
    -m, --model <DIR>           Untrained model artifact (see create-model)
    -t, --trained-model <DIR>   Where the best trained model is written
    -s, --signal <PATH>         Signal image tree (parquet)
    -b, --background <PATH>     Background image tree (parquet)
    -o, --output <PATH>         Results file, recreated on every run
        --save-config <PATH>    Write the resolved configuration to this file and exit
";

pub const CREATE_MODEL_HELP: &str = "\
create-model

Builds the untrained calorimeter CNN with binary cross-entropy and Adam, and
saves it as a model artifact directory.

USAGE:
    create-model [OPTIONS]

FLAGS:
    -h, --help                  Show this help message and exit

OPTIONS:
    -m, --model <DIR>           Artifact directory to write [default: build/model128by128]
    -c, --config <PATH>         Load the model configuration from this file instead of
                                the built-in architecture
";

pub const PROJECT_HELP: &str = "\
project-hits

Projects raw EPICAL-2 pixel hits (column, row, lane lists per event) onto a
quantized xy plane and writes one flattened image per event.

USAGE:
    project-hits --input <PATH> --output <PATH> [OPTIONS]

FLAGS:
    -h, --help                  Show this help message and exit

OPTIONS:
    -i, --input <PATH>          Raw hit tree (parquet)
    -o, --output <PATH>         Projected image tree (parquet), replaced if present
    -q, --quantization <N>      Image side in pixels [default: 128]
    -d, --display <EVENT>       Also draw the hits of this event (0-based) as
                                <output stem>_event<EVENT>.svg
";

fn default_job_name() -> String {
    "CNN_Classification".to_string()
}

fn default_method_name() -> String {
    "CNN".to_string()
}

fn default_branch() -> String {
    "vars".to_string()
}

pub fn default_model_dir() -> PathBuf {
    PathBuf::from("build/model128by128")
}

fn default_trained_model_dir() -> PathBuf {
    PathBuf::from("build/trained_model_128by128")
}

fn default_signal_path() -> PathBuf {
    PathBuf::from("data/processed/128by128_full/gps6_xyproj_hist.parquet")
}

fn default_background_path() -> PathBuf {
    PathBuf::from("data/processed/128by128_full/gps3_xyproj_hist.parquet")
}

fn default_output_path() -> PathBuf {
    PathBuf::from("results/128by128/CNN_ClassificationOutput.json")
}

/// Everything a training run needs.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = "default_job_name()")]
    pub job_name: String,
    #[config(default = "default_method_name()")]
    pub method_name: String,
    #[config(default = "default_model_dir()")]
    pub model_dir: PathBuf,
    #[config(default = "default_trained_model_dir()")]
    pub trained_model_dir: PathBuf,
    #[config(default = "default_signal_path()")]
    pub signal_path: PathBuf,
    #[config(default = "default_background_path()")]
    pub background_path: PathBuf,
    #[config(default = "default_output_path()")]
    pub output_path: PathBuf,
    /// Image branch of both trees.
    #[config(default = "default_branch()")]
    pub branch: String,
    #[config(default = "IMAGE_LEN")]
    pub image_len: usize,
    #[config(default = 1.0)]
    pub signal_weight: f32,
    #[config(default = 1.0)]
    pub background_weight: f32,
    /// Step size forced onto the untrained model before training.
    #[config(default = 0.001)]
    pub learning_rate: f64,
    /// `0` keeps the framework default.
    #[config(default = 0)]
    pub num_threads: usize,
    #[config(default = "SplitConfig::new()")]
    pub split: SplitConfig,
    #[config(default = "MethodConfig::new()")]
    pub method: MethodConfig,
}

#[derive(Debug)]
pub struct TrainArgs {
    pub help: bool,
    pub config: Option<PathBuf>,
    pub model: Option<PathBuf>,
    pub trained_model: Option<PathBuf>,
    pub signal: Option<PathBuf>,
    pub background: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub save_config: Option<PathBuf>,
}

impl TrainArgs {
    /// Parses the process arguments, printing the help and exiting on `--help`.
    pub fn parse() -> Result<Self, pico_args::Error> {
        let args = Self::from_args(std::env::args_os().skip(1).collect())?;
        if args.help {
            println!("{TRAIN_HELP}");
            std::process::exit(0);
        }
        Ok(args)
    }

    pub fn from_args(args: Vec<OsString>) -> Result<Self, pico_args::Error> {
        let mut pargs = Arguments::from_vec(args);
        let args = TrainArgs {
            config: pargs.opt_value_from_os_str(["-c", "--config"], parse_path)?,
            model: pargs.opt_value_from_os_str(["-m", "--model"], parse_path)?,
            trained_model: pargs.opt_value_from_os_str(["-t", "--trained-model"], parse_path)?,
            signal: pargs.opt_value_from_os_str(["-s", "--signal"], parse_path)?,
            background: pargs.opt_value_from_os_str(["-b", "--background"], parse_path)?,
            output: pargs.opt_value_from_os_str(["-o", "--output"], parse_path)?,
            save_config: pargs.opt_value_from_os_str("--save-config", parse_path)?,
            // must parse flags after values
            help: pargs.contains(["-h", "--help"]),
        };
        finish(pargs)?;
        Ok(args)
    }

    /// The configuration file (or the defaults) with the path options applied.
    pub fn training_config(&self) -> crate::Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => {
                log::info!("Loading training config from {path:?}");
                TrainingConfig::load(path)?
            }
            None => TrainingConfig::new(),
        };
        let overrides = [
            (&self.model, &mut config.model_dir),
            (&self.trained_model, &mut config.trained_model_dir),
            (&self.signal, &mut config.signal_path),
            (&self.background, &mut config.background_path),
            (&self.output, &mut config.output_path),
        ];
        for (arg, field) in overrides {
            if let Some(path) = arg {
                *field = path.clone();
            }
        }
        Ok(config)
    }
}

pub fn save_training_config(path: &Path, config: &TrainingConfig) -> crate::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    log::info!("Saving training config into {path:?}");
    config.save(path)?;
    Ok(())
}

#[derive(Debug)]
pub struct CreateModelArgs {
    pub help: bool,
    pub model: PathBuf,
    pub config: Option<PathBuf>,
}

impl CreateModelArgs {
    pub fn parse() -> Result<Self, pico_args::Error> {
        let args = Self::from_args(std::env::args_os().skip(1).collect())?;
        if args.help {
            println!("{CREATE_MODEL_HELP}");
            std::process::exit(0);
        }
        Ok(args)
    }

    pub fn from_args(args: Vec<OsString>) -> Result<Self, pico_args::Error> {
        let mut pargs = Arguments::from_vec(args);
        let args = CreateModelArgs {
            model: pargs
                .opt_value_from_os_str(["-m", "--model"], parse_path)?
                .unwrap_or_else(default_model_dir),
            config: pargs.opt_value_from_os_str(["-c", "--config"], parse_path)?,
            help: pargs.contains(["-h", "--help"]),
        };
        finish(pargs)?;
        Ok(args)
    }
}

#[derive(Debug)]
pub struct ProjectArgs {
    pub help: bool,
    pub input: PathBuf,
    pub output: PathBuf,
    pub quantization: usize,
    pub display: Option<usize>,
}

impl ProjectArgs {
    pub fn parse() -> Result<Self, pico_args::Error> {
        let args: Vec<OsString> = std::env::args_os().skip(1).collect();
        // checked first, the paths are required otherwise
        if args.iter().any(|a| a == "-h" || a == "--help") {
            println!("{PROJECT_HELP}");
            std::process::exit(0);
        }
        Self::from_args(args)
    }

    pub fn from_args(args: Vec<OsString>) -> Result<Self, pico_args::Error> {
        let mut pargs = Arguments::from_vec(args);
        let args = ProjectArgs {
            input: pargs.value_from_os_str(["-i", "--input"], parse_path)?,
            output: pargs.value_from_os_str(["-o", "--output"], parse_path)?,
            quantization: pargs
                .opt_value_from_str(["-q", "--quantization"])?
                .unwrap_or(crate::cnn::IMAGE_SIDE),
            display: pargs.opt_value_from_str(["-d", "--display"])?,
            help: pargs.contains(["-h", "--help"]),
        };
        finish(pargs)?;
        Ok(args)
    }
}

fn parse_path(s: &std::ffi::OsStr) -> Result<PathBuf, &'static str> {
    Ok(s.into())
}

fn finish(pargs: Arguments) -> Result<(), pico_args::Error> {
    let remaining = pargs.finish();
    if remaining.is_empty() {
        Ok(())
    } else {
        Err(pico_args::Error::ArgumentParsingFailed {
            cause: format!("unused arguments: {remaining:?}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn defaults_match_the_calorimeter_setup() {
        let config = TrainArgs::from_args(vec![]).unwrap().training_config().unwrap();
        assert_eq!(16384, config.image_len);
        assert_eq!("vars", config.branch);
        assert_eq!(0.001, config.learning_rate);
        assert_eq!(50, config.method.num_epochs);
        assert_eq!(100, config.method.batch_size);
        assert_eq!(20, config.method.tries_early_stopping);
        assert_eq!(0.8, config.split.train_fraction);
    }

    #[test]
    fn path_options_override_the_config_file() {
        let tmp = temp_dir::TempDir::new().unwrap();
        let path = tmp.path().join("training_config.json");
        let saved = TrainingConfig::new()
            .with_signal_path("sig.parquet".into())
            .with_num_threads(4);
        save_training_config(&path, &saved).unwrap();

        let parsed = TrainArgs::from_args(args(&[
            "--config",
            path.to_str().unwrap(),
            "-b",
            "other_bkg.parquet",
        ]))
        .unwrap();
        let config = parsed.training_config().unwrap();
        assert_eq!(PathBuf::from("sig.parquet"), config.signal_path);
        assert_eq!(PathBuf::from("other_bkg.parquet"), config.background_path);
        assert_eq!(4, config.num_threads);
    }

    #[test]
    fn unknown_arguments_are_rejected() {
        assert!(TrainArgs::from_args(args(&["--epochs", "3"])).is_err());
        assert!(ProjectArgs::from_args(args(&["-i", "raw.parquet"])).is_err());
    }

    #[test]
    fn projector_arguments() {
        let parsed =
            ProjectArgs::from_args(args(&["-i", "raw.parquet", "-o", "img.parquet", "-q", "32"]))
                .unwrap();
        assert_eq!(PathBuf::from("raw.parquet"), parsed.input);
        assert_eq!(32, parsed.quantization);
        assert_eq!(None, parsed.display);

        let parsed =
            ProjectArgs::from_args(args(&["-i", "raw.parquet", "-o", "img.parquet", "-d", "7"]))
                .unwrap();
        assert_eq!(Some(7), parsed.display);
        assert_eq!(crate::cnn::IMAGE_SIDE, parsed.quantization);

        let parsed = CreateModelArgs::from_args(vec![]).unwrap();
        assert_eq!(default_model_dir(), parsed.model);
    }
}
