use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{
  ffi::OsStr,
  fs::read_to_string,
  path::{Path, PathBuf},
};

use crate::{
  Args,
  execute::Invocation,
  filter::{FilterRule, LineFilter},
  regression::RunError,
  registry::TestCase,
};

pub(crate) const OUTPUT_EXTENSION: &str = "out";
pub(crate) const GOLDEN_EXTENSION: &str = "golden";
pub(crate) const CONFIG_FILE: &str = "golden.toml";
pub(crate) const DEBUG_FILE: &str = "__debug__.toml";
/// Environment variable holding the absolute path the interpreter should write its trace to.
pub(crate) const ARTIFACT_ENV: &str = "GOLDEN_ARTIFACT";

const DEFAULT_PROGRAM: &str = "python";
const DEFAULT_ARGS: &str = "{{name}}.{{extension}}";
const DEFAULT_EXTENSION: &str = "txt";
const DEFAULT_ARTIFACT: &str = "out.trace";

/// Contents of `golden.toml`, every key optional.
#[derive(Default, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct FileConfig {
  program: Option<String>,
  args: Option<Vec<String>>,
  extension: Option<String>,
  artifact: Option<String>,
  envs: Option<IndexMap<String, String>>,
  #[serde(default)]
  filter: Vec<FilterRule>,
}

impl FileConfig {
  fn load(path: &Path) -> Result<Self, RunError> {
    let toml_str =
      read_to_string(path).map_err(|e| RunError::Io("read", path.to_path_buf(), e))?;
    toml::from_str::<Self>(&toml_str).map_err(|e| RunError::Toml(path.to_path_buf(), e))
  }
}

/// Settings after merging command line, config file and defaults.
#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct Config {
  pub(crate) rootdir: PathBuf,
  pub(crate) workdir: PathBuf,
  #[serde(skip_serializing_if = "Option::is_none")]
  source: Option<PathBuf>,
  pub(crate) program: String,
  pub(crate) extension: String,
  pub(crate) artifact: String,
  pub(crate) print_errs: bool,
  pub(crate) debug: bool,
  pub(crate) args: Vec<String>,
  filter: Vec<FilterRule>,
  pub(crate) envs: IndexMap<String, String>,
  #[serde(skip)]
  pub(crate) rootdir_abs: PathBuf,
  #[serde(skip)]
  pub(crate) line_filter: LineFilter,
}

impl Config {
  pub(crate) fn new(args: &Args) -> Result<Self, RunError> {
    let rootdir_abs = std::fs::canonicalize(&args.rootdir)
      .map_err(|e| RunError::Discovery(args.rootdir.clone(), e))?;
    let source = match &args.config {
      Some(path) => Some(path.clone()),
      None => Some(args.rootdir.join(CONFIG_FILE)).filter(|path| path.is_file()),
    };
    let file = match &source {
      Some(path) => FileConfig::load(path)?,
      None => FileConfig::default(),
    };
    let workdir = std::path::absolute(&args.workdir)
      .map_err(|e| RunError::Io("resolve", args.workdir.clone(), e))?;
    let extension = args
      .extension
      .clone()
      .or(file.extension)
      .unwrap_or_else(|| DEFAULT_EXTENSION.to_owned())
      .trim_start_matches('.')
      .to_owned();
    let config = Self {
      rootdir: args.rootdir.clone(),
      workdir,
      source,
      program: args
        .program
        .clone()
        .or(file.program)
        .unwrap_or_else(|| DEFAULT_PROGRAM.to_owned()),
      extension,
      artifact: args
        .artifact
        .clone()
        .or(file.artifact)
        .unwrap_or_else(|| DEFAULT_ARTIFACT.to_owned()),
      print_errs: args.print_errs,
      debug: args.debug,
      args: args
        .args
        .clone()
        .or(file.args)
        .unwrap_or_else(|| vec![DEFAULT_ARGS.to_owned()]),
      envs: file.envs.unwrap_or_default(),
      line_filter: {
        let rules = LineFilter::from_rules(file.filter.clone());
        match &args.filter {
          Some(custom) => rules.then(custom.clone()),
          None => rules,
        }
      },
      filter: file.filter,
      rootdir_abs,
    };
    config.check()?;
    Ok(config)
  }
  fn check(&self) -> Result<(), RunError> {
    if self.extension.is_empty() {
      return Err(RunError::Config("input extension can not be empty".into()));
    }
    if [OUTPUT_EXTENSION, GOLDEN_EXTENSION, "toml"].contains(&self.extension.as_str()) {
      return Err(RunError::Config(format!(
        "input extension can not be '{}'",
        self.extension
      )));
    }
    if self.program.is_empty() {
      return Err(RunError::Config("need to specify 'program'".into()));
    }
    let artifact = Path::new(&self.artifact);
    if artifact.file_name() != Some(artifact.as_os_str()) {
      return Err(RunError::Config(format!(
        "artifact \"{}\" must be a plain file name",
        self.artifact
      )));
    }
    // the scratch dir already holds the linked input and the saved streams
    if artifact
      .extension()
      .and_then(OsStr::to_str)
      .is_some_and(|ext| [self.extension.as_str(), "stdout", "stderr"].contains(&ext))
    {
      return Err(RunError::Config(format!(
        "artifact \"{}\" collides with the files of the scratch dir",
        self.artifact
      )));
    }
    if let Ok(workdir) = std::fs::canonicalize(&self.workdir) {
      if self.rootdir_abs.starts_with(&workdir) {
        return Err(RunError::Config(format!(
          "workdir \"{}\" can not contain rootdir \"{}\"",
          self.workdir.display(),
          self.rootdir.display()
        )));
      }
    }
    for rule in &self.filter {
      rule.validate().map_err(RunError::Config)?;
    }
    Ok(())
  }
  /// Scratch directory the interpreter runs in for `test`.
  pub(crate) fn scratch_dir(&self, test: &TestCase) -> PathBuf {
    self.workdir.join(test.relative())
  }
  pub(crate) fn eval(&self, test: &TestCase, artifact: &Path) -> Invocation {
    let input = self.rootdir_abs.join(test.relative());
    let rootdir = self.rootdir_abs.display().to_string();
    let eval_str = |s: &str| -> String {
      s.replace("{{extension}}", &self.extension)
        .replace("{{name}}", test.name())
        .replace("{{input}}", &input.display().to_string())
        .replace("{{rootdir}}", &rootdir)
    };
    let mut envs: IndexMap<String, String> =
      self.envs.iter().map(|(k, v)| (k.clone(), eval_str(v))).collect();
    envs.insert("name".to_owned(), test.name().to_owned());
    envs.insert("extension".to_owned(), self.extension.clone());
    envs.insert("rootdir".to_owned(), rootdir.clone());
    envs.insert(ARTIFACT_ENV.to_owned(), artifact.display().to_string());
    Invocation {
      program: eval_str(&self.program),
      args: self.args.iter().map(|arg| eval_str(arg)).collect(),
      envs,
    }
  }
  /// Resolved settings as TOML, written to the workdir in debug mode.
  pub(crate) fn to_toml(&self) -> Result<String, RunError> {
    toml::to_string(&self).map_err(RunError::Dump)
  }
}
