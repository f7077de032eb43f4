use clap::Parser;
use std::{
  ffi::OsString,
  path::{Path, PathBuf},
};
use tracing_subscriber::EnvFilter;

use crate::filter::LineFilter;

#[derive(Debug, Parser)]
#[command(
  version,
  about = "Run input scripts through an interpreter and compare the traces with golden files"
)]
pub struct Args {
  #[clap(long, help = "Run all tests")]
  pub(crate) all: bool,
  #[clap(long, help = "Diff against golden for all tests")]
  pub(crate) diffall: bool,
  #[clap(long, value_name = "NAME", help = "Diff against golden for one test")]
  pub(crate) difftest: Option<String>,
  #[clap(long, value_name = "NAME", help = "Run one test")]
  pub(crate) test: Option<String>,
  #[clap(long, help = "Clobber ALL golden files WITHOUT re-running tests")]
  pub(crate) only_clobber: bool,
  #[clap(long, help = "Clobber golden files when running tests")]
  pub(crate) clobber: bool,
  #[clap(long, help = "Interpreter executable [default: python]")]
  pub(crate) program: Option<String>,
  #[clap(
    long,
    num_args = 1..,
    allow_hyphen_values = true,
    help = "Interpreter arguments, put it last [default: {{name}}.{{extension}}]"
  )]
  pub(crate) args: Option<Vec<String>>,
  #[clap(long, help = "Input extension [default: txt]")]
  pub(crate) extension: Option<String>,
  #[clap(long, help = "Trace file written by the interpreter [default: out.trace]")]
  pub(crate) artifact: Option<String>,
  #[clap(long, help = "Directory holding one scratch dir per test", default_value = "./tmp")]
  pub(crate) workdir: PathBuf,
  #[clap(long, help = "Config file [default: <ROOTDIR>/golden.toml if present]")]
  pub(crate) config: Option<PathBuf>,
  #[clap(long, help = "Print the interpreter's stderr when it is not empty")]
  pub(crate) print_errs: bool,
  #[clap(long, help = "Debug logging, dump resolved config into workdir")]
  pub(crate) debug: bool,
  #[clap(value_parser, default_value = ".")]
  pub(crate) rootdir: PathBuf,
  #[clap(skip)]
  pub(crate) filter: Option<LineFilter>,
}

/// What a single invocation does. The first matching flag wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Mode {
  RunAll { clobber: bool },
  DiffAll,
  DiffTest(String),
  RunTest { name: String, clobber: bool },
  OnlyClobber,
  Help,
}

impl Args {
  pub const fn run_all(mut self) -> Self {
    self.all = true;
    self
  }
  pub const fn clobber(mut self) -> Self {
    self.clobber = true;
    self
  }
  pub const fn diff_all(mut self) -> Self {
    self.diffall = true;
    self
  }
  pub const fn only_clobber(mut self) -> Self {
    self.only_clobber = true;
    self
  }
  pub const fn debug(mut self) -> Self {
    self.debug = true;
    self
  }
  pub const fn print_errs(mut self) -> Self {
    self.print_errs = true;
    self
  }
  /// Run the single test `name`.
  pub fn only(mut self, name: impl AsRef<str>) -> Self {
    self.test = Some(name.as_ref().into());
    self
  }
  /// Diff the single test `name`.
  pub fn diff(mut self, name: impl AsRef<str>) -> Self {
    self.difftest = Some(name.as_ref().into());
    self
  }
  pub fn program(mut self, program: impl AsRef<str>) -> Self {
    self.program = Some(program.as_ref().into());
    self
  }
  pub fn args(mut self, iter: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
    self.args = Some(iter.into_iter().map(|s| s.as_ref().into()).collect());
    self
  }
  pub fn extension(mut self, extension: impl AsRef<str>) -> Self {
    self.extension = Some(extension.as_ref().into());
    self
  }
  pub fn artifact(mut self, artifact: impl AsRef<str>) -> Self {
    self.artifact = Some(artifact.as_ref().into());
    self
  }
  pub fn workdir(mut self, dir: impl AsRef<Path>) -> Self {
    self.workdir = dir.as_ref().to_path_buf();
    self
  }
  pub fn config(mut self, path: impl AsRef<Path>) -> Self {
    self.config = Some(path.as_ref().to_path_buf());
    self
  }
  /// Normalize both golden and output lines with `filter` before comparing,
  /// after the `[[filter]]` rules of the config file.
  pub fn filter(mut self, filter: LineFilter) -> Self {
    self.filter = Some(filter);
    self
  }
  pub fn new(rootdir: impl AsRef<Path>) -> Self {
    <Self as Parser>::parse_from([Path::new(""), rootdir.as_ref()])
  }
  pub fn parse_from<I, T>(itr: I) -> Self
  where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
  {
    <Self as Parser>::parse_from(itr)
  }
  /// Install the stderr log subscriber, `RUST_LOG` takes precedence over `--debug`.
  pub fn init_tracing(&self) {
    let level = if self.debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
      .unwrap_or_else(|_| EnvFilter::new(format!("warn,golden_runner={level}")));
    let _ = tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .with_target(false)
      .try_init();
  }
  pub(crate) fn mode(&self) -> Mode {
    if self.all {
      Mode::RunAll { clobber: self.clobber }
    } else if self.diffall {
      Mode::DiffAll
    } else if let Some(name) = &self.difftest {
      Mode::DiffTest(name.clone())
    } else if let Some(name) = &self.test {
      Mode::RunTest { name: name.clone(), clobber: self.clobber }
    } else if self.only_clobber {
      Mode::OnlyClobber
    } else {
      Mode::Help
    }
  }
}
