use core::fmt;
use std::{
  io::{self, Write},
  path::PathBuf,
  process::{ExitCode, Termination},
  time::Instant,
};

use clap::CommandFactory;
use colored::Colorize;
use tracing::debug;

use crate::{
  Args,
  args::Mode,
  config::{Config, DEBUG_FILE},
  execute::execute,
  golden,
  registry::{Registry, TestCase},
};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
  #[error("walk \"{0}\": {1}")]
  Discovery(PathBuf, io::Error),
  #[error("test \"{input}\": interpreter did not write \"{artifact}\"")]
  MissingArtifact { input: PathBuf, artifact: PathBuf },
  #[error("file \"{0}\" does not exist")]
  MissingPair(PathBuf),
  #[error("unknown test \"{0}\"")]
  UnknownTest(String),
  #[error("file \"{0}\": {1}")]
  Toml(PathBuf, toml::de::Error),
  #[error("{0}")]
  Config(String),
  #[error("dump config: {0}")]
  Dump(toml::ser::Error),
  #[error("execute {0:?}: {1}")]
  Execute(Vec<String>, io::Error),
  #[error("{0} \"{1}\": {2}")]
  Io(&'static str, PathBuf, io::Error),
  #[error("write report: {0}")]
  Report(io::Error),
}

impl RunError {
  /// Process exit code of this failure category. `1` is left for content mismatches.
  pub fn exit_code(&self) -> u8 {
    match self {
      Self::Discovery(..) => 2,
      Self::MissingArtifact { .. } => 3,
      Self::MissingPair(_) => 4,
      Self::UnknownTest(_) => 5,
      Self::Toml(..) | Self::Config(_) => 6,
      Self::Execute(..) => 7,
      Self::Io(..) | Self::Dump(_) | Self::Report(_) => 8,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
  Ok,
  Failed,
  /// No golden file existed, the output became the golden file.
  New,
}

impl fmt::Display for State {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Ok => write!(f, "{}", "ok".green()),
      Self::Failed => write!(f, "{}", "FAILED".red()),
      Self::New => write!(f, "{}", "new".cyan()),
    }
  }
}

#[derive(Debug)]
enum Note {
  ContainsError { stderr_file: PathBuf, stderr: Option<String> },
  Clobber { output: PathBuf, golden: PathBuf },
}

impl fmt::Display for Note {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::ContainsError { stderr_file, stderr } => {
        write!(f, "  {} ({})", "CONTAINS ERROR".yellow(), stderr_file.display())?;
        if let Some(stderr) = stderr {
          for line in stderr.lines() {
            write!(f, "\n  | {line}")?;
          }
        }
        Ok(())
      }
      Self::Clobber { output, golden } => {
        write!(f, "  clobber {} => {}", output.display(), golden.display())
      }
    }
  }
}

/// Result of running one test.
#[derive(Debug)]
pub struct TestReport {
  input: PathBuf,
  state: State,
  notes: Vec<Note>,
}

impl TestReport {
  pub fn state(&self) -> State {
    self.state
  }
  pub fn contains_error(&self) -> bool {
    self.notes.iter().any(|note| matches!(note, Note::ContainsError { .. }))
  }
}

impl fmt::Display for TestReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "test {} ... {}", self.input.display(), self.state)?;
    for note in &self.notes {
      write!(f, "\n{note}")?;
    }
    Ok(())
  }
}

#[derive(Debug, Default)]
pub(crate) struct TestResult {
  count_ok: usize,
  count_new: usize,
  faileds: Vec<PathBuf>,
}

impl TestResult {
  fn push(&mut self, report: &TestReport) {
    match report.state {
      State::Ok => self.count_ok += 1,
      State::New => self.count_new += 1,
      State::Failed => self.faileds.push(report.input.clone()),
    }
  }
}

#[derive(Debug)]
pub(crate) enum Outcome {
  Tested(TestResult),
  /// Number of pairs that differ.
  Diffed(usize),
  Clobbered(usize),
  Help,
}

pub struct TestExitCode(Result<Outcome, RunError>, Instant);

impl TestExitCode {
  pub fn code(&self) -> u8 {
    match &self.0 {
      Ok(Outcome::Tested(result)) if !result.faileds.is_empty() => 1,
      Ok(_) => 0,
      Err(e) => e.exit_code(),
    }
  }
  pub fn error(&self) -> Option<&RunError> {
    self.0.as_ref().err()
  }
  /// Inputs of the tests whose output differed from their golden file.
  pub fn failed(&self) -> &[PathBuf] {
    match &self.0 {
      Ok(Outcome::Tested(result)) => &result.faileds,
      _ => &[],
    }
  }
}

impl Termination for TestExitCode {
  fn report(self) -> ExitCode {
    let code = self.code();
    let time = self.1.elapsed().as_secs_f32();
    match self.0 {
      Ok(Outcome::Tested(TestResult { count_ok, count_new, faileds })) => {
        println!();
        let failed_num = faileds.len();
        if failed_num == 0 {
          println!(
            "test result: {}. {count_ok} passed; {failed_num} failed; {count_new} new; finished in {time:.2}s",
            State::Ok
          );
        } else {
          eprintln!("failures:");
          for failed in &faileds {
            eprintln!("    {}", failed.display());
          }
          eprintln!("\nrerun with `--difftest <NAME>` to see the differences");
          eprintln!(
            "\ntest result: {}. {count_ok} passed; {failed_num} failed; {count_new} new; finished in {time:.2}s",
            State::Failed
          );
        }
      }
      Ok(Outcome::Diffed(count)) => debug!(count, "pairs differ"),
      Ok(Outcome::Clobbered(count)) => debug!(count, "golden files clobbered"),
      Ok(Outcome::Help) => {}
      Err(e) => eprintln!("{}: {e}", "error".red()),
    }
    ExitCode::from(code)
  }
}

/// Discovered tests plus the settings to run them with.
pub struct Runner {
  config: Config,
  registry: Registry,
}

impl Runner {
  /// Resolve `args` and discover the tests. The workdir is never searched.
  pub async fn new(args: &Args) -> Result<Self, RunError> {
    let config = Config::new(args)?;
    let skip: Vec<_> =
      tokio::fs::canonicalize(&config.workdir).await.into_iter().collect();
    let registry = Registry::discover(&config.rootdir, &config.extension, &skip).await?;
    Ok(Self { config, registry })
  }
  pub fn registry(&self) -> &Registry {
    &self.registry
  }
  /// Execute `test` and compare its output with the golden file.
  /// A missing golden file is created from the output.
  pub async fn run_test(
    &self,
    test: &TestCase,
    clobber: bool,
  ) -> Result<TestReport, RunError> {
    let output = test.output();
    let golden = test.golden();
    if golden::is_file(&output).await {
      tokio::fs::remove_file(&output)
        .await
        .map_err(|e| RunError::Io("remove", output.clone(), e))?;
    }
    let execution = execute(&self.config, test).await?;
    let mut notes = Vec::new();
    if !execution.stderr.is_empty() {
      notes.push(Note::ContainsError {
        stderr_file: execution.stderr_file,
        stderr: self
          .config
          .print_errs
          .then(|| String::from_utf8_lossy(&execution.stderr).into_owned()),
      });
    }
    let state = if golden::is_file(&golden).await {
      let state = if golden::differs(&golden, &output, &self.config.line_filter).await? {
        State::Failed
      } else {
        State::Ok
      };
      if clobber {
        golden::clobber(&golden, &output).await?;
        notes.push(Note::Clobber { output, golden });
      }
      state
    } else {
      golden::clobber(&golden, &output).await?;
      notes.push(Note::Clobber { output, golden });
      State::New
    };
    Ok(TestReport { input: test.input().to_path_buf(), state, notes })
  }
  /// Run every test in discovery order. Mismatches never stop the batch.
  pub(crate) async fn run_all(&self, clobber: bool) -> Result<TestResult, RunError> {
    let mut result = TestResult::default();
    for test in &self.registry {
      let report = self.run_test(test, clobber).await?;
      println!("{report}");
      result.push(&report);
    }
    Ok(result)
  }
  /// Write the unified diff of `test`'s golden/output pair to `out`.
  /// Returns whether they differ.
  pub async fn diff_test<W: Write>(
    &self,
    test: &TestCase,
    out: &mut W,
  ) -> Result<bool, RunError> {
    let diff =
      golden::diff(&test.golden(), &test.output(), &self.config.line_filter).await?;
    if diff.is_empty() {
      return Ok(false);
    }
    // blank line between consecutive diffs
    writeln!(out).and_then(|()| write!(out, "{diff}")).map_err(RunError::Report)?;
    Ok(true)
  }
  pub async fn diff_all<W: Write>(&self, out: &mut W) -> Result<usize, RunError> {
    let mut count = 0;
    for test in &self.registry {
      if self.diff_test(test, out).await? {
        count += 1;
      }
    }
    Ok(count)
  }
  /// Accept every existing output as the new golden file without running anything.
  pub async fn clobber_all(&self) -> Result<usize, RunError> {
    for test in &self.registry {
      let (output, golden) = (test.output(), test.golden());
      golden::clobber(&golden, &output).await?;
      println!("{}", Note::Clobber { output, golden });
    }
    Ok(self.registry.len())
  }
  async fn write_debug(&self) -> Result<(), RunError> {
    if !self.config.debug {
      return Ok(());
    }
    let path = self.config.workdir.join(DEBUG_FILE);
    tokio::fs::create_dir_all(&self.config.workdir)
      .await
      .map_err(|e| RunError::Io("create dir", self.config.workdir.clone(), e))?;
    tokio::fs::write(&path, self.config.to_toml()?)
      .await
      .map_err(|e| RunError::Io("write", path, e))
  }
}

impl Args {
  pub async fn test(self) -> TestExitCode {
    let now = Instant::now();
    TestExitCode(_test(self).await, now)
  }
}

async fn _test(args: Args) -> Result<Outcome, RunError> {
  let mode = args.mode();
  if mode == Mode::Help {
    Args::command().print_help().map_err(RunError::Report)?;
    return Ok(Outcome::Help);
  }
  let runner = Runner::new(&args).await?;
  match mode {
    Mode::RunAll { clobber } => {
      if clobber {
        println!("Running all tests and clobbering results ...");
      } else {
        println!("Running all tests ...");
      }
      runner.write_debug().await?;
      runner.run_all(clobber).await.map(Outcome::Tested)
    }
    Mode::DiffAll => runner.diff_all(&mut io::stdout()).await.map(Outcome::Diffed),
    Mode::DiffTest(name) => {
      let test = runner.registry.get(&name)?;
      runner
        .diff_test(test, &mut io::stdout())
        .await
        .map(|differs| Outcome::Diffed(usize::from(differs)))
    }
    Mode::RunTest { name, clobber } => {
      let test = runner.registry.get(&name)?;
      runner.write_debug().await?;
      let report = runner.run_test(test, clobber).await?;
      println!("{report}");
      let mut result = TestResult::default();
      result.push(&report);
      Ok(Outcome::Tested(result))
    }
    Mode::OnlyClobber => runner.clobber_all().await.map(Outcome::Clobbered),
    Mode::Help => Ok(Outcome::Help),
  }
}
