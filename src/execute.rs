use std::{
  io,
  os::unix::process::ExitStatusExt,
  path::{Path, PathBuf},
  process::{ExitStatus, Output},
};

use indexmap::IndexMap;
use nix::sys::signal::Signal;
use tokio::{
  fs::{
    copy, create_dir_all, metadata, remove_dir_all, remove_file, rename, symlink_metadata,
    write,
  },
  process::Command,
};
use tracing::{debug, warn};

use crate::{config::Config, registry::TestCase, regression::RunError};

/// Fully evaluated interpreter command for one test.
#[derive(Debug)]
pub(crate) struct Invocation {
  pub(crate) program: String,
  pub(crate) args: Vec<String>,
  pub(crate) envs: IndexMap<String, String>,
}

impl Invocation {
  fn command_line(&self) -> Vec<String> {
    let mut v = vec![self.program.clone()];
    v.extend(self.args.iter().cloned());
    v
  }
}

/// What the interpreter left behind besides the relocated artifact.
#[derive(Debug)]
pub(crate) struct Execution {
  pub(crate) stderr: Vec<u8>,
  pub(crate) stderr_file: PathBuf,
}

/// Run the interpreter on `test` inside its own scratch directory and move
/// the artifact it wrote to the test's output file.
pub(crate) async fn execute(
  config: &Config,
  test: &TestCase,
) -> Result<Execution, RunError> {
  let scratch = config.scratch_dir(test);
  prepare_dir(&scratch, &config.rootdir_abs.join(test.relative())).await?;
  let artifact = scratch.join(&config.artifact);
  let invocation = config.eval(test, &artifact);
  debug!(
    test = %test.input().display(),
    cmd = ?invocation.command_line(),
    dir = %scratch.display(),
    "execute"
  );
  let output = Command::new(&invocation.program)
    .current_dir(&scratch)
    .args(&invocation.args)
    .envs(&invocation.envs)
    .output()
    .await
    .map_err(|e| RunError::Execute(invocation.command_line(), e))?;
  check_status(test, output.status);
  let stderr_file = save_output(&scratch, test.name(), &output).await?;
  // the linked input is a symlink and never counts as the artifact
  match symlink_metadata(&artifact).await {
    Ok(meta) if meta.is_file() => {}
    _ => {
      let input = test.input().to_path_buf();
      return Err(RunError::MissingArtifact { input, artifact });
    }
  }
  relocate(&artifact, &test.output()).await?;
  Ok(Execution { stderr: output.stderr, stderr_file })
}

async fn prepare_dir(scratch: &Path, input: &Path) -> Result<(), RunError> {
  if metadata(scratch).await.is_ok() {
    remove_dir_all(scratch)
      .await
      .map_err(|e| RunError::Io("clean dir", scratch.to_path_buf(), e))?;
  }
  create_dir_all(scratch)
    .await
    .map_err(|e| RunError::Io("create dir", scratch.to_path_buf(), e))?;
  if let Some(file_name) = input.file_name() {
    let link = scratch.join(file_name);
    tokio::fs::symlink(input, &link)
      .await
      .map_err(|e| RunError::Io("link", link, e))?;
  }
  Ok(())
}

/// The exit status is advisory, only the artifact decides whether a run produced output.
fn check_status(test: &TestCase, status: ExitStatus) {
  match (status.code(), status.signal()) {
    (Some(0), _) => {}
    (Some(code), _) => {
      warn!(test = %test.input().display(), code, "interpreter exited with failure");
    }
    (None, Some(signal)) => {
      let signal = Signal::try_from(signal).map(Signal::as_str).unwrap_or("unknown");
      warn!(test = %test.input().display(), signal, "interpreter killed by a signal");
    }
    (None, None) => {}
  }
}

async fn save_output(
  scratch: &Path,
  name: &str,
  output: &Output,
) -> Result<PathBuf, RunError> {
  let stdout = scratch.join(format!("{name}.stdout"));
  let stderr = scratch.join(format!("{name}.stderr"));
  write(&stdout, &output.stdout)
    .await
    .map_err(|e| RunError::Io("write", stdout, e))?;
  write(&stderr, &output.stderr)
    .await
    .map_err(|e| RunError::Io("write", stderr.clone(), e))?;
  Ok(stderr)
}

async fn relocate(artifact: &Path, output: &Path) -> Result<(), RunError> {
  debug!(from = %artifact.display(), to = %output.display(), "relocate artifact");
  match rename(artifact, output).await {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
      copy(artifact, output)
        .await
        .map_err(|e| RunError::Io("copy", output.to_path_buf(), e))?;
      remove_file(artifact)
        .await
        .map_err(|e| RunError::Io("remove", artifact.to_path_buf(), e))
    }
    Err(e) => Err(RunError::Io("rename", artifact.to_path_buf(), e)),
  }
}
