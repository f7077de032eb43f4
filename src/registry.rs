use std::{
  ffi::{OsStr, OsString},
  path::{Path, PathBuf},
};

use itertools::{Either, Itertools};
use tracing::{debug, warn};

use crate::{
  config::{GOLDEN_EXTENSION, OUTPUT_EXTENSION},
  regression::RunError,
};

/// One input file together with the files derived from its base name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
  input: PathBuf,
  relative: PathBuf,
  name: String,
}

impl TestCase {
  pub(crate) fn new(input: PathBuf, relative: PathBuf) -> Self {
    let name = input
      .file_stem()
      .map(|stem| stem.to_string_lossy().into_owned())
      .unwrap_or_default();
    Self { input, relative, name }
  }
  /// Input path as discovered, i.e. prefixed by the root directory.
  pub fn input(&self) -> &Path {
    &self.input
  }
  /// Input path relative to the root directory.
  pub fn relative(&self) -> &Path {
    &self.relative
  }
  /// Base name shared by the input, output and golden files.
  pub fn name(&self) -> &str {
    &self.name
  }
  pub fn output(&self) -> PathBuf {
    self.input.with_extension(OUTPUT_EXTENSION)
  }
  pub fn golden(&self) -> PathBuf {
    self.input.with_extension(GOLDEN_EXTENSION)
  }
}

/// All tests found under the root directory, in discovery order.
#[derive(Debug)]
pub struct Registry {
  tests: Vec<TestCase>,
}

impl Registry {
  /// Walk `rootdir` following symlinks and collect every file with `extension`.
  /// Directories whose canonical path is in `skip` are not entered.
  pub(crate) async fn discover(
    rootdir: &Path,
    extension: &str,
    skip: &[PathBuf],
  ) -> Result<Self, RunError> {
    let mut tests = Vec::new();
    let mut ancestors = Vec::new();
    walk(
      rootdir.to_path_buf(),
      PathBuf::new(),
      OsStr::new(extension),
      skip,
      &mut ancestors,
      &mut tests,
    )
    .await?;
    debug!(count = tests.len(), root = %rootdir.display(), "discovered tests");
    Ok(Self { tests })
  }
  pub fn iter(&self) -> std::slice::Iter<'_, TestCase> {
    self.tests.iter()
  }
  pub fn len(&self) -> usize {
    self.tests.len()
  }
  pub fn is_empty(&self) -> bool {
    self.tests.is_empty()
  }
  /// Look up a test by its path relative to the root, or by the path it was discovered as.
  pub fn get(&self, name: &str) -> Result<&TestCase, RunError> {
    let wanted = Path::new(name);
    let wanted = wanted.strip_prefix(".").unwrap_or(wanted);
    self
      .tests
      .iter()
      .find(|test| {
        test.relative == wanted
          || test.input.strip_prefix(".").unwrap_or(test.input.as_path()) == wanted
      })
      .ok_or_else(|| RunError::UnknownTest(name.to_owned()))
  }
}

impl<'a> IntoIterator for &'a Registry {
  type Item = &'a TestCase;
  type IntoIter = std::slice::Iter<'a, TestCase>;

  fn into_iter(self) -> Self::IntoIter {
    self.iter()
  }
}

#[async_recursion::async_recursion]
async fn walk(
  current_path: PathBuf,
  relative: PathBuf,
  extension: &OsStr,
  skip: &[PathBuf],
  ancestors: &mut Vec<PathBuf>,
  tests: &mut Vec<TestCase>,
) -> Result<(), RunError> {
  let canonical = tokio::fs::canonicalize(&current_path)
    .await
    .map_err(|e| RunError::Discovery(current_path.clone(), e))?;
  if ancestors.contains(&canonical) {
    warn!(dir = %current_path.display(), "symlink loop, skipped");
    return Ok(());
  }
  if skip.contains(&canonical) {
    debug!(dir = %current_path.display(), "skipped");
    return Ok(());
  }
  let mut read_dir = tokio::fs::read_dir(&current_path)
    .await
    .map_err(|e| RunError::Discovery(current_path.clone(), e))?;
  let mut entries: Vec<(OsString, PathBuf, bool)> = Vec::new();
  while let Some(entry) = read_dir
    .next_entry()
    .await
    .map_err(|e| RunError::Discovery(current_path.clone(), e))?
  {
    let path = entry.path();
    // follows symlinks
    match tokio::fs::metadata(&path).await {
      Ok(meta) => entries.push((entry.file_name(), path, meta.is_dir())),
      Err(e) => {
        let dangling = tokio::fs::symlink_metadata(&path)
          .await
          .is_ok_and(|meta| meta.file_type().is_symlink());
        if dangling {
          warn!(path = %path.display(), "dangling symlink, skipped");
        } else {
          return Err(RunError::Discovery(path, e));
        }
      }
    }
  }
  entries.sort_by(|a, b| a.0.cmp(&b.0));
  let (sub_dirs, files): (Vec<_>, Vec<_>) =
    entries.into_iter().partition_map(|(file_name, path, is_dir)| {
      if is_dir { Either::Left((file_name, path)) } else { Either::Right((file_name, path)) }
    });
  tests.extend(
    files
      .into_iter()
      .filter(|(_, path)| path.extension() == Some(extension))
      .map(|(file_name, path)| TestCase::new(path, relative.join(file_name))),
  );
  ancestors.push(canonical);
  for (dir_name, path) in sub_dirs {
    walk(path, relative.join(dir_name), extension, skip, ancestors, tests).await?;
  }
  ancestors.pop();
  Ok(())
}
