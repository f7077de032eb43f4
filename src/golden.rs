use std::{io, path::Path};

use similar::TextDiff;
use tracing::debug;

use crate::{
  filter::{LineFilter, Lines},
  regression::RunError,
};

/// Read `path` as byte lines that keep their terminators. Any encoding is accepted.
pub(crate) async fn read_lines(path: &Path) -> Result<Lines, RunError> {
  match tokio::fs::read(path).await {
    Ok(bytes) => Ok(split_lines(&bytes)),
    Err(e) if e.kind() == io::ErrorKind::NotFound => {
      Err(RunError::MissingPair(path.to_path_buf()))
    }
    Err(e) => Err(RunError::Io("read", path.to_path_buf(), e)),
  }
}

fn split_lines(bytes: &[u8]) -> Lines {
  bytes.split_inclusive(|b| *b == b'\n').map(<[u8]>::to_vec).collect()
}

pub(crate) async fn is_file(path: &Path) -> bool {
  tokio::fs::metadata(path).await.is_ok_and(|meta| meta.is_file())
}

/// `true` when the filtered golden and output lines are not identical.
/// Neither file is modified.
pub(crate) async fn differs(
  golden: &Path,
  output: &Path,
  filter: &LineFilter,
) -> Result<bool, RunError> {
  let output_lines = read_lines(output).await?;
  let golden_lines = read_lines(golden).await?;
  Ok(filter.apply(golden_lines) != filter.apply(output_lines))
}

/// Replace the golden file with the output file.
pub(crate) async fn clobber(golden: &Path, output: &Path) -> Result<(), RunError> {
  if !is_file(output).await {
    return Err(RunError::MissingPair(output.to_path_buf()));
  }
  debug!(from = %output.display(), to = %golden.display(), "clobber");
  tokio::fs::copy(output, golden)
    .await
    .map(|_| ())
    .map_err(|e| RunError::Io("copy", golden.to_path_buf(), e))
}

/// Filtered unified diff of a golden/output pair, empty when they agree.
pub(crate) async fn diff(
  golden: &Path,
  output: &Path,
  filter: &LineFilter,
) -> Result<String, RunError> {
  let golden_lines = filter.apply(read_lines(golden).await?);
  let output_lines = filter.apply(read_lines(output).await?);
  Ok(unified_diff(
    &golden_lines,
    &output_lines,
    &golden.display().to_string(),
    &output.display().to_string(),
  ))
}

/// Unified diff with three lines of context, labelled `from` and `to`.
/// Bytes that are not valid UTF-8 are rendered lossily.
pub fn unified_diff(golden: &[Vec<u8>], output: &[Vec<u8>], from: &str, to: &str) -> String {
  let old = golden.concat();
  let new = output.concat();
  let diff = TextDiff::from_lines(old.as_slice(), new.as_slice());
  diff.unified_diff().context_radius(3).header(from, to).to_string()
}
