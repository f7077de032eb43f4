use std::{
  fs,
  path::{Path, PathBuf},
};

use golden_runner::{Args, LineFilter, RunError, Runner, State};
use tempfile::TempDir;

/// Interpreter that traces its input verbatim.
const CAT: &str = "cat \"$1\" > out.trace";

struct Fixture {
  dir: TempDir,
}

impl Fixture {
  fn new() -> Self {
    let fixture = Self { dir: tempfile::tempdir().unwrap() };
    fs::create_dir_all(fixture.root()).unwrap();
    fixture
  }
  fn root(&self) -> PathBuf {
    self.dir.path().join("cases")
  }
  fn write(&self, file: &str, content: &str) {
    let path = self.root().join(file);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
  }
  fn read(&self, file: &str) -> String {
    fs::read_to_string(self.root().join(file)).unwrap()
  }
  fn exists(&self, file: &str) -> bool {
    self.root().join(file).exists()
  }
  fn args(&self, script: &str) -> Args {
    Args::new(self.root())
      .workdir(self.dir.path().join("tmp"))
      .program("sh")
      .args(["-c", script, "sh", "{{name}}.{{extension}}"])
  }
}

fn count_changes(diff: &str) -> (usize, usize) {
  let body = diff.lines().filter(|line| !line.starts_with("---") && !line.starts_with("+++"));
  body.fold((0, 0), |(removed, added), line| {
    if line.starts_with('-') {
      (removed + 1, added)
    } else if line.starts_with('+') {
      (removed, added + 1)
    } else {
      (removed, added)
    }
  })
}

#[tokio::test]
async fn bootstrap_creates_golden() {
  let fixture = Fixture::new();
  fixture.write("foo.txt", "1\n2\n3\n");
  fixture.write("sub/bar.txt", "bar\n");
  let exit = fixture.args(CAT).run_all().test().await;
  assert_eq!(exit.code(), 0);
  assert!(exit.failed().is_empty());
  assert_eq!(fixture.read("foo.out"), "1\n2\n3\n");
  assert_eq!(fixture.read("foo.golden"), fixture.read("foo.out"));
  assert_eq!(fixture.read("sub/bar.golden"), "bar\n");
}

#[tokio::test]
async fn mismatch_keeps_golden() {
  let fixture = Fixture::new();
  fixture.write("foo.txt", "1\n2\n4\n");
  fixture.write("foo.golden", "1\n2\n3\n");
  let exit = fixture.args(CAT).run_all().test().await;
  assert_eq!(exit.code(), 1);
  assert_eq!(exit.failed(), [fixture.root().join("foo.txt")]);
  assert_eq!(fixture.read("foo.golden"), "1\n2\n3\n");
  assert_eq!(fixture.read("foo.out"), "1\n2\n4\n");
}

#[tokio::test]
async fn clobber_accepts_output() {
  let fixture = Fixture::new();
  fixture.write("foo.txt", "1\n2\n4\n");
  fixture.write("foo.golden", "1\n2\n3\n");
  let exit = fixture.args(CAT).run_all().clobber().test().await;
  // the mismatch is still reported
  assert_eq!(exit.code(), 1);
  assert_eq!(fixture.read("foo.golden"), "1\n2\n4\n");
  let exit = fixture.args(CAT).run_all().test().await;
  assert_eq!(exit.code(), 0);
}

#[tokio::test]
async fn diff_shows_changed_lines() {
  let fixture = Fixture::new();
  fixture.write("foo.txt", "1\n2\n4\n");
  fixture.write("foo.golden", "1\n2\n3\n");
  fixture.args(CAT).only("foo.txt").test().await;
  let runner = Runner::new(&fixture.args(CAT)).await.unwrap();
  let test = runner.registry().get("foo.txt").unwrap();
  let mut out = Vec::new();
  assert!(runner.diff_test(test, &mut out).await.unwrap());
  let diff = String::from_utf8(out).unwrap();
  let golden = fixture.root().join("foo.golden");
  let output = fixture.root().join("foo.out");
  assert_eq!(
    diff,
    format!(
      "\n--- {}\n+++ {}\n@@ -1,3 +1,3 @@\n 1\n 2\n-3\n+4\n",
      golden.display(),
      output.display()
    )
  );
  assert_eq!(count_changes(&diff), (1, 1));
}

#[tokio::test]
async fn diff_counts_match_changes() {
  let fixture = Fixture::new();
  fixture.write("foo.txt", "a\nb\nc\nd\ne\nf\ng\nh\n");
  fixture.write("foo.golden", "a\nB\nc\nd\ne\nf\nh\ni\nj\n");
  let exit = fixture.args(CAT).only("foo.txt").test().await;
  assert_eq!(exit.code(), 1);
  let runner = Runner::new(&fixture.args(CAT)).await.unwrap();
  let mut out = Vec::new();
  assert_eq!(runner.diff_all(&mut out).await.unwrap(), 1);
  // b replaced, g added, i and j removed
  assert_eq!(count_changes(&String::from_utf8(out).unwrap()), (3, 2));
}

#[tokio::test]
async fn diff_identical_is_empty() {
  let fixture = Fixture::new();
  fixture.write("a.txt", "a\n");
  fixture.write("b.txt", "b\n");
  assert_eq!(fixture.args(CAT).run_all().test().await.code(), 0);
  let runner = Runner::new(&fixture.args(CAT)).await.unwrap();
  let mut out = Vec::new();
  assert_eq!(runner.diff_all(&mut out).await.unwrap(), 0);
  assert!(out.is_empty());
  assert_eq!(fixture.args(CAT).diff_all().test().await.code(), 0);
}

#[tokio::test]
async fn diff_before_run_is_missing_pair() {
  let fixture = Fixture::new();
  fixture.write("foo.txt", "1\n");
  fixture.write("foo.golden", "1\n");
  let exit = fixture.args(CAT).diff("foo.txt").test().await;
  assert!(matches!(exit.error(), Some(RunError::MissingPair(_))));
  assert_eq!(exit.code(), 4);
}

#[tokio::test]
async fn unknown_test_runs_nothing() {
  let fixture = Fixture::new();
  fixture.write("foo.txt", "1\n");
  let exit = fixture.args(CAT).only("bar.txt").test().await;
  assert!(matches!(exit.error(), Some(RunError::UnknownTest(name)) if name == "bar.txt"));
  assert_eq!(exit.code(), 5);
  assert!(!fixture.exists("foo.out"));
  assert!(!fixture.dir.path().join("tmp").exists());
  let exit = fixture.args(CAT).diff("bar.txt").test().await;
  assert_eq!(exit.code(), 5);
}

#[tokio::test]
async fn rerun_is_stable() {
  let fixture = Fixture::new();
  fixture.write("foo.txt", "x\ny\n");
  let runner = Runner::new(&fixture.args(CAT)).await.unwrap();
  let test = runner.registry().get("./foo.txt").unwrap();
  assert_eq!(runner.run_test(test, false).await.unwrap().state(), State::New);
  assert_eq!(runner.run_test(test, false).await.unwrap().state(), State::Ok);
  assert_eq!(runner.run_test(test, true).await.unwrap().state(), State::Ok);
  assert_eq!(fixture.read("foo.golden"), "x\ny\n");
}

#[tokio::test]
async fn only_clobber_is_idempotent() {
  let fixture = Fixture::new();
  fixture.write("foo.txt", "new\n");
  fixture.write("foo.golden", "old\n");
  fixture.write("foo.out", "new\n");
  assert_eq!(fixture.args(CAT).only_clobber().test().await.code(), 0);
  assert_eq!(fixture.read("foo.golden"), "new\n");
  assert_eq!(fixture.args(CAT).only_clobber().test().await.code(), 0);
  assert_eq!(fixture.read("foo.golden"), "new\n");
  // nothing ran
  assert!(!fixture.dir.path().join("tmp").exists());
}

#[tokio::test]
async fn only_clobber_without_output() {
  let fixture = Fixture::new();
  fixture.write("foo.txt", "new\n");
  fixture.write("foo.golden", "old\n");
  let exit = fixture.args(CAT).only_clobber().test().await;
  assert_eq!(exit.code(), 4);
  assert_eq!(fixture.read("foo.golden"), "old\n");
}

#[tokio::test]
async fn batch_continues_past_mismatch() {
  let fixture = Fixture::new();
  fixture.write("a.txt", "changed\n");
  fixture.write("a.golden", "expected\n");
  fixture.write("b.txt", "b\n");
  fixture.write("c.txt", "c\n");
  fixture.write("c.golden", "C\n");
  let exit = fixture.args(CAT).run_all().test().await;
  assert_eq!(exit.code(), 1);
  assert_eq!(
    exit.failed(),
    [fixture.root().join("a.txt"), fixture.root().join("c.txt")]
  );
  assert_eq!(fixture.read("b.golden"), "b\n");
}

#[tokio::test]
async fn non_utf8_trace_is_compared() {
  let fixture = Fixture::new();
  fixture.write("a.txt", "a\n");
  fixture.write("b.txt", "b\n");
  fs::write(fixture.root().join("a.golden"), b"caf\xe9\n").unwrap();
  let exit = fixture.args("printf 'caf\\351\\n' > out.trace").run_all().test().await;
  assert!(exit.error().is_none());
  assert_eq!(exit.code(), 0);
  assert_eq!(fs::read(fixture.root().join("b.golden")).unwrap(), b"caf\xe9\n");
}

#[tokio::test]
async fn missing_artifact_aborts() {
  let fixture = Fixture::new();
  fixture.write("a.txt", "a\n");
  fixture.write("b.txt", "b\n");
  fixture.write("a.out", "stale\n");
  let script = "[ \"$1\" = b.txt ] && cat \"$1\" > out.trace; true";
  let exit = fixture.args(script).run_all().test().await;
  assert!(matches!(exit.error(), Some(RunError::MissingArtifact { .. })));
  assert_eq!(exit.code(), 3);
  // stale output removed, later tests never ran
  assert!(!fixture.exists("a.out"));
  assert!(!fixture.exists("a.golden"));
  assert!(!fixture.exists("b.out"));
}

#[tokio::test]
async fn stderr_is_not_fatal() {
  let fixture = Fixture::new();
  fixture.write("foo.txt", "1\n");
  let runner =
    Runner::new(&fixture.args("cat \"$1\" > out.trace; echo warning >&2; exit 1").print_errs())
      .await
      .unwrap();
  let test = runner.registry().get("foo.txt").unwrap();
  let report = runner.run_test(test, false).await.unwrap();
  assert!(report.contains_error());
  assert_eq!(report.state(), State::New);
  assert!(report.to_string().contains("| warning"));
  assert_eq!(fixture.read("foo.golden"), "1\n");
}

#[tokio::test]
async fn config_file_filters() {
  let fixture = Fixture::new();
  fixture.write("foo.py", "result 1\n");
  fixture.write("foo.golden", "# header\nresult 1\nelapsed 12ms\n");
  fixture.write(
    "golden.toml",
    r#"
program = "sh"
args = ["-c", "echo '# other header' > trace.log; cat \"$1\" >> trace.log; echo elapsed $$ms >> trace.log", "sh", "{{name}}.{{extension}}"]
extension = "py"
artifact = "trace.log"

[[filter]]
pattern = '^#'
drop = true

[[filter]]
pattern = '\d+ms'
replace = "<elapsed>"
"#,
  );
  let args = || Args::new(fixture.root()).workdir(fixture.dir.path().join("tmp"));
  assert_eq!(args().run_all().test().await.code(), 0);
  assert_eq!(fixture.read("foo.golden"), "# header\nresult 1\nelapsed 12ms\n");
  assert!(fixture.read("foo.out").starts_with("# other header\nresult 1\nelapsed "));
  let runner = Runner::new(&args()).await.unwrap();
  let mut out = Vec::new();
  assert_eq!(runner.diff_all(&mut out).await.unwrap(), 0);
}

#[tokio::test]
async fn injected_filter() {
  let fixture = Fixture::new();
  fixture.write("foo.txt", "stable\n");
  let script = "cat \"$1\" > out.trace; echo pid $$ >> out.trace";
  let drop_pid = || {
    LineFilter::new(|lines| lines.into_iter().filter(|line| !line.starts_with(b"pid ")).collect())
  };
  assert_eq!(fixture.args(script).run_all().test().await.code(), 0);
  assert_eq!(fixture.args(script).run_all().test().await.code(), 1);
  assert_eq!(fixture.args(script).run_all().filter(drop_pid()).test().await.code(), 0);
}

#[tokio::test]
async fn workdir_is_not_searched() {
  let fixture = Fixture::new();
  fixture.write("foo.txt", "1\n");
  let args = || {
    Args::new(fixture.root())
      .workdir(fixture.root().join("tmp"))
      .program("sh")
      .args(["-c", CAT, "sh", "{{name}}.{{extension}}"])
  };
  assert_eq!(args().run_all().test().await.code(), 0);
  // the scratch dir now holds a symlink `tmp/foo.txt/foo.txt`
  let runner = Runner::new(&args()).await.unwrap();
  assert_eq!(runner.registry().len(), 1);
}

#[tokio::test]
async fn help_without_mode() {
  let exit = Args::new(Path::new("does-not-matter")).test().await;
  assert_eq!(exit.code(), 0);
  assert!(exit.error().is_none());
}

#[tokio::test]
async fn debug_dumps_config() {
  let fixture = Fixture::new();
  fixture.write("foo.txt", "1\n");
  assert_eq!(fixture.args(CAT).run_all().debug().test().await.code(), 0);
  let dump = fs::read_to_string(fixture.dir.path().join("tmp/__debug__.toml")).unwrap();
  assert!(dump.contains("program = \"sh\""), "{dump}");
  assert!(dump.contains("artifact = \"out.trace\""), "{dump}");
}
