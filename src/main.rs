// Avoid musl's default allocator due to lackluster performance
// https://nickb.dev/blog/default-musl-allocator-considered-harmful-to-performance
#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use golden_runner::{Args, TestExitCode};

#[tokio::main]
async fn main() -> TestExitCode {
  let args = Args::parse_from(std::env::args_os());
  args.init_tracing();
  args.test().await
}
