//! Execute one statement, remaining operands are bound to `$1..$n`.
//!
//! ```text
//! pgexec [key=value ...] [--] <sql> [param ...]
//! ```
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let mut session = match tools::start().await {
        Ok(ok) => ok,
        Err(code) => return code,
    };
    let code = tools::execute(&mut session.conn, &session.operands).await;
    session.finish(code).await
}
