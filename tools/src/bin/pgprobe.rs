//! Print the column names and types of each table.
//!
//! ```text
//! pgprobe [key=value ...] [--] <table> ...
//! ```
use std::process::ExitCode;

use pgpeek::{TypeCache, describe};
use tools::Session;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let mut session = match tools::start().await {
        Ok(ok) => ok,
        Err(code) => return code,
    };
    let code = run(&mut session).await;
    session.finish(code).await
}

async fn run(session: &mut Session) -> u8 {
    let cache = match TypeCache::build(&mut session.conn).await {
        Ok(ok) => ok,
        Err(err) => {
            eprintln!("{err}");
            return err.exit_code();
        },
    };
    tracing::debug!(types = cache.len(), "type cache ready");

    for table in &session.operands {
        match describe::probe_table(&mut session.conn, &cache, table).await {
            Ok(schema) => println!("{schema}"),
            Err(err) => return tools::report(format_args!("Unable to Select from {table}"), &err),
        }
    }

    0
}
