//! Print the first rows of each table.
//!
//! ```text
//! pgselect [key=value ...] [--] <table> ...
//! ```
use std::process::ExitCode;

use pgpeek::describe;
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
    for table in &session.operands {
        match describe::select_table(&mut session.conn, table, None).await {
            Ok(result) => {
                println!("Table {table} has {} columns:", result.fields().len());
                println!("{result}");
            },
            Err(err) => return tools::report(format_args!("Unable to Select from {table}"), &err),
        }
    }

    0
}
