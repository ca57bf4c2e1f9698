//! Operator console read from stdin.
//!
//! `status` prints who is online, `exit` stops the server. Unknown commands
//! print a short help line.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::info;

use crate::listener::ServerHandle;

/// Read commands from `input` until `exit`, end of input, or the server stops
/// on its own.
pub async fn run_console<R, W>(input: R, mut output: W, server: ServerHandle) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "status" => {
                let users = server.online_users().await;
                let mut report = format!("{} user(s) online\n", users.len());
                for name in users {
                    report.push_str("  ");
                    report.push_str(&name);
                    report.push('\n');
                }
                output.write_all(report.as_bytes()).await?;
            }
            "exit" | "quit" => {
                info!("Shutdown requested from console");
                output.write_all(b"shutting down\n").await?;
                output.flush().await?;
                server.stop();
                return Ok(());
            }
            other => {
                let msg = format!("unknown command '{other}' (try: status, exit)\n");
                output.write_all(msg.as_bytes()).await?;
            }
        }
        output.flush().await?;

        if server.is_stopped() {
            break;
        }
    }

    Ok(())
}
