//! Proxy Resource - `check`, `in` and `out` programs that tunnel to a proxy server.
//!
//! Concourse runs these like any resource: the request arrives as JSON on
//! stdin, `in` and `out` get a directory as their only argument, and stdout
//! carries the resource's JSON answer. Logs therefore go to stderr.

use anyhow::{bail, Context, Result};
use proxy_core::{ActionKind, ClientOutcome, ResourceRequest, TunnelClient};
use std::ffi::OsString;
use std::future::Future;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install a compact stderr logger; `RUST_LOG` overrides the INFO default.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();
}

/// The directory argument `action` expects, if any.
pub fn directory_arg(
    action: ActionKind,
    mut args: impl Iterator<Item = OsString>,
) -> Result<Option<PathBuf>> {
    if !action.takes_directory() {
        return Ok(None);
    }

    match args.next() {
        Some(dir) => Ok(Some(PathBuf::from(dir))),
        None if action == ActionKind::In => bail!("Missing parameter for the destination directory"),
        None => bail!("Missing parameter for the source directory"),
    }
}

/// Tunnel one request for `action` and wait until the server is done.
///
/// `out` uploads `directory` before the request; `in` decodes file payloads
/// into it. Every text message is passed to `on_text`.
pub async fn run_action<T, F>(
    action: ActionKind,
    request: &ResourceRequest,
    directory: Option<PathBuf>,
    on_text: T,
    interrupt: F,
) -> Result<ClientOutcome>
where
    T: FnMut(&str) + Send,
    F: Future<Output = ()> + Send,
{
    let url = request.endpoint(action)?;
    info!("proxying {} to {}", action, url);

    let client = TunnelClient::connect(&url, request.token())
        .await
        .with_context(|| format!("Could not connect to {}", url))?;

    if action.receives_files() {
        if let Some(dir) = &directory {
            let size = client
                .send_directory(dir)
                .await
                .with_context(|| format!("Could not send {}", dir.display()))?;
            info!("Sent {} bytes of files from {}", size, dir.display());
        }
    }

    client.send_request(&request.forwarded()).await?;

    let destination = directory.filter(|_| action.sends_files());
    let outcome = client.run(destination, on_text, interrupt).await;

    if let Some((code, reason)) = &outcome.close {
        info!("ending with code {}: {}", code, reason);
    }
    Ok(outcome)
}

/// Entry point shared by the three binaries.
pub async fn run_main(action: ActionKind) -> Result<()> {
    init_logging();

    let directory = directory_arg(action, std::env::args_os().skip(1))?;
    let request = tokio::task::spawn_blocking(|| ResourceRequest::from_reader(std::io::stdin().lock()))
        .await?
        .context("Could not read the request from stdin")?;

    let outcome = run_action(
        action,
        &request,
        directory,
        |line| println!("{}", line),
        interrupt_signal(),
    )
    .await?;

    if outcome.interrupted {
        bail!("interrupted");
    }
    Ok(())
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed.
async fn interrupt_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for interrupts: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> impl Iterator<Item = OsString> {
        values
            .iter()
            .map(OsString::from)
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn test_check_takes_no_directory() {
        assert_eq!(directory_arg(ActionKind::Check, args(&["ignored"])).unwrap(), None);
    }

    #[test]
    fn test_in_and_out_require_directory() {
        assert_eq!(
            directory_arg(ActionKind::In, args(&["/tmp/dest"])).unwrap(),
            Some(PathBuf::from("/tmp/dest"))
        );

        let err = directory_arg(ActionKind::In, args(&[])).unwrap_err();
        assert!(err.to_string().contains("destination"));
        let err = directory_arg(ActionKind::Out, args(&[])).unwrap_err();
        assert!(err.to_string().contains("source"));
    }
}
