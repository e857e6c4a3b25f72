//! `check`: Proxies a resource check to the proxy server.

use proxy_core::ActionKind;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    proxy_resource::run_main(ActionKind::Check).await
}
