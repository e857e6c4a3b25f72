//! `out`: Uploads the source directory and proxies a resource put to the proxy server.

use proxy_core::ActionKind;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    proxy_resource::run_main(ActionKind::Out).await
}
