//! `in`: Proxies a resource fetch to the proxy server and stores the files it sends.

use proxy_core::ActionKind;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    proxy_resource::run_main(ActionKind::In).await
}
