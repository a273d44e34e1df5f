#[macro_use]
extern crate log;

use std::sync::Arc;

use kube::{Client, Resource, api::ApiResource};
use prometheus::Registry;
use rustrial_k8s_change_feed::{
    ChangeFeed, Configuration, KubeRemote, discover_api_resource,
    prometheus_exporter::{install_meter_provider, start_prometheus_metrics_server},
};
use rustrial_k8s_change_feed_apis::Component;
use tokio::runtime::Handle;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }
    let configuration = Configuration::from_env()?;
    let registry = Registry::new();
    let _meter_provider = install_meter_provider(&registry)?;
    let metrics_server = start_prometheus_metrics_server(configuration.metrics_addr, registry);

    let client = Client::try_default().await?;
    let mut remote = KubeRemote::new(client.clone(), Handle::current())
        .with_resource(ApiResource::erase::<Component>(&()));
    let mut kinds = vec![Component::kind(&()).to_string()];
    for target in configuration.watch_resources.iter() {
        let ar = discover_api_resource(&client, target).await?;
        info!("resolved {} to {}/{}", target, ar.api_version, ar.kind);
        if !kinds.contains(&ar.kind) {
            kinds.push(ar.kind.clone());
        }
        remote = remote.with_resource(ar);
    }

    let mut feed = ChangeFeed::new(Arc::new(remote), configuration.feed_settings());
    feed.register_callback(|notification| async move {
        info!("{}", serde_json::to_string(&notification)?);
        Ok(())
    });
    for kind in kinds.iter() {
        feed.start(
            kind,
            configuration.watch_namespaces.as_slice(),
            configuration.debounce_seconds,
        )
        .await?;
    }
    info!("watching {}", kinds.join(","));
    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r?;
            info!("shutting down");
        }
        r = metrics_server => r?,
    };
    feed.shutdown().await;
    Ok(())
}
