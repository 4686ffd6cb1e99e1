use futures::future::join_all;
use settings::Settings;
use tokio_util::sync::CancellationToken;

use crate::adapter::homeassistant::SensorPublisher;
use crate::outage::OutageRunner;
use crate::outage::adapter::NorthernPowergridSource;

mod adapter;
mod core;
mod outage;
mod settings;

#[tokio::main(flavor = "multi_thread")]
pub async fn main() {
    let settings = Settings::new().expect("Error reading configuration");
    settings.validate().expect("Invalid configuration");

    settings.monitoring.init().expect("Error initializing monitoring");

    let source = NorthernPowergridSource::new(&settings.upstream.url, settings.upstream.timeout())
        .expect("Error initializing power cut source");

    let shutdown = CancellationToken::new();

    let runners: Vec<_> = settings
        .areas
        .iter()
        .map(|area| OutageRunner::new(&area.id, &area.postcode, source.clone()))
        .collect();
    let clients: Vec<_> = runners.iter().map(|runner| runner.client()).collect();

    let publishers: Vec<SensorPublisher> = match &settings.homeassistant {
        Some(ha) => settings
            .areas
            .iter()
            .zip(clients.iter())
            .map(|(area, client)| {
                ha.new_sensor_publisher(area, client.clone())
                    .expect("Error initializing Home Assistant publisher")
            })
            .collect(),
        None => {
            tracing::info!("No Home Assistant configured, sensors are not published");
            vec![]
        }
    };

    let http_server_exec = {
        let http_clients = clients.clone();

        async move {
            settings
                .http_server
                .run_server(move || vec![adapter::api::new_routes(http_clients.clone())])
                .await
                .expect("HTTP server execution failed");
        }
    };

    let polling = join_all(runners.into_iter().map(|runner| runner.run(shutdown.clone())));
    let publishing = join_all(publishers.into_iter().map(|publisher| publisher.run(shutdown.clone())));

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutting down");
                shutdown.cancel();
            }
        }
    });

    tracing::info!("Starting power cut monitoring for {} areas", clients.len());

    tokio::select!(
        _ = futures::future::join(polling, publishing) => {},
        _ = http_server_exec => {},
    );
}
