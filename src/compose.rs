use docker_compose_types::{
    Compose, ComposeNetworks, ComposeVolume, Healthcheck, HealthcheckTest, Labels,
    MapOrEmpty, NetworkSettings, Networks, Ports, Service, Services, TopLevelVolumes, Volumes,
};
use indexmap::IndexMap;

use crate::error::ProvisionResult;
use crate::workload::{CONTAINER_PORT, Workload};

const NODE_EXPORTER_IMAGE: &str = "prom/node-exporter:latest";

/// Render a complete `docker-compose.yml` for the workload.
pub fn render(workload: &Workload) -> ProvisionResult<String> {
    let mut services = IndexMap::new();

    services.insert(workload.name.clone(), Some(workload_service(workload)));

    if workload.node_exporter {
        services.insert("node-exporter".to_string(), Some(node_exporter_service(workload)));
    }

    let compose = Compose {
        services: Services(services),
        volumes: top_level_volumes(workload),
        networks: network(workload),
        ..Default::default()
    };

    Ok(serde_yaml::to_string(&compose)?)
}

fn network_name(workload: &Workload) -> String {
    format!("{}-network", workload.name)
}

fn workload_service(workload: &Workload) -> Service {
    let volumes: Vec<Volumes> = workload
        .volumes
        .iter()
        .map(|(name, mount)| Volumes::Simple(format!("{name}:{mount}")))
        .collect();

    let healthcheck = workload.healthcheck.as_ref().map(|cmd| Healthcheck {
        test: Some(HealthcheckTest::Multiple(vec![
            "CMD".to_string(),
            "sh".to_string(),
            "-c".to_string(),
            cmd.clone(),
        ])),
        interval: Some("30s".to_string()),
        timeout: Some("10s".to_string()),
        retries: 3,
        start_period: Some("30s".to_string()),
        ..Default::default()
    });

    Service {
        image: Some(workload.image.clone()),
        container_name: Some(workload.name.clone()),
        restart: Some("unless-stopped".to_string()),
        ports: Ports::Short(vec![format!(
            "127.0.0.1:{}:{CONTAINER_PORT}",
            workload.port
        )]),
        env_file: Some(docker_compose_types::StringOrList::Simple(
            workload.env_file.clone(),
        )),
        volumes,
        healthcheck,
        networks: Networks::Simple(vec![network_name(workload)]),
        ..Default::default()
    }
}

fn node_exporter_service(workload: &Workload) -> Service {
    Service {
        image: Some(NODE_EXPORTER_IMAGE.to_string()),
        container_name: Some(format!("{}-node-exporter", workload.name)),
        restart: Some("unless-stopped".to_string()),
        ports: Ports::Short(vec!["127.0.0.1:9100:9100".to_string()]),
        command: Some(docker_compose_types::Command::Args(vec![
            "--path.rootfs=/host".to_string(),
        ])),
        volumes: vec![Volumes::Simple("/:/host:ro,rslave".to_string())],
        networks: Networks::Simple(vec![network_name(workload)]),
        ..Default::default()
    }
}

fn local_volume() -> ComposeVolume {
    ComposeVolume {
        driver: Some("local".to_string()),
        driver_opts: IndexMap::new(),
        external: None,
        labels: Labels::default(),
        name: None,
    }
}

fn top_level_volumes(workload: &Workload) -> TopLevelVolumes {
    let vols = workload
        .volumes
        .iter()
        .map(|(name, _)| (name.clone(), MapOrEmpty::Map(local_volume())))
        .collect();
    TopLevelVolumes(vols)
}

fn network(workload: &Workload) -> ComposeNetworks {
    let mut nets = IndexMap::new();
    nets.insert(
        network_name(workload),
        MapOrEmpty::Map(NetworkSettings {
            driver: Some("bridge".to_string()),
            ..Default::default()
        }),
    );
    ComposeNetworks(nets)
}
