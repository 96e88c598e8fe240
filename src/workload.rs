use crate::context::RunContext;

/// Port the gateway listens on inside its container.
pub const CONTAINER_PORT: u16 = 3000;

/// Defines the gateway container: image, published port, env file,
/// volumes and the optional monitoring sidecar.
///
/// # Example
///
/// ```
/// use waha_provision::workload::Workload;
///
/// let workload = Workload::new("waha")
///     .image("devlikeapro/waha:2024.10")
///     .port(3100)
///     .volume("waha-sessions", "/app/.sessions")
///     .healthcheck("wget -q --spider http://localhost:3000/ping");
///
/// assert_eq!(workload.port, 3100);
/// assert_eq!(workload.volumes.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Workload {
    pub name: String,
    pub image: String,
    /// Host port, bound to loopback only.
    pub port: u16,
    pub env_file: String,
    pub volumes: Vec<(String, String)>,
    pub healthcheck: Option<String>,
    pub node_exporter: bool,
}

impl Workload {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            image: "devlikeapro/waha:latest".to_string(),
            port: CONTAINER_PORT,
            env_file: ".env".to_string(),
            volumes: Vec::new(),
            healthcheck: None,
            node_exporter: false,
        }
    }

    /// The gateway as configured for this run.
    #[must_use]
    pub fn for_context(ctx: &RunContext) -> Self {
        let workload = Self::new("waha")
            .image(&ctx.image)
            .port(ctx.port)
            .volume("waha-sessions", "/app/.sessions")
            .volume("waha-media", "/app/.media");

        if ctx.features.monitoring {
            workload
                .healthcheck(&format!(
                    "wget -q --spider http://localhost:{CONTAINER_PORT}/ping || exit 1"
                ))
                .node_exporter(true)
        } else {
            workload
        }
    }

    #[must_use]
    pub fn image(mut self, image: &str) -> Self {
        self.image = image.to_string();
        self
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn volume(mut self, name: &str, mount: &str) -> Self {
        self.volumes.push((name.to_string(), mount.to_string()));
        self
    }

    #[must_use]
    pub fn healthcheck(mut self, cmd: &str) -> Self {
        self.healthcheck = Some(cmd.to_string());
        self
    }

    #[must_use]
    pub const fn node_exporter(mut self, on: bool) -> Self {
        self.node_exporter = on;
        self
    }
}
