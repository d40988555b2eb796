//! kubecube operator - fleet control plane for a pivot cluster and its members

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;

use cube_api::auth::{IdentityProvider, LdapConfig, LdapProvider, TokenConfig, TokenProvider};
use cube_api::{start_server, AppState};
use cube_common::crd::{Cluster, User};
use cube_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use cube_common::{DEFAULT_API_PORT, DEFAULT_PIVOT_CLUSTER, FIELD_MANAGER};
use cube_multicluster::reconcile::run_user_controller;
use cube_multicluster::{
    Aggregator, ClusterLifecycle, ClusterRegistry, ClusterSync, FanOutConfig, JoinDefaults,
    KubeClientFactory, ResourceQuotaCalculator,
};

/// kubecube - multi-cluster, multi-tenant control plane
#[derive(Parser, Debug)]
#[command(name = "cube-operator", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    config: OperatorArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the control plane (default mode)
    ///
    /// Keeps the cluster registry in sync with Cluster descriptors, reconciles
    /// User membership on namespace changes and serves the HTTP API.
    Controller,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum LogFormatArg {
    #[default]
    Json,
    Plain,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Plain => LogFormat::Plain,
        }
    }
}

#[derive(Args, Debug)]
struct OperatorArgs {
    /// Name of the Cluster descriptor for the pivot
    #[arg(long, env = "PIVOT_CLUSTER", default_value = DEFAULT_PIVOT_CLUSTER, global = true)]
    pivot_cluster: String,

    /// Address the HTTP API listens on
    #[arg(long, env = "LISTEN_ADDR", default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_API_PORT)), global = true)]
    listen_addr: SocketAddr,

    /// Address member clusters use to call back into this node
    #[arg(long, env = "NODE_IP", global = true)]
    node_ip: Option<String>,

    /// Per-cluster timeout for fan-out queries, in seconds
    #[arg(long, env = "FANOUT_TIMEOUT", default_value_t = 10, global = true)]
    fanout_timeout: u64,

    /// Maximum clusters queried at once
    #[arg(long, env = "FANOUT_CONCURRENCY", default_value_t = 15, global = true)]
    fanout_concurrency: usize,

    /// Stdout log format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Json, global = true)]
    log_format: LogFormatArg,

    #[command(flatten)]
    ldap: LdapArgs,

    #[command(flatten)]
    jwt: JwtArgs,
}

#[derive(Args, Debug)]
struct LdapArgs {
    /// Authenticate logins against LDAP
    #[arg(long = "ldap-is-enable", env = "LDAP_IS_ENABLE", global = true)]
    enabled: bool,

    #[arg(long = "ldap-object-class", env = "LDAP_OBJECT_CLASS", default_value = "person", global = true)]
    object_class: String,

    #[arg(long = "ldap-login-name-config", env = "LDAP_LOGIN_NAME_CONFIG", default_value = "uid", global = true)]
    login_name_attr: String,

    #[arg(long = "ldap-object-category", env = "LDAP_OBJECT_CATEGORY", default_value = "", global = true)]
    object_category: String,

    #[arg(long = "ldap-server", env = "LDAP_SERVER", default_value = "", global = true)]
    server: String,

    #[arg(long = "ldap-port", env = "LDAP_PORT", default_value_t = 389, global = true)]
    port: u16,

    #[arg(long = "ldap-base", env = "LDAP_BASE", default_value = "", global = true)]
    base_dn: String,

    #[arg(long = "ldap-admin-user-account", env = "LDAP_ADMIN_USER_ACCOUNT", default_value = "", global = true)]
    admin_account: String,

    #[arg(long = "ldap-admin-password", env = "LDAP_ADMIN_PASSWORD", default_value = "", hide_env_values = true, global = true)]
    admin_password: String,
}

impl LdapArgs {
    fn config(&self) -> LdapConfig {
        LdapConfig {
            enabled: self.enabled,
            object_class: self.object_class.clone(),
            login_name_attr: self.login_name_attr.clone(),
            object_category: self.object_category.clone(),
            server: self.server.clone(),
            port: self.port,
            base_dn: self.base_dn.clone(),
            admin_account: self.admin_account.clone(),
            admin_password: self.admin_password.clone(),
        }
    }
}

#[derive(Args, Debug)]
struct JwtArgs {
    /// Lifetime of issued session tokens, in seconds
    #[arg(long = "token-expire-duration", env = "TOKEN_EXPIRE_DURATION", default_value_t = 3600, global = true)]
    expire_secs: u64,

    #[arg(long = "jwt-issuer", env = "JWT_ISSUER", default_value = "kubecube", global = true)]
    issuer: String,

    /// HMAC secret for session tokens; tokens are disabled when empty
    #[arg(long = "jwt-secret", env = "JWT_SECRET", default_value = "", hide_env_values = true, global = true)]
    secret: String,
}

impl JwtArgs {
    fn provider(&self) -> anyhow::Result<Option<TokenProvider>> {
        if self.secret.is_empty() {
            return Ok(None);
        }
        let provider = TokenProvider::new(TokenConfig {
            secret: self.secret.clone(),
            issuer: self.issuer.clone(),
            expiry: Duration::from_secs(self.expire_secs),
        })
        .map_err(|e| anyhow::anyhow!("Invalid token configuration: {}", e))?;
        Ok(Some(provider))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        for crd in [Cluster::crd(), User::crd()] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    let telemetry = init_telemetry(TelemetryConfig {
        service_name: "cube-operator".to_string(),
        log_format: cli.config.log_format.into(),
        ..Default::default()
    })
    .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let result = match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.config).await,
    };
    telemetry.shutdown();
    result
}

/// Install the CRDs this control plane owns
///
/// SubnamespaceAnchor belongs to the hierarchical namespace controller and is
/// left to its installer.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in [Cluster::crd(), User::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "Installing CRD");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }
    Ok(())
}

fn identity_provider(ldap: LdapConfig, tokens: Option<&TokenProvider>) -> Option<IdentityProvider> {
    if ldap.enabled && !ldap.server.is_empty() {
        tracing::info!(server = %ldap.url(), "Using LDAP identity provider");
        return Some(IdentityProvider::Ldap(LdapProvider::connect(ldap)));
    }
    if ldap.enabled {
        tracing::warn!("LDAP enabled without a server, falling back to token logins");
    }
    tokens.cloned().map(IdentityProvider::Token)
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn run_controller(args: OperatorArgs) -> anyhow::Result<()> {
    tracing::info!(pivot = %args.pivot_cluster, "kubecube controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        });
    }

    let registry = ClusterRegistry::new();
    let factory = Arc::new(KubeClientFactory::new(client.clone(), &args.pivot_cluster));
    let sync = ClusterSync::new(registry.clone(), factory);
    let sync_task = tokio::spawn(sync.run(Api::<Cluster>::all(client.clone()), shutdown.clone()));

    let aggregator = Aggregator::new(
        registry.clone(),
        &args.pivot_cluster,
        Arc::new(ResourceQuotaCalculator),
        FanOutConfig {
            timeout: Duration::from_secs(args.fanout_timeout),
            concurrency: args.fanout_concurrency.max(1),
        },
    );

    let mut join_defaults = JoinDefaults {
        kube_cube_port: args.listen_addr.port(),
        ..Default::default()
    };
    if let Some(node_ip) = args.node_ip.clone() {
        join_defaults.kube_cube_host = node_ip;
    }
    let lifecycle = ClusterLifecycle::new(registry, &args.pivot_cluster, join_defaults)
        .map_err(|e| anyhow::anyhow!("Failed to prepare cluster lifecycle: {}", e))?;

    let tokens = args.jwt.provider()?;
    let identity = identity_provider(args.ldap.config(), tokens.as_ref());
    if identity.is_none() {
        tracing::warn!("No identity provider configured, /login will fail");
    }

    let state = AppState {
        aggregator,
        lifecycle: Arc::new(lifecycle),
        identity: identity.map(Arc::new),
        tokens: tokens.map(Arc::new),
    };

    tracing::info!("Starting kubecube components...");
    let user_controller = run_user_controller(client);
    let server = start_server(args.listen_addr, state, shutdown.clone());

    tokio::select! {
        _ = user_controller => {
            tracing::info!("User controller completed");
        }
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "API server failed");
                shutdown.cancel();
                let _ = sync_task.await;
                return Err(anyhow::anyhow!("API server failed: {}", e));
            }
            tracing::info!("API server completed");
        }
    }

    shutdown.cancel();
    let _ = sync_task.await;

    tracing::info!("kubecube controller shutting down");
    Ok(())
}
