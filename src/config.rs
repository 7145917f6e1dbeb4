//! Configuration module
//!
//! CLI arguments (with environment variable fallbacks) tune connection
//! handling; services and access lists come from a JSON file that is
//! generated with a working default when missing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::anyhow;
use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};

use crate::core::minecraft::{self, PingMode};
use crate::core::{striped, AccessLists, AccessMode, AccessPolicy, FlowMode};
use crate::error::{ProxyError, Result};
use crate::logger::log;

/// Parse duration string (e.g., "10s", "2m") or plain seconds
fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }
    s.parse::<u64>().map(Duration::from_secs).map_err(|_| {
        format!(
            "Invalid duration '{}'. Use formats like '10s', '2m' or plain seconds",
            s
        )
    })
}

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "ZBProxy.json";

/// CLI arguments
///
/// Supports environment variables with ZBPROXY_ prefix
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Minecraft-aware TCP reverse proxy")]
#[command(rename_all = "snake_case")]
pub struct CliArgs {
    /// JSON configuration file, created with defaults if missing
    #[arg(short, long, env = "ZBPROXY_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Log level: trace, debug, info, warn, error (default: info)
    #[arg(long, env = "ZBPROXY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// How often the config file is checked for list changes, 0 disables (default: 2s)
    #[arg(long, env = "ZBPROXY_RELOAD_INTERVAL", default_value = "2s", value_parser = parse_duration)]
    pub reload_interval: Duration,

    // ==================== Performance Tuning ====================
    /// TCP connect timeout to the backend (default: 5s)
    #[arg(long, env = "ZBPROXY_CONNECT_TIMEOUT", default_value = "5s", value_parser = parse_duration, help_heading = "Performance")]
    pub connect_timeout: Duration,

    /// Timeout for the handshake and login start packets (default: 10s)
    #[arg(long, env = "ZBPROXY_HANDSHAKE_TIMEOUT", default_value = "10s", value_parser = parse_duration, help_heading = "Performance")]
    pub handshake_timeout: Duration,

    /// Upper bound for a whole status (MOTD) exchange (default: 10s)
    #[arg(long, env = "ZBPROXY_STATUS_TIMEOUT", default_value = "10s", value_parser = parse_duration, help_heading = "Performance")]
    pub status_timeout: Duration,

    /// Buffer size for data transfer in bytes (default: 32KB)
    #[arg(long, env = "ZBPROXY_BUFFER_SIZE", default_value_t = 32 * 1024, help_heading = "Performance")]
    pub buffer_size: usize,

    /// TCP listen backlog for pending connections (default: 1024)
    #[arg(long, env = "ZBPROXY_TCP_BACKLOG", default_value_t = 1024, help_heading = "Performance")]
    pub tcp_backlog: i32,

    /// Enable TCP_NODELAY for lower latency (default: true)
    #[arg(long, env = "ZBPROXY_TCP_NODELAY", default_value_t = true, action = ArgAction::Set, help_heading = "Performance")]
    pub tcp_nodelay: bool,

    /// In-flight buffers per direction for the `multiple` flow (default: 4)
    #[arg(long, env = "ZBPROXY_MULTIPLE_LANES", default_value_t = 4, help_heading = "Performance")]
    pub multiple_lanes: usize,
}

impl CliArgs {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.config.as_os_str().is_empty() {
            return Err(anyhow!("config path must not be empty"));
        }
        if crate::logger::LogLevel::parse(&self.log_level).is_none() {
            return Err(anyhow!("unknown log level '{}'", self.log_level));
        }
        if self.connect_timeout.is_zero() {
            return Err(anyhow!("connect_timeout must be greater than 0"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(anyhow!("handshake_timeout must be greater than 0"));
        }
        if self.status_timeout.is_zero() {
            return Err(anyhow!("status_timeout must be greater than 0"));
        }
        if self.buffer_size < 1024 {
            return Err(anyhow!("buffer_size must be at least 1024 bytes"));
        }
        if self.tcp_backlog <= 0 {
            return Err(anyhow!("tcp_backlog must be greater than 0"));
        }
        if !(striped::MIN_LANES..=striped::MAX_LANES).contains(&self.multiple_lanes) {
            return Err(anyhow!(
                "multiple_lanes must be between {} and {}",
                striped::MIN_LANES,
                striped::MAX_LANES
            ));
        }
        Ok(())
    }
}

/// Connection performance configuration
#[derive(Debug, Clone, Copy)]
pub struct ConnConfig {
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Handshake and login start read timeout
    pub handshake_timeout: Duration,
    /// Status exchange timeout
    pub status_timeout: Duration,
    /// Buffer size for data transfer
    pub buffer_size: usize,
    /// TCP listen backlog
    pub tcp_backlog: i32,
    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,
    /// Lanes for the striped relay
    pub multiple_lanes: usize,
}

impl ConnConfig {
    /// Create from CLI args
    pub fn from_cli(cli: &CliArgs) -> Self {
        Self {
            connect_timeout: cli.connect_timeout,
            handshake_timeout: cli.handshake_timeout,
            status_timeout: cli.status_timeout,
            buffer_size: cli.buffer_size,
            tcp_backlog: cli.tcp_backlog,
            tcp_nodelay: cli.tcp_nodelay,
            multiple_lanes: cli.multiple_lanes,
        }
    }
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            status_timeout: Duration::from_secs(10),
            buffer_size: 32 * 1024,
            tcp_backlog: 1024,
            tcp_nodelay: true,
            multiple_lanes: 4,
        }
    }
}

// ==================== On-disk format ====================

/// Root of the JSON configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfigFile {
    #[serde(default)]
    pub services: Vec<ServiceFile>,
    #[serde(default)]
    pub lists: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceFile {
    pub name: String,
    pub target_address: String,
    pub target_port: u16,
    pub listen: u16,
    pub flow: String,
    #[serde(rename = "IPAccess", default)]
    pub ip_access: AccessFile,
    #[serde(default)]
    pub minecraft: MinecraftFile,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AccessFile {
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MinecraftFile {
    pub enable_hostname_rewrite: bool,
    pub rewritten_hostname: String,
    #[serde(rename = "IgnoreFMLSuffix")]
    pub ignore_fml_suffix: bool,
    pub enable_any_dest: bool,
    pub any_dest_settings: AnyDestFile,
    pub motd_favicon: String,
    pub motd_description: String,
    pub ping_mode: String,
    pub online_count: OnlineCountFile,
    pub name_access: AccessFile,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AnyDestFile {
    pub wildcard_root_domain_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct OnlineCountFile {
    pub max: i64,
    /// Negative means "show the live count"
    pub online: i64,
    pub enable_max_limit: bool,
}

impl Default for OnlineCountFile {
    fn default() -> Self {
        Self {
            max: 20,
            online: -1,
            enable_max_limit: false,
        }
    }
}

impl ConfigFile {
    /// The file written on first start
    pub fn generated_default() -> Self {
        Self {
            services: vec![ServiceFile {
                name: "HypixelDefault".to_string(),
                target_address: "mc.hypixel.net".to_string(),
                target_port: 25565,
                listen: 25565,
                flow: "auto".to_string(),
                ip_access: AccessFile {
                    mode: "default".to_string(),
                    list_tags: None,
                },
                minecraft: MinecraftFile {
                    enable_hostname_rewrite: true,
                    motd_favicon: minecraft::DEFAULT_FAVICON_SENTINEL.to_string(),
                    motd_description:
                        "§d{NAME}§e service is working on §a§o{INFO}§r\n§c§lProxy for §6§n{HOST}:{PORT}§r"
                            .to_string(),
                    online_count: OnlineCountFile {
                        max: 114514,
                        online: -1,
                        enable_max_limit: false,
                    },
                    ..Default::default()
                },
            }],
            lists: HashMap::new(),
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read the config, writing the generated default first if it is missing
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let default = Self::generated_default();
            let text = serde_json::to_string_pretty(&default)?;
            std::fs::write(path, text)?;
            log::warn!(path = %path.display(), "Config file not found, generated a default one");
            return Ok(default);
        }
        Self::load(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn access_lists(&self) -> AccessLists {
        AccessLists::from_entries(self.lists.iter().map(|(k, v)| (k.clone(), v.clone())))
    }
}

// ==================== Resolved service record ====================

/// Player count settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnlineCount {
    /// Advertised maximum, also the cap when enabled
    pub max: i64,
    /// Fixed advertised online count; `None` shows the live counter
    pub shown_online: Option<i64>,
    pub cap_enabled: bool,
}

impl OnlineCount {
    /// Cap applied to logins, if enabled
    pub fn cap(&self) -> Option<usize> {
        self.cap_enabled.then(|| self.max.max(0) as usize)
    }
}

/// Minecraft handling of one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinecraftConfig {
    /// Upstream virtual host when rewriting is enabled
    pub hostname_rewrite: Option<String>,
    pub ignore_fml_suffix: bool,
    /// Wildcard root domain when any-destination is enabled
    pub any_dest_root: Option<String>,
    /// Description with placeholders already expanded
    pub motd_description: String,
    /// Favicon data URL with the sentinel already resolved
    pub motd_favicon: String,
    pub ping_mode: PingMode,
    pub online: OnlineCount,
    pub name_access: AccessPolicy,
}

impl MinecraftConfig {
    /// Whether status requests are answered locally instead of passed through
    pub fn synthesizes_status(&self) -> bool {
        !self.motd_description.is_empty() || !self.motd_favicon.is_empty()
    }

    /// Whether connections are parsed as Minecraft at all
    ///
    /// Without any Minecraft feature the service is a plain TCP forwarder.
    pub fn intercepts(&self) -> bool {
        self.hostname_rewrite.is_some()
            || self.any_dest_root.is_some()
            || self.synthesizes_status()
            || self.name_access.is_enabled()
            || self.online.cap().is_some()
    }
}

/// Immutable per-listener configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub name: String,
    pub listen: u16,
    pub target_host: String,
    pub target_port: u16,
    pub flow: FlowMode,
    pub ip_access: AccessPolicy,
    pub minecraft: MinecraftConfig,
}

fn resolve_policy(service: &str, what: &str, raw: &AccessFile) -> Result<AccessPolicy> {
    let mode = AccessMode::parse(&raw.mode)
        .map_err(|e| ProxyError::config(format!("service {}: {}: {}", service, what, e)))?;
    if mode == AccessMode::Default {
        return Ok(AccessPolicy::default());
    }
    let Some(tags) = raw.list_tags.clone() else {
        return Err(ProxyError::config(format!(
            "service {}: {} ListTags can't be null when access control is enabled",
            service, what
        )));
    };
    Ok(AccessPolicy::new(mode, tags))
}

impl ServiceConfig {
    /// Validate a service entry and expand its templates
    pub fn resolve(raw: &ServiceFile) -> Result<Self> {
        let name = raw.name.as_str();
        if raw.listen == 0 {
            return Err(ProxyError::config(format!("service {}: listen port must not be 0", name)));
        }
        if raw.target_address.is_empty() {
            return Err(ProxyError::config(format!("service {}: target address is required", name)));
        }
        if raw.target_port == 0 {
            return Err(ProxyError::config(format!("service {}: target port must not be 0", name)));
        }
        let flow = FlowMode::parse(&raw.flow)
            .map_err(|e| ProxyError::config(format!("service {}: {}", name, e)))?;
        let ip_access = resolve_policy(name, "IPAccess", &raw.ip_access)?;

        let mc = &raw.minecraft;
        let ping_mode = PingMode::parse(&mc.ping_mode)
            .map_err(|e| ProxyError::config(format!("service {}: {}", name, e)))?;
        let name_access = resolve_policy(name, "NameAccess", &mc.name_access)?;

        let hostname_rewrite = mc.enable_hostname_rewrite.then(|| {
            if mc.rewritten_hostname.is_empty() {
                raw.target_address.clone()
            } else {
                mc.rewritten_hostname.clone()
            }
        });

        let any_dest_root = if mc.enable_any_dest {
            let root = mc.any_dest_settings.wildcard_root_domain_name.trim();
            if root.is_empty() {
                return Err(ProxyError::config(format!(
                    "service {}: WildcardRootDomainName is required when EnableAnyDest is on",
                    name
                )));
            }
            Some(root.to_string())
        } else {
            None
        };

        Ok(Self {
            name: raw.name.clone(),
            listen: raw.listen,
            target_host: raw.target_address.clone(),
            target_port: raw.target_port,
            flow,
            ip_access,
            minecraft: MinecraftConfig {
                hostname_rewrite,
                ignore_fml_suffix: mc.ignore_fml_suffix,
                any_dest_root,
                motd_description: minecraft::expand_motd(
                    &mc.motd_description,
                    &raw.name,
                    &raw.target_address,
                    raw.target_port,
                ),
                motd_favicon: minecraft::resolve_favicon(&mc.motd_favicon),
                ping_mode,
                online: OnlineCount {
                    max: mc.online_count.max,
                    shown_online: (mc.online_count.online >= 0).then_some(mc.online_count.online),
                    cap_enabled: mc.online_count.enable_max_limit,
                },
                name_access,
            },
        })
    }

    /// Tags that must exist in the lists for this service to run
    pub fn required_tags(&self) -> impl Iterator<Item = &str> {
        let ip = self.ip_access.is_enabled().then_some(&self.ip_access.tags);
        let names = self
            .minecraft
            .name_access
            .is_enabled()
            .then_some(&self.minecraft.name_access.tags);
        ip.into_iter()
            .chain(names)
            .flat_map(|tags| tags.iter().map(String::as_str))
    }

    /// Check every referenced tag against the current lists
    pub fn check_tags(&self, lists: &AccessLists) -> Result<()> {
        let missing: Vec<&str> = self.required_tags().filter(|t| !lists.has_tag(t)).collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ProxyError::config(format!(
                "service {}: list tags not found: {}",
                self.name,
                missing.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_cli_args() -> CliArgs {
        CliArgs {
            config: PathBuf::from(DEFAULT_CONFIG_FILE),
            log_level: "info".to_string(),
            reload_interval: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            status_timeout: Duration::from_secs(10),
            buffer_size: 32 * 1024,
            tcp_backlog: 1024,
            tcp_nodelay: true,
            multiple_lanes: 4,
        }
    }

    fn service_json(extra_minecraft: &str) -> String {
        format!(
            r#"{{
                "Name": "Lobby",
                "TargetAddress": "mc.example.com",
                "TargetPort": 25565,
                "Listen": 25566,
                "Flow": "origin",
                "Minecraft": {{ {} }}
            }}"#,
            extra_minecraft
        )
    }

    fn resolve_json(text: &str) -> Result<ServiceConfig> {
        let raw: ServiceFile = serde_json::from_str(text).unwrap();
        ServiceConfig::resolve(&raw)
    }

    #[test]
    fn test_cli_args_validate_success() {
        assert!(create_test_cli_args().validate().is_ok());
    }

    #[test]
    fn test_cli_args_validate_rejects_bad_values() {
        let mut cli = create_test_cli_args();
        cli.connect_timeout = Duration::ZERO;
        assert!(cli.validate().is_err());

        let mut cli = create_test_cli_args();
        cli.buffer_size = 512;
        assert!(cli.validate().is_err());

        let mut cli = create_test_cli_args();
        cli.multiple_lanes = 1;
        assert!(cli.validate().is_err());

        let mut cli = create_test_cli_args();
        cli.log_level = "loud".to_string();
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_conn_config_from_cli() {
        let conn = ConnConfig::from_cli(&create_test_cli_args());
        assert_eq!(conn.connect_timeout, Duration::from_secs(5));
        assert_eq!(conn.multiple_lanes, 4);
        assert!(conn.tcp_nodelay);
    }

    #[test]
    fn test_resolve_minimal_service() {
        let svc = resolve_json(&service_json("")).unwrap();
        assert_eq!(svc.flow, FlowMode::Origin);
        assert!(!svc.ip_access.is_enabled());
        assert!(!svc.minecraft.synthesizes_status());
        assert_eq!(svc.minecraft.ping_mode, PingMode::Normal);
        assert_eq!(svc.minecraft.hostname_rewrite, None);
        assert_eq!(svc.minecraft.online.cap(), None);
    }

    #[test]
    fn test_tcp_nodelay_can_be_disabled() {
        let cli = CliArgs::try_parse_from(["zbproxy", "--tcp_nodelay", "false"]).unwrap();
        assert!(!cli.tcp_nodelay);
        assert!(!ConnConfig::from_cli(&cli).tcp_nodelay);

        let cli = CliArgs::try_parse_from(["zbproxy"]).unwrap();
        assert!(cli.tcp_nodelay);
    }

    #[test]
    fn test_intercepts_only_with_minecraft_features() {
        assert!(!resolve_json(&service_json("")).unwrap().minecraft.intercepts());
        for extra in [
            r#""EnableHostnameRewrite": true"#,
            r#""MotdDescription": "hi""#,
            r#""OnlineCount": { "Max": 5, "EnableMaxLimit": true }"#,
            r#""NameAccess": { "Mode": "block", "ListTags": ["banned"] }"#,
            r#""EnableAnyDest": true, "AnyDestSettings": { "WildcardRootDomainName": "example.com" }"#,
        ] {
            let svc = resolve_json(&service_json(extra)).unwrap();
            assert!(svc.minecraft.intercepts(), "{}", extra);
        }
        // A shown count alone changes nothing without a status response
        let svc = resolve_json(&service_json(r#""OnlineCount": { "Max": 5, "Online": 3 }"#)).unwrap();
        assert!(!svc.minecraft.intercepts());
    }

    #[test]
    fn test_resolve_expands_motd_once() {
        let svc = resolve_json(&service_json(
            r#""MotdDescription": "{NAME} -> {HOST}:{PORT}", "MotdFavicon": "{DEFAULT_MOTD}""#,
        ))
        .unwrap();
        assert_eq!(svc.minecraft.motd_description, "Lobby -> mc.example.com:25565");
        assert_eq!(svc.minecraft.motd_favicon, minecraft::DEFAULT_FAVICON);
        assert!(svc.minecraft.synthesizes_status());
    }

    #[test]
    fn test_resolve_rewrite_defaults_to_target() {
        let svc = resolve_json(&service_json(r#""EnableHostnameRewrite": true"#)).unwrap();
        assert_eq!(svc.minecraft.hostname_rewrite.as_deref(), Some("mc.example.com"));

        let svc = resolve_json(&service_json(
            r#""EnableHostnameRewrite": true, "RewrittenHostname": "play.example.com""#,
        ))
        .unwrap();
        assert_eq!(svc.minecraft.hostname_rewrite.as_deref(), Some("play.example.com"));
    }

    #[test]
    fn test_resolve_online_count() {
        let svc = resolve_json(&service_json(
            r#""OnlineCount": { "Max": 10, "Online": 3, "EnableMaxLimit": true }"#,
        ))
        .unwrap();
        assert_eq!(svc.minecraft.online.cap(), Some(10));
        assert_eq!(svc.minecraft.online.shown_online, Some(3));

        let svc = resolve_json(&service_json(r#""OnlineCount": { "Max": 10 }"#)).unwrap();
        assert_eq!(svc.minecraft.online.shown_online, None);
    }

    #[test]
    fn test_resolve_rejects_unknown_flow() {
        let text = service_json("").replace("\"origin\"", "\"warp\"");
        assert!(matches!(resolve_json(&text), Err(ProxyError::Config(_))));
    }

    #[test]
    fn test_resolve_rejects_zero_ports() {
        let text = service_json("").replace("\"Listen\": 25566", "\"Listen\": 0");
        assert!(resolve_json(&text).is_err());
        let text = service_json("").replace("\"TargetPort\": 25565", "\"TargetPort\": 0");
        assert!(resolve_json(&text).is_err());
    }

    #[test]
    fn test_resolve_rejects_null_tags() {
        let text = service_json(r#""NameAccess": { "Mode": "allow" }"#);
        assert!(resolve_json(&text).is_err());
    }

    #[test]
    fn test_resolve_any_dest_requires_root() {
        assert!(resolve_json(&service_json(r#""EnableAnyDest": true"#)).is_err());
        let svc = resolve_json(&service_json(
            r#""EnableAnyDest": true, "AnyDestSettings": { "WildcardRootDomainName": "example.com" }"#,
        ))
        .unwrap();
        assert_eq!(svc.minecraft.any_dest_root.as_deref(), Some("example.com"));
    }

    #[test]
    fn test_required_tags_and_check() {
        let mut raw: ServiceFile = serde_json::from_str(&service_json(
            r#""NameAccess": { "Mode": "block", "ListTags": ["banned"] }"#,
        ))
        .unwrap();
        raw.ip_access = AccessFile {
            mode: "allow".to_string(),
            list_tags: Some(vec!["staff".to_string()]),
        };
        let svc = ServiceConfig::resolve(&raw).unwrap();
        let tags: Vec<&str> = svc.required_tags().collect();
        assert_eq!(tags, vec!["staff", "banned"]);

        let lists = AccessLists::from_entries([("staff", vec![])]);
        assert!(svc.check_tags(&lists).is_err());
        let lists = AccessLists::from_entries([("staff", vec![]), ("banned", vec![])]);
        assert!(svc.check_tags(&lists).is_ok());
    }

    #[test]
    fn test_generated_default_resolves() {
        let file = ConfigFile::generated_default();
        let svc = ServiceConfig::resolve(&file.services[0]).unwrap();
        assert_eq!(svc.listen, 25565);
        assert_eq!(svc.flow, FlowMode::Auto);
        assert_eq!(svc.minecraft.hostname_rewrite.as_deref(), Some("mc.hypixel.net"));
        assert!(svc.minecraft.motd_description.contains("HypixelDefault"));
    }

    #[test]
    fn test_load_or_create_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ZBProxy.json");
        let created = ConfigFile::load_or_create(&path).unwrap();
        assert!(path.exists());

        let reloaded = ConfigFile::load(&path).unwrap();
        assert_eq!(reloaded.services.len(), created.services.len());
        assert_eq!(reloaded.services[0].name, "HypixelDefault");
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"IPAccess\""));
        assert!(text.contains("\"IgnoreFMLSuffix\""));
    }

    #[test]
    fn test_lists_parse() {
        let file = ConfigFile::from_json(
            r#"{ "Services": [], "Lists": { "banned": ["10.0.0.5", "Griefer"] } }"#,
        )
        .unwrap();
        let lists = file.access_lists();
        assert!(lists.contains("banned", "Griefer"));
        assert!(!lists.contains("banned", "Alex"));
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        assert!(matches!(ConfigFile::from_json("{ nope"), Err(ProxyError::Config(_))));
    }
}
