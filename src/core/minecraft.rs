//! Minecraft-level decisions that do not touch sockets: status JSON,
//! disconnect messages, destination and hostname rewriting.

use serde_json::json;

use super::protocol::{split_fml_marker, Handshake};
use crate::error::{ProxyError, Result};

/// Favicon value that selects the built-in icon
pub const DEFAULT_FAVICON_SENTINEL: &str = "{DEFAULT_MOTD}";

/// Built-in 64x64 server icon
pub const DEFAULT_FAVICON: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAEAAAABACAMAAACdt4HsAAAAAXNSR0IB2cksfwAAAAlwSFlzAAALEwAACxMBAJqcGAAAAeZQTFRF/+IAzrcHKyodHx8fR0IZ89cC2MAFKikdw64IIyMeXFQX/eAAxa8IIiIfrpwLISAfgHQRnYwOuKQKaF4VJyYecGUUj4AQ99sBUUsYMS4d38YE+98AWVEXrJkM7dMCQDsaPzsb9NgCTkgYuqYJ3sYEUEoYODQcJiUe0LkHW1MX+94B178GMC4dcmgTwq0I5s0DpJINoZAN69shjLi/i7i/ZZfEU4fHVIfHeqnB0NFOZqr/f7PWY1sVtcd7n7+g+NwBm76nv8tq7tMCRkEagLPU4Nc06M4DPjob4McE49cvgLTUxMxjnL6lpMCYi6B7s8d/ssZ/a4iJQmWPZaj7NUdcXnNvYJ7sMkVcu8pxW5XdLjtMNjMcssaBVovNKTI9qMORUYG+JCgtnr6hTHiu+N8MlbuxR26f7twci7fBQ2SPfXES5dgsgbTRPVuA29U8ebLgxMxdiHoQ0tFLb63w0dFMOFFverHe3NU6PVl9hLTN5tkpQWKLj7m78d0XRWqZmb2q++EGSnOnICIkTny0rsSHqpgMJSoxUoTCuch1KTNAV43QZHlxSXKkcY6IdrDl+N4EZqn8lLuy2tQ+t8h40tJMmLyr8N0ZtqIKerHdd7DjloYPkbq3dGkT59ooq8OMxM1ixs1gzbYH1nu7OAAAA1JJREFUeJyFl/dfE0EQxZesRkPU0CIlGCACIiAWrBhFQQELotjF3sGK2HvD3huK2P5TL7nL7bwZPnvvR/bNl83eu5k9pajyQpppylQwhKdxg0JNj3BDfhQMM2baAWpWjBMK7AYOUIUcoAutBgFQBRwQK7IZJEAVc0JJHqxH4wCYLQClZZxQXgGGRCUF6DmCkKzihOokGGpSFBCbKwi15ZxQh3FI1hOAntcgCHklnDC/EQxNIQLQzWFBKBJxWICGlggB6PqFgiDjwE57EQXwxGck4qAXT2pwATzxS1pbly5bzrRiZasn1xSnAJb4VW02rXZNiTQFYOLXWAFrPVd7igIg8eusgPU5W0cnAUDiN1gBG31fVzcB0MRb69vIVnuaCcAkfpO1fjM9rQYK8BO/xQrYinmArHiJ77UCtlkAXuL7iLbv6O+H+p27WiwAnnhHid1Qv2evDtVaADzxSu2D+v0HHM9AjwXA+8tBqD90OGvq7jCGOk7A/nIE6o8e80ypGt+RrOYE2l+OQ/0JY6pM+J4K0QAHurylk6eg/jQ1pU0DkAOz0/2JZ85C/SCahsw+xcDUqXbnz+fOQ/0FbiJPXE7U4qi6eAnqL6e5hz5x2UKHr4zQ8pGrbvsARUgkRQu9Bv/++g3ltg9UqMkH4MDU+ibU37qdNTntg6nejDwYmPoO1N+955l6mjmhrNQn0IF5H+ofPPRNDeKJV5pjMAPzEdT30mTLJ04WvYH5+AnUP1WgUQvAHZjPnkP9C8U0bAFkBubLV1D/OsoB0WILwInDG6gf7H/bx8RvQIwfxw1IveOBYoD3HwIAHx1T1wAF4I/8FFDf1pdxhUmg1DAAPgcBvmRtJFBKj1LA1yDAN9c3FjMA+lKq7wH1P3LGcQOAORG0gZ++c8IAyJz4FQT47QMa8w3AzIk/QYC/ZrPe6+tOJjInXPHEaz2uuDq6DYDOiax44h2NCUK2v+RmY5q9NfLOX/JPEDJx8IfrEFuULbS8VhCc/mKmM78ZQOKzqpIX4ln0lsZvBmHRQrMDCzVOAJEWtihbKD+pjMgymROuxsTI4yeFADonvA1ywCR3KFgmc8LVhCCIOxQu80DlEm8kvtHYepwdU42Yyfwbja+zb20v8VT4jfYfTXskk4+wbR0AAAAASUVORK5CYII=";

/// Pong payload sent in `0ms` mode
pub const ZERO_MS_PONG: i64 = i64::MAX;

/// How the ping after a synthesized status response is answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PingMode {
    /// Close without answering
    Disconnect,
    /// Answer with a canned payload
    ZeroMs,
    /// Echo the client's payload
    #[default]
    Normal,
}

impl PingMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "disconnect" => Ok(PingMode::Disconnect),
            "0ms" => Ok(PingMode::ZeroMs),
            "" | "normal" => Ok(PingMode::Normal),
            other => Err(ProxyError::config(format!("unknown ping mode '{}'", other))),
        }
    }
}

/// Value substituted for `{INFO}`
pub fn build_info() -> String {
    format!("ZBProxy {}", env!("CARGO_PKG_VERSION"))
}

/// Expand `{INFO}`, `{NAME}`, `{HOST}` and `{PORT}` in one pass
///
/// Substituted text is never rescanned, so a service named `{HOST}` stays
/// literal.
pub fn expand_motd(template: &str, name: &str, host: &str, port: u16) -> String {
    let info = build_info();
    let port = port.to_string();
    let placeholders: [(&str, &str); 4] = [
        ("{INFO}", &info),
        ("{NAME}", name),
        ("{HOST}", host),
        ("{PORT}", &port),
    ];

    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;
    'scan: while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        for (key, value) in placeholders {
            if let Some(after) = rest.strip_prefix(key) {
                out.push_str(value);
                rest = after;
                continue 'scan;
            }
        }
        out.push('{');
        rest = &rest[1..];
    }
    out.push_str(rest);
    out
}

/// Resolve the favicon setting, honouring the built-in sentinel
pub fn resolve_favicon(configured: &str) -> String {
    if configured == DEFAULT_FAVICON_SENTINEL {
        DEFAULT_FAVICON.to_string()
    } else {
        configured.to_string()
    }
}

/// Status response document
pub fn status_json(protocol: i32, description: &str, favicon: &str, max: i64, online: i64) -> String {
    let mut doc = json!({
        "version": {
            "name": build_info(),
            "protocol": protocol,
        },
        "players": {
            "max": max,
            "online": online,
            "sample": [],
        },
        "description": {
            "text": description,
        },
    });
    if !favicon.is_empty() {
        doc["favicon"] = json!(favicon);
    }
    doc.to_string()
}

/// Disconnect reason when the online cap is reached
pub fn server_full_message(service: &str, player: &str, max: i64) -> String {
    json!({
        "text": format!(
            "§c§lThis server is full!§r\n§7Sorry {}, §e{}§7 only allows §e{}§7 players at a time.\n§7Please try again later.",
            player, service, max
        ),
    })
    .to_string()
}

/// Disconnect reason when the name access list rejects a player
pub fn kick_message(service: &str, player: &str) -> String {
    json!({
        "text": format!(
            "§c§lYou are not allowed to join this server.§r\n§7Player §e{}§7 was rejected by §e{}§7.",
            player, service
        ),
    })
    .to_string()
}

/// Where a login should be relayed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// The service's configured target
    Static,
    /// Host label taken from the client's virtual host
    Dynamic(String),
}

/// Pick the backend for a login
///
/// With a wildcard root configured, `foo.example.com` under `example.com`
/// routes to `foo`. The Forge marker and one trailing dot are ignored. A
/// host equal to the root, or not under it, uses the static target.
pub fn resolve_destination(client_host: &str, wildcard_root: Option<&str>) -> Destination {
    let Some(root) = wildcard_root.filter(|r| !r.is_empty()) else {
        return Destination::Static;
    };
    let (host, _) = split_fml_marker(client_host);
    let host = host.strip_suffix('.').unwrap_or(host);
    let Some(label) = host.strip_suffix(root) else {
        return Destination::Static;
    };
    let label = label.strip_suffix('.').unwrap_or(label);
    if label.is_empty() {
        Destination::Static
    } else {
        Destination::Dynamic(label.to_string())
    }
}

/// Hostname to send upstream when rewriting is enabled
pub fn rewritten_host(client_host: &str, rewritten: &str, ignore_fml_suffix: bool) -> String {
    match split_fml_marker(client_host) {
        (_, Some(marker)) if !ignore_fml_suffix => format!("{}{}", rewritten, marker),
        _ => rewritten.to_string(),
    }
}

/// Handshake forwarded to the backend when rewriting is enabled
pub fn rewrite_handshake(
    client: &Handshake,
    rewritten: &str,
    ignore_fml_suffix: bool,
    target_port: u16,
) -> Handshake {
    Handshake {
        protocol_version: client.protocol_version,
        host: rewritten_host(&client.host, rewritten, ignore_fml_suffix),
        port: target_port,
        next_state: client.next_state,
    }
}
