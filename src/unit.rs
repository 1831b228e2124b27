/// Naming rules for the watched systemd unit.
///
/// A configured backup name maps onto `restic-backups-{name}.service`, the
/// unit naming scheme used by the NixOS restic module. Names that are already
/// full unit names pass through untouched.
use nix::unistd::gethostname;

const UNIT_PREFIX: &str = "restic-backups-";
const UNIT_SUFFIX: &str = ".service";

/// The service currently being watched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    /// Service name as shown in notifications.
    pub name: String,
    /// Fully qualified systemd unit whose journal is followed.
    pub unit: String,
}

/// Resolve the configured name against this machine's hostname.
pub fn resolve(configured: &str) -> WatchTarget {
    resolve_with_host(configured, host_name().as_deref())
}

/// Derive the watch target from a configured name and an optional host name.
///
/// An empty or whitespace-only name falls back to the host name, then to
/// the literal "home". Total over its inputs; there is no error path.
pub fn resolve_with_host(configured: &str, host: Option<&str>) -> WatchTarget {
    let trimmed = configured.trim();
    let name = if trimmed.is_empty() {
        host.unwrap_or("home").to_string()
    } else {
        trimmed.to_string()
    };

    let unit = if name.ends_with(UNIT_SUFFIX) {
        name.clone()
    } else {
        format!("{UNIT_PREFIX}{name}{UNIT_SUFFIX}")
    };

    WatchTarget { name, unit }
}

fn host_name() -> Option<String> {
    gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
}
