//! Host fact collection.
//!
//! Facts are best effort: anything that cannot be read is left at its
//! default and the daemon carries on.

use std::fs;
use std::path::Path;

use tracing::debug;
use uuid::Uuid;

use vigil_config::{Config, StatusPaths};
use vigil_status::{DiskSnapshot, Environment, MemorySnapshot, OsType, SessionFacts};

const HOST_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::host");
const BOOT_ID_PATH: &str = "/proc/sys/kernel/random/boot_id";
const MACHINE_ID_PATH: &str = "/etc/machine-id";
const OS_RELEASE_PATH: &str = "/etc/os-release";

/// Source of host facts for the status record.
pub trait HostProbe: Send + Sync {
    /// Describes the host and this invocation.
    fn session_facts(&self, config: &Config, paths: &StatusPaths) -> SessionFacts;

    /// Samples memory and the filesystem holding the state directory.
    fn resources(&self, paths: &StatusPaths) -> (MemorySnapshot, DiskSnapshot);
}

/// Reads facts from the running system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHostProbe;

impl HostProbe for SystemHostProbe {
    fn session_facts(&self, config: &Config, paths: &StatusPaths) -> SessionFacts {
        let (memory, disk_space) = self.resources(paths);
        let facts = SessionFacts {
            version: env!("CARGO_PKG_VERSION").to_owned(),
            profile: config.profile(),
            os_type: OsType::current(),
            boot_id: read_uuid(Path::new(BOOT_ID_PATH)).unwrap_or_default(),
            boottime: boot_time(),
            host_id: read_uuid(Path::new(MACHINE_ID_PATH)),
            node_id: None,
            claim_id: None,
            environment: environment(),
            memory,
            disk_space,
        };
        debug!(
            target: HOST_TARGET,
            boot_id = %facts.boot_id,
            boottime = facts.boottime,
            "host facts collected"
        );
        facts
    }

    fn resources(&self, paths: &StatusPaths) -> (MemorySnapshot, DiskSnapshot) {
        (memory(), disk_space(paths.state_dir()))
    }
}

fn read_uuid(path: &Path) -> Option<Uuid> {
    let contents = fs::read_to_string(path).ok()?;
    Uuid::parse_str(contents.trim()).ok()
}

#[cfg(target_os = "linux")]
fn boot_time() -> u64 {
    nix::sys::sysinfo::sysinfo()
        .map(|info| vigil_status::unix_secs().saturating_sub(info.uptime().as_secs()))
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn boot_time() -> u64 {
    0
}

#[cfg(target_os = "linux")]
fn memory() -> MemorySnapshot {
    nix::sys::sysinfo::sysinfo()
        .map(|info| MemorySnapshot {
            ram_total_bytes: info.ram_total(),
            ram_available_bytes: info.ram_unused(),
            swap_total_bytes: info.swap_total(),
            swap_free_bytes: info.swap_free(),
        })
        .unwrap_or_default()
}

#[cfg(not(target_os = "linux"))]
fn memory() -> MemorySnapshot {
    MemorySnapshot::default()
}

fn disk_space(directory: &Path) -> DiskSnapshot {
    use nix::sys::statvfs::{FsFlags, statvfs};

    let Ok(stats) = statvfs(directory) else {
        return DiskSnapshot::default();
    };
    let fragment = u64::from(stats.fragment_size());
    DiskSnapshot {
        total_bytes: u64::from(stats.blocks()).saturating_mul(fragment),
        free_bytes: u64::from(stats.blocks_available()).saturating_mul(fragment),
        inodes_total: u64::from(stats.files()),
        inodes_free: u64::from(stats.files_available()),
        read_only: stats.flags().contains(FsFlags::ST_RDONLY),
    }
}

fn environment() -> Environment {
    let mut environment = Environment {
        populated: true,
        ..Environment::default()
    };
    environment.install_type.set(install_type());
    environment.container.set(container());
    environment.virtualization.set(virtualization());
    if let Ok(uts) = nix::sys::utsname::uname() {
        environment
            .architecture
            .set(&uts.machine().to_string_lossy());
        environment
            .kernel_version
            .set(&uts.release().to_string_lossy());
        environment.os_name.set(&uts.sysname().to_string_lossy());
    }
    if let Ok(contents) = fs::read_to_string(OS_RELEASE_PATH) {
        apply_os_release(&mut environment, &contents);
    }
    environment
}

/// Copies the identifying fields of an `os-release` file.
pub(crate) fn apply_os_release(environment: &mut Environment, contents: &str) {
    for line in contents.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let unquoted = value
            .trim()
            .trim_matches(|quote: char| quote == '"' || quote == '\'');
        let field = match key.trim() {
            "NAME" => &mut environment.os_name,
            "VERSION_ID" => &mut environment.os_version,
            "ID" => &mut environment.os_id,
            "ID_LIKE" => &mut environment.os_id_like,
            _ => continue,
        };
        field.set(unquoted);
    }
}

fn install_type() -> &'static str {
    if Path::new("/.dockerenv").exists() || Path::new("/run/.containerenv").exists() {
        "container-image"
    } else {
        "binary"
    }
}

fn container() -> &'static str {
    if Path::new("/.dockerenv").exists() {
        "docker"
    } else if Path::new("/run/.containerenv").exists() {
        "podman"
    } else {
        "none"
    }
}

fn virtualization() -> &'static str {
    let flagged = fs::read_to_string("/proc/cpuinfo")
        .map(|cpuinfo| {
            cpuinfo
                .lines()
                .filter(|line| line.starts_with("flags"))
                .any(|line| line.split_whitespace().any(|flag| flag == "hypervisor"))
        })
        .unwrap_or(false);
    if flagged { "hypervisor" } else { "none" }
}
