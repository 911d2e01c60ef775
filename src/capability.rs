// ABOUTME: Cluster feature level and remote executable presence detection
//
// Read-only queries: the cluster version, whether a binary can be executed
// inside the target container, and which container a pod's debug target is.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{DebugError, Result};
use crate::kube::Kubectl;
use crate::models::Target;
use crate::process::{ToolOutput, ToolRunner};

/// First release where `kubectl debug --target` ephemeral containers are GA
pub const EPHEMERAL_CONTAINERS_SINCE: ClusterVersion = ClusterVersion::new(1, 25, 0);

/// Directory provisioned binaries are staged in
pub const STAGING_DIR: &str = "/tmp";

lazy_static! {
    static ref VERSION_PREFIX: Regex =
        Regex::new(r"^v?(\d+)\.(\d+)(?:\.(\d+))?").expect("version regex is valid");
    /// kubectl's own failures, as opposed to the probed command's
    static ref TRANSPORT_FAILURE: Regex = Regex::new(
        r#"unable to upgrade connection|container not found|pods? "[^"]*" not found|Error from server|Unable to connect to the server"#
    )
    .expect("transport failure regex is valid");
}

/// Output showing the container runtime got as far as trying the executable.
/// containerd reports a missing binary as `error: Internal error occurred`
/// without kubectl's exit-code marker.
const EXEC_REACHED_MARKERS: [&str; 4] = [
    "command terminated with exit code",
    "OCI runtime exec failed",
    "executable file not found",
    "no such file or directory",
];

/// Numeric `major.minor.patch` of a server version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClusterVersion {
    /// Major version, `1` for every released Kubernetes
    pub major: u32,
    /// Minor version, the one feature gates follow
    pub minor: u32,
    /// Zero when the version string omits it
    pub patch: u32,
}

impl ClusterVersion {
    /// Version from its three components
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse `v1.26.3`, `1.27`, `v1.28.2-gke.1157000`; vendor suffixes are ignored
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = VERSION_PREFIX.captures(raw.trim())?;
        let number = |i: usize| -> Option<u32> {
            caps.get(i).map_or(Some(0), |m| m.as_str().parse().ok())
        };
        Some(Self::new(number(1)?, number(2)?, number(3)?))
    }

    /// Whether the cluster can run ephemeral debug containers
    pub fn supports_ephemeral_containers(self) -> bool {
        self >= EPHEMERAL_CONTAINERS_SINCE
    }
}

impl fmt::Display for ClusterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionPayload {
    server_version: Option<VersionInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionInfo {
    git_version: Option<String>,
}

/// Extract `serverVersion.gitVersion`; a missing field yields an empty version
pub fn parse_version_payload(payload: &str) -> Result<String> {
    let parsed: VersionPayload = serde_json::from_str(payload)
        .map_err(|e| DebugError::MalformedOutput(format!("kubectl version payload: {e}")))?;

    match parsed.server_version.and_then(|v| v.git_version) {
        Some(version) => Ok(version),
        None => {
            warn!("Cannot get the kubernetes server version");
            Ok(String::new())
        }
    }
}

/// Ask the cluster for its server version string
pub async fn detect_cluster_version<R: ToolRunner>(runner: &R, kubectl: &Kubectl) -> Result<String> {
    debug!("Getting the Kubernetes server version");
    let output = runner.run(&kubectl.version()).await?;
    if !output.success() {
        return Err(DebugError::cluster(
            "Cannot get kubernetes version",
            output.combined(),
        ));
    }

    let version = parse_version_payload(&output.stdout)?;
    debug!(version = %version, "Kubernetes server version");
    Ok(version)
}

/// Where a probed executable was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    /// On the container's PATH
    OnPath,
    /// Under the staging directory
    Staged(String),
    /// Neither location can be executed
    Absent,
}

impl Presence {
    /// Found anywhere
    pub const fn is_present(&self) -> bool {
        !matches!(self, Self::Absent)
    }

    /// How to invoke the executable, if it exists
    pub fn invocation(&self, name: &str) -> Option<String> {
        match self {
            Self::OnPath => Some(name.to_string()),
            Self::Staged(path) => Some(path.clone()),
            Self::Absent => None,
        }
    }
}

/// Path a provisioned binary lives at inside the container
pub fn staged_path(name: &str) -> String {
    format!("{STAGING_DIR}/{name}")
}

/// True when kubectl failed to reach the container at all
fn is_transport_failure(output: &ToolOutput) -> bool {
    let text = output.combined();
    let reached = EXEC_REACHED_MARKERS.iter().any(|marker| text.contains(marker));
    !reached && TRANSPORT_FAILURE.is_match(&text)
}

async fn probe<R: ToolRunner>(
    runner: &R,
    kubectl: &Kubectl,
    target: &Target,
    executable: &str,
) -> Result<bool> {
    let output = runner.run(&kubectl.exec(target, [executable, "--help"])).await?;
    if output.success() {
        return Ok(true);
    }
    if is_transport_failure(&output) {
        return Err(DebugError::cluster(
            format!("Cannot probe '{executable}' in {target}"),
            output.combined(),
        ));
    }
    debug!(executable = %executable, code = ?output.code, "Executable not runnable in container");
    Ok(false)
}

/// Probe `name` on the PATH, then under the staging directory
pub async fn locate_executable<R: ToolRunner>(
    runner: &R,
    kubectl: &Kubectl,
    target: &Target,
    name: &str,
) -> Result<Presence> {
    debug!(executable = %name, "Checking whether the executable exists in the container");
    if probe(runner, kubectl, target, name).await? {
        debug!(executable = %name, "Found on PATH");
        return Ok(Presence::OnPath);
    }

    let staged = staged_path(name);
    if probe(runner, kubectl, target, &staged).await? {
        debug!(executable = %staged, "Found in staging directory");
        return Ok(Presence::Staged(staged));
    }

    debug!(executable = %name, "Not found in the container");
    Ok(Presence::Absent)
}

/// Whether `name` runs either on the PATH or from the staging directory
pub async fn is_executable_present<R: ToolRunner>(
    runner: &R,
    kubectl: &Kubectl,
    target: &Target,
    name: &str,
) -> Result<bool> {
    Ok(locate_executable(runner, kubectl, target, name)
        .await?
        .is_present())
}

/// Fail unless `program` resolves on the local PATH
pub fn require_local_tool(program: &str) -> Result<()> {
    debug!(program = %program, "Checking that the tool is available");
    which::which(program)
        .map(|path| debug!(path = %path.display(), "Found tool"))
        .map_err(|_| DebugError::ToolNotFound(program.to_string()))
}

/// Pick the container: the requested one, or the pod's only container
pub fn choose_container(pod: &str, listing: &str) -> Result<String> {
    let names: Vec<String> = listing
        .split_whitespace()
        .map(|name| name.trim_matches(|c: char| c == '\'' || c == '"').to_string())
        .filter(|name| !name.is_empty())
        .collect();

    match names.as_slice() {
        [] => Err(DebugError::NoContainers(pod.to_string())),
        [only] => Ok(only.clone()),
        _ => Err(DebugError::AmbiguousTarget {
            pod: pod.to_string(),
            containers: names,
        }),
    }
}

/// Resolve the full target, querying the pod only when no container was given
pub async fn resolve_container<R: ToolRunner>(
    runner: &R,
    kubectl: &Kubectl,
    namespace: &str,
    pod: &str,
    requested: Option<&str>,
) -> Result<Target> {
    let container = if let Some(container) = requested {
        container.to_string()
    } else {
        debug!(pod = %pod, "Finding out the container name since it isn't provided");
        let output = runner.run(&kubectl.pod_containers(namespace, pod)).await?;
        if !output.success() {
            return Err(DebugError::cluster(
                format!("Cannot get containers of pod {pod}"),
                output.combined(),
            ));
        }
        let container = choose_container(pod, &output.stdout)?;
        info!(container = %container, "Using the pod's only container");
        container
    };

    Ok(Target {
        namespace: namespace.to_string(),
        pod: pod.to_string(),
        container,
    })
}
