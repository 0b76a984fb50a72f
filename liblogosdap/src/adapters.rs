// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    env, fs,
    os::unix::fs::PermissionsExt as _,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context};
use tracing::{info, instrument};

use crate::{
    config,
    errors::BrokerError,
    transport::{
        socket::SocketTransport,
        ssh::{SshTransport, SshTunnelConfig},
        stdio::StdioTransport,
        SpawnSpec, Transport,
    },
};

/// How an adapter is reached once running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Socket,
}

/// A known debug adapter: what it is called, how to start it, and
/// how to talk to it.
#[derive(Debug, Clone)]
pub struct AdapterDescriptor {
    pub adapter_type: String,
    pub display_name: String,
    pub kind: TransportKind,
    /// Executable plus arguments. For socket adapters this is the
    /// server process to spawn before dialing (empty command means
    /// the user runs the server themselves).
    pub command: String,
    pub args: Vec<String>,
    /// Dial target for socket adapters.
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// One project-detection verdict.
#[derive(Debug, Clone)]
pub struct DetectedDebugger {
    pub adapter_type: String,
    pub display_name: String,
    pub confidence: Confidence,
    pub reason: String,
}

/// Resolves adapter types to transports and sniffs workspaces for
/// the debuggers that make sense in them.
pub struct AdapterManager {
    descriptors: Vec<AdapterDescriptor>,
    connect_timeout: std::time::Duration,
}

impl AdapterManager {
    /// Build the registry of built-in descriptors, applying any
    /// spawn-command overrides from the broker config.
    pub fn new(config: &config::Config) -> anyhow::Result<Self> {
        let connect_timeout = config
            .connect_timeout_secs
            .map(std::time::Duration::from_secs)
            .unwrap_or(crate::consts::CONNECT_TIMEOUT);
        let mut descriptors = builtin_descriptors();
        if let Some(overrides) = &config.adapters {
            for descriptor in descriptors.iter_mut() {
                let Some(spec) = overrides.get(&descriptor.adapter_type) else {
                    continue;
                };
                if let Some(cmd) = &spec.command {
                    let mut parts = shell_words::split(cmd)
                        .with_context(|| format!("parsing adapter command override '{cmd}'"))?;
                    if parts.is_empty() {
                        return Err(anyhow!(
                            "empty command override for adapter '{}'",
                            descriptor.adapter_type
                        ));
                    }
                    descriptor.command = parts.remove(0);
                    descriptor.args = parts;
                }
                if let Some(host) = &spec.host {
                    descriptor.host = host.clone();
                }
                if let Some(port) = spec.port {
                    descriptor.port = port;
                }
            }
        }
        Ok(AdapterManager { descriptors, connect_timeout })
    }

    pub fn available_adapters(&self) -> &[AdapterDescriptor] {
        &self.descriptors
    }

    /// The subset of descriptors whose executable actually resolves
    /// on this host.
    pub fn installed_adapters(&self) -> Vec<&AdapterDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| resolve_executable(&d.command).is_some())
            .collect()
    }

    pub fn descriptor(&self, adapter_type: &str) -> Option<&AdapterDescriptor> {
        self.descriptors.iter().find(|d| d.adapter_type == adapter_type)
    }

    /// Build a not-yet-connected transport for the given adapter
    /// type.
    #[instrument(skip_all, fields(adapter = adapter_type))]
    pub fn create_transport(
        &self,
        adapter_type: &str,
        workspace_folder: &Path,
    ) -> anyhow::Result<Box<dyn Transport>> {
        let descriptor = self.descriptor(adapter_type).ok_or_else(|| {
            anyhow!(BrokerError::AdapterNotFound(String::from(adapter_type)))
        })?;

        match descriptor.kind {
            TransportKind::Stdio => {
                let exe = resolve_executable(&descriptor.command).ok_or_else(|| {
                    anyhow!(BrokerError::AdapterNotFound(format!(
                        "{} ('{}' is not installed)",
                        adapter_type, descriptor.command
                    )))
                })?;
                info!("resolved adapter executable {:?}", exe);
                Ok(Box::new(StdioTransport::new(SpawnSpec {
                    command: exe.to_string_lossy().into_owned(),
                    args: descriptor.args.clone(),
                    cwd: Some(workspace_folder.to_path_buf()),
                    env: vec![],
                })))
            }
            // socket adapters run as their own server (possibly on
            // another machine), so there is no local executable to
            // insist on
            TransportKind::Socket => Ok(Box::new(
                SocketTransport::new(descriptor.host.clone(), descriptor.port)
                    .with_connect_timeout(self.connect_timeout),
            )),
        }
    }

    /// Build a transport that reaches a remote adapter through an
    /// SSH tunnel. Path mapping between the local and remote source
    /// trees is handled entirely inside the transport.
    pub fn create_ssh_transport(&self, config: SshTunnelConfig) -> Box<dyn Transport> {
        Box::new(SshTransport::new(config))
    }
}

/// Inspect a workspace and report which debuggers look relevant,
/// most confident first.
pub fn detect_debuggers(workspace_folder: &Path) -> Vec<DetectedDebugger> {
    let has = |name: &str| workspace_folder.join(name).exists();
    let mut found = vec![];

    if has("package.json") {
        let (confidence, reason) = if has("tsconfig.json") {
            (Confidence::High, "package.json with tsconfig.json")
        } else {
            (Confidence::Medium, "package.json")
        };
        found.push(DetectedDebugger {
            adapter_type: String::from("node"),
            display_name: String::from("Node.js"),
            confidence,
            reason: String::from(reason),
        });
    } else if has("tsconfig.json") {
        found.push(DetectedDebugger {
            adapter_type: String::from("node"),
            display_name: String::from("Node.js (TypeScript)"),
            confidence: Confidence::Medium,
            reason: String::from("tsconfig.json"),
        });
    }

    let python_secondary = has("requirements.txt") || has("pyproject.toml");
    if has("manage.py") {
        found.push(DetectedDebugger {
            adapter_type: String::from("python"),
            display_name: String::from("Python (Django)"),
            confidence: if python_secondary { Confidence::High } else { Confidence::Medium },
            reason: String::from("manage.py"),
        });
    } else if has("app.py") {
        found.push(DetectedDebugger {
            adapter_type: String::from("python"),
            display_name: String::from("Python (Flask)"),
            confidence: if python_secondary { Confidence::High } else { Confidence::Medium },
            reason: String::from("app.py"),
        });
    } else if has("main.py") {
        found.push(DetectedDebugger {
            adapter_type: String::from("python"),
            display_name: String::from("Python"),
            confidence: if python_secondary { Confidence::High } else { Confidence::Medium },
            reason: String::from("main.py"),
        });
    } else if python_secondary {
        found.push(DetectedDebugger {
            adapter_type: String::from("python"),
            display_name: String::from("Python"),
            confidence: Confidence::Low,
            reason: String::from("requirements.txt or pyproject.toml"),
        });
    }

    if has("go.mod") {
        found.push(DetectedDebugger {
            adapter_type: String::from("go"),
            display_name: String::from("Go (Delve)"),
            confidence: if has("main.go") { Confidence::High } else { Confidence::Medium },
            reason: String::from("go.mod"),
        });
    }

    if has("CMakeLists.txt") {
        let confidence = if has("Makefile") { Confidence::High } else { Confidence::Medium };
        for (adapter_type, display_name) in
            [("cppdbg", "C/C++ (gdb)"), ("lldb", "C/C++ (lldb)")]
        {
            found.push(DetectedDebugger {
                adapter_type: String::from(adapter_type),
                display_name: String::from(display_name),
                confidence,
                reason: String::from("CMakeLists.txt"),
            });
        }
    } else if has("Makefile") {
        for (adapter_type, display_name) in
            [("cppdbg", "C/C++ (gdb)"), ("lldb", "C/C++ (lldb)")]
        {
            found.push(DetectedDebugger {
                adapter_type: String::from(adapter_type),
                display_name: String::from(display_name),
                confidence: Confidence::Low,
                reason: String::from("Makefile"),
            });
        }
    }

    found.sort_by(|a, b| b.confidence.cmp(&a.confidence));
    found
}

/// Resolve a command name against $PATH, accepting absolute and
/// relative paths as-is when they point at an executable file.
pub fn resolve_executable(command: &str) -> Option<PathBuf> {
    let direct = Path::new(command);
    if direct.components().count() > 1 {
        return is_executable(direct).then(|| direct.to_path_buf());
    }

    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var).map(|dir| dir.join(command)).find(|p| is_executable(p))
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn builtin_descriptors() -> Vec<AdapterDescriptor> {
    vec![
        AdapterDescriptor {
            adapter_type: String::from("node"),
            display_name: String::from("Node.js"),
            kind: TransportKind::Stdio,
            command: String::from("js-debug-adapter"),
            args: vec![],
            host: String::new(),
            port: 0,
        },
        AdapterDescriptor {
            adapter_type: String::from("python"),
            display_name: String::from("Python (debugpy)"),
            kind: TransportKind::Stdio,
            command: String::from("python3"),
            args: vec![String::from("-m"), String::from("debugpy.adapter")],
            host: String::new(),
            port: 0,
        },
        AdapterDescriptor {
            adapter_type: String::from("go"),
            display_name: String::from("Go (Delve)"),
            kind: TransportKind::Socket,
            command: String::from("dlv"),
            args: vec![String::from("dap")],
            host: String::from("127.0.0.1"),
            port: 38697,
        },
        AdapterDescriptor {
            adapter_type: String::from("cppdbg"),
            display_name: String::from("C/C++ (gdb)"),
            kind: TransportKind::Stdio,
            command: String::from("OpenDebugAD7"),
            args: vec![],
            host: String::new(),
            port: 0,
        },
        AdapterDescriptor {
            adapter_type: String::from("lldb"),
            display_name: String::from("C/C++ (lldb)"),
            kind: TransportKind::Stdio,
            command: String::from("lldb-dap"),
            args: vec![],
            host: String::new(),
            port: 0,
        },
    ]
}
