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
    fs, io,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time,
};

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::fmt::format::FmtSpan;

pub mod adapters;
pub mod breakpoints;
pub mod client;
mod common;
pub mod config;
pub mod consts;
pub mod errors;
pub mod launch;
pub mod service;
pub mod session;
pub mod transport;
mod user;
pub mod wire;

use service::{BrokerEvent, DebugService};

/// The command line arguments that logosdap expects.
/// These can be directly parsed with clap or manually
/// constructed in order to present some other user
/// interface.
///
/// NOTE: You must check `version()` and handle it yourself
/// if it is set. Clap won't do a good job with its
/// automatic version support for a library.
#[derive(Parser, Debug)]
#[clap(author, about)]
pub struct Args {
    #[clap(
        short,
        long,
        action,
        long_help = "The file to write logs to

By default logs go to stderr."
    )]
    pub log_file: Option<String>,

    #[clap(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Show more in logs, may be provided multiple times",
    )]
    pub verbose: u8,

    #[clap(short, long, action, help = "a toml file containing configuration")]
    pub config_file: Option<String>,

    #[clap(subcommand)]
    pub command: Commands,
}

/// The subcommands that logosdap supports.
#[derive(Subcommand, Debug)]
pub enum Commands {
    #[clap(about = "Print version")]
    Version,

    #[clap(about = "Launch a configuration under its debug adapter and stream its output

The session runs until the debuggee exits or ctrl-c stops it. Breakpoint
stops are reported and automatically resumed; this command is a runner,
not a stepping UI.")]
    Run {
        #[clap(short, long, help = "The workspace folder, defaults to the current directory")]
        workspace: Option<PathBuf>,
        #[clap(help = "Name of the launch configuration, defaults to the first one")]
        config: Option<String>,
    },

    #[clap(about = "Report which debuggers look relevant to a workspace")]
    Detect {
        #[clap(help = "The workspace folder, defaults to the current directory")]
        workspace: Option<PathBuf>,
    },

    #[clap(about = "List known debug adapters and whether they are installed")]
    Adapters,

    #[clap(about = "Write a starter .logos/launch.json based on what the workspace contains")]
    InitConfig {
        #[clap(short, long, help = "The workspace folder, defaults to the current directory")]
        workspace: Option<PathBuf>,
        #[clap(
            short,
            long,
            help = "Generate the default template for one adapter type instead of auto-detecting"
        )]
        adapter: Option<String>,
    },

    #[clap(about = "Convert .vscode/launch.json (JSONC) into .logos/launch.json")]
    ImportVscode {
        #[clap(help = "The workspace folder, defaults to the current directory")]
        workspace: Option<PathBuf>,
    },
}

impl Args {
    /// Version indicates if the wrapping binary must display the
    /// version then exit.
    pub fn version(&self) -> bool {
        matches!(self.command, Commands::Version)
    }
}

/// Run the logosdap tool with the given arguments.
pub fn run(args: Args) -> anyhow::Result<()> {
    let trace_level = if args.verbose == 0 {
        tracing::Level::INFO
    } else if args.verbose == 1 {
        tracing::Level::DEBUG
    } else {
        tracing::Level::TRACE
    };
    if let Some(log_file) = args.log_file.clone() {
        let file = fs::File::create(log_file)?;
        tracing_subscriber::fmt()
            .with_max_level(trace_level)
            .with_thread_ids(true)
            .with_target(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(trace_level)
            .with_thread_ids(true)
            .with_target(false)
            .with_writer(io::stderr)
            .init();
    }

    let config = config::read_config(&args.config_file)?;
    let service = DebugService::new(config);

    let res: anyhow::Result<()> = match args.command {
        Commands::Version => return Err(anyhow!("wrapper binary must handle version")),
        Commands::Run { workspace, config } => {
            run_session(&service, resolve_workspace(workspace)?, config)
        }
        Commands::Detect { workspace } => detect(&service, resolve_workspace(workspace)?),
        Commands::Adapters => list_adapters(&service),
        Commands::InitConfig { workspace, adapter } => {
            init_config(&service, resolve_workspace(workspace)?, adapter)
        }
        Commands::ImportVscode { workspace } => {
            let workspace = resolve_workspace(workspace)?;
            let file = service.import_from_vscode(&workspace)?;
            println!(
                "imported {} configuration(s) into .logos/launch.json",
                file.configurations.len()
            );
            Ok(())
        }
    };

    if let Err(err) = res {
        error!("{:?}", err);
        std::process::exit(1);
    }

    Ok(())
}

fn resolve_workspace(workspace: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let dir = match workspace {
        Some(dir) => dir,
        None => std::env::current_dir().context("resolving current directory")?,
    };
    dir.canonicalize().with_context(|| format!("resolving workspace {dir:?}"))
}

/// The interactive run loop: start the session, mirror its console
/// to ours, resume any stops, and tear down on ctrl-c or debuggee
/// exit.
fn run_session(
    service: &Arc<DebugService>,
    workspace: PathBuf,
    config_name: Option<String>,
) -> anyhow::Result<()> {
    let (file, _source) = service
        .read_launch_config(&workspace)?
        .ok_or_else(|| anyhow!("no launch.json found; run `logosdap init-config` first"))?;
    let config = match &config_name {
        Some(name) => file
            .configurations
            .iter()
            .find(|c| &c.name == name)
            .cloned()
            .ok_or_else(|| anyhow!("no configuration named '{name}' in launch.json"))?,
        None => file
            .configurations
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("launch.json has no configurations"))?,
    };

    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
    service.subscribe(
        Some("output"),
        Box::new(|event| {
            if let BrokerEvent::Output { category, text, .. } = event {
                if category == "stderr" {
                    eprint!("{text}");
                } else {
                    print!("{text}");
                }
            }
        }),
    );
    {
        let resume_service = Arc::clone(service);
        service.subscribe(
            Some("stopped"),
            Box::new(move |event| {
                if let BrokerEvent::Stopped { id, reason, .. } = event {
                    eprintln!("logosdap: debuggee stopped ({reason}), resuming");
                    if let Err(err) = resume_service.continue_execution(Some(id)) {
                        eprintln!("logosdap: resume failed: {err:#}");
                    }
                }
            }),
        );
    }
    service.subscribe(
        Some("sessionTerminated"),
        Box::new(move |_| {
            let _ = done_tx.try_send(());
        }),
    );

    let info = service
        .start_session(config, &workspace)
        .context("starting debug session")?;
    eprintln!("logosdap: session '{}' running (ctrl-c to stop)", info.name);

    let interrupted = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupted))
        .context("registering SIGINT handler")?;

    loop {
        if done_rx.recv_timeout(time::Duration::from_millis(100)).is_ok() {
            break;
        }
        if interrupted.swap(false, Ordering::SeqCst) {
            eprintln!("logosdap: stopping session");
            service.stop_session(Some(&info.id))?;
            break;
        }
    }

    service.cleanup();
    Ok(())
}

fn detect(service: &Arc<DebugService>, workspace: PathBuf) -> anyhow::Result<()> {
    let found = service.detect_debuggers(&workspace);
    if found.is_empty() {
        println!("nothing recognizable in {}", workspace.display());
        return Ok(());
    }
    for debugger in found {
        println!(
            "{:10} {:24} {:?} ({})",
            debugger.adapter_type, debugger.display_name, debugger.confidence, debugger.reason
        );
    }
    Ok(())
}

fn list_adapters(service: &Arc<DebugService>) -> anyhow::Result<()> {
    let installed: Vec<String> = service
        .get_installed_adapters()
        .into_iter()
        .map(|d| d.adapter_type)
        .collect();
    for descriptor in service.get_available_adapters() {
        let mark = if installed.contains(&descriptor.adapter_type) { "installed" } else { "missing" };
        println!("{:10} {:24} [{}]", descriptor.adapter_type, descriptor.display_name, mark);
    }
    Ok(())
}

fn init_config(
    service: &Arc<DebugService>,
    workspace: PathBuf,
    adapter: Option<String>,
) -> anyhow::Result<()> {
    let configurations = match adapter {
        Some(adapter_type) => {
            let configs = service.get_default_launch_config(&adapter_type);
            if configs.is_empty() {
                return Err(anyhow!("no launch template for adapter type '{adapter_type}'"));
            }
            configs
        }
        None => {
            let configs = service.auto_generate_configurations(&workspace);
            if configs.is_empty() {
                return Err(anyhow!(
                    "could not auto-detect a project; pass --adapter to pick a template"
                ));
            }
            configs
        }
    };

    let file = launch::LaunchFile {
        version: String::from(consts::LAUNCH_FILE_VERSION),
        configurations,
        compounds: None,
    };
    let path = service.write_launch_config(&workspace, &file)?;
    println!(
        "wrote {} configuration(s) to {}",
        file.configurations.len(),
        path.display()
    );
    Ok(())
}
