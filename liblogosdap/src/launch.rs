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
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context};
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

use crate::{adapters, consts, errors::BrokerError};

/// The persisted launch configuration file.
///
/// Lives at `<workspace>/.logos/launch.json`. When that is missing
/// we fall back to reading `<workspace>/.vscode/launch.json`, which
/// is accepted as JSONC since that is what the VS Code ecosystem
/// writes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LaunchFile {
    pub version: String,
    pub configurations: Vec<LaunchConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compounds: Option<Value>,
}

/// One launch or attach configuration. Only the three routing
/// fields are structural; everything else is adapter-specific and
/// passes through untouched (apart from variable substitution).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LaunchConfiguration {
    #[serde(rename = "type")]
    pub adapter_type: String,
    pub request: String,
    pub name: String,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

impl LaunchConfiguration {
    pub fn is_attach(&self) -> bool {
        self.request == "attach"
    }

    /// The full configuration as one JSON object, the shape the
    /// adapter expects as `launch`/`attach` arguments.
    pub fn to_value(&self) -> anyhow::Result<Value> {
        serde_json::to_value(self).context("serializing launch configuration")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchSource {
    Logos,
    Vscode,
}

fn logos_launch_path(workspace_folder: &Path) -> PathBuf {
    workspace_folder.join(consts::LOGOS_CONFIG_DIR).join("launch.json")
}

fn vscode_launch_path(workspace_folder: &Path) -> PathBuf {
    workspace_folder.join(".vscode").join("launch.json")
}

/// Read the workspace's launch configurations, preferring our own
/// file and falling back to the VS Code one.
#[instrument(skip_all)]
pub fn read_launch_file(
    workspace_folder: &Path,
) -> anyhow::Result<Option<(LaunchFile, LaunchSource)>> {
    let logos_path = logos_launch_path(workspace_folder);
    if logos_path.exists() {
        let blob = fs::read_to_string(&logos_path).context("reading launch.json")?;
        let file = parse_launch_file(&blob)
            .with_context(|| format!("parsing {logos_path:?}"))?;
        return Ok(Some((file, LaunchSource::Logos)));
    }

    let vscode_path = vscode_launch_path(workspace_folder);
    if vscode_path.exists() {
        info!("no .logos/launch.json, falling back to {:?}", vscode_path);
        let blob = fs::read_to_string(&vscode_path).context("reading vscode launch.json")?;
        let file = parse_launch_file(&strip_jsonc(&blob))
            .with_context(|| format!("parsing {vscode_path:?}"))?;
        return Ok(Some((file, LaunchSource::Vscode)));
    }

    Ok(None)
}

fn parse_launch_file(blob: &str) -> anyhow::Result<LaunchFile> {
    serde_json::from_str(blob)
        .map_err(|e| anyhow!(BrokerError::ConfigError(format!("{e}"))))
}

/// Write the launch file to `.logos/launch.json`, pretty printed
/// with two-space indent. Always writes our own location, never the
/// VS Code one.
#[instrument(skip_all)]
pub fn write_launch_file(workspace_folder: &Path, file: &LaunchFile) -> anyhow::Result<PathBuf> {
    let path = logos_launch_path(workspace_folder);
    fs::create_dir_all(workspace_folder.join(consts::LOGOS_CONFIG_DIR))
        .context("creating .logos dir")?;
    let blob = serde_json::to_string_pretty(file).context("serializing launch.json")?;
    fs::write(&path, blob).with_context(|| format!("writing {path:?}"))?;
    Ok(path)
}

/// Copy the VS Code launch configurations into `.logos/launch.json`
/// as plain JSON (comments do not survive the trip).
pub fn import_from_vscode(workspace_folder: &Path) -> anyhow::Result<LaunchFile> {
    let vscode_path = vscode_launch_path(workspace_folder);
    let blob = fs::read_to_string(&vscode_path)
        .with_context(|| format!("reading {vscode_path:?}"))?;
    let file = parse_launch_file(&strip_jsonc(&blob))
        .with_context(|| format!("parsing {vscode_path:?}"))?;
    write_launch_file(workspace_folder, &file)?;
    Ok(file)
}

/// Strip `// ...` and `/* ... */` comments out of JSONC.
///
/// Characters inside double-quoted strings are never touched, and
/// escape sequences are tracked so `"\"//\""` comes through intact.
/// Newlines that terminate a line comment are preserved. On
/// comment-free input this is the identity.
pub fn strip_jsonc(input: &str) -> String {
    enum State {
        Normal,
        InString { escaped: bool },
        LineComment,
        BlockComment { star: bool },
    }

    let mut out = String::with_capacity(input.len());
    let mut state = State::Normal;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Normal => match c {
                '"' => {
                    out.push(c);
                    state = State::InString { escaped: false };
                }
                '/' => match chars.peek() {
                    Some('/') => {
                        chars.next();
                        state = State::LineComment;
                    }
                    Some('*') => {
                        chars.next();
                        state = State::BlockComment { star: false };
                    }
                    _ => out.push(c),
                },
                _ => out.push(c),
            },
            State::InString { escaped } => {
                out.push(c);
                state = if escaped {
                    State::InString { escaped: false }
                } else if c == '\\' {
                    State::InString { escaped: true }
                } else if c == '"' {
                    State::Normal
                } else {
                    State::InString { escaped: false }
                };
            }
            State::LineComment => {
                if c == '\n' {
                    out.push(c);
                    state = State::Normal;
                }
            }
            State::BlockComment { star } => {
                state = if star && c == '/' {
                    State::Normal
                } else {
                    State::BlockComment { star: c == '*' }
                };
            }
        }
    }

    out
}

/// What the substitution tokens resolve against.
#[derive(Debug, Clone, Default)]
pub struct SubstitutionContext {
    pub workspace_folder: PathBuf,
    pub active_file: Option<PathBuf>,
}

impl SubstitutionContext {
    fn token_values(&self) -> Vec<(&'static str, String)> {
        let lossy = |p: &Path| p.to_string_lossy().into_owned();
        let file = self.active_file.as_deref();

        let relative_file = file.map(|f| {
            f.strip_prefix(&self.workspace_folder).map(lossy).unwrap_or_else(|_| lossy(f))
        });
        let relative_dirname = relative_file
            .as_deref()
            .map(Path::new)
            .and_then(Path::parent)
            .map(lossy);

        vec![
            ("${workspaceFolder}", lossy(&self.workspace_folder)),
            ("${file}", file.map(lossy).unwrap_or_default()),
            (
                "${fileBasename}",
                file.and_then(Path::file_name)
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            ),
            (
                "${fileBasenameNoExtension}",
                file.and_then(Path::file_stem)
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            ),
            ("${fileDirname}", file.and_then(Path::parent).map(lossy).unwrap_or_default()),
            (
                "${fileExtname}",
                file.and_then(Path::extension)
                    .map(|e| format!(".{}", e.to_string_lossy()))
                    .unwrap_or_default(),
            ),
            ("${relativeFile}", relative_file.unwrap_or_default()),
            ("${relativeFileDirname}", relative_dirname.unwrap_or_default()),
        ]
    }
}

/// Replace every occurrence of every recognized token. Unknown
/// tokens are left exactly as written.
pub fn substitute_string(input: &str, ctx: &SubstitutionContext) -> String {
    if !input.contains("${") {
        return String::from(input);
    }
    let mut out = String::from(input);
    for (token, value) in ctx.token_values() {
        if out.contains(token) {
            out = out.replace(token, &value);
        }
    }
    out
}

/// Substitute recursively through a JSON value: every string leaf,
/// including ones nested inside arrays and objects. Non-string
/// leaves pass through untouched.
pub fn substitute_value(value: &mut Value, ctx: &SubstitutionContext) {
    match value {
        Value::String(s) => *s = substitute_string(s, ctx),
        Value::Array(items) => {
            for item in items.iter_mut() {
                substitute_value(item, ctx);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                substitute_value(item, ctx);
            }
        }
        _ => {}
    }
}

fn config(adapter_type: &str, name: &str, rest: Value) -> LaunchConfiguration {
    let Value::Object(rest) = rest else {
        unreachable!("launch templates are always objects");
    };
    LaunchConfiguration {
        adapter_type: String::from(adapter_type),
        request: String::from("launch"),
        name: String::from(name),
        rest,
    }
}

/// The MI debugger flavor to default to on this host.
fn default_mi_mode() -> &'static str {
    // Darwin-likes ship lldb; everywhere else gdb is the safe bet.
    if std::env::consts::OS == "macos" { "lldb" } else { "gdb" }
}

/// The stock template for an adapter type.
pub fn default_configurations(adapter_type: &str) -> Vec<LaunchConfiguration> {
    match adapter_type {
        "node" => vec![config(
            "node",
            "Launch Node.js",
            serde_json::json!({
                "program": "${workspaceFolder}/index.js",
                "cwd": "${workspaceFolder}",
                "console": "integratedTerminal",
                "skipFiles": ["<node_internals>/**"],
            }),
        )],
        "python" => vec![config(
            "python",
            "Launch Python File",
            serde_json::json!({
                "program": "${file}",
                "cwd": "${workspaceFolder}",
                "console": "integratedTerminal",
                "justMyCode": true,
            }),
        )],
        "go" => vec![config(
            "go",
            "Launch Go Package",
            serde_json::json!({
                "mode": "debug",
                "program": "${workspaceFolder}",
            }),
        )],
        "cppdbg" | "lldb" => vec![config(
            adapter_type,
            "Launch Native Binary",
            serde_json::json!({
                "program": "${workspaceFolder}/build/main",
                "cwd": "${workspaceFolder}",
                "stopAtEntry": false,
                "MIMode": default_mi_mode(),
            }),
        )],
        _ => vec![],
    }
}

/// Build launch configurations for whatever this workspace appears
/// to contain, combining project detection with a few file-specific
/// heuristics (npm scripts, Django/Flask entry points, the CMake
/// project name).
#[instrument(skip_all)]
pub fn auto_generate(workspace_folder: &Path) -> Vec<LaunchConfiguration> {
    let mut configs = vec![];

    for detected in adapters::detect_debuggers(workspace_folder) {
        match detected.adapter_type.as_str() {
            "node" => {
                configs.extend(default_configurations("node"));
                configs.extend(npm_script_configs(workspace_folder));
            }
            "python" => {
                configs.extend(python_entry_configs(workspace_folder));
            }
            "go" => {
                configs.extend(default_configurations("go"));
            }
            "cppdbg" | "lldb" => {
                if let Some(cfg) = cmake_config(workspace_folder, &detected.adapter_type) {
                    configs.push(cfg);
                }
            }
            _ => {}
        }
    }

    // detection can propose both cppdbg and lldb for one CMake tree;
    // keep the first of any duplicate name
    let mut seen = std::collections::HashSet::new();
    configs.retain(|c| seen.insert(c.name.clone()));
    configs
}

fn npm_script_configs(workspace_folder: &Path) -> Vec<LaunchConfiguration> {
    let Ok(blob) = fs::read_to_string(workspace_folder.join("package.json")) else {
        return vec![];
    };
    let Ok(package) = serde_json::from_str::<Value>(&blob) else {
        return vec![];
    };
    let scripts = &package["scripts"];

    let npm = |name: &str, script: &str| {
        config(
            "node",
            name,
            serde_json::json!({
                "runtimeExecutable": "npm",
                "runtimeArgs": if script == "start" {
                    serde_json::json!(["start"])
                } else {
                    serde_json::json!(["run", script])
                },
                "cwd": "${workspaceFolder}",
                "console": "integratedTerminal",
            }),
        )
    };

    let mut configs = vec![];
    if scripts.get("start").is_some() {
        configs.push(npm("npm start", "start"));
    }
    if scripts.get("dev").is_some() {
        configs.push(npm("npm run dev", "dev"));
    }
    configs
}

fn python_entry_configs(workspace_folder: &Path) -> Vec<LaunchConfiguration> {
    let mut configs = vec![];
    if workspace_folder.join("manage.py").exists() {
        configs.push(config(
            "python",
            "Django",
            serde_json::json!({
                "program": "${workspaceFolder}/manage.py",
                "args": ["runserver"],
                "django": true,
                "cwd": "${workspaceFolder}",
            }),
        ));
    }
    if workspace_folder.join("app.py").exists() {
        configs.push(config(
            "python",
            "Flask",
            serde_json::json!({
                "module": "flask",
                "args": ["run"],
                "env": {"FLASK_APP": "app.py"},
                "cwd": "${workspaceFolder}",
            }),
        ));
    }
    if workspace_folder.join("main.py").exists() {
        configs.push(config(
            "python",
            "Main",
            serde_json::json!({
                "program": "${workspaceFolder}/main.py",
                "cwd": "${workspaceFolder}",
            }),
        ));
    }
    if configs.is_empty() {
        configs.extend(default_configurations("python"));
    }
    configs
}

fn cmake_config(workspace_folder: &Path, adapter_type: &str) -> Option<LaunchConfiguration> {
    let blob = fs::read_to_string(workspace_folder.join("CMakeLists.txt")).ok()?;
    let name = parse_cmake_project_name(&blob)?;
    Some(config(
        adapter_type,
        &format!("Launch {name}"),
        serde_json::json!({
            "program": format!("${{workspaceFolder}}/build/{name}"),
            "cwd": "${workspaceFolder}",
            "stopAtEntry": false,
            "MIMode": default_mi_mode(),
        }),
    ))
}

/// Pull the name out of a `project(<name> ...)` call,
/// case-insensitively on the keyword.
fn parse_cmake_project_name(blob: &str) -> Option<String> {
    for line in blob.lines() {
        let trimmed = line.trim_start();
        if trimmed.len() < 8 || !trimmed[..7].eq_ignore_ascii_case("project") {
            continue;
        }
        let after = trimmed[7..].trim_start();
        let Some(open) = after.strip_prefix('(') else {
            continue;
        };
        let name: String = open
            .trim_start()
            .chars()
            .take_while(|c| !c.is_whitespace() && *c != ')' && *c != ',')
            .collect();
        if !name.is_empty() {
            return Some(name);
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    fn ctx() -> SubstitutionContext {
        SubstitutionContext {
            workspace_folder: PathBuf::from("/ws"),
            active_file: Some(PathBuf::from("/ws/src/app.test.js")),
        }
    }

    #[test]
    fn substitution_table() {
        let cases = vec![
            ("${workspaceFolder}/index.js", "/ws/index.js"),
            ("${file}", "/ws/src/app.test.js"),
            ("${fileBasename}", "app.test.js"),
            ("${fileBasenameNoExtension}", "app.test"),
            ("${fileDirname}", "/ws/src"),
            ("${fileExtname}", ".js"),
            ("${relativeFile}", "src/app.test.js"),
            ("${relativeFileDirname}", "src"),
            // all occurrences are replaced
            ("${workspaceFolder}:${workspaceFolder}", "/ws:/ws"),
            // unknown tokens survive untouched
            ("${workspaceFolderBasename}/x", "${workspaceFolderBasename}/x"),
            ("no tokens here", "no tokens here"),
        ];
        for (input, want) in cases {
            assert_eq!(substitute_string(input, &ctx()), want, "input: {input}");
        }
    }

    #[test]
    fn substitution_without_active_file_yields_empty() {
        let ctx = SubstitutionContext {
            workspace_folder: PathBuf::from("/ws"),
            active_file: None,
        };
        assert_eq!(substitute_string("x${file}y", &ctx), "xy");
        assert_eq!(substitute_string("${fileBasename}", &ctx), "");
    }

    #[test]
    fn substitution_is_idempotent_without_tokens() {
        let input = "plain string with ${unknownToken} and $dollar";
        let once = substitute_string(input, &ctx());
        assert_eq!(substitute_string(&once, &ctx()), once);
    }

    #[test]
    fn substitution_recurses_into_arrays_and_objects() {
        let mut value = serde_json::json!({
            "program": "${workspaceFolder}/main.py",
            "args": ["--root", "${workspaceFolder}"],
            "env": {"APP_DIR": "${workspaceFolder}/app"},
            "port": 5678,
        });
        substitute_value(&mut value, &ctx());
        assert_eq!(value["program"], "/ws/main.py");
        assert_eq!(value["args"][1], "/ws");
        assert_eq!(value["env"]["APP_DIR"], "/ws/app");
        assert_eq!(value["port"], 5678);
    }

    #[test]
    fn jsonc_strip_is_identity_on_plain_json() {
        let cases = vec![
            r#"{"version": "0.2.0", "configurations": []}"#,
            r#"{"url": "https://example.com/path"}"#,
            r#"{"s": "a // not a comment", "t": "/* neither */"}"#,
            r#"{"escaped": "quote \" then // inside"}"#,
            "",
        ];
        for input in cases {
            assert_eq!(strip_jsonc(input), input, "input: {input}");
        }
    }

    #[test]
    fn jsonc_strip_removes_comments() {
        let input = "{ /* a */ \"version\": \"0.2.0\", // b\n \"configurations\": [] }";
        let stripped = strip_jsonc(input);
        let file = parse_launch_file(&stripped).expect("stripped JSONC to parse");
        assert_eq!(file.version, "0.2.0");
        assert!(file.configurations.is_empty());
    }

    #[test]
    fn jsonc_strip_handles_tricky_strings() {
        let input = r#"{"a": "\\", "b": "x"} // trailing"#;
        let stripped = strip_jsonc(input);
        let parsed: Value = serde_json::from_str(&stripped).expect("to parse");
        assert_eq!(parsed["a"], "\\");
        assert_eq!(parsed["b"], "x");
    }

    #[test]
    fn read_prefers_logos_over_vscode() {
        let dir = tempfile::tempdir().expect("tempdir to succeed");
        fs::create_dir_all(dir.path().join(".logos")).expect("mkdir");
        fs::create_dir_all(dir.path().join(".vscode")).expect("mkdir");
        fs::write(
            dir.path().join(".logos/launch.json"),
            r#"{"version": "0.2.0", "configurations": []}"#,
        )
        .expect("write");
        fs::write(
            dir.path().join(".vscode/launch.json"),
            r#"{"version": "9.9.9", "configurations": []}"#,
        )
        .expect("write");

        let (file, source) = read_launch_file(dir.path())
            .expect("read to succeed")
            .expect("a file to be found");
        assert_eq!(source, LaunchSource::Logos);
        assert_eq!(file.version, "0.2.0");
    }

    #[test]
    fn vscode_fallback_and_import() {
        let dir = tempfile::tempdir().expect("tempdir to succeed");
        fs::create_dir_all(dir.path().join(".vscode")).expect("mkdir");
        fs::write(
            dir.path().join(".vscode/launch.json"),
            "{ /* a */ \"version\": \"0.2.0\", // b\n \"configurations\": [] }",
        )
        .expect("write");

        let (file, source) = read_launch_file(dir.path())
            .expect("read to succeed")
            .expect("a file to be found");
        assert_eq!(source, LaunchSource::Vscode);
        assert_eq!(file.version, "0.2.0");

        import_from_vscode(dir.path()).expect("import to succeed");
        let imported =
            fs::read_to_string(dir.path().join(".logos/launch.json")).expect("read imported");
        // plain JSON now: parses without stripping, no comments left
        let reparsed: LaunchFile = serde_json::from_str(&imported).expect("plain JSON");
        assert_eq!(reparsed, file);
        assert!(!imported.contains("/*") && !imported.contains("//"));
    }

    #[test]
    fn malformed_launch_json_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tempdir to succeed");
        fs::create_dir_all(dir.path().join(".logos")).expect("mkdir");
        fs::write(dir.path().join(".logos/launch.json"), "{ not json").expect("write");

        let err = read_launch_file(dir.path()).expect_err("read to fail");
        assert!(crate::errors::is_kind(
            &err,
            &BrokerError::ConfigError(String::new())
        ));
    }

    #[test]
    fn cmake_project_name_parse() {
        let cases = vec![
            ("project(demo)", Some("demo")),
            ("PROJECT(Demo VERSION 1.0)", Some("Demo")),
            ("  project (spaced LANGUAGES CXX)", Some("spaced")),
            ("project(comma, CXX)", Some("comma")),
            ("cmake_minimum_required(VERSION 3.20)", None),
            ("# project(commented)", None),
        ];
        for (input, want) in cases {
            assert_eq!(
                parse_cmake_project_name(input).as_deref(),
                want,
                "input: {input}"
            );
        }
    }

    #[test]
    fn auto_generate_npm_scripts() {
        let dir = tempfile::tempdir().expect("tempdir to succeed");
        fs::write(
            dir.path().join("package.json"),
            r#"{"name": "demo", "scripts": {"start": "node .", "dev": "vite"}}"#,
        )
        .expect("write");

        let configs = auto_generate(dir.path());
        let names: Vec<&str> = configs.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"Launch Node.js"), "names: {names:?}");
        assert!(names.contains(&"npm start"), "names: {names:?}");
        assert!(names.contains(&"npm run dev"), "names: {names:?}");
    }

    #[test]
    fn auto_generate_django_and_cmake() {
        let dir = tempfile::tempdir().expect("tempdir to succeed");
        fs::write(dir.path().join("manage.py"), "").expect("write");
        fs::write(dir.path().join("CMakeLists.txt"), "project(engine)\n").expect("write");

        let configs = auto_generate(dir.path());
        let django = configs.iter().find(|c| c.name == "Django").expect("a Django config");
        assert_eq!(django.adapter_type, "python");
        assert_eq!(django.rest["program"], "${workspaceFolder}/manage.py");

        let native =
            configs.iter().find(|c| c.name == "Launch engine").expect("a CMake config");
        assert_eq!(native.rest["program"], "${workspaceFolder}/build/engine");
        let mi_mode = native.rest["MIMode"].as_str().expect("MIMode to be set");
        assert!(mi_mode == "gdb" || mi_mode == "lldb");
    }

    #[test]
    fn launch_file_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir to succeed");
        let file = LaunchFile {
            version: String::from(consts::LAUNCH_FILE_VERSION),
            configurations: default_configurations("node"),
            compounds: None,
        };
        write_launch_file(dir.path(), &file).expect("write to succeed");
        let (read_back, source) = read_launch_file(dir.path())
            .expect("read to succeed")
            .expect("a file to be found");
        assert_eq!(source, LaunchSource::Logos);
        assert_eq!(read_back, file);
    }
}
