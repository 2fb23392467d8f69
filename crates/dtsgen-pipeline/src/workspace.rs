//! Run workspace preparation: repository clone, package data, template
//! project and the external tools shared by every run.
//!
//! Every step is skipped when its output directory is already populated, so
//! re-entering a run (or sharing a build directory between runs) costs no
//! process invocations for work that was done before.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;
use walkdir::WalkDir;

use dtsgen_core::fsutil;
use dtsgen_core::{BuildLayout, PipelineError, Result, ShellError};

use crate::agent::{PackageContext, TestFile};
use crate::context::{RunContext, ToolContext};

const DEFINITELY_TYPED_URL: &str = "https://github.com/DefinitelyTyped/DefinitelyTyped.git";
const RUN_TIME_ANALYZER_URL: &str =
    "https://github.com/Proglang-TypeScript/run-time-information-gathering.git";
const DECLARATION_GENERATOR_URL: &str =
    "https://github.com/Proglang-TypeScript/ts-declaration-file-generator.git";

/// Files probed when `package.json` names no usable main file.
const MAIN_FALLBACKS: [&str; 3] = ["index.js", "index.json", "index.node"];
const TEST_DIRS: [&str; 3] = ["test", "tests", "__tests__"];
const TEST_SUFFIXES: [&str; 2] = [".test.js", ".spec.js"];

/// Map a failed command onto a taxonomy error, keeping cancellation.
fn classify(err: ShellError, taxonomy: impl FnOnce(String) -> PipelineError) -> PipelineError {
    match err {
        ShellError::Cancelled { .. } => PipelineError::Cancelled,
        other => taxonomy(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Turn the `repository` field reported by `npm view` into a clone URL.
///
/// Accepts either a bare string or an object with a `url` field. Only
/// GitHub repositories are supported.
pub fn github_url(npm_view_output: &str) -> Option<String> {
    let value: Value = serde_json::from_str(npm_view_output.trim()).ok()?;
    let url = match &value {
        Value::String(url) => url.as_str(),
        Value::Object(map) => map.get("url").and_then(Value::as_str).unwrap_or_default(),
        _ => return None,
    };
    let (_, rest) = url.split_once("github.com")?;
    let path = rest.split(".git").next().unwrap_or_default();
    Some(format!("https://github.com{path}"))
}

/// Shallow-clone the package's GitHub repository into `cache/repository`.
pub async fn clone_repository(run: RunContext<'_>) -> Result<()> {
    let narrator = run.narrator;
    let _verbose = narrator.with_verbose(run.config.verbose_setup);
    let _scope = narrator.enter("Cloning the GitHub repository:");
    let output_dir = run.layout.repository_dir();
    if !fsutil::dir_empty(&output_dir) {
        narrator.write("Success (already cloned)");
        return Ok(());
    }
    fsutil::create_dir(&output_dir, true)?;

    let view = run
        .shell
        .run(
            &run.setup_command(format!("npm view {} repository --json", run.package)),
            true,
        )
        .await
        .map_err(|err| {
            classify(err, |msg| {
                PipelineError::PackageDataMissing(format!("npm view failed: {msg}"))
            })
        })?;
    if view.output.trim().is_empty() {
        return Err(PipelineError::PackageDataMissing(
            "npm view reported no repository".to_string(),
        ));
    }
    let url = github_url(&view.output).ok_or_else(|| {
        PipelineError::PackageDataMissing(format!(
            "no GitHub URL in repository field: {}",
            view.output.trim()
        ))
    })?;

    run.shell
        .run(
            &run.setup_command(format!("git clone --depth 1 {url} {}", output_dir.display())),
            true,
        )
        .await
        .map_err(|err| {
            classify(err, |msg| {
                PipelineError::PackageDataMissing(format!("git clone failed: {msg}"))
            })
        })?;
    if fsutil::dir_empty(&output_dir) {
        return Err(PipelineError::PackageDataMissing(
            "repository clone is empty".to_string(),
        ));
    }
    narrator.write("Success");
    Ok(())
}

// ---------------------------------------------------------------------------
// Package data
// ---------------------------------------------------------------------------

/// Copy package data out of the cloned repository into `data/`.
///
/// Files that are not valid UTF-8 are treated as absent.
pub fn collect_package_data(run: RunContext<'_>) -> Result<PackageContext> {
    let narrator = run.narrator;
    let _verbose = narrator.with_verbose(run.config.verbose_setup);
    let repository = run.layout.repository_dir();
    let mut context = PackageContext::new(run.package);

    context.package_json = read_text(&repository.join("package.json"));
    match &context.package_json {
        Some(content) => {
            fsutil::write_file(&run.layout.package_json(), content)?;
            narrator.write("Package file found");
        }
        None => narrator.write("No package file found"),
    }

    context.readme = find_readme(&repository)?;
    match &context.readme {
        Some(content) => {
            fsutil::write_file(&run.layout.readme(), content)?;
            narrator.write("Readme file found");
        }
        None => narrator.write("No readme file found"),
    }

    context.main = find_main(&repository, context.package_json.as_deref());
    match &context.main {
        Some(content) => {
            fsutil::write_file(&run.layout.main_file(), content)?;
            narrator.write("Main file found");
        }
        None => narrator.write("No main file found"),
    }

    context.tests = find_tests(&repository);
    let tests_dir = run.layout.tests_dir();
    fsutil::create_dir(&tests_dir, false)?;
    for (index, test) in context.tests.iter().enumerate() {
        fsutil::write_file(
            &tests_dir.join(format!("{index}.js")),
            format!("// File: {}\n\n{}", test.path, test.content),
        )?;
    }
    narrator.write(format!("{} test file(s) found", context.tests.len()));
    Ok(context)
}

fn read_text(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    std::fs::read_to_string(path).ok()
}

fn find_readme(repository: &Path) -> Result<Option<String>> {
    for path in fsutil::children(repository)? {
        let is_readme = path
            .file_name()
            .map(|name| name.to_string_lossy().to_lowercase().contains("readme"))
            .unwrap_or(false);
        if is_readme {
            if let Some(content) = read_text(&path) {
                return Ok(Some(content));
            }
        }
    }
    Ok(None)
}

fn find_main(repository: &Path, package_json: Option<&str>) -> Option<String> {
    let declared = package_json
        .and_then(|content| serde_json::from_str::<Value>(content).ok())
        .and_then(|manifest| manifest.get("main").and_then(Value::as_str).map(str::to_string));
    if let Some(content) = declared.and_then(|main| read_text(&repository.join(main))) {
        return Some(content);
    }
    MAIN_FALLBACKS
        .iter()
        .find_map(|name| read_text(&repository.join(name)))
}

/// Test files keyed by repository-relative path, in path order.
fn find_tests(repository: &Path) -> Vec<TestFile> {
    let mut tests = BTreeMap::new();
    let mut collect = |root: &Path, accept: &dyn Fn(&str) -> bool| {
        for entry in WalkDir::new(root).into_iter().filter_map(|entry| entry.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !accept(name.as_ref()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(repository) else {
                continue;
            };
            if let Some(content) = read_text(entry.path()) {
                tests.insert(relative.to_string_lossy().into_owned(), content);
            }
        }
    };
    for dir in TEST_DIRS {
        let root = repository.join(dir);
        if root.is_dir() {
            collect(&root, &|name| name.ends_with(".js"));
        }
    }
    collect(repository, &|name| {
        TEST_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
    });
    tests
        .into_iter()
        .filter(|(_, content)| !content.is_empty())
        .map(|(path, content)| TestFile { path, content })
        .collect()
}

// ---------------------------------------------------------------------------
// Template project
// ---------------------------------------------------------------------------

/// Install the package into `cache/template`, the project every execution
/// starts from.
pub async fn build_template_project(run: RunContext<'_>) -> Result<()> {
    let narrator = run.narrator;
    let _verbose = narrator.with_verbose(run.config.verbose_setup);
    let _scope = narrator.enter("Building template npm project:");
    let template = run.layout.template_dir();
    if !fsutil::dir_empty(&template) {
        narrator.write("Success (already built)");
        return Ok(());
    }
    fsutil::create_dir(&template, true)?;

    let _install = narrator.enter("Installing packages:");
    let invocation = run
        .setup_command(format!("npm install tsx typescript @types/node {}", run.package))
        .cwd(&template);
    run.shell.run(&invocation, true).await.map_err(|err| {
        classify(err, |msg| {
            PipelineError::PackageInstallationFailed(format!(
                "npm install {} failed: {msg}",
                run.package
            ))
        })
    })?;

    let manifests = run.layout.template_manifests_dir();
    for name in ["package.json", "package-lock.json"] {
        let source = template.join(name);
        if source.is_file() {
            fsutil::create_dir(&manifests, false)?;
            std::fs::copy(&source, manifests.join(name))?;
        }
    }
    narrator.write("Success");
    Ok(())
}

// ---------------------------------------------------------------------------
// Shared build tools
// ---------------------------------------------------------------------------

/// Shallow-clone `url` into `output_dir` unless it is populated already.
/// Returns whether a clone happened.
async fn clone_tool(
    tools: ToolContext<'_>,
    label: &str,
    url: &str,
    output_dir: &Path,
) -> Result<bool> {
    let narrator = tools.narrator;
    let _scope = narrator.enter(format!("Cloning the {label} repository:"));
    if !fsutil::dir_empty(output_dir) {
        narrator.write("Success (already cloned)");
        return Ok(false);
    }
    fsutil::create_dir(output_dir, true)?;
    tools
        .shell
        .run(
            &tools.setup_command(format!("git clone --depth 1 {url} {}", output_dir.display())),
            true,
        )
        .await?;
    narrator.write("Success");
    Ok(true)
}

/// Clone DefinitelyTyped, the source of reference declarations.
pub async fn build_definitely_typed(tools: ToolContext<'_>) -> Result<()> {
    let _verbose = tools.narrator.with_verbose(tools.config.verbose_setup);
    let output_dir = tools.build.definitely_typed();
    clone_tool(tools, "DefinitelyTyped", DEFINITELY_TYPED_URL, &output_dir).await?;
    Ok(())
}

/// Clone and build the run-time information analyzer image.
///
/// The image is only built right after a fresh clone. Its build script runs
/// the analyzer's own test suite, whose failures are ignored.
pub async fn build_run_time_analyzer(run: RunContext<'_>) -> Result<()> {
    let narrator = run.narrator;
    let _verbose = narrator.with_verbose(run.config.verbose_setup);
    let output_dir = run.build.run_time_analyzer();
    let label = "run-time-information-gathering";
    if !clone_tool(run.tools(), label, RUN_TIME_ANALYZER_URL, &output_dir).await? {
        return Ok(());
    }
    let _scope = narrator.enter("Building run-time-information-gathering docker image:");
    run.shell
        .run(&run.setup_command(build_script(&output_dir)), false)
        .await?;
    narrator.write("Success (ignoring test errors)");
    Ok(())
}

/// Clone and build the declaration generator image.
pub async fn build_declaration_generator(run: RunContext<'_>) -> Result<()> {
    let narrator = run.narrator;
    let _verbose = narrator.with_verbose(run.config.verbose_setup);
    let output_dir = run.build.declaration_generator();
    let label = "ts-declaration-file-generator";
    if !clone_tool(run.tools(), label, DECLARATION_GENERATOR_URL, &output_dir).await? {
        return Ok(());
    }
    let _scope = narrator.enter("Building ts-declaration-file-generator docker image:");
    run.shell
        .run(&run.setup_command(build_script(&output_dir)), true)
        .await?;
    narrator.write("Success");
    Ok(())
}

fn build_script(checkout: &Path) -> String {
    checkout.join("build").join("build.sh").display().to_string()
}

/// Install the transpiler toolchain from the pinned asset manifests.
pub async fn build_npm_tools(run: RunContext<'_>) -> Result<()> {
    let narrator = run.narrator;
    let _verbose = narrator.with_verbose(run.config.verbose_setup);
    let _scope = narrator.enter("Building npm tools:");
    let build: &BuildLayout = run.build;
    let output_dir = build.npm_tools();
    if !fsutil::dir_empty(&output_dir) && build.transpile_script().is_file() {
        narrator.write("Success (already built)");
        return Ok(());
    }
    fsutil::create_dir(&output_dir, true)?;
    let scripts = run.assets.declaration_scripts();
    for name in ["package.json", "package-lock.json", "transpile.js"] {
        std::fs::copy(scripts.join(name), output_dir.join(name)).map_err(|err| {
            PipelineError::unexpected(format!("missing asset {}: {err}", scripts.join(name).display()))
        })?;
    }
    run.shell
        .run(&run.setup_command("npm ci").cwd(&output_dir), true)
        .await?;
    narrator.write("Success");
    Ok(())
}
