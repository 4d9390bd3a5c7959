use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::Deserialize;

use interpreter::packages::OutputBuffer;
use interpreter::{ManualClock, RuntimeConfig};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestConfig {
    /// Human-readable test description.
    #[serde(default)]
    pub description: Option<String>,

    /// Expected exact output of `looks_say` (trimmed comparison).
    #[serde(default)]
    pub expect_output: Option<String>,

    /// Expected runtime error; the error's Display string must contain this substring.
    #[serde(default)]
    pub expect_error: Option<String>,

    /// If true, the test expects loading the program file to fail.
    #[serde(default)]
    pub expect_load_error: bool,

    /// Tick limit for the run. The test fails if threads are still active
    /// afterwards, unless `allow_running` is set.
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u64,

    /// Accept threads that are still active at the tick limit.
    #[serde(default)]
    pub allow_running: bool,

    /// Number of threads started over the run, broadcast receivers included.
    #[serde(default)]
    pub expect_threads_started: Option<usize>,
}

fn default_max_ticks() -> u64 {
    600
}

/// The `[test]` table of a `.test.toml` file. The rest of the file is the
/// program itself and is left to the block parser.
#[derive(Debug, Deserialize)]
struct TestHeader {
    test: TestConfig,
}

fn parse_test_header(content: &str) -> Result<TestConfig, String> {
    let content = content.trim_start_matches('\u{feff}'); // strip BOM
    let header: TestHeader =
        toml::from_str(content).map_err(|e| format!("TOML parse error: {}", e))?;
    Ok(header.test)
}

/// Engine settings for tests: simulated time, and a round cap so a program
/// that never yields cannot hang a tick.
fn test_runtime_config() -> RuntimeConfig {
    RuntimeConfig {
        max_rounds_per_tick: Some(10_000),
        ..Default::default()
    }
}

pub enum TestOutcome {
    Pass,
    Fail(String),
}

pub struct TestResult {
    pub path: PathBuf,
    pub description: Option<String>,
    pub outcome: TestOutcome,
}

fn run_single_test(path: &Path) -> TestResult {
    let fail = |description: Option<String>, reason: String| TestResult {
        path: path.to_path_buf(),
        description,
        outcome: TestOutcome::Fail(reason),
    };

    // 1. Read file
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => return fail(None, format!("cannot read file: {}", e)),
    };

    // 2. Parse the [test] table
    let config = match parse_test_header(&content) {
        Ok(config) => config,
        Err(e) => return fail(None, format!("test header error: {}", e)),
    };
    let description = config.description.clone();

    // 3. Load the program
    let parse_result = blocks::parser::Parser::new(content, 0).parse();

    // 4. Handle expect_load_error
    if config.expect_load_error {
        return TestResult {
            path: path.to_path_buf(),
            description,
            outcome: match parse_result {
                Err(_) => TestOutcome::Pass,
                Ok(_) => TestOutcome::Fail("expected load error, but loading succeeded".into()),
            },
        };
    }

    let program = match parse_result {
        Ok(p) => p,
        Err(errs) => {
            let msgs: Vec<String> = errs.iter().map(|e| e.message.clone()).collect();
            return fail(description, format!("unexpected load error: {}", msgs.join("; ")));
        }
    };

    // 5. Execute on simulated time
    let output = OutputBuffer::new();
    let exec_result = interpreter::run_program(
        &program,
        output.clone(),
        Rc::new(ManualClock::new()),
        test_runtime_config(),
        config.max_ticks,
    );

    // 6. Check error/output expectations
    let summary = match (&config.expect_error, exec_result) {
        (Some(expected_err), Err(runtime_err)) => {
            let err_str = runtime_err.to_string();
            if err_str.contains(expected_err.as_str()) {
                return TestResult {
                    path: path.to_path_buf(),
                    description,
                    outcome: TestOutcome::Pass,
                };
            }
            return fail(
                description,
                format!("expected error containing \"{}\", got: {}", expected_err, err_str),
            );
        }
        (Some(expected_err), Ok(_)) => {
            return fail(
                description,
                format!(
                    "expected error containing \"{}\", but execution succeeded",
                    expected_err
                ),
            );
        }
        (None, Err(runtime_err)) => {
            return fail(description, format!("unexpected runtime error: {}", runtime_err));
        }
        (None, Ok(summary)) => summary,
    };

    if let Some(expected_output) = &config.expect_output {
        let actual = output.contents();
        let actual_trimmed = actual.trim();
        let expected_trimmed = expected_output.trim();
        if actual_trimmed != expected_trimmed {
            return fail(
                description,
                format!(
                    "output mismatch\n  expected: {}\n  actual:   {}",
                    expected_trimmed, actual_trimmed
                ),
            );
        }
    }

    if !summary.idle && !config.allow_running {
        return fail(
            description,
            format!("threads still running after {} ticks", summary.ticks),
        );
    }

    // 7. Check thread count
    if let Some(expected) = config.expect_threads_started {
        if summary.threads_started != expected {
            return fail(
                description,
                format!(
                    "expected {} thread(s) started, got {}",
                    expected, summary.threads_started
                ),
            );
        }
    }

    TestResult {
        path: path.to_path_buf(),
        description,
        outcome: TestOutcome::Pass,
    }
}

/// Discover `.test.toml` files grouped by category (subfolder relative to root).
/// Files directly in `root` get category "" (uncategorized).
fn discover_categorized(root: &Path) -> BTreeMap<String, Vec<PathBuf>> {
    let mut categories: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    collect_tests(root, root, &mut categories);
    for files in categories.values_mut() {
        files.sort();
    }
    categories
}

fn collect_tests(dir: &Path, root: &Path, out: &mut BTreeMap<String, Vec<PathBuf>>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_tests(&path, root, out);
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| name.ends_with(".test.toml"))
        {
            let category = path
                .parent()
                .and_then(|p| p.strip_prefix(root).ok())
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            out.entry(category).or_default().push(path);
        }
    }
}

/// List available categories for the given test path.
pub fn list_categories(path: &Path) {
    if path.is_file() {
        eprintln!("(single file, no categories)");
        return;
    }

    let categories = discover_categorized(path);
    if categories.is_empty() {
        eprintln!("no .test.toml files found in {}", path.display());
        return;
    }

    eprintln!("available categories:");
    for (cat, files) in &categories {
        let label = if cat.is_empty() { "(root)" } else { cat.as_str() };
        eprintln!("  {} ({} tests)", label, files.len());
    }
}

fn pass_label(no_color: bool) -> &'static str {
    if no_color { "PASS" } else { "\x1b[32mPASS\x1b[0m" }
}

fn fail_label(no_color: bool) -> &'static str {
    if no_color { "FAIL" } else { "\x1b[31mFAIL\x1b[0m" }
}

fn bold(s: &str, no_color: bool) -> String {
    if no_color {
        s.to_string()
    } else {
        format!("\x1b[1m{}\x1b[0m", s)
    }
}

fn label_for<'a>(result: &'a TestResult) -> &'a str {
    result.description.as_deref().unwrap_or_else(|| {
        result
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_suffix(".test.toml"))
            .unwrap_or("?")
    })
}

fn print_failures(failures: &[TestResult]) {
    eprintln!();
    eprintln!("failures:");
    for f in failures {
        eprintln!();
        eprintln!("  --- {} ---", f.path.display());
        if let TestOutcome::Fail(reason) = &f.outcome {
            for line in reason.lines() {
                eprintln!("  {}", line);
            }
        }
    }
}

fn print_summary(passed: usize, failed: usize, no_color: bool) -> i32 {
    eprintln!();
    if failed == 0 {
        let ok = if no_color { "ok" } else { "\x1b[32mok\x1b[0m" };
        eprintln!("test result: {}. {} passed, 0 failed", ok, passed);
        0
    } else {
        let bad = if no_color { "FAILED" } else { "\x1b[31mFAILED\x1b[0m" };
        eprintln!(
            "test result: {}. {} passed, {} failed (of {})",
            bad,
            passed,
            failed,
            passed + failed
        );
        1
    }
}

/// Run all `.test.toml` files under `path` (or a single file).
/// If `categories` is non-empty, only run tests in those categories.
/// Returns exit code: 0 = all pass, 1 = any failure.
pub fn run_tests(path: &Path, no_color: bool, categories: &[String]) -> i32 {
    // Single file mode, categories do not apply
    if path.is_file() {
        let result = run_single_test(path);
        return match &result.outcome {
            TestOutcome::Pass => {
                eprintln!("  {}  {}", pass_label(no_color), label_for(&result));
                print_summary(1, 0, no_color)
            }
            TestOutcome::Fail(_) => {
                eprintln!("  {}  {}", fail_label(no_color), label_for(&result));
                print_failures(std::slice::from_ref(&result));
                print_summary(0, 1, no_color)
            }
        };
    }

    let all_categories = discover_categorized(path);

    if all_categories.is_empty() {
        eprintln!("no .test.toml files found in {}", path.display());
        return 1;
    }

    let run_categories: BTreeMap<&str, &Vec<PathBuf>> = if categories.is_empty() {
        all_categories.iter().map(|(k, v)| (k.as_str(), v)).collect()
    } else {
        let mut filtered = BTreeMap::new();
        for requested in categories {
            let req = requested.trim_matches('/');
            let mut found = false;
            for (cat, files) in &all_categories {
                if cat == req || cat.starts_with(&format!("{}/", req)) {
                    filtered.insert(cat.as_str(), files);
                    found = true;
                }
            }
            if !found {
                eprintln!(
                    "warning: category '{}' not found (available: {})",
                    req,
                    all_categories
                        .keys()
                        .map(|k| if k.is_empty() { "(root)" } else { k.as_str() })
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
        }
        filtered
    };

    if run_categories.is_empty() {
        eprintln!("no matching categories found");
        return 1;
    }

    let mut passed = 0usize;
    let mut failures: Vec<TestResult> = Vec::new();

    for (cat, files) in &run_categories {
        let header = if cat.is_empty() { "(root)" } else { *cat };
        eprintln!();
        eprintln!("{}", bold(header, no_color));

        for file in *files {
            let result = run_single_test(file);
            match &result.outcome {
                TestOutcome::Pass => {
                    passed += 1;
                    eprintln!("  {}  {}", pass_label(no_color), label_for(&result));
                }
                TestOutcome::Fail(_) => {
                    eprintln!("  {}  {}", fail_label(no_color), label_for(&result));
                    failures.push(result);
                }
            }
        }
    }

    if !failures.is_empty() {
        print_failures(&failures);
    }
    print_summary(passed, failures.len(), no_color)
}
