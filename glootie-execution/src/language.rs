//! Language-tag resolution and child command planning
//!
//! Maps a language tag plus source text onto the child invocations that run
//! it: inline interpreters, staged script files, and compile-then-run
//! toolchains. Planning is pure; the runner stages the files and spawns the
//! steps.

use std::path::Path;

/// One child invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStep {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandStep {
    fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// How the child invocations compose for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipe {
    /// Single step: interpreter or script run.
    Run(CommandStep),

    /// Two steps: the run step starts only if the compile step exits 0.
    CompileThenRun {
        compile: CommandStep,
        run: CommandStep,
    },
}

/// A file to write into the job's scratch directory before spawning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub name: String,
    pub contents: String,
}

/// Complete launch plan for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub staged: Vec<StagedFile>,
    pub recipe: Recipe,
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn binary_path(scratch: &Path) -> String {
    let name = if cfg!(windows) { "code.exe" } else { "code" };
    path_str(&scratch.join(name))
}

fn python_interpreter() -> &'static str {
    if cfg!(windows) {
        "python"
    } else {
        "python3"
    }
}

fn java_main_wrapper(source: &str) -> String {
    format!(
        "public class Main {{\n    public static void main(String[] args) throws Exception {{\n{source}\n    }}\n}}\n"
    )
}

/// Build the launch plan for `tag`, or `None` for an unsupported runtime.
///
/// `scratch` is the job's private temporary directory; staged file names are
/// relative to it and step arguments reference it by absolute path.
pub fn launch_plan(tag: &str, source: &str, scratch: &Path) -> Option<LaunchPlan> {
    let plan = match tag {
        "nodejs" | "typescript" => LaunchPlan {
            staged: vec![],
            recipe: Recipe::Run(CommandStep::new(
                "node",
                vec!["-e".to_string(), source.to_string()],
            )),
        },

        "python" => LaunchPlan {
            staged: vec![],
            recipe: Recipe::Run(CommandStep::new(
                python_interpreter(),
                vec!["-c".to_string(), source.to_string()],
            )),
        },

        "deno" => {
            let file = scratch.join("code.ts");
            LaunchPlan {
                staged: vec![StagedFile {
                    name: "code.ts".to_string(),
                    contents: source.to_string(),
                }],
                recipe: Recipe::Run(CommandStep::new(
                    "deno",
                    vec![
                        "run".to_string(),
                        "--allow-all".to_string(),
                        path_str(&file),
                    ],
                )),
            }
        }

        "bash" => {
            let file = scratch.join("script.sh");
            LaunchPlan {
                staged: vec![StagedFile {
                    name: "script.sh".to_string(),
                    contents: format!("set -e\n{source}\n"),
                }],
                recipe: Recipe::Run(CommandStep::new("bash", vec![path_str(&file)])),
            }
        }

        "cmd" if cfg!(windows) => {
            let file = scratch.join("script.bat");
            LaunchPlan {
                staged: vec![StagedFile {
                    name: "script.bat".to_string(),
                    contents: format!("@echo off\r\n{source}\r\n"),
                }],
                recipe: Recipe::Run(CommandStep::new(
                    "cmd",
                    vec!["/C".to_string(), path_str(&file)],
                )),
            }
        }

        "go" => {
            let file = scratch.join("code.go");
            LaunchPlan {
                staged: vec![StagedFile {
                    name: "code.go".to_string(),
                    contents: source.to_string(),
                }],
                recipe: Recipe::Run(CommandStep::new(
                    "go",
                    vec!["run".to_string(), path_str(&file)],
                )),
            }
        }

        "rust" => {
            let file = scratch.join("code.rs");
            let binary = binary_path(scratch);
            LaunchPlan {
                staged: vec![StagedFile {
                    name: "code.rs".to_string(),
                    contents: source.to_string(),
                }],
                recipe: Recipe::CompileThenRun {
                    compile: CommandStep::new(
                        "rustc",
                        vec![path_str(&file), "-o".to_string(), binary.clone()],
                    ),
                    run: CommandStep::new(binary, vec![]),
                },
            }
        }

        "c" | "cpp" => {
            let (file_name, compiler) = if tag == "c" {
                ("code.c", "cc")
            } else {
                ("code.cpp", "c++")
            };
            let file = scratch.join(file_name);
            let binary = binary_path(scratch);
            LaunchPlan {
                staged: vec![StagedFile {
                    name: file_name.to_string(),
                    contents: source.to_string(),
                }],
                recipe: Recipe::CompileThenRun {
                    compile: CommandStep::new(
                        compiler,
                        vec!["-o".to_string(), binary.clone(), path_str(&file)],
                    ),
                    run: CommandStep::new(binary, vec![]),
                },
            }
        }

        "java" => {
            let file = scratch.join("Main.java");
            let scratch_dir = path_str(scratch);
            LaunchPlan {
                staged: vec![StagedFile {
                    name: "Main.java".to_string(),
                    contents: java_main_wrapper(source),
                }],
                recipe: Recipe::CompileThenRun {
                    compile: CommandStep::new(
                        "javac",
                        vec![path_str(&file), "-d".to_string(), scratch_dir.clone()],
                    ),
                    run: CommandStep::new(
                        "java",
                        vec!["-cp".to_string(), scratch_dir, "Main".to_string()],
                    ),
                },
            }
        }

        _ => return None,
    };

    Some(plan)
}

/// Normalise the caller-supplied language tag at the facade boundary.
///
/// Shell requests are always forced to the platform shell; otherwise
/// `typescript` and `auto` (and a missing tag) map to `nodejs`.
pub fn normalize_language(tag: Option<&str>, shell: bool) -> String {
    if shell {
        return if cfg!(windows) { "cmd" } else { "bash" }.to_string();
    }

    match tag.map(|t| t.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("auto") | Some("typescript") => "nodejs".to_string(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch() -> PathBuf {
        PathBuf::from("/tmp/glootie_test")
    }

    #[test]
    fn nodejs_runs_inline() {
        let plan = launch_plan("nodejs", "console.log(1)", &scratch()).unwrap();
        assert!(plan.staged.is_empty());
        match plan.recipe {
            Recipe::Run(step) => {
                assert_eq!(step.program, "node");
                assert_eq!(step.args, vec!["-e", "console.log(1)"]);
            }
            other => panic!("expected inline run, got {other:?}"),
        }
    }

    #[test]
    fn typescript_uses_node_too() {
        let plan = launch_plan("typescript", "1", &scratch()).unwrap();
        match plan.recipe {
            Recipe::Run(step) => assert_eq!(step.program, "node"),
            other => panic!("expected inline run, got {other:?}"),
        }
    }

    #[test]
    fn bash_is_staged_with_errexit_prelude() {
        let plan = launch_plan("bash", "echo hi", &scratch()).unwrap();
        assert_eq!(plan.staged.len(), 1);
        assert_eq!(plan.staged[0].name, "script.sh");
        assert!(plan.staged[0].contents.starts_with("set -e\n"));
        assert!(plan.staged[0].contents.contains("echo hi"));
    }

    #[test]
    fn rust_compiles_then_runs() {
        let plan = launch_plan("rust", "fn main() {}", &scratch()).unwrap();
        match plan.recipe {
            Recipe::CompileThenRun { compile, run } => {
                assert_eq!(compile.program, "rustc");
                assert!(run.program.ends_with("code") || run.program.ends_with("code.exe"));
                assert!(run.args.is_empty());
            }
            other => panic!("expected compile+run, got {other:?}"),
        }
    }

    #[test]
    fn java_source_is_wrapped_in_main() {
        let plan = launch_plan("java", "System.out.println(1);", &scratch()).unwrap();
        assert_eq!(plan.staged[0].name, "Main.java");
        assert!(plan.staged[0].contents.contains("public class Main"));
        assert!(plan.staged[0].contents.contains("System.out.println(1);"));
        match plan.recipe {
            Recipe::CompileThenRun { compile, run } => {
                assert_eq!(compile.program, "javac");
                assert_eq!(run.program, "java");
            }
            other => panic!("expected compile+run, got {other:?}"),
        }
    }

    #[test]
    fn unknown_tag_has_no_plan() {
        assert!(launch_plan("cobol", "x", &scratch()).is_none());
    }

    #[cfg(not(windows))]
    #[test]
    fn cmd_is_windows_only() {
        assert!(launch_plan("cmd", "dir", &scratch()).is_none());
    }

    #[test]
    fn normalization_maps_aliases_to_nodejs() {
        assert_eq!(normalize_language(Some("typescript"), false), "nodejs");
        assert_eq!(normalize_language(Some("auto"), false), "nodejs");
        assert_eq!(normalize_language(None, false), "nodejs");
        assert_eq!(normalize_language(Some("Python"), false), "python");
        assert_eq!(normalize_language(Some("go"), false), "go");
    }

    #[cfg(not(windows))]
    #[test]
    fn shell_requests_are_forced_to_bash() {
        assert_eq!(normalize_language(Some("zsh"), true), "bash");
        assert_eq!(normalize_language(Some("sh"), true), "bash");
        assert_eq!(normalize_language(None, true), "bash");
    }
}
