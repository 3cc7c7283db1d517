use std::path::{Path, PathBuf};

use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::tokenizer::tokenize;

/// Placeholder that every run command template must contain.
pub const SCENARIO_NAME_PLACEHOLDER: &str = "<scenario_name>";

/// Leading token that selects module-style invocation.
pub const MODULE_FLAG: &str = "-m";

/// A run command template expanded for one scenario. Derived once per run, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Run a program file through the interpreter.
    Program { path: PathBuf, args: Vec<String> },
    /// Run a named module through the interpreter's `-m` facility.
    Module { name: String, args: Vec<String> },
}

impl Invocation {
    /// The arguments passed to the interpreter for this invocation, before extra flags.
    pub fn interpreter_args(&self) -> Vec<String> {
        match self {
            Invocation::Program { path, args } => {
                let mut out = vec![path.display().to_string()];
                out.extend(args.iter().cloned());
                out
            }
            Invocation::Module { name, args } => {
                let mut out = vec![MODULE_FLAG.to_string(), name.clone()];
                out.extend(args.iter().cloned());
                out
            }
        }
    }
}

/// Expand `template` for `scenario_name` and parse it into a typed invocation.
///
/// The template must contain [`SCENARIO_NAME_PLACEHOLDER`]; every occurrence is replaced
/// with the scenario name before tokenizing. A leading [`MODULE_FLAG`] selects module
/// invocation, otherwise the first token is a program path resolved against `base_path`
/// when it is relative. Failures here abort the run before any process is created.
pub fn build_invocation(
    template: &str,
    scenario_name: &str,
    base_path: &Path,
) -> OrchestratorResult<Invocation> {
    if !template.contains(SCENARIO_NAME_PLACEHOLDER) {
        return Err(OrchestratorError::Configuration(format!(
            "Run command template must contain the '{SCENARIO_NAME_PLACEHOLDER}' placeholder"
        )));
    }

    let expanded = template.replace(SCENARIO_NAME_PLACEHOLDER, scenario_name);
    let mut tokens = tokenize(&expanded);
    if tokens.is_empty() {
        return Err(OrchestratorError::Configuration(
            "Run command template expands to an empty command".to_string(),
        ));
    }

    if tokens[0] == MODULE_FLAG {
        if tokens.len() < 2 {
            return Err(OrchestratorError::Configuration(format!(
                "Run command template uses '{MODULE_FLAG}' without a module name"
            )));
        }
        let name = tokens.remove(1);
        tokens.remove(0);
        Ok(Invocation::Module { name, args: tokens })
    } else {
        let first = tokens.remove(0);
        let path = PathBuf::from(&first);
        let path = if path.is_absolute() {
            path
        } else {
            base_path.join(path)
        };
        Ok(Invocation::Program { path, args: tokens })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn program_template_resolves_against_base_path() {
        let invocation =
            build_invocation("<scenario_name>.py --flag", "run1", Path::new("/base")).unwrap();
        assert_eq!(
            invocation,
            Invocation::Program {
                path: PathBuf::from("/base/run1.py"),
                args: vec!["--flag".to_string()],
            }
        );
    }

    #[test]
    fn absolute_program_path_is_kept() {
        let invocation =
            build_invocation("/opt/tools/<scenario_name>.py", "run1", Path::new("/base")).unwrap();
        assert_eq!(
            invocation,
            Invocation::Program {
                path: PathBuf::from("/opt/tools/run1.py"),
                args: vec![],
            }
        );
    }

    #[test]
    fn module_template_is_parsed() {
        let invocation = build_invocation(
            "-m pkg.mod --x 1 --name <scenario_name>",
            "run1",
            Path::new("/base"),
        )
        .unwrap();
        assert_eq!(
            invocation,
            Invocation::Module {
                name: "pkg.mod".to_string(),
                args: vec![
                    "--x".to_string(),
                    "1".to_string(),
                    "--name".to_string(),
                    "run1".to_string()
                ],
            }
        );
    }

    #[test]
    fn substitution_replaces_only_the_placeholder() {
        let invocation =
            build_invocation("runner_<scenario_name>_v2.py", "abc", Path::new("/base")).unwrap();
        assert_eq!(
            invocation,
            Invocation::Program {
                path: PathBuf::from("/base/runner_abc_v2.py"),
                args: vec![],
            }
        );
    }

    #[test]
    fn missing_placeholder_is_a_configuration_error() {
        let err = build_invocation("run.py --flag", "run1", Path::new("/base")).unwrap_err();
        assert!(matches!(
            err,
            crate::errors::OrchestratorError::Configuration(_)
        ));
    }

    #[test]
    fn module_flag_without_name_is_a_configuration_error() {
        // Expands to "-m " once the empty scenario name is substituted.
        let err = build_invocation("-m <scenario_name>", "", Path::new("/base")).unwrap_err();
        assert!(matches!(
            err,
            crate::errors::OrchestratorError::Configuration(_)
        ));
    }

    #[test]
    fn interpreter_args_for_module() {
        let invocation = Invocation::Module {
            name: "pkg.mod".to_string(),
            args: vec!["--x".to_string()],
        };
        assert_eq!(invocation.interpreter_args(), vec!["-m", "pkg.mod", "--x"]);
    }
}
