use crate::convert::RewriteResult;
use crate::init_subscriber;
use crate::ir::Definition;
use crate::ir::Module;
use crate::ir::ARGUMENT_REWRITE;
use crate::parser::Parser;
use crate::transform_with;
use crate::Collaborators;
use crate::TransformOptions;
use std::cmp::max;
use std::panic::Location;
use tracing::info;

pub struct Tester;

impl Tester {
    /// Initialize the subscriber for the tests.
    ///
    /// Cannot pass options, since the tests run concurrently.
    pub fn init_tracing() {
        let level = tracing::Level::INFO;
        match init_subscriber(level) {
            Ok(_) => (),
            Err(_e) => (),
        }
    }
    fn point_to_missing_line(expected: &str, index: usize) -> String {
        let mut result = String::new();
        result.push_str("A line is missing from the output:\n");
        result.push_str("```");
        for (i, line) in expected.lines().enumerate() {
            if i == index {
                let msg = format!("{line}   <== missing");
                result.push_str(&format!("\n{msg}"));
            } else {
                result.push_str(&format!("\n{line}"));
            }
        }
        result.push_str("\n```");
        result
    }
    pub fn check_lines_exact(actual: &str, expected: &str, caller: &Location<'_>) {
        let actual = actual.trim();
        let expected = expected.trim();
        let l = max(actual.lines().count(), expected.lines().count());
        for i in 0..l {
            let actual_line = match actual.lines().nth(i) {
                None => panic!("Line {i} not found in output: called from {caller}"),
                Some(actual_line) => actual_line,
            };
            let expected_line = match expected.lines().nth(i) {
                None => panic!("Unexpected line {i} in output: called from {caller}"),
                Some(expected_line) => expected_line,
            };
            assert_eq!(actual_line, expected_line, "called from {}", caller);
        }
    }
    /// Check whether the expected lines are present in the actual output.
    ///
    /// The actual output may contain additional lines that are not in the expected output.
    pub fn check_lines_contain(actual: &str, expected: &str, caller: &Location<'_>) {
        let actual = actual.trim();
        let expected = expected.trim();
        let actual_lines = actual.lines().collect::<Vec<&str>>();
        let mut actual_index = 0;
        'outer: for (i, expected_line) in expected.lines().enumerate() {
            let expected_line = expected_line.trim();
            // If not skipping these, an empty line will match any line (which
            // can then cause the next expected line to be reported as missing).
            if expected_line.is_empty() {
                continue;
            }
            for (j, actual_line) in actual_lines.iter().enumerate().skip(actual_index) {
                if actual_line.contains(expected_line) {
                    actual_index = j + 1;
                    continue 'outer;
                }
            }
            let msg = Self::point_to_missing_line(expected, i);
            panic!("{msg}\nwhen called from {caller}");
        }
    }
    fn print_heading(msg: &str, src: &str) {
        info!("{msg}:\n```\n{src}\n```\n");
    }
    pub fn parse(src: &str) -> (Module, String) {
        let src = src.trim();
        Self::print_heading("Before parse", src);
        let module = Parser::parse(src).unwrap();
        let actual = module.to_string();
        Self::print_heading("After parse", &actual);
        (module, actual)
    }
    /// Run the rewrite with the default collaborators and expect changes.
    pub fn transform(options: &TransformOptions, src: &str) -> (Module, String) {
        Self::transform_with(options, &Collaborators::default(), src)
    }
    pub fn transform_with(
        options: &TransformOptions,
        collaborators: &Collaborators,
        src: &str,
    ) -> (Module, String) {
        let src = src.trim();
        let module = Parser::parse(src).unwrap();
        let msg = format!("Before ({} mode)", options.mode());
        Self::print_heading(&msg, src);
        let result = transform_with(&module, options, collaborators).unwrap();
        let module = match result {
            RewriteResult::Changed(module) => module,
            RewriteResult::Unchanged => panic!("Expected changes"),
        };
        let actual = module.to_string();
        let msg = format!("After ({} mode)", options.mode());
        Self::print_heading(&msg, &actual);
        (module, actual)
    }
    /// Run some extra verification on a rewritten module.
    ///
    /// Catches problems that are not visible in the textual representation
    /// of a single call site: calls of symbols that are no longer bound, and
    /// artifacts that still carry a rewrite annotation (which would make the
    /// next run rewrite them again).
    pub fn verify(module: &Module) {
        let dangling = module.dangling();
        assert!(dangling.is_empty(), "calls of unbound symbols: {dangling:?}");
        for (name, definition) in module.iter() {
            if let Definition::Artifact(artifact) = definition {
                assert!(
                    artifact.attr(ARGUMENT_REWRITE).is_none(),
                    "artifact @{name} still carries a rewrite annotation"
                );
            }
        }
    }
}
