use anyhow::Result;
use callconv::convert::RewriteResult;
use callconv::init_subscriber;
use callconv::parser::Parser;
use callconv::transform;
use callconv::TransformOptions;
use clap::ArgMatches;
use clap::Args;
use clap::Command;
use std::io::Read;
use tracing::Level;

/// Rewrite call sites of rescheduled kernels to their new calling convention
#[derive(Args, Debug)]
#[command(version, about)]
struct CallconvArgs {
    /// The input file (- is interpreted as stdin)
    #[arg(default_value = "-")]
    input: String,
    /// Print debug logs
    #[arg(long)]
    debug: bool,
}

fn cli() -> Command {
    let cli = Command::new("callconv").args(callconv::default_arguments());
    CallconvArgs::augment_args(cli)
}

fn parse_and_transform(src: &str, matches: &ArgMatches) -> Result<String> {
    let options = TransformOptions::from_matches(matches)?;
    let module = Parser::parse(src)?;
    let result = match transform(&module, &options)? {
        RewriteResult::Changed(module) => module.to_string(),
        RewriteResult::Unchanged => module.to_string(),
    };
    Ok(result)
}

fn main() -> Result<()> {
    let matches = cli().get_matches();
    if matches.get_flag("debug") {
        init_subscriber(Level::DEBUG)?;
    }
    let input = match matches.get_one::<String>("input") {
        Some(input) => input.as_str(),
        None => "-",
    };
    let input_text = if input == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(input)?
    };

    let result = parse_and_transform(&input_text, &matches)?;
    println!("{result}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use callconv::tester::Tester;
    use indoc::indoc;
    use std::panic::Location;

    fn run_app(args: Vec<&str>, input_text: &str) -> Result<String> {
        let matches = cli().try_get_matches_from(args)?;
        parse_and_transform(input_text, &matches)
    }

    #[test]
    fn test_help() {
        let args = vec!["callconv", "--help"];
        let result = run_app(args, "");
        let err = match result {
            Ok(_) => panic!("Expected an error"),
            Err(e) => e,
        };
        let result = err.to_string();
        assert!(result.contains("Usage: callconv"));
        assert!(result.contains("--on-missing-hook"));
    }

    #[test]
    fn test_invalid_args() {
        let result = run_app(vec!["callconv", "--mode", "eager"], "");
        assert!(result.is_err());
    }

    #[test]
    fn test_deferred_replay() {
        Tester::init_tracing();
        let src = indoc! {r#"
        module {
          kernel @fused_layout(%x: Tensor[(16), float32]) attributes {post_schedule_argument_rewrite = "module {\n  def @backward(%p0: Tensor[(4, 4), float32]) -> (Tensor[(16), float32],) {\n    (reshape(%p0) : Tensor[(16), float32],)\n  }\n  def @forward(%x: Tensor[(16), float32]) -> (Tensor[(4, 4), float32],) {\n    (reshape(%x) : Tensor[(4, 4), float32],)\n  }\n}"} {
            %x
          }
          def @main(%a: Tensor[(16), float32]) -> Tensor[(16), float32] {
            call_lowered(@fused_layout, %a) attributes {relay_to_kernel = true} : Tensor[(16), float32]
          }
        }"#};
        let args = vec!["callconv", "--mode", "deferred", "--target", "edgex"];
        let actual = run_app(args, src).unwrap();
        let expected = indoc! {"
          artifact @fused_layout(%x: Tensor[(16), float32]) on \"edgex\" {
          call_lowered(@fused_layout, reshape(%a) : Tensor[(4, 4), float32]) attributes {relay_to_kernel = true} : Tensor[(16), float32]
        "};
        Tester::check_lines_contain(&actual, expected, Location::caller());
        assert!(!actual.contains("post_schedule_argument_rewrite"));
    }

    #[test]
    fn test_missing_target() {
        let src = indoc! {"
        def @main(%a: Tensor[(4), float32]) -> Tensor[(4), float32] {
          fn (%x: Tensor[(4), float32]) -> Tensor[(4), float32] attributes {Primitive = 1} {
            negative(%x) : Tensor[(4), float32]
          }(%a)
        }"};
        let err = run_app(vec!["callconv"], src).unwrap_err();
        assert!(err.to_string().contains("device planning"));
    }
}
