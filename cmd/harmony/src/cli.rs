use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "harmony",
    version,
    about = "Harmony concurrency verifier",
    long_about = "Exhaustively explores the reachable states of a compiled Harmony \
                  program and reports safety violations, non-terminating executions \
                  and stopped processes with shortest counter-example traces."
)]
pub struct Cli {
    #[arg(
        short = 'a',
        long = "listing",
        help = "Print the instruction listing and exit without verifying",
        help_heading = "Output options"
    )]
    pub listing: bool,
    #[arg(
        short = 'b',
        long = "blocking",
        help = "Treat states whose enabled edges are all self-loops as termination targets",
        help_heading = "Verification options"
    )]
    pub blocking: bool,
    #[arg(
        short = 'c',
        long = "const",
        value_name = "NAME=EXPR",
        help = "Define a compile-time constant, overriding the compiled value",
        long_help = "EXPR is a JSON scalar (number, boolean, string-as-atom) or a tagged \
                     value object as used in the program wire format.",
        help_heading = "Verification options"
    )]
    pub constants: Vec<String>,
    #[arg(
        short = 'd',
        long = "dump",
        help = "Write the full state graph to harmony.json",
        help_heading = "Output options"
    )]
    pub dump: bool,
    #[arg(
        short = 'm',
        long = "module",
        value_name = "MOD=VER",
        help = "Require a module version the program was compiled with",
        help_heading = "Verification options"
    )]
    pub modules: Vec<String>,
    #[arg(required = true, value_name = "FILE", help = "Compiled program file(s)")]
    pub files: Vec<PathBuf>,
}

/// Split a `NAME=VALUE` option argument.
pub fn parse_pair(spec: &str, flag: char) -> eyre::Result<(String, String)> {
    spec.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| eyre::eyre!("usage: -{flag} NAME=VALUE, got {spec:?}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn pair_parsing() {
        assert_eq!(
            parse_pair("N=5", 'c').unwrap(),
            ("N".to_string(), "5".to_string())
        );
        assert!(parse_pair("N", 'c').is_err());
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::parse_from(["harmony", "-a", "-b", "-c", "N=5", "prog.json"]);
        assert!(cli.listing);
        assert!(cli.blocking);
        assert_eq!(cli.constants, vec!["N=5".to_string()]);
        assert_eq!(cli.files.len(), 1);
    }
}
